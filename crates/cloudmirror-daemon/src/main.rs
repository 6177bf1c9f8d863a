//! CloudMirror Daemon - Background sync client service
//!
//! This binary runs as a user service and handles:
//! - Engine callback orchestration (login, sync pairs, transfers, quota)
//! - Network change detection and connectivity diagnostics
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Restart requests for updates
//!
//! # Architecture
//!
//! The daemon builds the orchestration context over the loopback engine and
//! log-backed presentation adapters, then runs the orchestration loop until
//! the user exits, an update asks for a restart, or a `CancellationToken`
//! is triggered by SIGTERM or SIGINT.

mod adapters;
mod loopback;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cloudmirror_core::{
    config::{Config, LoggingConfig},
    ports::Ports,
    store::YamlPreferences,
};
use cloudmirror_sync::{
    network::{NetworkWatcher, SystemInterfaces},
    Dispatcher, Orchestrator, OrchestratorHandle, RunOutcome,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::{LogNotifier, LogPlatform};
use crate::loopback::LoopbackEngine;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "cloudmirrord", version, about = "CloudMirror background sync daemon")]
struct Args {
    /// Configuration file [default: $XDG_CONFIG_HOME/cloudmirror/config.yaml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preferences file [default: $XDG_DATA_HOME/cloudmirror/preferences.yaml]
    #[arg(long)]
    preferences: Option<PathBuf>,

    /// Overrides `logging.level`
    #[arg(long)]
    log_level: Option<String>,

    /// Overrides `logging.format` (text or json)
    #[arg(long)]
    log_format: Option<String>,

    /// Overrides `loopback.remote_root`
    #[arg(long)]
    remote_root: Option<PathBuf>,
}

impl Args {
    /// Loads the configuration file and applies command-line overrides
    ///
    /// A missing file means defaults; an unreadable or malformed one is fatal.
    fn load_config(&self) -> Result<(Config, PathBuf)> {
        let path = self.config.clone().unwrap_or_else(Config::default_path);
        let mut config = if path.exists() {
            Config::load(&path).context("Failed to load configuration")?
        } else {
            Config::default()
        };
        self.apply(&mut config);
        Ok((config, path))
    }

    fn apply(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if let Some(root) = &self.remote_root {
            config.loopback.remote_root = root.clone();
        }
    }

    fn preferences_path(&self) -> PathBuf {
        self.preferences
            .clone()
            .unwrap_or_else(YamlPreferences::default_path)
    }
}

// ============================================================================
// Tracing
// ============================================================================

/// `RUST_LOG` wins over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&logging.level))
        .with_target(true);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the configuration and builds the orchestration context
struct DaemonService {
    config: Config,
    preferences_path: PathBuf,
    /// Token for signalling graceful shutdown to the orchestration loop
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, preferences_path: PathBuf, shutdown: CancellationToken) -> Self {
        Self {
            config,
            preferences_path,
            shutdown,
        }
    }

    /// Wires the ports, dispatcher and network watcher into an orchestrator
    fn build(&self) -> Result<(Orchestrator, OrchestratorHandle)> {
        let preferences = YamlPreferences::open_or_empty(&self.preferences_path);
        info!(
            path = %self.preferences_path.display(),
            pairs = preferences.data().sync_pairs.len(),
            "Loaded preferences"
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        let engine = LoopbackEngine::spawn(&self.config.loopback, sender.clone())?;

        let ports = Ports::new(
            Box::new(engine),
            Box::new(preferences),
            Box::new(LogPlatform),
            Box::new(LogNotifier::default()),
        );
        let dispatcher = Dispatcher::new(&self.config, ports);
        let watcher = NetworkWatcher::new(
            Box::new(SystemInterfaces),
            self.config.network.max_idle(),
            self.config.network.pool_refresh_every,
            Utc::now(),
        );

        Ok(Orchestrator::with_queue(
            dispatcher,
            watcher,
            self.config.network.poll_interval(),
            self.shutdown.clone(),
            (sender, receiver),
        ))
    }

    /// Runs the orchestration loop to completion
    async fn run(&self) -> Result<RunOutcome> {
        let (orchestrator, handle) = self.build()?;
        let outcome = orchestrator.run().await;

        let status = handle.status.borrow().clone();
        if let Some(percent) = status.storage_percent() {
            info!(storage_percent = percent, "Account storage in use");
        }
        match serde_json::to_string(&status) {
            Ok(json) => info!(status = %json, "Final status"),
            Err(e) => warn!(error = %e, "Failed to serialize final status"),
        }
        Ok(outcome)
    }
}

/// Starts a fresh copy of this executable with the same arguments
fn relaunch() -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate the daemon executable")?;
    std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .spawn()
        .with_context(|| format!("Failed to relaunch {}", exe.display()))?;
    info!(exe = %exe.display(), "Relaunched for update");
    Ok(())
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = args.load_config()?;

    init_tracing(&config.logging);
    info!(config_path = %config_path.display(), "CloudMirror daemon starting (cloudmirrord)");

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(field = %e.field, message = %e.message, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, args.preferences_path(), shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(RunOutcome::Exited) => info!("CloudMirror daemon shut down gracefully"),
        Ok(RunOutcome::Restart) => {
            info!("CloudMirror daemon restarting for update");
            relaunch()?;
        }
        Err(e) => error!(error = %e, "CloudMirror daemon exiting with error"),
    }

    result.map(|_| ())
}

// ============================================================================
// Tests
// ============================================================================
