//! Configuration module for CloudMirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//!
//! This is the operator's configuration of the daemon itself (timers, probe
//! endpoint, logging). The user's sync pairs and account settings live in the
//! preferences store instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for CloudMirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub login: LoginConfig,
    pub connectivity: ConnectivityConfig,
    pub quota: QuotaConfig,
    pub notifications: NotificationsConfig,
    pub transfers: TransfersConfig,
    pub logging: LoggingConfig,
    pub loopback: LoopbackConfig,
}

/// Network change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Milliseconds between interface snapshots.
    pub poll_interval_ms: u64,
    /// Force a reconnect after this long without a confirmed-active network.
    pub max_idle_ms: u64,
    /// Refresh the engine's connection pool every N poll ticks.
    pub pool_refresh_every: u32,
}

/// Login sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// A login or tree fetch running longer than this triggers the
    /// connectivity diagnostic.
    pub max_login_time_ms: u64,
}

/// Connectivity diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Known-good endpoint fetched by the probe.
    pub test_url: String,
    /// The probe succeeds only if the response body contains this.
    pub test_substring: String,
    pub timeout_ms: u64,
}

/// Account quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Minimum interval between account-details requests.
    pub min_stats_interval_ms: u64,
}

/// Notification throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Minimum interval between "files added by another client" notices.
    pub min_foreign_nodes_interval_ms: u64,
}

/// Upload tag correlation cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransfersConfig {
    /// Seconds an unmatched upload tag is kept.
    pub tag_ttl_secs: u64,
    /// Maximum number of unmatched upload tags.
    pub tag_capacity: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Output format (`text` or `json`).
    pub format: String,
}

/// Loopback engine used by the daemon when no real engine is linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Directory presented as the remote account.
    pub remote_root: PathBuf,
    /// Storage size reported for the loopback account, in bytes.
    pub storage_quota_bytes: u64,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cloudmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudmirror")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_idle_ms: 600_000,
            pool_refresh_every: 6,
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_login_time_ms: 30_000,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            test_url: "https://g.api.mega.co.nz/cs".to_string(),
            test_substring: "-2".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            min_stats_interval_ms: 300_000,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            min_foreign_nodes_interval_ms: 60_000,
        }
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            tag_ttl_secs: 3_600,
            tag_capacity: 4_096,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            remote_root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("cloudmirror")
                .join("remote"),
            storage_quota_bytes: 20 * 1024 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Duration accessors
// ---------------------------------------------------------------------------

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

impl LoginConfig {
    pub fn max_login_time(&self) -> Duration {
        Duration::from_millis(self.max_login_time_ms)
    }
}

impl ConnectivityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl QuotaConfig {
    pub fn min_stats_interval(&self) -> Duration {
        Duration::from_millis(self.min_stats_interval_ms)
    }
}

impl NotificationsConfig {
    pub fn min_foreign_nodes_interval(&self) -> Duration {
        Duration::from_millis(self.min_foreign_nodes_interval_ms)
    }
}

impl TransfersConfig {
    pub fn tag_ttl(&self) -> Duration {
        Duration::from_secs(self.tag_ttl_secs)
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"network.poll_interval_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- network ---
        positive(&mut errors, "network.poll_interval_ms", self.network.poll_interval_ms);
        positive(&mut errors, "network.max_idle_ms", self.network.max_idle_ms);
        positive(
            &mut errors,
            "network.pool_refresh_every",
            u64::from(self.network.pool_refresh_every),
        );
        if self.network.max_idle_ms > 0 && self.network.max_idle_ms < self.network.poll_interval_ms
        {
            errors.push(ValidationError {
                field: "network.max_idle_ms".into(),
                message: "must not be shorter than network.poll_interval_ms".into(),
            });
        }

        // --- login ---
        positive(&mut errors, "login.max_login_time_ms", self.login.max_login_time_ms);

        // --- connectivity ---
        let url = &self.connectivity.test_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "connectivity.test_url".into(),
                message: format!("must be an http(s) URL, got '{url}'"),
            });
        }
        if self.connectivity.test_substring.is_empty() {
            errors.push(ValidationError {
                field: "connectivity.test_substring".into(),
                message: "must not be empty".into(),
            });
        }
        positive(&mut errors, "connectivity.timeout_ms", self.connectivity.timeout_ms);

        // --- quota / notifications ---
        positive(
            &mut errors,
            "quota.min_stats_interval_ms",
            self.quota.min_stats_interval_ms,
        );
        positive(
            &mut errors,
            "notifications.min_foreign_nodes_interval_ms",
            self.notifications.min_foreign_nodes_interval_ms,
        );

        // --- transfers ---
        positive(&mut errors, "transfers.tag_ttl_secs", self.transfers.tag_ttl_secs);
        positive(
            &mut errors,
            "transfers.tag_capacity",
            self.transfers.tag_capacity as u64,
        );

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}', expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        // --- loopback ---
        if self.loopback.remote_root.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "loopback.remote_root".into(),
                message: "must not be empty".into(),
            });
        }
        positive(
            &mut errors,
            "loopback.storage_quota_bytes",
            self.loopback.storage_quota_bytes,
        );

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and lets callers override individual fields.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder pre-populated with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- network ---

    pub fn network_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.network.poll_interval_ms = ms;
        self
    }

    pub fn network_max_idle_ms(mut self, ms: u64) -> Self {
        self.config.network.max_idle_ms = ms;
        self
    }

    pub fn network_pool_refresh_every(mut self, ticks: u32) -> Self {
        self.config.network.pool_refresh_every = ticks;
        self
    }

    // --- login ---

    pub fn login_max_login_time_ms(mut self, ms: u64) -> Self {
        self.config.login.max_login_time_ms = ms;
        self
    }

    // --- connectivity ---

    pub fn connectivity_test_url(mut self, url: impl Into<String>) -> Self {
        self.config.connectivity.test_url = url.into();
        self
    }

    pub fn connectivity_test_substring(mut self, substring: impl Into<String>) -> Self {
        self.config.connectivity.test_substring = substring.into();
        self
    }

    pub fn connectivity_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connectivity.timeout_ms = ms;
        self
    }

    // --- quota / notifications ---

    pub fn quota_min_stats_interval_ms(mut self, ms: u64) -> Self {
        self.config.quota.min_stats_interval_ms = ms;
        self
    }

    pub fn notifications_min_foreign_nodes_interval_ms(mut self, ms: u64) -> Self {
        self.config.notifications.min_foreign_nodes_interval_ms = ms;
        self
    }

    // --- transfers ---

    pub fn transfers_tag_ttl_secs(mut self, secs: u64) -> Self {
        self.config.transfers.tag_ttl_secs = secs;
        self
    }

    pub fn transfers_tag_capacity(mut self, capacity: usize) -> Self {
        self.config.transfers.tag_capacity = capacity;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- loopback ---

    pub fn loopback_remote_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.loopback.remote_root = root.into();
        self
    }

    pub fn loopback_storage_quota_bytes(mut self, bytes: u64) -> Self {
        self.config.loopback.storage_quota_bytes = bytes;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
