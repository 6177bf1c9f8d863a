//! Orchestration loop
//!
//! A single task owns the [`Dispatcher`] and reacts to four sources with
//! `tokio::select!`:
//!
//! - messages on the single-consumer queue (engine callbacks, UI commands,
//!   probe outcomes)
//! - the network poll tick
//! - the login deadline, when a login or tree fetch is in flight
//! - the shutdown token
//!
//! Engine worker threads only ever touch the queue sender, so every piece of
//! orchestration state is mutated from this one task. A [`StatusSnapshot`]
//! is published on a `watch` channel after every step.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::{Control, Dispatcher};
use crate::events::{Message, UiCommand};
use crate::network::{NetworkWatcher, PollOutcome};
use crate::probe::{ConnectivityProbe, ProbeError, ProbeRequest};
use crate::status::StatusSnapshot;

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit requested by the user or by a shutdown signal
    Exited,
    /// Exit to restart the process for an update
    Restart,
}

/// Endpoints used by everything outside the loop
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    /// Queue sender; safe to call from engine worker threads
    pub messages: mpsc::UnboundedSender<Message>,
    pub status: watch::Receiver<StatusSnapshot>,
}

/// Owns the dispatcher and runs the event loop
pub struct Orchestrator {
    dispatcher: Dispatcher,
    watcher: NetworkWatcher,
    poll_interval: Duration,
    receiver: mpsc::UnboundedReceiver<Message>,
    sender: mpsc::UnboundedSender<Message>,
    status: watch::Sender<StatusSnapshot>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Dispatcher,
        watcher: NetworkWatcher,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> (Self, OrchestratorHandle) {
        Self::with_queue(
            dispatcher,
            watcher,
            poll_interval,
            shutdown,
            mpsc::unbounded_channel(),
        )
    }

    /// Like [`Orchestrator::new`], over a queue created by the caller
    ///
    /// Lets an engine adapter hold the sender before the dispatcher that
    /// owns the engine exists.
    pub fn with_queue(
        dispatcher: Dispatcher,
        watcher: NetworkWatcher,
        poll_interval: Duration,
        shutdown: CancellationToken,
        queue: (mpsc::UnboundedSender<Message>, mpsc::UnboundedReceiver<Message>),
    ) -> (Self, OrchestratorHandle) {
        let (sender, receiver) = queue;
        let (status, status_rx) = watch::channel(dispatcher.snapshot());
        let handle = OrchestratorHandle {
            messages: sender.clone(),
            status: status_rx,
        };
        let orchestrator = Self {
            dispatcher,
            watcher,
            poll_interval,
            receiver,
            sender,
            status,
            shutdown,
        };
        (orchestrator, handle)
    }

    /// Runs until exit, restart or shutdown
    pub async fn run(mut self) -> RunOutcome {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting orchestration loop"
        );
        self.dispatcher.start(Utc::now());
        self.publish();

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let login_deadline = self
                .dispatcher
                .login_timer_remaining(Utc::now())
                .map(|remaining| Instant::now() + remaining);

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    self.dispatcher.handle(Message::Ui(UiCommand::Exit), Utc::now());
                    self.publish();
                    return RunOutcome::Exited;
                }
                message = self.receiver.recv() => {
                    let Some(message) = message else {
                        warn!("Message queue closed");
                        self.dispatcher.handle(Message::Ui(UiCommand::Exit), Utc::now());
                        self.publish();
                        return RunOutcome::Exited;
                    };
                    match self.dispatcher.handle(message, Utc::now()) {
                        Control::Continue => {}
                        Control::Exit => {
                            self.publish();
                            return RunOutcome::Exited;
                        }
                        Control::Restart => {
                            self.publish();
                            return RunOutcome::Restart;
                        }
                    }
                }
                _ = interval.tick() => {
                    let outcome = self.dispatcher.poll_network(&mut self.watcher, Utc::now());
                    if outcome != PollOutcome::Unchanged {
                        debug!(?outcome, "Network poll");
                    }
                }
                _ = sleep_until(login_deadline) => {
                    if let Some(request) = self.dispatcher.on_login_timeout(Utc::now()) {
                        self.spawn_probe(request);
                    }
                }
            }

            self.publish();
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.dispatcher.snapshot());
    }

    /// Runs the connectivity check off the loop and queues its outcome
    fn spawn_probe(&self, request: ProbeRequest) {
        let sender = self.sender.clone();
        let probe = match ConnectivityProbe::new(request) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Unable to build the connectivity check");
                if sender.send(Message::ProbeFinished(Err(e))).is_err() {
                    debug!("Message queue closed, dropping probe outcome");
                }
                return;
            }
        };

        let outcome = probe.start_check();
        tokio::spawn(async move {
            let outcome = outcome.await.unwrap_or(Err(ProbeError::Aborted));
            if sender.send(Message::ProbeFinished(outcome)).is_err() {
                debug!("Message queue closed, dropping probe outcome");
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use cloudmirror_core::config::ConfigBuilder;
    use cloudmirror_core::domain::{SessionState, SessionToken};
    use cloudmirror_core::store::PreferencesData;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::events::{EngineEvent, FinishedRequest};
    use crate::testing::{StaticInterfaces, TestHarness};

    fn watcher() -> NetworkWatcher {
        NetworkWatcher::new(
            Box::new(StaticInterfaces::default()),
            Duration::from_secs(600),
            6,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_exit_command_ends_loop() {
        let h = TestHarness::new();
        let engine = h.engine.clone();
        let config = ConfigBuilder::new().build();
        let dispatcher = Dispatcher::new(&config, h.ports);
        let (orchestrator, handle) = Orchestrator::new(
            dispatcher,
            watcher(),
            Duration::from_millis(20),
            CancellationToken::new(),
        );

        handle.messages.send(UiCommand::Exit.into()).unwrap();
        let outcome = orchestrator.run().await;

        assert_eq!(outcome, RunOutcome::Exited);
        assert_eq!(engine.count("remove_all_syncs"), 1);
        assert_eq!(handle.status.borrow().session, SessionState::SetupRequired);
    }

    #[tokio::test]
    async fn test_shutdown_token_runs_exit_sequence() {
        let h = TestHarness::new();
        let engine = h.engine.clone();
        let config = ConfigBuilder::new().build();
        let token = CancellationToken::new();
        let (orchestrator, _handle) = Orchestrator::new(
            Dispatcher::new(&config, h.ports),
            watcher(),
            Duration::from_millis(20),
            token.clone(),
        );

        let task = tokio::spawn(orchestrator.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        assert_eq!(task.await.unwrap(), RunOutcome::Exited);
        assert_eq!(engine.count("remove_all_syncs"), 1);
        assert!(engine.count("refresh_connection_pool") >= 1);
    }

    #[tokio::test]
    async fn test_status_follows_messages() {
        let data = PreferencesData {
            session: Some(SessionToken::new("sess").unwrap()),
            ..Default::default()
        };
        let h = TestHarness::with_preferences(data);
        let config = ConfigBuilder::new().build();
        let token = CancellationToken::new();
        let (orchestrator, mut handle) = Orchestrator::new(
            Dispatcher::new(&config, h.ports),
            watcher(),
            Duration::from_secs(60),
            token.clone(),
        );
        let task = tokio::spawn(orchestrator.run());

        handle
            .messages
            .send(
                EngineEvent::RequestFinished {
                    request: FinishedRequest::Login,
                    error: None,
                }
                .into(),
            )
            .unwrap();

        let reached = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if handle.status.borrow_and_update().session == SessionState::FetchingNodes {
                    break;
                }
                if handle.status.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(reached.is_ok());

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_hung_login_runs_connectivity_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("captive portal"))
            .mount(&server)
            .await;

        let data = PreferencesData {
            session: Some(SessionToken::new("sess").unwrap()),
            ..Default::default()
        };
        let h = TestHarness::with_preferences(data);
        let notifier = h.notifier.clone();
        let config = ConfigBuilder::new()
            .login_max_login_time_ms(50)
            .connectivity_test_url(server.uri())
            .connectivity_timeout_ms(2000)
            .build();
        let token = CancellationToken::new();
        let (orchestrator, _handle) = Orchestrator::new(
            Dispatcher::new(&config, h.ports),
            watcher(),
            Duration::from_secs(60),
            token.clone(),
        );
        let task = tokio::spawn(orchestrator.run());

        for _ in 0..200 {
            if !notifier.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        task.await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Connection problem");
    }
}
