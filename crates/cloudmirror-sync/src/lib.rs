//! CloudMirror Sync - Engine event orchestration
//!
//! Provides the layer between the external sync engine's callback stream and
//! the rest of the client:
//! - Network change detection and forced reconnects
//! - Connectivity diagnostics for hung logins
//! - Destination-pending transfer batches
//! - Sync pair start/stop/disable with failure classification
//! - Over-quota suspension and account-stats rate limiting
//!
//! ## Modules
//!
//! - [`dispatcher`] - Single funnel for engine callbacks and UI commands
//! - [`orchestrator`] - The `tokio::select!` loop that drives the dispatcher
//! - [`lifecycle`] - Sync pair state machine
//! - [`transfer_queue`] - User transfers awaiting a destination
//! - [`quota`] - Over-quota suspension and stats rate limiting
//! - [`network`] - Interface snapshots and reconnect triggers
//! - [`probe`] - Proxy-aware reachability check
//! - [`events`] - Typed messages on the orchestration queue
//! - `testing` - Recording port doubles for tests (`test-util` feature)

pub mod dispatcher;
pub mod events;
pub mod lifecycle;
pub mod network;
pub mod orchestrator;
pub mod probe;
pub mod quota;
pub mod stats;
pub mod status;
pub mod tag_cache;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transfer_queue;

pub use dispatcher::{Control, Dispatcher};
pub use events::{EngineEvent, FinishedRequest, Message, RequestKind, UiCommand};
pub use orchestrator::{Orchestrator, OrchestratorHandle, RunOutcome};
pub use status::StatusSnapshot;
