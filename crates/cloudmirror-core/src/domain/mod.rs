//! Domain entities and business logic
//!
//! This module contains the core domain types for CloudMirror:
//! - Newtypes for the engine's opaque identifiers
//! - Sync pair configuration, state machine and disable reasons
//! - Transfer directions, requests and progress snapshots
//! - Account quota, credentials and login session state
//! - Remote node view, proxy settings and exclusion rules
//! - Engine and domain error types

pub mod account;
pub mod engine_error;
pub mod errors;
pub mod exclusions;
pub mod newtypes;
pub mod node;
pub mod proxy;
pub mod session;
pub mod sync_pair;
pub mod transfer;

// Re-export commonly used types
pub use account::{AccountDetails, AccountQuotaState, Credentials};
pub use engine_error::{EngineError, EngineErrorCode};
pub use errors::DomainError;
pub use exclusions::{ExclusionRules, SizeLimit};
pub use newtypes::*;
pub use node::{NodeInfo, NodeKind};
pub use proxy::{ProxyCredentials, ProxyEndpoint, ProxyProtocol, ProxySettings};
pub use session::SessionState;
pub use sync_pair::{
    DisableReason, SyncFailureContext, SyncPairConfig, SyncPairState, DEFAULT_TRASH_ROOT,
};
pub use transfer::{TransferDirection, TransferInfo, TransferRequest, UploadLimit};
