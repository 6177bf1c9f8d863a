//! Remote node view
//!
//! The subset of a remote node's attributes the orchestration layer looks
//! at when the engine reports tree changes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{NodeHandle, TransferTag};

/// Kind of a remote node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Folder,
}

/// A remote node as reported in a nodes-updated event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub handle: NodeHandle,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    /// Tag of the transfer that produced the node, if this session made it
    pub tag: Option<TransferTag>,
    /// Local file the node was uploaded from, when the engine knows it
    pub local_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    /// The node was deleted
    pub removed: bool,
    /// The node was deleted by the sync engine itself
    pub sync_deleted: bool,
}

impl NodeInfo {
    pub fn new(handle: NodeHandle, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            handle,
            name: name.into(),
            kind,
            size: 0,
            tag: None,
            local_path: None,
            created_at: Utc::now(),
            removed: false,
            sync_deleted: false,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// True for a node another client added while this one was away or running
    ///
    /// Nodes carrying a transfer tag came from this session, deleted nodes are
    /// not additions, and anything older than the last exit was already seen.
    pub fn is_foreign(&self, last_exit: DateTime<Utc>) -> bool {
        self.tag.is_none() && !self.removed && !self.sync_deleted && self.created_at > last_exit
    }
}
