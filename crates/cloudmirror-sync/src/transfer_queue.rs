//! User-initiated transfer queue
//!
//! Uploads and downloads requested by the user wait here until the
//! presentation layer resolves a destination (or the user cancels). Each
//! direction has its own FIFO and at most one destination resolution in
//! flight; items enqueued while a resolution is pending join the same batch.
//!
//! ```text
//! enqueue ──→ FIFO ──(destination resolved)──→ engine.start_*  (in order)
//!               │
//!               └──(cancelled / invalid destination)──→ dropped whole
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use cloudmirror_core::domain::{NodeHandle, NodeKind, TransferDirection};
use cloudmirror_core::ports::IEngine;

/// Errors raised while resolving a pending batch
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Upload target is missing or is not a folder
    #[error("Invalid upload destination: {0}")]
    InvalidDestination(NodeHandle),

    /// Download target exists but is not a directory
    #[error("Download destination is not a folder: {}", .0.display())]
    NotAFolder(PathBuf),

    /// Download target could not be created
    #[error("Unable to create download folder {}: {message}", .path.display())]
    DestinationNotCreatable { path: PathBuf, message: String },

    /// A destination arrived while nothing was waiting for one
    #[error("No pending {0} batch")]
    NothingPending(TransferDirection),
}

/// What the caller must do after an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new batch started; a destination must be resolved
    NeedsDestination,
    /// Items joined the batch already awaiting a destination
    Batched,
}

/// FIFO of user transfers awaiting a destination
#[derive(Debug, Default)]
pub struct TransferQueue {
    uploads: VecDeque<PathBuf>,
    downloads: VecDeque<NodeHandle>,
    upload_pending: bool,
    download_pending: bool,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_upload(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> Enqueued {
        self.uploads.extend(paths);
        Self::mark_pending(&mut self.upload_pending, TransferDirection::Upload)
    }

    pub fn enqueue_download(&mut self, handles: impl IntoIterator<Item = NodeHandle>) -> Enqueued {
        self.downloads.extend(handles);
        Self::mark_pending(&mut self.download_pending, TransferDirection::Download)
    }

    fn mark_pending(pending: &mut bool, direction: TransferDirection) -> Enqueued {
        if *pending {
            debug!(%direction, "Destination selection already in progress, batching");
            Enqueued::Batched
        } else {
            *pending = true;
            Enqueued::NeedsDestination
        }
    }

    /// Directions currently waiting for a destination
    pub fn awaiting_destination(&self) -> Vec<TransferDirection> {
        let mut out = Vec::new();
        if self.upload_pending {
            out.push(TransferDirection::Upload);
        }
        if self.download_pending {
            out.push(TransferDirection::Download);
        }
        out
    }

    pub fn len(&self, direction: TransferDirection) -> usize {
        match direction {
            TransferDirection::Upload => self.uploads.len(),
            TransferDirection::Download => self.downloads.len(),
        }
    }

    /// Submits every pending upload to `parent`, in enqueue order
    ///
    /// The whole batch is dropped if `parent` is not an existing folder.
    pub fn resolve_upload(
        &mut self,
        parent: NodeHandle,
        engine: &mut dyn IEngine,
    ) -> Result<usize, QueueError> {
        if !self.upload_pending {
            return Err(QueueError::NothingPending(TransferDirection::Upload));
        }
        self.upload_pending = false;

        let valid = engine
            .node(parent)
            .is_some_and(|node| node.kind == NodeKind::Folder && !node.removed);
        if !valid {
            let dropped = self.uploads.len();
            self.uploads.clear();
            warn!(%parent, dropped, "Upload destination is not a folder, dropping batch");
            return Err(QueueError::InvalidDestination(parent));
        }

        let count = self.uploads.len();
        for path in self.uploads.drain(..) {
            debug!(path = %path.display(), %parent, "Starting upload");
            engine.start_upload(&path, parent);
        }
        info!(count, %parent, "Upload batch submitted");
        Ok(count)
    }

    /// Submits every pending download into `destination`, in enqueue order
    ///
    /// The folder is created if missing. The whole batch is dropped if it
    /// cannot be created or is a file.
    pub fn resolve_download(
        &mut self,
        destination: &Path,
        engine: &mut dyn IEngine,
    ) -> Result<usize, QueueError> {
        if !self.download_pending {
            return Err(QueueError::NothingPending(TransferDirection::Download));
        }
        self.download_pending = false;

        if let Err(e) = ensure_folder(destination) {
            let dropped = self.downloads.len();
            self.downloads.clear();
            warn!(destination = %destination.display(), dropped, error = %e, "Dropping download batch");
            return Err(e);
        }

        let count = self.downloads.len();
        for handle in self.downloads.drain(..) {
            debug!(%handle, destination = %destination.display(), "Starting download");
            engine.start_download(handle, destination);
        }
        info!(count, destination = %destination.display(), "Download batch submitted");
        Ok(count)
    }

    /// Drops the pending batch; returns how many items were discarded
    pub fn cancel(&mut self, direction: TransferDirection) -> usize {
        let dropped = match direction {
            TransferDirection::Upload => {
                self.upload_pending = false;
                std::mem::take(&mut self.uploads).len()
            }
            TransferDirection::Download => {
                self.download_pending = false;
                std::mem::take(&mut self.downloads).len()
            }
        };
        info!(%direction, dropped, "Destination selection cancelled");
        dropped
    }
}

fn ensure_folder(path: &Path) -> Result<(), QueueError> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(QueueError::NotAFolder(path.to_path_buf()));
    }
    std::fs::create_dir_all(path).map_err(|e| QueueError::DestinationNotCreatable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
