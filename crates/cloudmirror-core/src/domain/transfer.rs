//! Transfer domain types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::newtypes::{NodeHandle, TransferTag};

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub const ALL: [TransferDirection; 2] = [TransferDirection::Upload, TransferDirection::Download];
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

/// A user-initiated batch waiting for its destination
///
/// Uploads carry local paths and resolve to a remote folder; downloads carry
/// remote handles and resolve to a local folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    Upload(Vec<PathBuf>),
    Download(Vec<NodeHandle>),
}

impl TransferRequest {
    pub fn direction(&self) -> TransferDirection {
        match self {
            TransferRequest::Upload(_) => TransferDirection::Upload,
            TransferRequest::Download(_) => TransferDirection::Download,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TransferRequest::Upload(paths) => paths.len(),
            TransferRequest::Download(handles) => handles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bandwidth cap applied to uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadLimit {
    #[default]
    Unlimited,
    KibPerSecond(u32),
}

impl UploadLimit {
    /// Builds a limit from the stored KiB/s setting; negative means unlimited
    pub fn from_kib_setting(kib: i64) -> Self {
        if kib < 0 {
            UploadLimit::Unlimited
        } else {
            UploadLimit::KibPerSecond(u32::try_from(kib).unwrap_or(u32::MAX))
        }
    }

    /// Limit in bytes per second, `None` when unlimited
    pub fn bytes_per_second(&self) -> Option<u64> {
        match self {
            UploadLimit::Unlimited => None,
            UploadLimit::KibPerSecond(kib) => Some(u64::from(*kib) * 1024),
        }
    }
}

/// Snapshot of a transfer as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub tag: TransferTag,
    pub direction: TransferDirection,
    /// Started by the sync engine rather than by the user
    pub is_sync: bool,
    /// Local file read (upload) or written (download)
    pub path: Option<PathBuf>,
    pub file_name: String,
    /// Node produced by an upload, or the node being downloaded
    pub node_handle: Option<NodeHandle>,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes moved since the previous report for this transfer
    pub delta_bytes: u64,
    /// Current speed in bytes per second
    pub speed: u64,
    /// Retry counter for temporary errors
    pub num_retry: u32,
}

impl TransferInfo {
    pub fn new(tag: TransferTag, direction: TransferDirection) -> Self {
        Self {
            tag,
            direction,
            is_sync: false,
            path: None,
            file_name: String::new(),
            node_handle: None,
            total_bytes: 0,
            transferred_bytes: 0,
            delta_bytes: 0,
            speed: 0,
            num_retry: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_limit_from_setting() {
        assert_eq!(UploadLimit::from_kib_setting(-1), UploadLimit::Unlimited);
        assert_eq!(UploadLimit::from_kib_setting(-1).bytes_per_second(), None);
        assert_eq!(UploadLimit::from_kib_setting(0).bytes_per_second(), Some(0));
        assert_eq!(UploadLimit::from_kib_setting(100).bytes_per_second(), Some(102_400));
    }

    #[test]
    fn test_request_direction_and_len() {
        let up = TransferRequest::Upload(vec!["/a".into(), "/b".into()]);
        assert_eq!(up.direction(), TransferDirection::Upload);
        assert_eq!(up.len(), 2);

        let down = TransferRequest::Download(vec![]);
        assert_eq!(down.direction(), TransferDirection::Download);
        assert!(down.is_empty());
    }
}
