//! Backend collaborators
//!
//! Everything a session needs from the outside world: the per-session
//! output log and its push notifications, the snapshot cache store, the
//! controller link (input, resize, resync) and the object metadata
//! service. Implementations own their transport and its timeouts; every
//! call is expected to return within a few seconds, reporting
//! [`BackendError::Timeout`] otherwise.

pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::Receiver;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::term::TermSize;

pub use memory::MemoryBackend;

/// Session (block) identifier
pub type SessionId = String;

/// Output log file name
pub const TERM_FILE_NAME: &str = "term";

/// Metadata patch: a JSON object merged into the target's metadata
pub type MetaPatch = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("backend connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Operation carried by an output log notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Append,
    Truncate,
}

/// Push notification from the output log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEvent {
    pub op: FileOp,
    pub data: Vec<u8>,
    /// Log offset at which `data` starts (log size after a truncate)
    pub offset: u64,
}

impl FileEvent {
    pub fn append(offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            op: FileOp::Append,
            data: data.into(),
            offset,
        }
    }

    pub fn truncate(offset: u64) -> Self {
        Self {
            op: FileOp::Truncate,
            data: Vec::new(),
            offset,
        }
    }
}

/// Result of fetching the output log from some offset
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileData {
    pub data: Vec<u8>,
    /// Offset the returned data starts at
    pub offset: u64,
}

/// Snapshot metadata as persisted next to the serialized buffer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(rename = "ptyoffset")]
    pub offset: u64,
    #[serde(rename = "termsize", default, skip_serializing_if = "Option::is_none")]
    pub term_size: Option<TermSize>,
}

/// Serialized terminal buffer plus the stream offset it covers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub data: String,
    pub meta: SnapshotMeta,
}

impl CacheSnapshot {
    pub fn new(data: String, offset: u64, term_size: TermSize) -> Self {
        Self {
            data,
            meta: SnapshotMeta {
                offset,
                term_size: Some(term_size),
            },
        }
    }

    pub fn offset(&self) -> u64 {
        self.meta.offset
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Cache file name for a snapshot kind, e.g. `cache:term:full`
pub fn cache_file_name(kind: &str) -> String {
    format!("cache:{}:{}", TERM_FILE_NAME, kind)
}

/// Stable reference to a backend object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ORef {
    pub otype: String,
    pub oid: String,
}

impl ORef {
    pub fn new(otype: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            otype: otype.into(),
            oid: oid.into(),
        }
    }

    /// The session's own identity
    pub fn block(session_id: &str) -> Self {
        Self::new("block", session_id)
    }
}

impl fmt::Display for ORef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.otype, self.oid)
    }
}

/// The session's view of its backend
pub trait Backend {
    /// Output log from `offset`; `None` when the log does not exist
    fn fetch_file(&self, session: &str, name: &str, offset: u64) -> Result<Option<FileData>>;

    /// Ordered append/truncate notifications; dropping the receiver unsubscribes
    fn subscribe(&self, session: &str) -> Receiver<FileEvent>;

    /// Snapshot of the given kind; `None` when absent
    fn fetch_cache(&self, session: &str, kind: &str) -> Result<Option<CacheSnapshot>>;

    fn save_cache(&self, session: &str, kind: &str, snapshot: CacheSnapshot) -> Result<()>;

    /// Keystrokes destined for the shell
    fn send_input(&self, session: &str, data: &[u8]) -> Result<()>;

    /// One-way size notification
    fn set_term_size(&self, session: &str, size: TermSize);

    /// Idempotent controller resync with the current size
    fn resync_controller(&self, session: &str, size: TermSize) -> Result<()>;

    fn resolve_ids(&self, session: &str, ids: &[String]) -> Result<HashMap<String, ORef>>;

    fn update_object_meta(&self, oref: &ORef, patch: &MetaPatch) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_format() {
        let snapshot = CacheSnapshot::new("abc".to_string(), 42, TermSize::new(24, 80));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "data": "abc",
                "meta": { "ptyoffset": 42, "termsize": { "rows": 24, "cols": 80 } }
            })
        );
    }

    #[test]
    fn test_snapshot_without_termsize() {
        let snapshot: CacheSnapshot =
            serde_json::from_str(r#"{"data":"x","meta":{"ptyoffset":7}}"#).unwrap();
        assert_eq!(snapshot.offset(), 7);
        assert_eq!(snapshot.meta.term_size, None);
    }

    #[test]
    fn test_oref_display() {
        assert_eq!(ORef::block("b1").to_string(), "block:b1");
        assert_eq!(cache_file_name("full"), "cache:term:full");
    }
}
