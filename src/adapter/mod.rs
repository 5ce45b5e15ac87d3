//! The endpoint abstraction every concrete backend implements (§4.B).
//!
//! Both the local filesystem and any remote object store are driven through
//! the same trait, so the engine's planner, detector, and executor never know
//! which side of a sync they are talking to.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::model::SyncItem;

/// Capabilities a backend can (or cannot) honor, so the planner and executor
/// can degrade gracefully instead of assuming every endpoint behaves like a
/// POSIX filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterCapabilities {
    pub supports_timestamps: bool,
    pub supports_permissions: bool,
    pub supports_etags: bool,
    pub supports_symlinks: bool,
    pub supports_atomic_rename: bool,
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An endpoint in a sync pair: something that can be listed, read, written,
/// deleted, renamed, and hashed by canonical relative path.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn capabilities(&self) -> AdapterCapabilities;

    /// Whether a subsequent `list` should traverse symlinked entries as
    /// regular ones instead of skipping them. A no-op for adapters without
    /// a symlink concept (`supports_symlinks == false`).
    fn set_follow_symlinks(&self, _enabled: bool) {}

    /// List every item under `prefix` (canonical relative path; empty for root),
    /// recursively, including directory markers.
    async fn list(&self, prefix: &str) -> Result<Vec<SyncItem>>;

    /// Stat a single path, or `Ok(None)` if it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<SyncItem>>;

    /// Open a path for streaming read.
    async fn read(&self, path: &str) -> Result<BoxedReader>;

    /// Write `path` from a stream, replacing any existing content. Adapters
    /// that support atomic rename must make the write visible all-at-once
    /// (§4.G): never a torn write observable by a concurrent list/stat.
    async fn write(&self, path: &str, content: BoxedReader, size_hint: Option<u64>) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn create_directory(&self, path: &str) -> Result<()>;

    /// Rename in place. Adapters without native rename may implement this as
    /// copy-then-delete; callers must not assume atomicity unless
    /// `supports_atomic_rename` is true.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Content hash of `path`, computed however is cheapest for this backend
    /// (a native checksum/etag if trustworthy, otherwise a streaming read).
    async fn hash(&self, path: &str) -> Result<String>;

    /// Cheap reachability and credential check, used before a run starts.
    async fn test_connection(&self) -> Result<()>;

    /// Set `path`'s modification time to `when`, honored only when
    /// `capabilities().supports_timestamps` is true for this adapter; a
    /// no-op default for backends (e.g. S3) that derive mtime from the
    /// write itself rather than letting a caller set it independently.
    async fn set_modified(&self, _path: &str, _when: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}
