//! Per-run and engine-wide tunables (§4.H).

use crate::conflict::ConflictStrategy;
use crate::detector::ComparisonKey;
use crate::path::Filter;

/// Direction a run is allowed to move files in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Bidirectional,
    UploadOnly,
    DownloadOnly,
    /// Make the remote an exact mirror of local: extra remote files are deleted.
    MirrorToRemote,
    /// Make local an exact mirror of remote: extra local files are deleted.
    MirrorToLocal,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Bidirectional
    }
}

/// Options governing one `synchronize` run.
#[derive(Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub comparison_key: ComparisonKey,
    pub conflict_strategy: ConflictStrategy,
    /// Additional excludes layered on top of the engine's configured filter for this run only.
    pub extra_excludes: Vec<String>,
    /// Propagate deletions detected on one side to the other. When false, a
    /// detected deletion only updates the shadow state (§9 open question).
    pub delete_propagation: bool,
    /// Whether an upload/download may replace a file that already exists on
    /// the target with no corresponding shadow entry (two-sided new files of
    /// identical content are still adopted as synced regardless of this flag).
    pub update_existing: bool,
    pub dry_run: bool,
    pub max_concurrency: usize,
    pub bandwidth_limit_bytes_per_sec: Option<u64>,
    pub preserve_timestamps: bool,
    pub preserve_permissions: bool,
    pub verify_after_write: bool,
    pub max_retry_attempts: u32,
    /// Treat symlinks on adapters that support them as regular entries
    /// rather than skipping them during listing.
    pub follow_symlinks: bool,
    /// Emit debug-level log lines and events in addition to the normal set.
    pub verbose: bool,
    /// Whole-run deadline; 0 means no timeout.
    pub timeout_seconds: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            comparison_key: ComparisonKey::default(),
            conflict_strategy: ConflictStrategy::default(),
            extra_excludes: Vec::new(),
            delete_propagation: true,
            update_existing: true,
            dry_run: false,
            max_concurrency: 4,
            bandwidth_limit_bytes_per_sec: None,
            preserve_timestamps: true,
            preserve_permissions: false,
            verify_after_write: false,
            max_retry_attempts: 3,
            follow_symlinks: false,
            verbose: false,
            timeout_seconds: 0,
        }
    }
}

/// Engine-wide configuration set at construction time, as distinct from the
/// per-run `SyncOptions` a caller can vary on each `synchronize` call.
#[derive(Clone)]
pub struct EngineConfig {
    pub filter: Filter,
    pub default_options: SyncOptions,
    pub history_retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filter: Filter::empty(),
            default_options: SyncOptions::default(),
            history_retention_days: 30,
        }
    }
}
