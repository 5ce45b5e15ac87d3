//! Data model shared by every component (§3): observed items, persistent
//! shadow state, operation history, and the transient sync plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity observed at one endpoint at planning time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub hash: Option<String>,
    pub etag: Option<String>,
}

impl SyncItem {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            size,
            last_modified: None,
            hash: None,
            etag: None,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            size: 0,
            last_modified: None,
            hash: None,
            etag: None,
        }
    }

    pub fn with_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = Some(when);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Per-path status recorded in the state store (§3 invariants 1-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    LocalNew,
    RemoteNew,
    LocalModified,
    RemoteModified,
    LocalDeleted,
    RemoteDeleted,
    Conflict,
    Error,
    Ignored,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::LocalNew => "local_new",
            SyncStatus::RemoteNew => "remote_new",
            SyncStatus::LocalModified => "local_modified",
            SyncStatus::RemoteModified => "remote_modified",
            SyncStatus::LocalDeleted => "local_deleted",
            SyncStatus::RemoteDeleted => "remote_deleted",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
            SyncStatus::Ignored => "ignored",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = crate::error::EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "synced" => SyncStatus::Synced,
            "local_new" => SyncStatus::LocalNew,
            "remote_new" => SyncStatus::RemoteNew,
            "local_modified" => SyncStatus::LocalModified,
            "remote_modified" => SyncStatus::RemoteModified,
            "local_deleted" => SyncStatus::LocalDeleted,
            "remote_deleted" => SyncStatus::RemoteDeleted,
            "conflict" => SyncStatus::Conflict,
            "error" => SyncStatus::Error,
            "ignored" => SyncStatus::Ignored,
            other => {
                return Err(crate::error::EngineError::Store(format!(
                    "unknown sync status: {}",
                    other
                )))
            }
        })
    }
}

/// The persistent shadow record for one relative path (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub path: String,
    pub is_directory: bool,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
    pub local_size: Option<u64>,
    pub remote_size: Option<u64>,
    pub status: SyncStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub error_message: Option<String>,
    pub sync_attempts: u32,
}

impl SyncState {
    pub fn new(path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            is_directory,
            local_hash: None,
            remote_hash: None,
            local_modified: None,
            remote_modified: None,
            local_size: None,
            remote_size: None,
            status: SyncStatus::LocalNew,
            last_sync_time: None,
            etag: None,
            error_message: None,
            sync_attempts: 0,
        }
    }

    /// Mark this shadow as converged per invariant 1: equal hashes (or both
    /// null for directories), status Synced, attempts reset, timestamp set.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Synced;
        self.last_sync_time = Some(now);
        self.error_message = None;
        self.sync_attempts = 0;
        if !self.is_directory {
            self.remote_hash = self.local_hash.clone();
        }
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.error_message = Some(message.into());
        self.sync_attempts += 1;
    }
}

/// What an external watcher observed happen to a local path (§4.H, §6). A
/// hint, not ground truth: `Engine::notify_local_change` always re-stats the
/// path itself, so a stale or wrong `kind` self-corrects rather than
/// corrupting the shadow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Created,
    Changed,
    Deleted,
}

/// One kind of unit of work the planner can emit, and the executor performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    Conflict,
    NoOp,
    RemoveState,
    /// Two sides created identical content independently (§4.E
    /// `Planner::both_new`): no transfer needed, but still adopted as
    /// `Synced` rather than merely skipped. Dispatched alongside `NoOp` in
    /// `SyncPlan::no_ops`, distinguished by this kind.
    Converged,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Upload => "upload",
            ActionKind::Download => "download",
            ActionKind::DeleteLocal => "delete_local",
            ActionKind::DeleteRemote => "delete_remote",
            ActionKind::Conflict => "conflict",
            ActionKind::NoOp => "no_op",
            ActionKind::RemoveState => "remove_state",
            ActionKind::Converged => "converged",
        };
        write!(f, "{}", s)
    }
}

/// Why a `Conflict` action was raised — carried through to the resolver and
/// into any `ConflictDetected` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    BothModified,
    ModifiedInSourceDeletedInTarget,
    DeletedInSourceModifiedInTarget,
    TypeConflict,
    BothNewDivergent,
}

/// A single unit of work produced by the planner for one path (§4.E, §9).
#[derive(Debug, Clone)]
pub struct Action {
    pub path: String,
    pub kind: ActionKind,
    pub conflict_kind: Option<ConflictKind>,
    pub local: Option<SyncItem>,
    pub remote: Option<SyncItem>,
    /// Set when a `NoOp` stands in for a downgraded action (e.g. a deletion
    /// the run declined to propagate); surfaced as a `SyncResult` warning
    /// without touching the shadow state.
    pub note: Option<String>,
}

impl Action {
    pub fn new(path: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            path: path.into(),
            kind,
            conflict_kind: None,
            local: None,
            remote: None,
            note: None,
        }
    }

    pub fn with_items(mut self, local: Option<SyncItem>, remote: Option<SyncItem>) -> Self {
        self.local = local;
        self.remote = remote;
        self
    }

    pub fn with_conflict_kind(mut self, kind: ConflictKind) -> Self {
        self.conflict_kind = Some(kind);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Transient output of the planner: one ordered action list per kind (§3).
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub uploads: Vec<Action>,
    pub downloads: Vec<Action>,
    pub local_deletes: Vec<Action>,
    pub remote_deletes: Vec<Action>,
    pub conflicts: Vec<Action>,
    pub no_ops: Vec<Action>,
    pub removed_states: Vec<Action>,
}

impl SyncPlan {
    pub fn total_actionable(&self) -> usize {
        self.uploads.len() + self.downloads.len() + self.local_deletes.len() + self.remote_deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_actionable() == 0 && self.conflicts.is_empty() && self.removed_states.is_empty()
    }

    /// Flatten into the executor's stable dispatch order: lexicographic by
    /// path, with directory removals run as a secondary reverse-order pass
    /// after uploads/downloads/file-deletes of the same run (§4.E).
    pub fn ordered_actions(&self) -> Vec<Action> {
        let (mut files, dirs) = self.ordered_phases();
        files.extend(dirs);
        files
    }

    /// Same ordering as `ordered_actions`, but split into the two phases
    /// that must run strictly one after the other: files (and non-directory
    /// deletes), then directory removals in reverse-path order. Within each
    /// phase the executor is free to run actions concurrently, since the
    /// phase boundary — not action order within it — is what the ordering
    /// requirement in §4.E actually depends on.
    pub fn ordered_phases(&self) -> (Vec<Action>, Vec<Action>) {
        let mut files: Vec<Action> = Vec::new();
        files.extend(self.uploads.iter().cloned());
        files.extend(self.downloads.iter().cloned());
        files.extend(self.local_deletes.iter().filter(|a| !a.is_directory_delete()).cloned());
        files.extend(self.remote_deletes.iter().filter(|a| !a.is_directory_delete()).cloned());
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut dirs: Vec<Action> = Vec::new();
        dirs.extend(self.local_deletes.iter().filter(|a| a.is_directory_delete()).cloned());
        dirs.extend(self.remote_deletes.iter().filter(|a| a.is_directory_delete()).cloned());
        dirs.sort_by(|a, b| b.path.cmp(&a.path));

        (files, dirs)
    }
}

impl Action {
    fn is_directory_delete(&self) -> bool {
        self.local.as_ref().map(|i| i.is_directory).unwrap_or(false)
            || self.remote.as_ref().map(|i| i.is_directory).unwrap_or(false)
    }
}

/// What a completed operation turned out to be, for history purposes. Distinct
/// from `ActionKind`: a planned `Upload`/`Download` conflict resolution still
/// logs as `Upload`/`Download`, but a skipped or downgraded action — a
/// declined conflict, a disabled delete propagation, a cancelled action — logs
/// as `Skip`, and a conflict resolved by renaming the losing side logs as
/// `Rename` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    Conflict,
    Skip,
    Rename,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Upload => "upload",
            OperationType::Download => "download",
            OperationType::DeleteLocal => "delete_local",
            OperationType::DeleteRemote => "delete_remote",
            OperationType::Conflict => "conflict",
            OperationType::Skip => "skip",
            OperationType::Rename => "rename",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for OperationType {
    type Err = crate::error::EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "upload" => OperationType::Upload,
            "download" => OperationType::Download,
            "delete_local" => OperationType::DeleteLocal,
            "delete_remote" => OperationType::DeleteRemote,
            "conflict" => OperationType::Conflict,
            "skip" => OperationType::Skip,
            "rename" => OperationType::Rename,
            other => {
                return Err(crate::error::EngineError::Store(format!(
                    "unknown operation type: {}",
                    other
                )))
            }
        })
    }
}

impl From<ActionKind> for OperationType {
    /// Maps a plan-time `ActionKind` to its history counterpart when an
    /// action runs to completion unchanged from how it was planned. Callers
    /// that downgrade or reroute an action (conflict resolution, cancellation)
    /// pick the right `OperationType` directly instead of going through this.
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Upload => OperationType::Upload,
            ActionKind::Download => OperationType::Download,
            ActionKind::DeleteLocal => OperationType::DeleteLocal,
            ActionKind::DeleteRemote => OperationType::DeleteRemote,
            ActionKind::Conflict => OperationType::Conflict,
            ActionKind::NoOp | ActionKind::RemoveState => OperationType::Skip,
            ActionKind::Converged => OperationType::Skip,
        }
    }
}

/// Append-only, prunable record of one executed action (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub action_type: OperationType,
    pub success: bool,
    pub duration_ms: u64,
    pub bytes_transferred: u64,
    pub error_message: Option<String>,
}

/// Aggregated totals and nullable top-level error for a completed or aborted run (§7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub synchronized: u64,
    pub skipped: u64,
    pub conflicted: u64,
    pub deleted: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_actions_runs_directory_deletes_after_files_and_in_reverse() {
        let mut plan = SyncPlan::default();
        plan.local_deletes.push(
            Action::new("a/b", ActionKind::DeleteLocal)
                .with_items(Some(SyncItem::directory("a/b")), None),
        );
        plan.local_deletes.push(
            Action::new("a", ActionKind::DeleteLocal).with_items(Some(SyncItem::directory("a")), None),
        );
        plan.uploads.push(Action::new("z.txt", ActionKind::Upload));

        let ordered = plan.ordered_actions();
        let paths: Vec<&str> = ordered.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["z.txt", "a/b", "a"]);
    }

    #[test]
    fn ordered_phases_separates_files_from_directory_deletes() {
        let mut plan = SyncPlan::default();
        plan.local_deletes.push(
            Action::new("a/b", ActionKind::DeleteLocal)
                .with_items(Some(SyncItem::directory("a/b")), None),
        );
        plan.uploads.push(Action::new("z.txt", ActionKind::Upload));

        let (files, dirs) = plan.ordered_phases();
        assert_eq!(files.iter().map(|a| a.path.as_str()).collect::<Vec<_>>(), vec!["z.txt"]);
        assert_eq!(dirs.iter().map(|a| a.path.as_str()).collect::<Vec<_>>(), vec!["a/b"]);
    }

    #[test]
    fn mark_synced_resets_attempts_and_copies_hash() {
        let mut state = SyncState::new("f.txt", false);
        state.sync_attempts = 2;
        state.local_hash = Some("abc".to_string());
        state.mark_synced(Utc::now());
        assert_eq!(state.status, SyncStatus::Synced);
        assert_eq!(state.sync_attempts, 0);
        assert_eq!(state.remote_hash, Some("abc".to_string()));
    }
}
