//! Conflict resolution strategies (§4.F).

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::model::{Action, ConflictKind, SyncItem};

/// A caller-supplied handler for `ConflictStrategy::Smart`: receives the
/// PreferNewer-derived recommendation and reason, returns the actual
/// decision (which may simply be that recommendation).
pub type SmartHandler = Arc<dyn Fn(&ConflictAnalysis) -> Resolution + Send + Sync>;

#[derive(Clone)]
pub enum ConflictStrategy {
    PreferNewer,
    PreferLocal,
    PreferRemote,
    Skip,
    /// Keep both: rename the losing side aside instead of discarding it.
    KeepBoth,
    /// Defer to the caller via `Resolution::Ask` — the engine surfaces a
    /// `ConflictDetected` event and waits for an explicit decision.
    Manual,
    /// Delegates to a caller-supplied handler, which receives a
    /// `ConflictAnalysis` carrying a PreferNewer-derived recommendation and
    /// a textual reason, and returns the resolution to actually apply (§4.F).
    Smart(SmartHandler),
}

impl std::fmt::Debug for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConflictStrategy::PreferNewer => "PreferNewer",
            ConflictStrategy::PreferLocal => "PreferLocal",
            ConflictStrategy::PreferRemote => "PreferRemote",
            ConflictStrategy::Skip => "Skip",
            ConflictStrategy::KeepBoth => "KeepBoth",
            ConflictStrategy::Manual => "Manual",
            ConflictStrategy::Smart(_) => "Smart",
        };
        write!(f, "ConflictStrategy::{}", name)
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::PreferNewer
    }
}

/// What the resolver saw when deciding one conflicted path: both snapshots,
/// why it's a conflict, and a PreferNewer-derived recommendation a `Smart`
/// handler can take or override (§4.F).
#[derive(Debug, Clone)]
pub struct ConflictAnalysis {
    pub path: String,
    pub local: Option<SyncItem>,
    pub remote: Option<SyncItem>,
    pub kind: Option<ConflictKind>,
    pub recommended: Resolution,
    pub reason: String,
}

/// What to actually do about one conflicted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    UseLocal,
    UseRemote,
    Skip,
    RenameLocal(String),
    RenameRemote(String),
    Ask,
}

pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn resolve(&self, action: &Action) -> Resolution {
        match &self.strategy {
            ConflictStrategy::PreferLocal => Resolution::UseLocal,
            ConflictStrategy::PreferRemote => Resolution::UseRemote,
            ConflictStrategy::Skip => Resolution::Skip,
            ConflictStrategy::Manual => Resolution::Ask,
            ConflictStrategy::PreferNewer => self.resolve_by_recency(action).0,
            ConflictStrategy::KeepBoth => self.resolve_keep_both(action),
            ConflictStrategy::Smart(handler) => {
                let (recommended, reason) = self.resolve_by_recency(action);
                let analysis = ConflictAnalysis {
                    path: action.path.clone(),
                    local: action.local.clone(),
                    remote: action.remote.clone(),
                    kind: action.conflict_kind,
                    recommended,
                    reason,
                };
                handler(&analysis)
            }
        }
    }

    /// Compares `lastModified`; ties broken by size, then by lexicographic
    /// hash; a missing mtime on either side yields `Skip` rather than
    /// guessing from presence alone (§4.F). Returns the decision alongside a
    /// textual reason, both of which a `Smart` handler can inspect.
    fn resolve_by_recency(&self, action: &Action) -> (Resolution, String) {
        let (local, remote) = match (&action.local, &action.remote) {
            (Some(local), Some(remote)) => (local, remote),
            (Some(_), None) => return (Resolution::UseLocal, "remote side is absent".to_string()),
            (None, Some(_)) => return (Resolution::UseRemote, "local side is absent".to_string()),
            (None, None) => return (Resolution::Skip, "neither side has an item".to_string()),
        };

        match (local.last_modified, remote.last_modified) {
            (Some(l), Some(r)) if l > r => (Resolution::UseLocal, format!("local modified {} is newer than remote {}", l, r)),
            (Some(l), Some(r)) if r > l => (Resolution::UseRemote, format!("remote modified {} is newer than local {}", r, l)),
            (Some(_), Some(_)) => {
                // Equal mtimes: break the tie by size, then by hash.
                if local.size > remote.size {
                    (Resolution::UseLocal, "modification times tie; local is larger".to_string())
                } else if remote.size > local.size {
                    (Resolution::UseRemote, "modification times tie; remote is larger".to_string())
                } else {
                    match (&local.hash, &remote.hash) {
                        (Some(l), Some(r)) if l > r => {
                            (Resolution::UseLocal, "modification time and size tie; local hash sorts higher".to_string())
                        }
                        (Some(l), Some(r)) if r > l => {
                            (Resolution::UseRemote, "modification time and size tie; remote hash sorts higher".to_string())
                        }
                        _ => (Resolution::Skip, "modification time, size, and hash all tie or are unavailable".to_string()),
                    }
                }
            }
            _ => (Resolution::Skip, "at least one side is missing a modification time".to_string()),
        }
    }

    fn resolve_keep_both(&self, action: &Action) -> Resolution {
        match &action.local {
            Some(item) => Resolution::RenameLocal(conflict_name(&action.path, item)),
            None => Resolution::Skip,
        }
    }
}

/// Builds `<stem>.conflict-<UTC-ISO8601>-<hash8>.<ext>` for a renamed-aside copy.
pub fn conflict_name(path: &str, item: &SyncItem) -> String {
    let (stem, ext) = match path.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (path.to_string(), None),
    };

    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(item.size.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    let short_hash = &digest[..8];

    match ext {
        Some(ext) => format!("{}.conflict-{}-{}.{}", stem, timestamp, short_hash, ext),
        None => format!("{}.conflict-{}-{}", stem, timestamp, short_hash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionKind;
    use chrono::Duration;

    fn action_with(local_modified: Option<chrono::DateTime<Utc>>, remote_modified: Option<chrono::DateTime<Utc>>) -> Action {
        let mut local = SyncItem::file("f.txt", 10);
        if let Some(t) = local_modified {
            local = local.with_modified(t);
        }
        let mut remote = SyncItem::file("f.txt", 12);
        if let Some(t) = remote_modified {
            remote = remote.with_modified(t);
        }
        Action::new("f.txt", ActionKind::Conflict).with_items(Some(local), Some(remote))
    }

    #[test]
    fn prefer_newer_picks_more_recent_side() {
        let resolver = ConflictResolver::new(ConflictStrategy::PreferNewer);
        let now = Utc::now();
        let action = action_with(Some(now), Some(now - Duration::hours(1)));
        assert_eq!(resolver.resolve(&action), Resolution::UseLocal);
    }

    #[test]
    fn prefer_local_always_uses_local() {
        let resolver = ConflictResolver::new(ConflictStrategy::PreferLocal);
        let action = action_with(None, None);
        assert_eq!(resolver.resolve(&action), Resolution::UseLocal);
    }

    #[test]
    fn conflict_name_preserves_extension() {
        let item = SyncItem::file("notes.txt", 10);
        let name = conflict_name("notes.txt", &item);
        assert!(name.starts_with("notes.conflict-"));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn manual_strategy_defers_to_caller() {
        let resolver = ConflictResolver::new(ConflictStrategy::Manual);
        let action = action_with(None, None);
        assert_eq!(resolver.resolve(&action), Resolution::Ask);
    }

    #[test]
    fn smart_strategy_passes_recommendation_and_reason_to_handler() {
        let handler: SmartHandler = Arc::new(|analysis: &ConflictAnalysis| {
            assert_eq!(analysis.recommended, Resolution::UseLocal);
            assert!(analysis.reason.contains("newer"));
            analysis.recommended.clone()
        });
        let resolver = ConflictResolver::new(ConflictStrategy::Smart(handler));
        let now = Utc::now();
        let action = action_with(Some(now), Some(now - Duration::hours(1)));
        assert_eq!(resolver.resolve(&action), Resolution::UseLocal);
    }

    #[test]
    fn smart_strategy_handler_can_override_the_recommendation() {
        let handler: SmartHandler = Arc::new(|_analysis: &ConflictAnalysis| Resolution::Skip);
        let resolver = ConflictResolver::new(ConflictStrategy::Smart(handler));
        let now = Utc::now();
        let action = action_with(Some(now), Some(now - Duration::hours(1)));
        assert_eq!(resolver.resolve(&action), Resolution::Skip);
    }
}
