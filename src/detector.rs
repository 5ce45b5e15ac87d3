//! Classifies each path into a change triplet by comparing the current local
//! and remote observations against the persisted shadow state (§4.D).

use std::collections::BTreeMap;

use crate::adapter::StorageAdapter;
use crate::error::Result;
use crate::model::SyncItem;
use crate::store::StateStore;

/// Which signal decides whether a file has changed since its last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonKey {
    /// Always hash both sides; the strongest signal, the most I/O.
    ChecksumOnly,
    /// Trust size alone; cheap, but blind to same-size edits.
    SizeOnly,
    /// Trust size+mtime, falling back to a hash only when they disagree (default).
    SizeAndModifiedTime,
}

impl Default for ComparisonKey {
    fn default() -> Self {
        ComparisonKey::SizeAndModifiedTime
    }
}

/// Whether a side's item is present and, if so, what it looks like.
#[derive(Debug, Clone)]
pub enum Presence {
    Present(SyncItem),
    Absent,
}

impl Presence {
    pub fn item(&self) -> Option<&SyncItem> {
        match self {
            Presence::Present(item) => Some(item),
            Presence::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present(_))
    }
}

/// What happened to one side since the last synced shadow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Unchanged,
    New,
    Modified,
    Deleted,
}

/// The full picture for one canonical path: current local/remote presence,
/// each side's change relative to the shadow, and the shadow itself if any.
#[derive(Debug, Clone)]
pub struct Observation {
    pub path: String,
    pub local: Presence,
    pub remote: Presence,
    pub local_change: ChangeKind,
    pub remote_change: ChangeKind,
}

/// Scans both adapters, loads the shadow state, and classifies every path
/// that exists on either side or still has a shadow record.
pub struct Detector<'a> {
    pub local: &'a dyn StorageAdapter,
    pub remote: &'a dyn StorageAdapter,
    pub store: &'a dyn StateStore,
    pub comparison_key: ComparisonKey,
}

impl<'a> Detector<'a> {
    pub fn new(
        local: &'a dyn StorageAdapter,
        remote: &'a dyn StorageAdapter,
        store: &'a dyn StateStore,
        comparison_key: ComparisonKey,
    ) -> Self {
        Self { local, remote, store, comparison_key }
    }

    pub async fn observe_all(&self) -> Result<Vec<Observation>> {
        let local_items = self.local.list("").await?;
        let remote_items = self.remote.list("").await?;
        let shadows = self.store.list_all().await?;

        let mut local_map: BTreeMap<String, SyncItem> =
            local_items.into_iter().map(|i| (i.path.clone(), i)).collect();
        let mut remote_map: BTreeMap<String, SyncItem> =
            remote_items.into_iter().map(|i| (i.path.clone(), i)).collect();
        let shadow_map: BTreeMap<String, crate::model::SyncState> =
            shadows.into_iter().map(|s| (s.path.clone(), s)).collect();

        let mut all_paths: Vec<String> = local_map.keys().chain(remote_map.keys()).chain(shadow_map.keys()).cloned().collect();
        all_paths.sort();
        all_paths.dedup();

        let mut observations = Vec::with_capacity(all_paths.len());
        for path in all_paths {
            let mut local_item = local_map.remove(&path);
            let mut remote_item = remote_map.remove(&path);
            let shadow = shadow_map.get(&path);

            self.lazily_hash(self.local, &mut local_item, shadow.and_then(|s| s.local_hash.as_deref()).is_some())
                .await;
            self.lazily_hash(self.remote, &mut remote_item, shadow.and_then(|s| s.remote_hash.as_deref()).is_some())
                .await;

            // Two new same-size files with no shadow are the planner's
            // "both new" convergence case (§4.E): it needs both hashes to
            // tell identical content from a genuine conflict, so compute
            // whichever is still missing regardless of the comparison key.
            if shadow.is_none() {
                if let (Some(l), Some(r)) = (&mut local_item, &mut remote_item) {
                    if !l.is_directory && !r.is_directory && l.size == r.size {
                        if l.hash.is_none() {
                            l.hash = self.local.hash(&path).await.ok();
                        }
                        if r.hash.is_none() {
                            r.hash = self.remote.hash(&path).await.ok();
                        }
                    }
                }
            }

            let local_change = classify_side(
                self.comparison_key,
                self.local.capabilities().supports_timestamps,
                shadow.and_then(|s| s.local_hash.as_deref()),
                shadow.and_then(|s| s.local_size),
                shadow.and_then(|s| s.local_modified),
                local_item.as_ref(),
            );
            let remote_change = classify_side(
                self.comparison_key,
                self.remote.capabilities().supports_timestamps,
                shadow.and_then(|s| s.remote_hash.as_deref()),
                shadow.and_then(|s| s.remote_size),
                shadow.and_then(|s| s.remote_modified),
                remote_item.as_ref(),
            );

            observations.push(Observation {
                path,
                local: local_item.map(Presence::Present).unwrap_or(Presence::Absent),
                remote: remote_item.map(Presence::Present).unwrap_or(Presence::Absent),
                local_change,
                remote_change,
            });
        }

        Ok(observations)
    }

    /// Computes and attaches a hash to `item` when the comparison key or a
    /// missing-mtime fallback needs one to compare against a shadow (§4.D).
    /// `ChecksumOnly` always hashes; `SizeAndModifiedTime` only falls back to
    /// a hash when the adapter can't report an mtime and there's a shadow
    /// hash to compare against. Best-effort: a hash failure here just leaves
    /// the item unhashed rather than failing the whole scan.
    async fn lazily_hash(&self, adapter: &dyn StorageAdapter, item: &mut Option<SyncItem>, shadow_has_hash: bool) {
        let Some(it) = item else { return };
        if it.is_directory || it.hash.is_some() {
            return;
        }
        let needed = match self.comparison_key {
            ComparisonKey::ChecksumOnly => true,
            ComparisonKey::SizeOnly => false,
            ComparisonKey::SizeAndModifiedTime => !adapter.capabilities().supports_timestamps && shadow_has_hash,
        };
        if !needed {
            return;
        }
        if let Ok(h) = adapter.hash(&it.path).await {
            it.hash = Some(h);
        }
    }
}

fn classify_side(
    comparison_key: ComparisonKey,
    supports_mtime: bool,
    shadow_hash: Option<&str>,
    shadow_size: Option<u64>,
    shadow_modified: Option<chrono::DateTime<chrono::Utc>>,
    current: Option<&SyncItem>,
) -> ChangeKind {
    match (shadow_hash.is_some() || shadow_size.is_some(), current) {
        (false, None) => ChangeKind::Unchanged,
        (false, Some(_)) => ChangeKind::New,
        (true, None) => ChangeKind::Deleted,
        (true, Some(item)) => {
            if item.is_directory {
                return ChangeKind::Unchanged;
            }
            let changed = match comparison_key {
                ComparisonKey::ChecksumOnly => {
                    shadow_hash.map(|h| Some(h) != item.hash.as_deref()).unwrap_or(true)
                }
                ComparisonKey::SizeOnly => shadow_size != Some(item.size),
                ComparisonKey::SizeAndModifiedTime if supports_mtime => {
                    shadow_size != Some(item.size) || shadow_modified != item.last_modified
                }
                // Endpoint lacks mtime support: fall back to (size, hash) per §4.D.
                ComparisonKey::SizeAndModifiedTime => {
                    shadow_size != Some(item.size)
                        || shadow_hash.map(|h| Some(h) != item.hash.as_deref()).unwrap_or(false)
                }
            };
            if changed {
                ChangeKind::Modified
            } else {
                ChangeKind::Unchanged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_side_treats_no_shadow_and_no_item_as_unchanged() {
        assert_eq!(
            classify_side(ComparisonKey::SizeAndModifiedTime, true, None, None, None, None),
            ChangeKind::Unchanged
        );
    }

    #[test]
    fn classify_side_detects_new_item() {
        let item = SyncItem::file("a.txt", 10);
        assert_eq!(
            classify_side(ComparisonKey::SizeAndModifiedTime, true, None, None, None, Some(&item)),
            ChangeKind::New
        );
    }

    #[test]
    fn classify_side_detects_deleted_item() {
        assert_eq!(
            classify_side(ComparisonKey::SizeAndModifiedTime, true, Some("h"), Some(10), None, None),
            ChangeKind::Deleted
        );
    }

    #[test]
    fn classify_side_size_only_ignores_mtime_changes() {
        let item = SyncItem::file("a.txt", 10).with_modified(chrono::Utc::now());
        assert_eq!(
            classify_side(ComparisonKey::SizeOnly, true, None, Some(10), None, Some(&item)),
            ChangeKind::Unchanged
        );
    }

    #[test]
    fn classify_side_checksum_only_detects_modification() {
        let item = SyncItem::file("a.txt", 10).with_hash("newhash");
        assert_eq!(
            classify_side(ComparisonKey::ChecksumOnly, true, Some("oldhash"), Some(10), None, Some(&item)),
            ChangeKind::Modified
        );
    }

    #[test]
    fn classify_side_falls_back_to_hash_when_mtime_unsupported() {
        // Size matches but hash differs: without mtime support this must
        // still be seen as Modified even though no mtime was supplied.
        let item = SyncItem::file("a.txt", 10).with_hash("newhash");
        assert_eq!(
            classify_side(ComparisonKey::SizeAndModifiedTime, false, Some("oldhash"), Some(10), None, Some(&item)),
            ChangeKind::Modified
        );
    }

    #[test]
    fn classify_side_mtime_unsupported_and_hash_matches_is_unchanged() {
        let item = SyncItem::file("a.txt", 10).with_hash("samehash");
        assert_eq!(
            classify_side(ComparisonKey::SizeAndModifiedTime, false, Some("samehash"), Some(10), None, Some(&item)),
            ChangeKind::Unchanged
        );
    }
}
