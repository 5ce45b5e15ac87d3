//! End-to-end runs of the full engine (detector -> planner -> executor ->
//! state store), using two `LocalFsAdapter` trees to stand in for the local
//! and remote endpoints so the scenarios in the distilled spec's §8 can run
//! without any live network backend.

use std::sync::Arc;

use async_trait::async_trait;
use syncmesh_engine::adapter::local::LocalFsAdapter;
use syncmesh_engine::store::sqlite::SqliteStateStore;
use syncmesh_engine::store::{StateStore, StoreStats};
use syncmesh_engine::{
    Engine, EngineConfig, EngineError, EngineState, Filter, OperationRecord, Result, StorageAdapter, SyncOptions,
    SyncState, SyncStatus,
};

/// A `StateStore` whose `init()` always fails, used to exercise the
/// engine's `Faulted` transition (§7) without needing a real corrupted
/// database file.
struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn init(&self) -> Result<()> {
        Err(EngineError::Store("simulated state store corruption".to_string()))
    }
    async fn get(&self, _path: &str) -> Result<Option<SyncState>> {
        Ok(None)
    }
    async fn upsert(&self, _state: &SyncState) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _path: &str) -> Result<()> {
        Ok(())
    }
    async fn list_all(&self) -> Result<Vec<SyncState>> {
        Ok(Vec::new())
    }
    async fn list_by_status(&self, _status: SyncStatus) -> Result<Vec<SyncState>> {
        Ok(Vec::new())
    }
    async fn append_history(&self, _record: &OperationRecord) -> Result<()> {
        Ok(())
    }
    async fn recent_history(&self, _limit: u32, _since: Option<chrono::DateTime<chrono::Utc>>) -> Result<Vec<OperationRecord>> {
        Ok(Vec::new())
    }
    async fn purge_history_before(&self, _before: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        Ok(0)
    }
    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats::default())
    }
}

fn options() -> SyncOptions {
    SyncOptions::default()
}

async fn engine(local_root: &std::path::Path, remote_root: &std::path::Path, db_path: &std::path::Path) -> Engine {
    let local = Arc::new(LocalFsAdapter::new(local_root));
    let remote = Arc::new(LocalFsAdapter::new(remote_root));
    let store = Arc::new(SqliteStateStore::open(db_path).unwrap());
    let engine = Engine::new(local, remote, store, EngineConfig { filter: Filter::empty(), ..EngineConfig::default() });
    engine.init().await.unwrap();
    engine
}

#[tokio::test]
async fn fresh_local_file_is_uploaded_to_remote() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("a.txt"), b"0123456789").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    let result = engine.synchronize_with(&options()).await.unwrap();

    assert_eq!(result.synchronized, 1);
    assert_eq!(result.failed, 0);
    assert!(remote_dir.path().join("a.txt").exists());

    let remote_bytes = tokio::fs::read(remote_dir.path().join("a.txt")).await.unwrap();
    assert_eq!(remote_bytes, b"0123456789".to_vec());
}

#[tokio::test]
async fn fresh_remote_file_is_downloaded_and_the_next_run_is_idempotent() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(remote_dir.path().join("b.txt"), b"remote-only content").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    let first = engine.synchronize_with(&options()).await.unwrap();
    assert_eq!(first.synchronized, 1);
    assert_eq!(first.failed, 0);

    let local_bytes = tokio::fs::read(local_dir.path().join("b.txt")).await.unwrap();
    assert_eq!(local_bytes, b"remote-only content".to_vec());

    // A second run must see both sides as unchanged: the downloaded file's
    // local size/mtime need to have been recorded in the shadow state, not
    // left unset (which would make the detector see it as brand-new again).
    let plan = engine.get_sync_plan(&options()).await.unwrap();
    assert!(plan.uploads.is_empty());
    assert!(plan.downloads.is_empty());
    assert!(plan.conflicts.is_empty());

    let second = engine.synchronize_with(&options()).await.unwrap();
    assert_eq!(second.synchronized, 0);
    assert_eq!(second.failed, 0);
}

#[tokio::test]
async fn two_sided_identical_create_converges_without_transfer() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("img.bin"), b"same bytes").await.unwrap();
    tokio::fs::write(remote_dir.path().join("img.bin"), b"same bytes").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    let result = engine.synchronize_with(&options()).await.unwrap();

    assert_eq!(result.synchronized, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.failed, 0);
}

#[tokio::test]
async fn second_run_after_a_clean_sync_is_idempotent() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("a.txt"), b"hello").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    let first = engine.synchronize_with(&options()).await.unwrap();
    assert_eq!(first.synchronized, 1);

    let plan = engine.get_sync_plan(&options()).await.unwrap();
    assert!(plan.uploads.is_empty());
    assert!(plan.downloads.is_empty());
    assert!(plan.conflicts.is_empty());

    let second = engine.synchronize_with(&options()).await.unwrap();
    assert_eq!(second.synchronized, 0);
    assert_eq!(second.failed, 0);
}

#[tokio::test]
async fn delete_extraneous_off_leaves_one_sided_deletion_unpropagated() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("old.log"), b"log data").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    engine.synchronize_with(&options()).await.unwrap();
    assert!(remote_dir.path().join("old.log").exists());

    tokio::fs::remove_file(local_dir.path().join("old.log")).await.unwrap();

    let mut opts = options();
    opts.delete_propagation = false;
    let result = engine.synchronize_with(&opts).await.unwrap();

    assert_eq!(result.deleted, 0);
    assert!(!result.warnings.is_empty());
    assert!(remote_dir.path().join("old.log").exists());
}

#[tokio::test]
async fn delete_extraneous_on_propagates_one_sided_deletion() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("old.log"), b"log data").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    engine.synchronize_with(&options()).await.unwrap();

    tokio::fs::remove_file(local_dir.path().join("old.log")).await.unwrap();
    let result = engine.synchronize_with(&options()).await.unwrap();

    assert_eq!(result.deleted, 1);
    assert!(!remote_dir.path().join("old.log").exists());
}

#[tokio::test]
async fn both_modified_conflict_defaults_to_prefer_newer() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("notes.md"), b"original").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    engine.synchronize_with(&options()).await.unwrap();

    // Remote gets the newer edit.
    tokio::fs::write(remote_dir.path().join("notes.md"), b"remote edit, much newer").await.unwrap();
    let local_adapter = LocalFsAdapter::new(local_dir.path());
    let remote_adapter = LocalFsAdapter::new(remote_dir.path());
    let newer = chrono::Utc::now() + chrono::Duration::seconds(5);
    remote_adapter.set_modified("notes.md", newer).await.unwrap();

    tokio::fs::write(local_dir.path().join("notes.md"), b"local edit").await.unwrap();
    local_adapter.set_modified("notes.md", chrono::Utc::now() - chrono::Duration::seconds(60)).await.unwrap();

    let result = engine.synchronize_with(&options()).await.unwrap();
    assert_eq!(result.conflicted, 1);

    let local_bytes = tokio::fs::read(local_dir.path().join("notes.md")).await.unwrap();
    assert_eq!(local_bytes, b"remote edit, much newer".to_vec());

    let plan = engine.get_sync_plan(&options()).await.unwrap();
    assert!(plan.conflicts.is_empty());
}

#[tokio::test]
async fn dry_run_plans_without_touching_either_side() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    tokio::fs::write(local_dir.path().join("a.txt"), b"content").await.unwrap();

    let engine = engine(local_dir.path(), remote_dir.path(), &db_dir.path().join("state.db")).await;
    let mut opts = options();
    opts.dry_run = true;
    let result = engine.synchronize_with(&opts).await.unwrap();

    assert!(!remote_dir.path().join("a.txt").exists());
    assert!(result.warnings.iter().any(|w| w.contains("dry run")));
}

#[tokio::test]
async fn a_fatal_store_error_latches_the_engine_into_faulted() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();

    let local = Arc::new(LocalFsAdapter::new(local_dir.path()));
    let remote = Arc::new(LocalFsAdapter::new(remote_dir.path()));
    let store = Arc::new(FailingStore);
    let engine = Engine::new(local, remote, store, EngineConfig { filter: Filter::empty(), ..EngineConfig::default() });

    assert!(engine.init().await.is_err());
    assert_eq!(engine.state().await, EngineState::Faulted);

    // Every subsequent call fails fast without attempting any work.
    let plan_result = engine.get_sync_plan(&options()).await;
    assert!(plan_result.is_err());
}
