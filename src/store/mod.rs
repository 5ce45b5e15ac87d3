//! Durable shadow-state persistence (§4.C).

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{OperationRecord, SyncState, SyncStatus};

/// Aggregate counts across the whole tracked tree, used for status reporting.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_paths: u64,
    pub synced: u64,
    pub pending: u64,
    pub conflicted: u64,
    pub errored: u64,
}

/// The durable record of what was last known to be true about each path.
///
/// Implementations must make `upsert`/`delete` durable before returning, so
/// that a crash mid-run leaves the state store consistent with whatever
/// reached disk or the remote (§4.G).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Option<SyncState>>;

    async fn upsert(&self, state: &SyncState) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<SyncState>>;

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SyncState>>;

    async fn append_history(&self, record: &OperationRecord) -> Result<()>;

    async fn recent_history(&self, limit: u32, since: Option<chrono::DateTime<chrono::Utc>>) -> Result<Vec<OperationRecord>>;

    async fn purge_history_before(&self, before: chrono::DateTime<chrono::Utc>) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;
}
