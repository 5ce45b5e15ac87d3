//! SQLite-backed `StateStore` (§4.C), generalizing the teacher's
//! per-pair `sync_local_files`/`sync_remote_files`/`sync_conflicts` tables
//! into one `sync_state` shadow table keyed by canonical path.

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use super::{StateStore, StoreStats};
use crate::error::{EngineError, Result};
use crate::model::{OperationRecord, OperationType, SyncState, SyncStatus};

const SCHEMA_VERSION: i32 = 1;

pub struct SqliteStateStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStateStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| EngineError::Store(format!("failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| EngineError::Store(format!("failed to get connection: {}", e)))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )?;
            run_migrations(&conn)?;
        }

        log::info!("state store opened at {:?}", db_path);
        Ok(Self { pool })
    }

    /// Open the platform default location (grounded in the teacher's
    /// `dirs::data_dir()` convention), under a caller-chosen namespace so
    /// multiple sync pairs don't collide.
    pub fn open_default(namespace: &str) -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| EngineError::Store("could not determine data directory".to_string()))?;
        Self::open(data_dir.join("syncmesh").join(format!("{}.db", namespace)))
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| EngineError::Store(format!("failed to get database connection: {}", e)))
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("running state store migration v1");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            path TEXT PRIMARY KEY,
            is_directory INTEGER NOT NULL DEFAULT 0,
            local_hash TEXT,
            remote_hash TEXT,
            local_modified INTEGER,
            remote_modified INTEGER,
            local_size INTEGER,
            remote_size INTEGER,
            status TEXT NOT NULL,
            last_sync_time INTEGER,
            etag TEXT,
            error_message TEXT,
            sync_attempts INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_sync_state_status ON sync_state(status);

        CREATE TABLE IF NOT EXISTS operation_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            path TEXT NOT NULL,
            action_type TEXT NOT NULL,
            success INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            bytes_transferred INTEGER NOT NULL,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_operation_history_timestamp ON operation_history(timestamp);
        "#,
    )?;
    Ok(())
}

fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<SyncState> {
    let status_str: String = row.get("status")?;
    let status = SyncStatus::from_str(&status_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(SyncState {
        path: row.get("path")?,
        is_directory: row.get::<_, i64>("is_directory")? != 0,
        local_hash: row.get("local_hash")?,
        remote_hash: row.get("remote_hash")?,
        local_modified: row.get::<_, Option<i64>>("local_modified")?.and_then(ts_to_datetime),
        remote_modified: row.get::<_, Option<i64>>("remote_modified")?.and_then(ts_to_datetime),
        local_size: row.get::<_, Option<i64>>("local_size")?.map(|v| v as u64),
        remote_size: row.get::<_, Option<i64>>("remote_size")?.map(|v| v as u64),
        status,
        last_sync_time: row.get::<_, Option<i64>>("last_sync_time")?.and_then(ts_to_datetime),
        etag: row.get("etag")?,
        error_message: row.get("error_message")?,
        sync_attempts: row.get::<_, i64>("sync_attempts")? as u32,
    })
}

fn ts_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn datetime_to_ts(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|d| d.timestamp())
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<SyncState>> {
        let conn = self.conn()?;
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            conn.query_row("SELECT * FROM sync_state WHERE path = ?1", params![path], row_to_state)
                .optional()
                .map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn upsert(&self, state: &SyncState) -> Result<()> {
        let conn = self.conn()?;
        let state = state.clone();
        tokio::task::spawn_blocking(move || {
            conn.execute(
                "INSERT INTO sync_state (
                    path, is_directory, local_hash, remote_hash, local_modified, remote_modified,
                    local_size, remote_size, status, last_sync_time, etag, error_message, sync_attempts
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(path) DO UPDATE SET
                    is_directory = excluded.is_directory,
                    local_hash = excluded.local_hash,
                    remote_hash = excluded.remote_hash,
                    local_modified = excluded.local_modified,
                    remote_modified = excluded.remote_modified,
                    local_size = excluded.local_size,
                    remote_size = excluded.remote_size,
                    status = excluded.status,
                    last_sync_time = excluded.last_sync_time,
                    etag = excluded.etag,
                    error_message = excluded.error_message,
                    sync_attempts = excluded.sync_attempts",
                params![
                    state.path,
                    state.is_directory as i64,
                    state.local_hash,
                    state.remote_hash,
                    datetime_to_ts(state.local_modified),
                    datetime_to_ts(state.remote_modified),
                    state.local_size.map(|v| v as i64),
                    state.remote_size.map(|v| v as i64),
                    state.status.to_string(),
                    datetime_to_ts(state.last_sync_time),
                    state.etag,
                    state.error_message,
                    state.sync_attempts as i64,
                ],
            )
            .map_err(EngineError::from)
            .map(|_| ())
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let conn = self.conn()?;
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            conn.execute("DELETE FROM sync_state WHERE path = ?1", params![path])
                .map_err(EngineError::from)
                .map(|_| ())
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn list_all(&self) -> Result<Vec<SyncState>> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare("SELECT * FROM sync_state ORDER BY path")?;
            let rows = stmt.query_map([], row_to_state)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SyncState>> {
        let conn = self.conn()?;
        let status = status.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stmt = conn.prepare("SELECT * FROM sync_state WHERE status = ?1 ORDER BY path")?;
            let rows = stmt.query_map(params![status], row_to_state)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn append_history(&self, record: &OperationRecord) -> Result<()> {
        let conn = self.conn()?;
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            conn.execute(
                "INSERT INTO operation_history (
                    timestamp, path, action_type, success, duration_ms, bytes_transferred, error_message
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.timestamp.timestamp(),
                    record.path,
                    record.action_type.to_string(),
                    record.success as i64,
                    record.duration_ms as i64,
                    record.bytes_transferred as i64,
                    record.error_message,
                ],
            )
            .map_err(EngineError::from)
            .map(|_| ())
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn recent_history(&self, limit: u32, since: Option<DateTime<Utc>>) -> Result<Vec<OperationRecord>> {
        let conn = self.conn()?;
        let since_ts = since.map(|d| d.timestamp());
        tokio::task::spawn_blocking(move || {
            let map_row = |row: &rusqlite::Row| {
                let action_str: String = row.get(2)?;
                let action_type = OperationType::from_str(&action_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?;
                Ok(OperationRecord {
                    timestamp: Utc.timestamp_opt(row.get(0)?, 0).single().unwrap_or_else(Utc::now),
                    path: row.get(1)?,
                    action_type,
                    success: row.get::<_, i64>(3)? != 0,
                    duration_ms: row.get::<_, i64>(4)? as u64,
                    bytes_transferred: row.get::<_, i64>(5)? as u64,
                    error_message: row.get(6)?,
                })
            };

            let rows = match since_ts {
                Some(ts) => {
                    let mut stmt = conn.prepare(
                        "SELECT timestamp, path, action_type, success, duration_ms, bytes_transferred, error_message
                         FROM operation_history WHERE timestamp >= ?1 ORDER BY timestamp DESC LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![ts, limit], map_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT timestamp, path, action_type, success, duration_ms, bytes_transferred, error_message
                         FROM operation_history ORDER BY timestamp DESC LIMIT ?1",
                    )?;
                    let rows = stmt.query_map(params![limit], map_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                }
            };
            rows.map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn purge_history_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || {
            conn.execute("DELETE FROM operation_history WHERE timestamp < ?1", params![before.timestamp()])
                .map(|n| n as u64)
                .map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || {
            let mut stats = StoreStats::default();
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_state GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count as u64))
            })?;
            for row in rows {
                let (status, count) = row?;
                stats.total_paths += count;
                match status.as_str() {
                    "synced" => stats.synced += count,
                    "conflict" => stats.conflicted += count,
                    "error" => stats.errored += count,
                    _ => stats.pending += count,
                }
            }
            Ok(stats)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(path: &str) -> SyncState {
        let mut state = SyncState::new(path, false);
        state.local_hash = Some("abc123".to_string());
        state.status = SyncStatus::LocalNew;
        state
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        store.upsert(&sample("a/b.txt")).await.unwrap();

        let fetched = store.get("a/b.txt").await.unwrap().unwrap();
        assert_eq!(fetched.local_hash, Some("abc123".to_string()));
        assert_eq!(fetched.status, SyncStatus::LocalNew);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        store.upsert(&sample("a.txt")).await.unwrap();

        let mut updated = sample("a.txt");
        updated.status = SyncStatus::Synced;
        store.upsert(&updated).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        store.upsert(&sample("gone.txt")).await.unwrap();
        store.delete("gone.txt").await.unwrap();
        assert!(store.get("gone.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_queryable_most_recent_first() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        for i in 0..3 {
            store
                .append_history(&OperationRecord {
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap(),
                    path: format!("f{}.txt", i),
                    action_type: OperationType::Upload,
                    success: true,
                    duration_ms: 10,
                    bytes_transferred: 100,
                    error_message: None,
                })
                .await
                .unwrap();
        }

        let recent = store.recent_history(2, None).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "f2.txt");
    }

    #[tokio::test]
    async fn stats_buckets_by_status() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        store.upsert(&sample("a.txt")).await.unwrap();
        let mut synced = sample("b.txt");
        synced.status = SyncStatus::Synced;
        store.upsert(&synced).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_paths, 2);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.pending, 1);
    }
}
