//! A sync engine that reconciles a local folder against a pluggable remote
//! storage backend: change detection, bidirectional planning, conflict
//! resolution, and a retrying executor, all driven through the
//! [`StorageAdapter`] trait so the remote side is never hardcoded to one
//! backend (§1-§2).

pub mod adapter;
pub mod conflict;
pub mod detector;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod model;
pub mod options;
pub mod path;
pub mod planner;
pub mod store;
pub mod throttle;
pub mod watcher;

pub use adapter::{local::LocalFsAdapter, s3::S3Adapter, StorageAdapter};
pub use conflict::{ConflictAnalysis, ConflictResolver, ConflictStrategy, Resolution, SmartHandler};
pub use engine::{Engine, EngineState};
pub use error::{EngineError, Result};
pub use model::{
    Action, ActionKind, ConflictKind, OperationRecord, OperationType, SyncItem, SyncPlan, SyncResult, SyncState,
    SyncStatus, WatchEventKind,
};
pub use options::{EngineConfig, SyncMode, SyncOptions};
pub use path::Filter;
pub use store::{sqlite::SqliteStateStore, StateStore};
