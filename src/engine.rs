//! The public façade: wires adapters, state store, detector, planner, and
//! executor together into the operations the rest of the crate exposes (§4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::adapter::StorageAdapter;
use crate::detector::Detector;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventBus};
use crate::executor::{ExecutionControl, Executor, RunState};
use crate::model::{OperationRecord, SyncPlan, SyncResult, SyncState, SyncStatus, WatchEventKind};
use crate::options::{EngineConfig, SyncOptions};
use crate::path::Filter;
use crate::store::StateStore;

/// The engine's observable lifecycle state (§4.H): `RunState` plus the
/// terminal `Faulted` state a `Fatal` error drives it into (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Stopping,
    /// A `Fatal` error occurred (state-store init failure, storage
    /// corruption); every subsequent call fails until the caller disposes of
    /// this engine and constructs a new one.
    Faulted,
}

impl From<RunState> for EngineState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Idle => EngineState::Idle,
            RunState::Running => EngineState::Running,
            RunState::Paused => EngineState::Paused,
            RunState::Stopping => EngineState::Stopping,
        }
    }
}

/// A running or idle engine for one local-path <-> remote-endpoint pair.
///
/// Holds no long-lived borrow on its adapters or store: both are boxed trait
/// objects so the engine can be constructed once and reused across runs.
pub struct Engine {
    local: Arc<dyn StorageAdapter>,
    remote: Arc<dyn StorageAdapter>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    events: EventBus,
    control: RwLock<Option<ExecutionControl>>,
    faulted: AtomicBool,
}

impl Engine {
    pub fn new(
        local: Arc<dyn StorageAdapter>,
        remote: Arc<dyn StorageAdapter>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            local,
            remote,
            store,
            config,
            events: EventBus::default(),
            control: RwLock::new(None),
            faulted: AtomicBool::new(false),
        }
    }

    /// Observable lifecycle state (§4.H): `Faulted` once a `Fatal` error has
    /// occurred, regardless of what the underlying run state machine reports.
    pub async fn state(&self) -> EngineState {
        if self.faulted.load(Ordering::SeqCst) {
            return EngineState::Faulted;
        }
        self.run_state().await.into()
    }

    /// Every public entry point checks this first: once `Faulted`, every
    /// call fails immediately rather than attempting work, until the caller
    /// reconstructs the engine (§7).
    fn check_faulted(&self) -> Result<()> {
        if self.faulted.load(Ordering::SeqCst) {
            return Err(EngineError::Fatal(
                "engine is faulted; construct a new Engine to continue".to_string(),
            ));
        }
        Ok(())
    }

    /// Latches the engine into `Faulted` if `result` carries a `Fatal` error.
    fn latch_fatal<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(EngineError::Fatal(_)) = &result {
            self.faulted.store(true, Ordering::SeqCst);
        }
        result
    }

    pub async fn init(&self) -> Result<()> {
        self.check_faulted()?;
        let result = async {
            self.store.init().await.map_err(|e| EngineError::Fatal(e.to_string()))?;
            self.local.test_connection().await?;
            self.remote.test_connection().await?;
            Ok(())
        }
        .await;
        self.latch_fatal(result)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Compute the plan a run would execute, without performing any transfer.
    pub async fn get_sync_plan(&self, options: &SyncOptions) -> Result<SyncPlan> {
        self.check_faulted()?;
        self.local.set_follow_symlinks(options.follow_symlinks);
        self.remote.set_follow_symlinks(options.follow_symlinks);

        let filter = self.effective_filter(options)?;
        let detector = Detector::new(
            self.local.as_ref(),
            self.remote.as_ref(),
            self.store.as_ref(),
            options.comparison_key,
        );
        let result = async {
            let observations = detector.observe_all().await?;
            let planner = crate::planner::Planner::new(options, &filter);
            Ok(planner.plan(&observations))
        }
        .await;
        self.latch_fatal(result)
    }

    /// Plan and execute a full run using the engine's default options.
    pub async fn synchronize(&self) -> Result<SyncResult> {
        self.synchronize_with(&self.config.default_options.clone()).await
    }

    pub async fn synchronize_with(&self, options: &SyncOptions) -> Result<SyncResult> {
        let plan = self.get_sync_plan(options).await?;
        self.run_plan(&plan, options).await
    }

    /// Restrict a run to one folder (by canonical relative prefix) rather
    /// than the whole tree.
    pub async fn sync_folder(&self, folder: &str, options: &SyncOptions) -> Result<SyncResult> {
        let plan = self.get_sync_plan(options).await?;
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        let scoped = scope_plan(&plan, |path| path == folder || path.starts_with(&prefix));
        self.run_plan(&scoped, options).await
    }

    /// Restrict a run to an explicit set of canonical paths.
    pub async fn sync_files(&self, paths: &[String], options: &SyncOptions) -> Result<SyncResult> {
        let plan = self.get_sync_plan(options).await?;
        let scoped = scope_plan(&plan, |path| paths.iter().any(|p| p == path));
        self.run_plan(&scoped, options).await
    }

    async fn run_plan(&self, plan: &SyncPlan, options: &SyncOptions) -> Result<SyncResult> {
        self.check_faulted()?;
        if options.verbose {
            log::debug!(
                "starting run: {} uploads, {} downloads, {} local deletes, {} remote deletes, {} conflicts",
                plan.uploads.len(),
                plan.downloads.len(),
                plan.local_deletes.len(),
                plan.remote_deletes.len(),
                plan.conflicts.len()
            );
        }

        let control = Executor::new_control();
        *self.control.write().await = Some(control.clone());

        let executor = Executor::new(
            self.local.as_ref(),
            self.remote.as_ref(),
            self.store.as_ref(),
            self.events.clone(),
            options.clone(),
        );

        // TimeoutSeconds == 0 means no deadline (§4.H); otherwise a whole-run
        // timeout is an equivalent cancel signal fired at run start (§5).
        let result = if options.timeout_seconds > 0 {
            let deadline_control = control.clone();
            let timeout = std::time::Duration::from_secs(options.timeout_seconds);
            let run = executor.run(plan, control.clone());
            tokio::pin!(run);
            tokio::select! {
                result = &mut run => result,
                _ = tokio::time::sleep(timeout) => {
                    deadline_control.cancel();
                    run.await
                }
            }
        } else {
            executor.run(plan, control).await
        };

        self.events.publish(Event::Completed(crate::events::RunCompleted { result: result.clone() }));
        *self.control.write().await = None;

        if self.config.history_retention_days > 0 {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.history_retention_days as i64);
            if let Err(e) = self.store.purge_history_before(cutoff).await {
                log::warn!("failed to prune operation history: {}", e);
            }
        }

        Ok(result)
    }

    pub async fn pause(&self) {
        if let Some(control) = self.control.read().await.as_ref() {
            control.pause();
        }
    }

    pub async fn resume(&self) {
        if let Some(control) = self.control.read().await.as_ref() {
            control.resume();
        }
    }

    pub async fn cancel(&self) {
        if let Some(control) = self.control.read().await.as_ref() {
            control.cancel();
        }
    }

    pub async fn run_state(&self) -> RunState {
        match self.control.read().await.as_ref() {
            Some(control) => control.state(),
            None => RunState::Idle,
        }
    }

    /// Called by an external watcher (e.g. a `notify` hook, §4.H, §6) when a
    /// local path changed on disk, so the next plan reflects it without a
    /// full rescan having to rediscover it independently. `kind` is a hint:
    /// the current on-disk state is always re-read, so a stale or wrong hint
    /// (duplicate events, coalesced renames) self-corrects rather than
    /// corrupting the shadow state.
    pub async fn notify_local_change(&self, path: &str, kind: WatchEventKind) -> Result<()> {
        self.check_faulted()?;
        let normalized = crate::path::normalize(path)?;
        if !self.config.filter.is_included(&normalized) {
            return Ok(());
        }
        log::debug!("watcher hint {:?} for {}", kind, normalized);

        if let Some(item) = self.local.stat(&normalized).await? {
            let mut state = self
                .store
                .get(&normalized)
                .await?
                .unwrap_or_else(|| SyncState::new(normalized.clone(), item.is_directory));
            state.local_size = Some(item.size);
            state.local_modified = item.last_modified;
            state.local_hash = item.hash;
            if state.status == SyncStatus::Synced {
                state.status = SyncStatus::LocalModified;
            }
            self.store.upsert(&state).await?;
        } else if let Some(mut state) = self.store.get(&normalized).await? {
            state.status = SyncStatus::LocalDeleted;
            self.store.upsert(&state).await?;
        }
        Ok(())
    }

    pub async fn notify_local_rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_faulted()?;
        let from_norm = crate::path::normalize(from)?;
        let to_norm = crate::path::normalize(to)?;
        if let Some(state) = self.store.get(&from_norm).await? {
            self.store.delete(&from_norm).await?;
            let mut renamed = state;
            renamed.path = to_norm.clone();
            self.store.upsert(&renamed).await?;
        }
        self.notify_local_change(&to_norm, WatchEventKind::Changed).await
    }

    pub async fn get_pending_operations(&self) -> Result<Vec<SyncState>> {
        self.check_faulted()?;
        let mut pending = Vec::new();
        for status in [
            SyncStatus::LocalNew,
            SyncStatus::RemoteNew,
            SyncStatus::LocalModified,
            SyncStatus::RemoteModified,
            SyncStatus::LocalDeleted,
            SyncStatus::RemoteDeleted,
            SyncStatus::Conflict,
        ] {
            pending.extend(self.store.list_by_status(status).await?);
        }
        Ok(pending)
    }

    pub async fn get_recent_operations(
        &self,
        limit: u32,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<OperationRecord>> {
        self.check_faulted()?;
        self.store.recent_history(limit, since).await
    }

    pub async fn clear_operation_history(&self, before: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        self.check_faulted()?;
        self.store.purge_history_before(before).await
    }

    fn effective_filter(&self, options: &SyncOptions) -> Result<Filter> {
        if options.extra_excludes.is_empty() {
            Ok(self.config.filter.clone())
        } else {
            self.config.filter.with_additional(&options.extra_excludes)
        }
    }
}

fn scope_plan(plan: &SyncPlan, keep: impl Fn(&str) -> bool) -> SyncPlan {
    let filter_vec = |actions: &[crate::model::Action]| -> Vec<crate::model::Action> {
        actions.iter().filter(|a| keep(&a.path)).cloned().collect()
    };

    SyncPlan {
        uploads: filter_vec(&plan.uploads),
        downloads: filter_vec(&plan.downloads),
        local_deletes: filter_vec(&plan.local_deletes),
        remote_deletes: filter_vec(&plan.remote_deletes),
        conflicts: filter_vec(&plan.conflicts),
        no_ops: filter_vec(&plan.no_ops),
        removed_states: filter_vec(&plan.removed_states),
    }
}
