//! Runs a `SyncPlan`: a bounded worker pool, retry with jittered backoff,
//! cancellation, pause/resume, and shadow-state/history updates (§4.G, §5).

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::Notify;

use crate::adapter::{BoxedReader, StorageAdapter};
use crate::conflict::{ConflictResolver, Resolution};
use crate::error::{EngineError, Result};
use crate::events::{Event, EventBus, FileProgressChanged, ProgressChanged, SyncPhase};
use crate::model::{Action, ActionKind, OperationRecord, OperationType, SyncItem, SyncPlan, SyncResult, SyncState, SyncStatus};
use crate::options::SyncOptions;
use crate::store::StateStore;
use crate::throttle::BandwidthThrottle;

/// How often `transfer` samples bytes read from a large file and republishes
/// `FileProgressChanged` (§4.G: "at most ~10 Hz per file").
const FILE_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Wraps a source reader so `transfer` can observe bytes as they flow through
/// to the destination adapter's `write`, without the adapter itself knowing
/// anything about progress reporting.
struct CountingReader {
    inner: BoxedReader,
    read_so_far: Arc<AtomicU64>,
}

impl AsyncRead for CountingReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if poll.is_ready() {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.read_so_far.fetch_add(read as u64, Ordering::Relaxed);
            }
        }
        poll
    }
}

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

/// The executor's run state machine (§5): `pause`/`resume`/`cancel` flip
/// these atomically so a concurrently-running worker pool observes them
/// without locking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopping = 3,
}

impl From<u8> for RunState {
    fn from(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Paused,
            3 => RunState::Stopping,
            _ => RunState::Idle,
        }
    }
}

/// Shared control handle: the caller keeps one of these to pause, resume, or
/// cancel a run already in flight.
#[derive(Clone)]
pub struct ExecutionControl {
    state: Arc<AtomicU8>,
    resume_notify: Arc<Notify>,
}

impl ExecutionControl {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Running as u8)),
            resume_notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn pause(&self) {
        self.state.store(RunState::Paused as u8, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.state.store(RunState::Running as u8, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    pub fn cancel(&self) {
        self.state.store(RunState::Stopping as u8, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    async fn wait_if_paused(&self) -> Result<()> {
        loop {
            match self.state() {
                RunState::Paused => self.resume_notify.notified().await,
                RunState::Stopping => return Err(EngineError::Cancelled),
                _ => return Ok(()),
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state() == RunState::Stopping
    }
}

/// Exponential backoff with full jitter (§4.G): `base * 2^attempt`, capped,
/// then a uniform random draw over `[0, cap]`.
struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << self.attempt.min(6));
        let cap = exp.min(BACKOFF_CAP_MS);
        self.attempt += 1;
        let jittered = rand::thread_rng().gen_range(0..=cap.max(1));
        Duration::from_millis(jittered)
    }
}

pub struct Executor<'a> {
    local: &'a dyn StorageAdapter,
    remote: &'a dyn StorageAdapter,
    store: &'a dyn StateStore,
    throttle: BandwidthThrottle,
    events: EventBus,
    options: SyncOptions,
}

impl<'a> Executor<'a> {
    pub fn new(
        local: &'a dyn StorageAdapter,
        remote: &'a dyn StorageAdapter,
        store: &'a dyn StateStore,
        events: EventBus,
        options: SyncOptions,
    ) -> Self {
        let throttle = BandwidthThrottle::new(options.bandwidth_limit_bytes_per_sec);
        Self { local, remote, store, throttle, events, options }
    }

    /// Run every action in `plan`, honoring `control` for pause/resume/cancel,
    /// and return the aggregated result. Files and directory deletes run as
    /// two ordered phases (directory deletes only start once every file
    /// action has finished); within a phase, up to `options.max_concurrency`
    /// actions are in flight at once via a `buffer_unordered` fan-out (§5).
    pub async fn run(&self, plan: &SyncPlan, control: ExecutionControl) -> SyncResult {
        let mut result = SyncResult::default();
        let resolver = ConflictResolver::new(self.options.conflict_strategy.clone());

        for action in &plan.conflicts {
            result.conflicted += 1;
            self.handle_conflict(action, &resolver, &mut result).await;
        }
        for action in &plan.removed_states {
            if let Err(e) = self.store.delete(&action.path).await {
                result.warnings.push(format!("failed to clear state for {}: {}", action.path, e));
            }
        }
        for action in &plan.no_ops {
            result.skipped += 1;
            if let Some(note) = &action.note {
                result.warnings.push(note.clone());
            }
            if action.kind == ActionKind::Converged {
                self.adopt_converged(action).await;
            }
        }

        let (files, dirs) = plan.ordered_phases();
        let total = (files.len() + dirs.len()) as u64;
        let processed = Arc::new(AtomicU64::new(0));
        let bytes_so_far = Arc::new(AtomicU64::new(0));

        self.run_phase(files, &control, &mut result, &processed, &bytes_so_far, total).await;
        if result.error.is_none() {
            self.run_phase(dirs, &control, &mut result, &processed, &bytes_so_far, total).await;
        }

        if self.options.dry_run {
            result.warnings.push("dry run: no changes were applied".to_string());
        }

        result
    }

    /// Runs one ordered phase (files, or directory deletes) with up to
    /// `options.max_concurrency` actions in flight concurrently. Actions
    /// within a phase have no declared ordering relative to each other, so
    /// `buffer_unordered` can poll them in any completion order; `processed`
    /// is shared across phases so progress events report a running total.
    async fn run_phase(
        &self,
        actions: Vec<Action>,
        control: &ExecutionControl,
        result: &mut SyncResult,
        processed: &Arc<AtomicU64>,
        bytes_so_far: &Arc<AtomicU64>,
        total: u64,
    ) {
        let concurrency = self.options.max_concurrency.max(1);

        let outcomes: Vec<(Action, Result<u64>)> = stream::iter(actions.into_iter())
            .map(|action| {
                let control = control.clone();
                let processed = processed.clone();
                let bytes_so_far = bytes_so_far.clone();
                async move {
                    if control.is_cancelled() {
                        return (action, Err(EngineError::Cancelled));
                    }
                    if let Err(e) = control.wait_if_paused().await {
                        return (action, Err(e));
                    }

                    self.events.publish(Event::Progress(ProgressChanged {
                        phase: SyncPhase::Transferring,
                        items_processed: processed.load(Ordering::SeqCst),
                        items_total: total,
                        bytes_transferred: bytes_so_far.load(Ordering::SeqCst),
                        current_path: Some(action.path.clone()),
                        operation_kind: Some(action.kind),
                    }));

                    let outcome = self.execute_one(&action).await;
                    processed.fetch_add(1, Ordering::SeqCst);
                    if let Ok(bytes) = &outcome {
                        bytes_so_far.fetch_add(*bytes, Ordering::SeqCst);
                    }

                    self.events.publish(Event::Progress(ProgressChanged {
                        phase: SyncPhase::Transferring,
                        items_processed: processed.load(Ordering::SeqCst),
                        items_total: total,
                        bytes_transferred: bytes_so_far.load(Ordering::SeqCst),
                        current_path: Some(action.path.clone()),
                        operation_kind: Some(action.kind),
                    }));

                    (action, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (action, outcome) in outcomes {
            match outcome {
                Ok(bytes) => {
                    result.bytes_transferred += bytes;
                    match action.kind {
                        ActionKind::DeleteLocal | ActionKind::DeleteRemote => result.deleted += 1,
                        _ => result.synchronized += 1,
                    }
                }
                Err(EngineError::Cancelled) => {
                    result.error = Some("cancelled".to_string());
                }
                Err(e) => {
                    result.failed += 1;
                    result.warnings.push(format!("{}: {}", action.path, e));
                }
            }
        }
    }

    /// Adopts a `both_new` convergence (§4.E: identical content created
    /// independently on both sides) as `Synced` without any transfer.
    async fn adopt_converged(&self, action: &Action) {
        let is_directory = action.local.as_ref().or(action.remote.as_ref()).map(|i| i.is_directory).unwrap_or(false);
        let mut state = self
            .store
            .get(&action.path)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| SyncState::new(action.path.clone(), is_directory));

        if let Some(local) = &action.local {
            state.local_size = Some(local.size);
            state.local_modified = local.last_modified;
            state.local_hash = local.hash.clone();
        }
        if let Some(remote) = &action.remote {
            state.remote_size = Some(remote.size);
            state.remote_modified = remote.last_modified;
            state.etag = remote.etag.clone();
        }
        state.mark_synced(Utc::now());
        let _ = self.store.upsert(&state).await;
    }

    pub fn new_control() -> ExecutionControl {
        ExecutionControl::new()
    }

    async fn handle_conflict(&self, action: &Action, resolver: &ConflictResolver, result: &mut SyncResult) {
        if let Some(kind) = action.conflict_kind {
            self.events.publish(Event::Conflict(crate::events::ConflictDetected {
                path: action.path.clone(),
                kind,
            }));
        }

        match resolver.resolve(action) {
            Resolution::UseLocal => {
                let upload = Action::new(action.path.clone(), ActionKind::Upload)
                    .with_items(action.local.clone(), action.remote.clone());
                if let Err(e) = self.execute_one(&upload).await {
                    result.warnings.push(format!("conflict resolution failed for {}: {}", action.path, e));
                }
            }
            Resolution::UseRemote => {
                let download = Action::new(action.path.clone(), ActionKind::Download)
                    .with_items(action.local.clone(), action.remote.clone());
                if let Err(e) = self.execute_one(&download).await {
                    result.warnings.push(format!("conflict resolution failed for {}: {}", action.path, e));
                }
            }
            Resolution::Skip | Resolution::Ask => {
                result.skipped += 1;
                // Undecided conflicts stay Conflict in the store rather than
                // silently clearing, so the path keeps surfacing until a
                // resolver actually resolves it.
                let mut state = self
                    .store
                    .get(&action.path)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| SyncState::new(action.path.clone(), false));
                state.status = SyncStatus::Conflict;
                let _ = self.store.upsert(&state).await;
                self.record_conflict_outcome(action, OperationType::Skip, Ok(())).await;
            }
            Resolution::RenameLocal(new_name) => {
                let outcome = self.local.rename(&action.path, &new_name).await;
                if let Err(e) = &outcome {
                    result.warnings.push(format!("failed to rename {} aside: {}", action.path, e));
                } else {
                    // The renamed-aside side no longer has content at this
                    // path; clear the shadow so the next detection pass sees
                    // a plain one-sided New/Unchanged pair instead of
                    // mistaking the rename for a real deletion.
                    let _ = self.store.delete(&action.path).await;

                    // Both copies must exist on both sides afterward (§4.F):
                    // push the renamed-aside copy to remote, and restore the
                    // winning remote copy back onto local at the original path.
                    if action.local.is_some() {
                        let propagate = Action::new(new_name.clone(), ActionKind::Upload).with_items(action.local.clone(), None);
                        if let Err(e) = self.execute_one(&propagate).await {
                            result.warnings.push(format!("failed to propagate renamed copy {} to remote: {}", new_name, e));
                        }
                    }
                    if action.remote.is_some() {
                        let restore =
                            Action::new(action.path.clone(), ActionKind::Download).with_items(None, action.remote.clone());
                        if let Err(e) = self.execute_one(&restore).await {
                            result.warnings.push(format!("failed to restore {} from remote after conflict: {}", action.path, e));
                        }
                    }
                }
                self.record_conflict_outcome(action, OperationType::Rename, outcome).await;
            }
            Resolution::RenameRemote(new_name) => {
                let outcome = self.remote.rename(&action.path, &new_name).await;
                if let Err(e) = &outcome {
                    result.warnings.push(format!("failed to rename {} aside: {}", action.path, e));
                } else {
                    let _ = self.store.delete(&action.path).await;

                    if action.remote.is_some() {
                        let propagate =
                            Action::new(new_name.clone(), ActionKind::Download).with_items(None, action.remote.clone());
                        if let Err(e) = self.execute_one(&propagate).await {
                            result.warnings.push(format!("failed to propagate renamed copy {} to local: {}", new_name, e));
                        }
                    }
                    if action.local.is_some() {
                        let restore =
                            Action::new(action.path.clone(), ActionKind::Upload).with_items(action.local.clone(), None);
                        if let Err(e) = self.execute_one(&restore).await {
                            result.warnings.push(format!("failed to restore {} to remote after conflict: {}", action.path, e));
                        }
                    }
                }
                self.record_conflict_outcome(action, OperationType::Rename, outcome).await;
            }
        }
    }

    /// Writes a history row for a conflict resolution that bypasses
    /// `execute_one` (skip/ask, or a rename that never calls `transfer`).
    async fn record_conflict_outcome(&self, action: &Action, action_type: OperationType, outcome: Result<()>) {
        let record = OperationRecord {
            timestamp: Utc::now(),
            path: action.path.clone(),
            action_type,
            success: outcome.is_ok(),
            duration_ms: 0,
            bytes_transferred: 0,
            error_message: outcome.err().map(|e| e.to_string()),
        };
        let _ = self.store.append_history(&record).await;
    }

    /// Execute one action with retry-on-transient-error and update the
    /// shadow state and operation history on completion.
    async fn execute_one(&self, action: &Action) -> Result<u64> {
        if self.options.dry_run {
            return Ok(0);
        }

        let started = Instant::now();
        let mut backoff = Backoff::new();
        let mut attempts_used = 0u32;

        let outcome = loop {
            attempts_used += 1;
            let result = self.perform(action).await;
            match &result {
                Err(e) if e.is_transient() && attempts_used <= self.options.max_retry_attempts => {
                    tokio::time::sleep(backoff.next_delay()).await;
                    continue;
                }
                _ => break result,
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let record = OperationRecord {
            timestamp: Utc::now(),
            path: action.path.clone(),
            action_type: OperationType::from(action.kind),
            success: outcome.is_ok(),
            duration_ms,
            bytes_transferred: *outcome.as_ref().unwrap_or(&0),
            error_message: outcome.as_ref().err().map(|e| e.to_string()),
        };
        let _ = self.store.append_history(&record).await;

        self.update_shadow_state(action, &outcome).await;
        outcome
    }

    async fn perform(&self, action: &Action) -> Result<u64> {
        match action.kind {
            ActionKind::Upload => self.transfer(action, TransferDirection::ToRemote).await,
            ActionKind::Download => self.transfer(action, TransferDirection::ToLocal).await,
            ActionKind::DeleteLocal => {
                self.local.delete(&action.path).await?;
                Ok(0)
            }
            ActionKind::DeleteRemote => {
                self.remote.delete(&action.path).await?;
                Ok(0)
            }
            ActionKind::NoOp | ActionKind::Conflict | ActionKind::RemoveState | ActionKind::Converged => Ok(0),
        }
    }

    async fn transfer(&self, action: &Action, direction: TransferDirection) -> Result<u64> {
        let (source, destination, item): (&dyn StorageAdapter, &dyn StorageAdapter, Option<&SyncItem>) = match direction {
            TransferDirection::ToRemote => (self.local, self.remote, action.local.as_ref()),
            TransferDirection::ToLocal => (self.remote, self.local, action.remote.as_ref()),
        };

        if item.map(|i| i.is_directory).unwrap_or(false) {
            destination.create_directory(&action.path).await?;
            return Ok(0);
        }

        let size = item.map(|i| i.size).unwrap_or(0);
        self.throttle.acquire(size as usize).await;

        let reader = source.read(&action.path).await?;
        let read_so_far = Arc::new(AtomicU64::new(0));
        let counted = CountingReader { inner: reader, read_so_far: read_so_far.clone() };

        let ticker_done = Arc::new(AtomicBool::new(false));
        let ticker = {
            let ticker_done = ticker_done.clone();
            let read_so_far = read_so_far.clone();
            let events = self.events.clone();
            let path = action.path.clone();
            let kind = action.kind;
            tokio::spawn(async move {
                let mut last_reported = 0u64;
                while !ticker_done.load(Ordering::Relaxed) {
                    tokio::time::sleep(FILE_PROGRESS_INTERVAL).await;
                    let done = read_so_far.load(Ordering::Relaxed);
                    if done != last_reported {
                        events.publish(Event::FileProgress(FileProgressChanged {
                            path: path.clone(),
                            action: kind,
                            bytes_done: done,
                            bytes_total: size,
                        }));
                        last_reported = done;
                    }
                }
            })
        };

        let write_result = destination.write(&action.path, Box::new(counted), Some(size)).await;
        ticker_done.store(true, Ordering::Relaxed);
        let _ = ticker.await;
        write_result?;

        // Always emit a final 100% event, even for files small enough that
        // the ticker never woke up in between.
        self.events.publish(Event::FileProgress(FileProgressChanged {
            path: action.path.clone(),
            action: action.kind,
            bytes_done: size,
            bytes_total: size,
        }));

        if self.options.verify_after_write {
            let source_hash = source.hash(&action.path).await?;
            let dest_hash = destination.hash(&action.path).await?;
            if source_hash != dest_hash {
                return Err(EngineError::TransientIo(format!(
                    "post-write verification mismatch for {}",
                    action.path
                )));
            }
        }

        if self.options.preserve_timestamps && destination.capabilities().supports_timestamps {
            if let Some(when) = item.and_then(|i| i.last_modified) {
                if let Err(e) = destination.set_modified(&action.path, when).await {
                    log::debug!("failed to preserve mtime for {}: {}", action.path, e);
                }
            }
        }

        Ok(size)
    }

    async fn update_shadow_state(&self, action: &Action, outcome: &Result<u64>) {
        if matches!(action.kind, ActionKind::NoOp | ActionKind::Conflict | ActionKind::Converged) {
            return;
        }

        match action.kind {
            ActionKind::DeleteLocal | ActionKind::DeleteRemote => {
                if outcome.is_ok() {
                    let _ = self.store.delete(&action.path).await;
                }
                return;
            }
            ActionKind::RemoveState => {
                let _ = self.store.delete(&action.path).await;
                return;
            }
            _ => {}
        }

        let existing = self.store.get(&action.path).await.ok().flatten();
        let is_directory = action.local.as_ref().or(action.remote.as_ref()).map(|i| i.is_directory).unwrap_or(false);
        let mut state = existing.unwrap_or_else(|| SyncState::new(action.path.clone(), is_directory));

        match outcome {
            Ok(_) => {
                if let Some(local) = &action.local {
                    state.local_size = Some(local.size);
                    state.local_modified = local.last_modified;
                    state.local_hash = local.hash.clone();
                }
                if let Some(remote) = &action.remote {
                    state.remote_size = Some(remote.size);
                    state.remote_modified = remote.last_modified;
                    state.etag = remote.etag.clone();
                }

                // A successful transfer leaves both sides byte-identical. The
                // side the action had no prior item for (a fresh Upload's
                // remote, or a fresh Download's local) was never populated
                // above, which would otherwise make the next run's detector
                // see it as a brand-new item with no shadow size/mtime and
                // re-transfer it forever. Re-stat the side just written to so
                // the shadow reflects what's actually there now.
                match action.kind {
                    ActionKind::Upload if action.remote.is_none() => {
                        if let Ok(Some(written)) = self.remote.stat(&action.path).await {
                            state.remote_size = Some(written.size);
                            state.remote_modified = written.last_modified;
                            state.etag = written.etag;
                        }
                    }
                    ActionKind::Download if action.local.is_none() => {
                        if let Ok(Some(written)) = self.local.stat(&action.path).await {
                            state.local_size = Some(written.size);
                            state.local_modified = written.last_modified;
                        }
                    }
                    _ => {}
                }

                state.mark_synced(Utc::now());
            }
            Err(e) => state.mark_error(e.to_string()),
        }

        let _ = self.store.upsert(&state).await;
    }
}

enum TransferDirection {
    ToRemote,
    ToLocal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_stay_within_cap() {
        let mut backoff = Backoff::new();
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay.as_millis() as u64 <= BACKOFF_CAP_MS);
        }
    }

    #[test]
    fn control_starts_running_and_transitions_through_states() {
        let control = Executor::new_control();
        assert_eq!(control.state(), RunState::Running);
        control.pause();
        assert_eq!(control.state(), RunState::Paused);
        control.resume();
        assert_eq!(control.state(), RunState::Running);
        control.cancel();
        assert_eq!(control.state(), RunState::Stopping);
        assert!(control.is_cancelled());
    }
}
