//! Observable progress and state-change notifications (§4.H), delivered over
//! a bounded broadcast channel so a slow subscriber can't stall the engine.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{ActionKind, ConflictKind, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Scanning,
    Comparing,
    Transferring,
    ResolvingConflicts,
    Finalizing,
}

/// Overall run progress, emitted on action start and on action completion
/// (§4.G): `current_path`/`operation_kind` identify the action that just
/// started or finished, `items_processed`/`items_total` drive `percentage`.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressChanged {
    pub phase: SyncPhase,
    pub items_processed: u64,
    pub items_total: u64,
    pub bytes_transferred: u64,
    pub current_path: Option<String>,
    pub operation_kind: Option<ActionKind>,
}

impl ProgressChanged {
    pub fn percentage(&self) -> f32 {
        if self.items_total == 0 {
            return 100.0;
        }
        (self.items_processed as f32 / self.items_total as f32) * 100.0
    }
}

/// Per-file progress, emitted as one item is transferred.
#[derive(Debug, Clone, Serialize)]
pub struct FileProgressChanged {
    pub path: String,
    pub action: ActionKind,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictDetected {
    pub path: String,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChanged {
    pub path: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCompleted {
    pub result: SyncResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    Progress(ProgressChanged),
    FileProgress(FileProgressChanged),
    Conflict(ConflictDetected),
    StateChanged(StateChanged),
    Completed(RunCompleted),
}

/// Fan-out publisher the engine owns; cloning a `Subscriber` is how callers
/// observe a run without the engine holding a reference back to them.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Best-effort publish: with no subscribers this is a no-op, never an error.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
