//! Bridges filesystem change notifications into `Engine::notify_local_change`
//! (§6 external-watcher hook), using the `notify` crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::model::WatchEventKind;

/// Owns a `notify` watcher and a background task that forwards its events to
/// the engine. Dropping this stops the watch.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    _task: tokio::task::JoinHandle<()>,
}

impl LocalWatcher {
    pub fn start(root: impl AsRef<Path>, engine: Arc<Engine>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel::<NotifyEvent>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<NotifyEvent>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| EngineError::Adapter(format!("failed to create filesystem watcher: {}", e)))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Adapter(format!("failed to watch {}: {}", root.display(), e)))?;

        let root_for_task = root.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for path in event.paths.iter() {
                    let Some(relative) = relative_to(&root_for_task, path) else { continue };
                    let kind = match event.kind {
                        EventKind::Remove(_) => WatchEventKind::Deleted,
                        EventKind::Create(_) => WatchEventKind::Created,
                        EventKind::Modify(_) => WatchEventKind::Changed,
                        _ => continue,
                    };
                    let _ = engine.notify_local_change(&relative, kind).await;
                }
            }
        });

        Ok(Self { _watcher: watcher, _task: task })
    }
}

fn relative_to(root: &PathBuf, path: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(|p| p.to_string_lossy().replace('\\', "/"))
}
