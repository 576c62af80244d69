//! Turns state file edits into reconcile triggers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use penpot_reconciler::TriggerHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::StateFile;

/// Watches the state file's directory and feeds triggers to the loop.
///
/// The directory is watched rather than the file so that replacement by
/// rename is still observed. Dropping the watcher stops it.
pub struct StateWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl StateWatcher {
    /// Start watching.
    ///
    /// # Errors
    ///
    /// Returns [`notify::Error`] if the directory cannot be watched.
    pub fn spawn(state: Arc<StateFile>, triggers: TriggerHandle) -> notify::Result<Self> {
        let path = state.path().to_path_buf();
        let directory = watched_directory(&path);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let file = path.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if touches(&event, &file) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "State watcher error"),
            }
        })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        debug!(directory = %directory.display(), "Watching state file");

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                while rx.try_recv().is_ok() {}
                if !forward_changes(&state, &triggers) {
                    break;
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for StateWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reload the state and queue its triggers. Returns `false` once the loop
/// has stopped.
fn forward_changes(state: &StateFile, triggers: &TriggerHandle) -> bool {
    match state.reload() {
        Ok(changes) => changes
            .into_iter()
            .all(|trigger| triggers.send(trigger).is_ok()),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable state file");
            true
        }
    }
}

fn watched_directory(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn touches(event: &Event, file: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == file.file_name())
}
