//! Script change notifications, bridged from notify's thread into tokio.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::SandboxError;

/// Watches the directory holding one script and reports changes to it.
pub struct ScriptWatcher {
    // Dropping the watcher stops the notify thread.
    _watcher: RecommendedWatcher,
    changes: mpsc::UnboundedReceiver<PathBuf>,
}

impl ScriptWatcher {
    pub fn new(script: &Path) -> Result<Self, SandboxError> {
        let file_name = script
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| SandboxError::io(format!("{} is not a file", script.display()), std::io::ErrorKind::InvalidInput.into()))?;
        let dir = match script.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, changes) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if let Some(path) = matching_path(&event, &file_name) {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => warn!(error = %e, "file watch error"),
            },
            notify::Config::default(),
        )
        .map_err(|e| watch_error(&dir, e))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(&dir, e))?;

        Ok(Self { _watcher: watcher, changes })
    }

    /// Waits for the next change. `None` once the watcher has shut down.
    pub async fn changed(&mut self) -> Option<PathBuf> {
        let path = self.changes.recv().await?;
        trace!(path = %path.display(), "script changed");
        Some(path)
    }
}

fn watch_error(dir: &Path, e: notify::Error) -> SandboxError {
    SandboxError::Command { command: format!("watch {}", dir.display()), detail: e.to_string() }
}

/// The event's path naming the watched file, for content-changing events.
fn matching_path(event: &Event, file_name: &OsString) -> Option<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return None;
    }
    event
        .paths
        .iter()
        .find(|p| p.file_name() == Some(file_name.as_os_str()))
        .cloned()
}
