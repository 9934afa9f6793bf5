use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::lsp::protocol::FileChangeType;
use crate::session::filter::WatchPattern;
use crate::utils::error::{ClientError, ClientResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedChange {
    pub path: PathBuf,
    pub kind: FileChangeType,
}

/// Recursive watcher on the workspace root that reports changes to files
/// matching a [`WatchPattern`]. Stops watching when dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    pub fn start(
        root: &Path,
        pattern: WatchPattern,
        changes: mpsc::UnboundedSender<WatchedChange>,
    ) -> ClientResult<Self> {
        tracing::debug!("Watching {} for {}", root.display(), pattern.as_str());
        let filter_root = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!("File watcher error: {e}");
                    return;
                }
            };
            let Some(kind) = change_type(&event.kind) else { return };
            for path in event.paths {
                if pattern.is_match(&filter_root, &path) {
                    let _ = changes.send(WatchedChange { path, kind });
                }
            }
        })
        .map_err(|e| ClientError::Watch(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| ClientError::Watch(format!("{}: {e}", root.display())))?;

        Ok(Self { _watcher: watcher, root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn change_type(kind: &EventKind) -> Option<FileChangeType> {
    match kind {
        EventKind::Create(_) => Some(FileChangeType::Created),
        EventKind::Remove(_) => Some(FileChangeType::Deleted),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FileChangeType::Changed),
        _ => None,
    }
}
