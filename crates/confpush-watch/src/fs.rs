//! OS file notifications.
//!
//! `notify` delivers events on its own thread. The callback filters them
//! down to create/modify events naming the watched file and hands them to
//! tokio through a bounded channel. When the channel is full an event is
//! already pending, and since the consumer re-reads the file's modification
//! time anyway, the extra event is dropped rather than blocking the notify
//! thread.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use crate::error::{WatchError, WatchResult};

/// The watched file may have changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
}

/// Keeps the OS watch alive. Dropping it stops event delivery and closes
/// the channel.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    target: PathBuf,
}

impl FsWatcher {
    /// Watch `path` and return the stream of change events.
    ///
    /// The parent directory is watched (non-recursively) so that editors
    /// that save by writing a temp file and renaming it over the target are
    /// still seen.
    pub fn start(
        path: &Path,
        capacity: usize,
    ) -> WatchResult<(Self, mpsc::Receiver<ChangeEvent>)> {
        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| WatchError::InvalidPath(path.to_path_buf()))?
            .to_os_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "File watcher error");
                    return;
                }
            };
            if !is_content_change(&event.kind) {
                return;
            }
            let Some(path) = event
                .paths
                .iter()
                .find(|p| p.file_name() == Some(file_name.as_os_str()))
            else {
                return;
            };

            trace!(kind = ?event.kind, path = %path.display(), "Watched file event");
            match tx.try_send(ChangeEvent { path: path.clone() }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!("Change already pending, coalescing event");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Change event receiver dropped");
                }
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), dir = %dir.display(), "Watching file for changes");
        Ok((
            Self {
                _watcher: watcher,
                target: path.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use std::time::Duration;

    #[test]
    fn test_content_change_kinds() {
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_content_change(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_rejects_path_without_file_name() {
        let err = FsWatcher::start(Path::new("/"), 4).err().unwrap();
        assert!(matches!(err, WatchError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_reports_write_to_watched_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let (watcher, mut rx) = FsWatcher::start(&path, 16).unwrap();
        assert_eq!(watcher.target(), path.as_path());

        // Unrelated file in the same directory is filtered out.
        std::fs::write(dir.path().join("other.json"), "{}").unwrap();
        std::fs::write(&path, r#"{"a":2}"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change event")
            .expect("channel open");
        assert_eq!(event.path.file_name(), path.file_name());
    }
}
