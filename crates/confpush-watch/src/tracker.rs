//! Modification-time tracking.
//!
//! File systems often report a single logical write as several events. The
//! tracker remembers the modification time of the last write that was acted
//! on; an event whose file still carries that time is a duplicate.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::trace;

#[derive(Debug, Clone)]
pub struct ModificationTracker {
    path: PathBuf,
    last_known: Option<SystemTime>,
}

impl ModificationTracker {
    /// Start tracking `path`, seeded with its current modification time.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_known = read_mtime(&path);
        Self { path, last_known }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_known(&self) -> Option<SystemTime> {
        self.last_known
    }

    /// Current modification time, or `None` if the file can't be stat'ed.
    pub fn current(&self) -> Option<SystemTime> {
        read_mtime(&self.path)
    }

    pub fn is_changed(&self, current: Option<SystemTime>) -> bool {
        current != self.last_known
    }

    /// Record `mtime` as handled.
    pub fn commit(&mut self, mtime: Option<SystemTime>) {
        self.last_known = mtime;
    }
}

fn read_mtime(path: &Path) -> Option<SystemTime> {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => Some(mtime),
        Err(e) => {
            trace!(path = %path.display(), error = %e, "Cannot read modification time");
            None
        }
    }
}
