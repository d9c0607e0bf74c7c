//! Watcher error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Invalid watch path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;
