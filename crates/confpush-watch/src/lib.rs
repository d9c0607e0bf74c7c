//! Change detection for the watched file.
//!
//! - `FsWatcher`: bridges OS file notifications (`notify`) into a tokio
//!   channel of [`ChangeEvent`]s
//! - `ModificationTracker`: last-known modification time, used to drop
//!   duplicate notifications for a single write
//! - `ChangeWatcher`: on each event, reloads and re-broadcasts the snapshot

pub mod error;
pub mod fs;
pub mod tracker;
pub mod watcher;

pub use error::{WatchError, WatchResult};
pub use fs::{ChangeEvent, FsWatcher};
pub use tracker::ModificationTracker;
pub use watcher::{ChangeWatcher, WatchOutcome};
