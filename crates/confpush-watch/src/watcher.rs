//! Reload-and-broadcast on file change.

use std::time::SystemTime;

use confpush_core::SnapshotLoader;
use confpush_hub::{BroadcastReport, Broadcaster};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fs::ChangeEvent;
use crate::tracker::ModificationTracker;

/// Result of handling one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Modification time unchanged; duplicate notification.
    Unchanged,
    /// File changed but could not be loaded. Nothing was broadcast.
    LoadFailed,
    /// A new snapshot was broadcast.
    Broadcast(BroadcastReport),
}

/// Owns the debounce state and turns change events into broadcasts.
pub struct ChangeWatcher {
    tracker: ModificationTracker,
    loader: SnapshotLoader,
    broadcaster: Broadcaster,
}

impl ChangeWatcher {
    /// The tracker is seeded with the file's modification time right now.
    pub fn new(loader: SnapshotLoader, broadcaster: Broadcaster) -> Self {
        Self {
            tracker: ModificationTracker::new(loader.path()),
            loader,
            broadcaster,
        }
    }

    pub fn last_known_modified(&self) -> Option<SystemTime> {
        self.tracker.last_known()
    }

    /// Handle one "file may have changed" notification.
    ///
    /// The new modification time is only committed once the file loads, so
    /// a notification that arrives while an editor is still mid-write is
    /// retried on the next event rather than swallowed.
    pub async fn on_change_event(&mut self) -> WatchOutcome {
        let current = self.tracker.current();
        if !self.tracker.is_changed(current) {
            debug!("Modification time unchanged, ignoring duplicate event");
            return WatchOutcome::Unchanged;
        }

        let Some(snapshot) = self.loader.try_load() else {
            return WatchOutcome::LoadFailed;
        };
        self.tracker.commit(current);

        info!(seq = snapshot.seq(), "Watched file changed, broadcasting update");
        WatchOutcome::Broadcast(self.broadcaster.broadcast(&snapshot).await)
    }

    /// Consume change events until `shutdown` fires or the channel closes.
    ///
    /// Events that queue up while a broadcast is in flight are coalesced
    /// into one reload.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) {
        info!(path = %self.loader.path().display(), "Change watcher started");

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping change watcher");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Change event channel closed, stopping change watcher");
                        break;
                    }
                },
            };

            let mut coalesced = 0usize;
            while events.try_recv().is_ok() {
                coalesced += 1;
            }
            debug!(path = %event.path.display(), coalesced, "Change event received");

            self.on_change_event().await;
        }
    }
}
