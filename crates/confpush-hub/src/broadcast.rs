//! Snapshot broadcast.
//!
//! A broadcast sends one snapshot to every registered client. Sends run
//! concurrently and independently: a failing client is removed from the
//! registry and never retried, and never affects delivery to the others.

use std::sync::Arc;

use confpush_core::Snapshot;
use futures_util::future::join_all;
use tracing::{debug, info};

use crate::client::SendResult;
use crate::registry::{ClientId, ClientRegistry};

/// Outcome of one broadcast. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Snapshot sequence number.
    pub seq: u64,
    /// Clients in the membership snapshot.
    pub recipients: usize,
    /// Clients the frame was written to.
    pub delivered: usize,
    /// Clients that already held this snapshot or a newer one.
    pub superseded: usize,
    /// Clients removed because their send failed.
    pub dropped: usize,
    /// Frame size in bytes.
    pub frame_bytes: usize,
}

/// Pushes snapshots to all registered clients.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Send `snapshot` to every current member.
    pub async fn broadcast(&self, snapshot: &Snapshot) -> BroadcastReport {
        let members = self.registry.snapshot_members();
        let mut report = BroadcastReport {
            seq: snapshot.seq(),
            recipients: members.len(),
            frame_bytes: snapshot.frame_len(),
            ..Default::default()
        };

        let results = join_all(members.iter().map(|(id, client)| {
            let snapshot = snapshot.clone();
            async move { (*id, client.send(snapshot).await) }
        }))
        .await;

        let mut failed: Vec<ClientId> = Vec::new();
        for (id, result) in results {
            match result {
                SendResult::Sent => report.delivered += 1,
                SendResult::Superseded => report.superseded += 1,
                SendResult::Disconnected | SendResult::Error(_) => {
                    debug!(client = %id, ?result, "Send failed, dropping client");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            self.registry.unregister(id);
            report.dropped += 1;
        }

        info!(
            seq = report.seq,
            frame_bytes = report.frame_bytes,
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use confpush_core::SnapshotLoader;
    use std::io::Write;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    fn snapshots(content: &str) -> (tempfile::NamedTempFile, SnapshotLoader) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        let loader = SnapshotLoader::new(file.path());
        (file, loader)
    }

    #[tokio::test]
    async fn test_broadcast_empty_registry() {
        let (_file, loader) = snapshots("{}");
        let broadcaster = Broadcaster::new(Arc::new(ClientRegistry::new()));

        let report = broadcaster.broadcast(&loader.load().unwrap()).await;
        assert_eq!(report.recipients, 0);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test]
    async fn test_broadcast_drops_exactly_failing_clients() {
        let (_file, loader) = snapshots(r#"{"a":1}"#);
        let snapshot = loader.load().unwrap();

        for (n, m) in [(1, 0), (1, 1), (5, 2), (10, 10), (7, 3)] {
            let registry = Arc::new(ClientRegistry::new());
            let mut healthy = Vec::new();
            // Stride 3 is coprime with every n above, so failing clients
            // are spread through registration order.
            for i in 0..n {
                if (i * 3) % n < m {
                    registry.register(Arc::new(MockClient::failing()));
                } else {
                    let client = Arc::new(MockClient::new());
                    registry.register(client.clone());
                    healthy.push(client);
                }
            }
            let failing = n - healthy.len();
            assert_eq!(failing, m, "test setup for n={n} m={m}");

            let report = Broadcaster::new(registry.clone()).broadcast(&snapshot).await;

            assert_eq!(report.recipients, n);
            assert_eq!(report.dropped, m);
            assert_eq!(report.delivered, n - m);
            assert_eq!(registry.len(), n - m);
            for client in &healthy {
                assert_eq!(client.sent(), vec![snapshot.clone()]);
            }
        }
    }

    #[tokio::test]
    async fn test_slow_client_does_not_block_registry() {
        let (_file, loader) = snapshots("{}");
        let registry = Arc::new(ClientRegistry::new());
        let slow = Arc::new(MockClient::new());
        slow.set_delay(Duration::from_millis(200));
        registry.register(slow.clone());

        let broadcaster = Broadcaster::new(registry.clone());
        let snapshot = loader.load().unwrap();
        let task = tokio::spawn(async move { broadcaster.broadcast(&snapshot).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = registry.register(Arc::new(MockClient::new()));
        assert!(registry.unregister(id));

        let report = task.await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(slow.send_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_broadcast_is_safe() {
        let (_file, loader) = snapshots("{}");
        let registry = Arc::new(ClientRegistry::new());
        let client = Arc::new(MockClient::failing());
        client.set_delay(Duration::from_millis(50));
        let id = registry.register(client);

        let broadcaster = Broadcaster::new(registry.clone());
        let snapshot = loader.load().unwrap();
        let task = tokio::spawn(async move { broadcaster.broadcast(&snapshot).await });

        // Disconnect path removes the client first; broadcast removal is a no-op.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.unregister(id));

        let report = task.await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_not_counted_as_delivery() {
        let (_file, loader) = snapshots("{}");
        let registry = Arc::new(ClientRegistry::new());
        let (tx, _rx) = tokio::sync::mpsc::channel::<Message>(8);
        registry.register(Arc::new(crate::client::WsClient::new(
            tokio_util::sync::PollSender::new(tx),
            None,
        )));

        let older = loader.load().unwrap();
        let newer = loader.load().unwrap();
        let broadcaster = Broadcaster::new(registry.clone());

        assert_eq!(broadcaster.broadcast(&newer).await.delivered, 1);
        let report = broadcaster.broadcast(&older).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.superseded, 1);
        assert_eq!(registry.len(), 1);
    }
}
