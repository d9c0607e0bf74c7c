//! Client send abstraction.
//!
//! The registry and broadcaster only see clients through the [`ClientSink`]
//! trait. This allows for:
//! - Unit testing with [`mock::MockClient`]
//! - Any transport whose write half implements `Sink<Message>`

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use confpush_core::Snapshot;
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex as TokioMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of sending one snapshot to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    /// Frame written to the transport.
    Sent,
    /// Client already holds this snapshot or a newer one; nothing written.
    Superseded,
    /// Client was already closed before this send.
    Disconnected,
    /// Transport write failed or timed out.
    Error(String),
}

impl SendResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SendResult::Sent)
    }

    /// The client is gone and must be removed from the registry.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, SendResult::Disconnected | SendResult::Error(_))
    }
}

/// A connected client that snapshots can be pushed to.
pub trait ClientSink: Send + Sync {
    /// Push one snapshot frame.
    fn send(&self, snapshot: Snapshot) -> BoxFuture<'_, SendResult>;

    /// Close the outbound side. Later sends return `Disconnected`.
    fn close(&self) -> BoxFuture<'_, ()>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

struct SinkState<S> {
    sink: S,
    last_seq: Option<u64>,
    closed: bool,
}

/// WebSocket client backed by the write half of a connection.
///
/// Writes are serialized through an async mutex. Each frame goes out as one
/// binary WebSocket message. A snapshot whose `seq` is not newer than the
/// last one written is skipped, so a client never regresses to an older
/// document when a catch-up push races a broadcast.
///
/// Once a write fails or the client is closed, the token returned by
/// [`closed_token`](Self::closed_token) is cancelled so the connection's
/// read side can wind down too.
pub struct WsClient<S> {
    state: TokioMutex<SinkState<S>>,
    peer: Option<SocketAddr>,
    send_timeout: Option<Duration>,
    closed: CancellationToken,
}

impl<S> WsClient<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    pub fn new(sink: S, peer: Option<SocketAddr>) -> Self {
        Self {
            state: TokioMutex::new(SinkState {
                sink,
                last_seq: None,
                closed: false,
            }),
            peer,
            send_timeout: None,
            closed: CancellationToken::new(),
        }
    }

    /// Treat sends that take longer than `timeout` as transport failures.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Token cancelled when the outbound side is closed or broken.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn send_frame(&self, snapshot: Snapshot) -> SendResult {
        let mut state = self.state.lock().await;
        if state.closed {
            return SendResult::Disconnected;
        }
        if state.last_seq.is_some_and(|last| snapshot.seq() <= last) {
            return SendResult::Superseded;
        }

        let msg = Message::Binary(snapshot.frame().to_vec());
        let outcome = match self.send_timeout {
            Some(limit) => match tokio::time::timeout(limit, state.sink.send(msg)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("send timed out after {}ms", limit.as_millis())),
            },
            None => state.sink.send(msg).await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(()) => {
                state.last_seq = Some(snapshot.seq());
                SendResult::Sent
            }
            Err(reason) => {
                state.closed = true;
                self.closed.cancel();
                SendResult::Error(reason)
            }
        }
    }

    async fn close_sink(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        self.closed.cancel();
        if let Err(e) = state.sink.close().await {
            debug!(peer = ?self.peer, error = %e, "Error while closing client sink");
        }
    }
}

impl<S> ClientSink for WsClient<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    fn send(&self, snapshot: Snapshot) -> BoxFuture<'_, SendResult> {
        Box::pin(self.send_frame(snapshot))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close_sink())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Mock client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every snapshot it receives; can be told to fail or stall.
    #[derive(Debug, Default)]
    pub struct MockClient {
        sends: parking_lot::Mutex<Vec<Snapshot>>,
        fail: AtomicBool,
        closed: AtomicBool,
        delay: parking_lot::Mutex<Option<Duration>>,
    }

    impl MockClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// A client whose every send fails.
        pub fn failing() -> Self {
            let client = Self::new();
            client.set_fail(true);
            client
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Delay every send by `delay` before completing it.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = Some(delay);
        }

        pub fn sent(&self) -> Vec<Snapshot> {
            self.sends.lock().clone()
        }

        pub fn send_count(&self) -> usize {
            self.sends.lock().len()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl ClientSink for MockClient {
        fn send(&self, snapshot: Snapshot) -> BoxFuture<'_, SendResult> {
            Box::pin(async move {
                let delay = *self.delay.lock();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if self.is_closed() {
                    return SendResult::Disconnected;
                }
                if self.fail.load(Ordering::SeqCst) {
                    return SendResult::Error("mock send failure".to_string());
                }
                self.sends.lock().push(snapshot);
                SendResult::Sent
            })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confpush_core::SnapshotLoader;
    use std::io::Write;
    use tokio::sync::mpsc;
    use tokio_util::sync::PollSender;

    fn loader(content: &str) -> (tempfile::NamedTempFile, SnapshotLoader) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        let loader = SnapshotLoader::new(file.path());
        (file, loader)
    }

    fn channel_client() -> (WsClient<PollSender<Message>>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (WsClient::new(PollSender::new(tx), None), rx)
    }

    #[test]
    fn test_send_result_classification() {
        assert!(SendResult::Sent.is_success());
        assert!(!SendResult::Superseded.is_success());
        assert!(!SendResult::Superseded.is_failure());
        assert!(SendResult::Disconnected.is_failure());
        assert!(SendResult::Error("x".into()).is_failure());
    }

    #[tokio::test]
    async fn test_ws_client_writes_binary_frame() {
        let (_file, loader) = loader(r#"{"a":1}"#);
        let snapshot = loader.load().unwrap();
        let (client, mut rx) = channel_client();

        assert_eq!(client.send(snapshot.clone()).await, SendResult::Sent);

        match rx.recv().await.unwrap() {
            Message::Binary(bytes) => assert_eq!(bytes, snapshot.frame()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ws_client_skips_older_snapshot() {
        let (_file, loader) = loader("{}");
        let older = loader.load().unwrap();
        let newer = loader.load().unwrap();
        let (client, mut rx) = channel_client();

        assert_eq!(client.send(newer.clone()).await, SendResult::Sent);
        assert_eq!(client.send(older).await, SendResult::Superseded);
        assert_eq!(client.send(newer).await, SendResult::Superseded);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ws_client_failure_is_sticky() {
        let (_file, loader) = loader("{}");
        let (client, rx) = channel_client();
        drop(rx);

        assert!(matches!(
            client.send(loader.load().unwrap()).await,
            SendResult::Error(_)
        ));
        assert_eq!(
            client.send(loader.load().unwrap()).await,
            SendResult::Disconnected
        );
        assert!(client.closed_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_ws_client_send_timeout() {
        let (_file, loader) = loader("{}");
        // Capacity 1 and nobody reading: the second send blocks.
        let (tx, _rx) = mpsc::channel::<Message>(1);
        let client = WsClient::new(PollSender::new(tx), None)
            .with_send_timeout(Duration::from_millis(50));

        assert_eq!(client.send(loader.load().unwrap()).await, SendResult::Sent);
        let result = client.send(loader.load().unwrap()).await;
        assert!(matches!(result, SendResult::Error(ref reason) if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn test_ws_client_closed_rejects_sends() {
        let (_file, loader) = loader("{}");
        let (client, _rx) = channel_client();

        client.close().await;
        assert_eq!(
            client.send(loader.load().unwrap()).await,
            SendResult::Disconnected
        );
    }

    #[tokio::test]
    async fn test_mock_client_records_and_fails() {
        let (_file, loader) = loader("{}");
        let client = mock::MockClient::new();

        assert_eq!(client.send(loader.load().unwrap()).await, SendResult::Sent);
        client.set_fail(true);
        assert!(client.send(loader.load().unwrap()).await.is_failure());
        assert_eq!(client.send_count(), 1);
    }
}
