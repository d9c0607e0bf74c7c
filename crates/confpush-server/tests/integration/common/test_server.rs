//! In-process confpush service for integration tests.
//!
//! Starts a service on an ephemeral port watching a file in a temp
//! directory, plus client helpers that decode pushed envelopes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use confpush_core::{EnvelopeHeader, FrameType};
use confpush_hub::ClientRegistry;
use confpush_server::{AppResult, ServerConfig, Service};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type TestClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// A running service and the file it watches.
pub struct TestServer {
    _dir: tempfile::TempDir,
    path: PathBuf,
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    shutdown: CancellationToken,
    handle: JoinHandle<AppResult<()>>,
}

impl TestServer {
    /// Start a service whose watched file holds `initial`.
    pub async fn start(initial: &str) -> Self {
        Self::start_with(Some(initial), |_| {}).await
    }

    /// Start a service, optionally without creating the watched file, and
    /// let the caller adjust the config first.
    pub async fn start_with(
        initial: Option<&str>,
        configure: impl FnOnce(&mut ServerConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        if let Some(content) = initial {
            std::fs::write(&path, content).unwrap();
        }

        let mut config = ServerConfig {
            watch_path: path.clone(),
            port: 0,
            send_timeout_ms: 1000,
            handshake_timeout_ms: 1000,
            shutdown_grace_ms: 1000,
            ..Default::default()
        };
        configure(&mut config);

        let service = Service::new(config).unwrap().bind().await.unwrap();
        let addr = service.local_addr();
        let registry = service.registry();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(service.run(shutdown.clone()));

        Self {
            _dir: dir,
            path,
            addr,
            registry,
            shutdown,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Overwrite the watched file.
    ///
    /// Sleeps first so the new modification time differs from the last
    /// one even on file systems with coarse timestamps.
    pub async fn edit(&self, content: &str) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&self.path, content).unwrap();
    }

    pub async fn connect(&self) -> TestClient {
        let (client, _response) = timeout(WAIT, connect_async(self.url()))
            .await
            .expect("connect timed out")
            .expect("handshake failed");
        client
    }

    pub async fn wait_for_clients(&self, n: usize) {
        timeout(WAIT, async {
            while self.registry.len() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {n} clients, registry holds {}",
                self.registry.len()
            )
        });
    }

    /// Cancel the service and wait for `run` to return.
    pub async fn stop(self) -> AppResult<()> {
        self.shutdown.cancel();
        timeout(WAIT, self.handle)
            .await
            .expect("service did not stop")
            .expect("service task panicked")
    }
}

/// Wait for the next pushed snapshot and return its JSON payload.
pub async fn next_document(client: &mut TestClient) -> serde_json::Value {
    let msg = timeout(WAIT, client.next())
        .await
        .expect("no frame received")
        .expect("connection ended")
        .expect("transport error");

    let frame = match msg {
        Message::Binary(frame) => frame,
        other => panic!("expected binary frame, got {other:?}"),
    };
    let (header, payload) = EnvelopeHeader::parse(&frame).unwrap();
    assert_eq!(header.frame_type(), Some(FrameType::Snapshot));
    serde_json::from_slice(payload).unwrap()
}

/// Assert nothing arrives for `window`.
pub async fn assert_silent(client: &mut TestClient, window: Duration) {
    if let Ok(msg) = timeout(window, client.next()).await {
        panic!("expected no frame, got {msg:?}");
    }
}
