//! Per-connection lifecycle.
//!
//! ```text
//! Connected ──► catch-up push ──► Streaming ──► Closed
//!  register      (unicast, only    read and       unregister
//!                 if the file      discard        (exactly once)
//!                 loads)           inbound
//! ```
//!
//! The protocol is server-push only. Inbound frames are read solely to
//! detect disconnects (and to let tungstenite answer pings) and are then
//! dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use confpush_core::SnapshotLoader;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::client::{ClientSink, WsClient};
use crate::error::{HubError, HubResult};
use crate::registry::ClientRegistry;

/// Everything a connection handler needs, cloned once per connection.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ClientRegistry>,
    pub loader: SnapshotLoader,
    /// Cancelled on service shutdown.
    pub shutdown: CancellationToken,
    pub send_timeout: Option<Duration>,
    /// Upper bound on the WebSocket upgrade. A peer that connects but never
    /// sends the upgrade request is dropped once it elapses.
    pub handshake_timeout: Option<Duration>,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a Close frame.
    PeerClosed,
    /// Inbound stream ended without a Close frame.
    StreamEnded,
    /// Reading from the transport failed.
    TransportError(String),
    /// Outbound side was closed or broke during a send.
    SinkClosed,
    /// Service is shutting down.
    Shutdown,
}

/// Perform the WebSocket handshake on `stream` and serve the client until
/// it disconnects.
pub async fn accept_connection(
    stream: TcpStream,
    ctx: ConnectionContext,
) -> HubResult<CloseReason> {
    let peer = stream.peer_addr().ok();
    let ws = match ctx.handshake_timeout {
        Some(limit) => match tokio::time::timeout(limit, accept_async(stream)).await {
            Ok(handshake) => handshake.map_err(HubError::Handshake)?,
            Err(_) => return Err(HubError::HandshakeTimeout(limit)),
        },
        None => accept_async(stream).await.map_err(HubError::Handshake)?,
    };
    Ok(serve_client(ws, peer, ctx).await)
}

/// Serve an already-upgraded WebSocket connection.
pub async fn serve_client<T>(
    ws: WebSocketStream<T>,
    peer: Option<SocketAddr>,
    ctx: ConnectionContext,
) -> CloseReason
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut inbound) = ws.split();

    let mut client = WsClient::new(sink, peer);
    if let Some(timeout) = ctx.send_timeout {
        client = client.with_send_timeout(timeout);
    }
    let sink_closed = client.closed_token();
    let client = Arc::new(client);

    let id = ctx.registry.register(client.clone());
    info!(client = %id, ?peer, clients = ctx.registry.len(), "Client connected");

    // Catch-up push so the client doesn't wait for the next file change.
    // A missing or invalid file means the client just waits.
    if let Some(snapshot) = ctx.loader.try_load() {
        let seq = snapshot.seq();
        let result = client.send(snapshot).await;
        debug!(client = %id, seq, ?result, "Initial snapshot push");
    }

    let reason = discard_inbound(&mut inbound, &ctx.shutdown, &sink_closed, &*client).await;

    ctx.registry.unregister(id);
    info!(
        client = %id,
        ?peer,
        ?reason,
        clients = ctx.registry.len(),
        "Client disconnected"
    );
    reason
}

async fn discard_inbound<R>(
    inbound: &mut R,
    shutdown: &CancellationToken,
    sink_closed: &CancellationToken,
    client: &dyn ClientSink,
) -> CloseReason
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                client.close().await;
                return CloseReason::Shutdown;
            }
            _ = sink_closed.cancelled() => {
                return CloseReason::SinkClosed;
            }
            msg = inbound.next() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Client sent close frame");
                    return CloseReason::PeerClosed;
                }
                Some(Ok(_)) => {
                    trace!("Discarding inbound frame");
                }
                Some(Err(e)) => {
                    return CloseReason::TransportError(e.to_string());
                }
                None => return CloseReason::StreamEnded,
            }
        }
    }
}
