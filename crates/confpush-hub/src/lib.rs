//! Client registry and snapshot broadcast for confpush.
//!
//! Provides the connection-facing half of the service:
//! - `ClientSink`: dyn-compatible send capability, with a WebSocket impl
//! - `ClientRegistry`: lock-guarded set of connected clients
//! - `Broadcaster`: best-effort, per-client-independent snapshot push
//! - `serve_client`: per-connection lifecycle (register, catch-up push,
//!   discard inbound, unregister)

pub mod broadcast;
pub mod client;
pub mod connection;
pub mod error;
pub mod registry;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use client::{BoxFuture, ClientSink, SendResult, WsClient};
pub use connection::{accept_connection, serve_client, CloseReason, ConnectionContext};
pub use error::{HubError, HubResult};
pub use registry::{ClientId, ClientRegistry, Member};
