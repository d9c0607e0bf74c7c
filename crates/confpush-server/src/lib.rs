//! confpush server.
//!
//! Wires the pieces together:
//! - WebSocket accept loop, one handler task per client
//! - Initial snapshot broadcast at startup
//! - Change watcher re-broadcasting on every valid edit
//! - Graceful shutdown via a cancellation token

pub mod app;
pub mod config;
pub mod error;
pub mod limiter;

pub use app::{BoundService, Service};
pub use config::ServerConfig;
pub use error::{AppError, AppResult};
