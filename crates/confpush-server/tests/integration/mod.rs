//! Integration tests for confpush-server.
//!
//! These drive a real service over loopback:
//! - Real TCP listener and WebSocket handshakes
//! - Real file system notifications on a temp file

pub mod common;
