//! Core types for confpush.
//!
//! This crate provides the pieces every other confpush crate builds on:
//! - `envelope`: the fixed 12-byte binary header wrapped around each payload
//! - `Snapshot`: an immutable, ready-to-send encoded frame
//! - `SnapshotLoader`: reads the watched JSON file and builds snapshots

pub mod envelope;
pub mod error;
pub mod snapshot;

pub use envelope::{
    encode, now_ms, Compression, EnvelopeHeader, FrameType, SerializationFormat, HEADER_LEN,
    STREAM_TYPE,
};
pub use error::{CoreError, CoreResult};
pub use snapshot::{load_snapshot, Snapshot, SnapshotLoader};
