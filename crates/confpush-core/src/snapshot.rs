//! Snapshot loading.
//!
//! A [`Snapshot`] is the watched file's current JSON document, re-serialized
//! and wrapped in an envelope, ready to be written to any number of clients.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::envelope::{self, Compression, FrameType, SerializationFormat, HEADER_LEN};
use crate::error::{CoreError, CoreResult};

/// An encoded, immutable snapshot frame.
///
/// Cloning is cheap: the frame bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    frame: Arc<[u8]>,
    seq: u64,
    timestamp_ms: u64,
}

impl Snapshot {
    fn new(frame: Vec<u8>, seq: u64, timestamp_ms: u64) -> Self {
        Self {
            frame: frame.into(),
            seq,
            timestamp_ms,
        }
    }

    /// Full envelope bytes (header + payload).
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// JSON payload without the header.
    pub fn payload(&self) -> &[u8] {
        &self.frame[HEADER_LEN..]
    }

    /// Production order of this snapshot among those built by the same loader.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Build time in milliseconds since the Unix epoch, as stamped in the header.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        self.frame.len()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("seq", &self.seq)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("len", &self.frame.len())
            .finish()
    }
}

/// Builds snapshots from the watched file.
///
/// Clones share the sequence counter and a read lock. Reading the file and
/// taking a `seq` happen under that lock, so `seq` order is read order: a
/// snapshot with a higher `seq` never holds older file content.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    path: PathBuf,
    next_seq: Arc<AtomicU64>,
    read_lock: Arc<Mutex<()>>,
}

impl SnapshotLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_seq: Arc::new(AtomicU64::new(1)),
            read_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, validate and encode the watched file.
    ///
    /// # Errors
    ///
    /// - `CoreError::FileUnavailable`: missing, unreadable, or not UTF-8
    /// - `CoreError::MalformedPayload`: content is not a JSON document
    pub fn load(&self) -> CoreResult<Snapshot> {
        let (payload, seq) = self.read_sequenced()?;

        let timestamp_ms = envelope::now_ms();
        let frame = envelope::encode(
            FrameType::Snapshot,
            SerializationFormat::Json,
            Compression::None,
            timestamp_ms,
            &payload,
        );

        debug!(
            path = %self.path.display(),
            seq,
            payload_bytes = payload.len(),
            "Snapshot built"
        );
        Ok(Snapshot::new(frame, seq, timestamp_ms))
    }

    /// Like [`load`](Self::load), but logs the failure and returns `None`.
    ///
    /// `None` means "no update available"; callers keep whatever state they
    /// already have.
    pub fn try_load(&self) -> Option<Snapshot> {
        match self.load() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Failed to load snapshot, skipping update");
                None
            }
        }
    }

    /// Read and re-serialize the file, then take the next `seq`, all under
    /// the read lock. A failed read or parse consumes no `seq`.
    fn read_sequenced(&self) -> CoreResult<(Vec<u8>, u64)> {
        let _guard = self.read_lock.lock();

        let content =
            std::fs::read_to_string(&self.path).map_err(|source| CoreError::FileUnavailable {
                path: self.path.clone(),
                source,
            })?;

        // Editors on Windows like to prepend a BOM.
        let text = content.strip_prefix('\u{feff}').unwrap_or(&content);

        let document: serde_json::Value =
            serde_json::from_str(text).map_err(|source| self.malformed(source))?;
        let payload = serde_json::to_vec(&document).map_err(|source| self.malformed(source))?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        Ok((payload, seq))
    }

    fn malformed(&self, source: serde_json::Error) -> CoreError {
        CoreError::MalformedPayload {
            path: self.path.clone(),
            source,
        }
    }
}

/// Load a single snapshot from `path`.
pub fn load_snapshot(path: impl AsRef<Path>) -> CoreResult<Snapshot> {
    SnapshotLoader::new(path.as_ref()).load()
}
