//! Binary envelope framing.
//!
//! Every frame pushed to a client is a fixed 12-byte header followed
//! immediately by the payload bytes:
//!
//! ```text
//! offset  size  field
//! 0       1     stream_type           (reserved, always 0)
//! 1       1     frame_type            (0x01 = full snapshot)
//! 2       1     serialization_format  (0 = JSON)
//! 3       1     compression           (0 = none, 1 = gzip, reserved)
//! 4       8     timestamp_ms          (u64, big-endian, Unix epoch ms)
//! 12      ..    payload
//! ```
//!
//! There is no length prefix: the payload length is implied by the
//! transport frame that carries the envelope.

use crate::error::{CoreError, CoreResult};

/// Header length in bytes. Independent of payload size.
pub const HEADER_LEN: usize = 12;

/// Value of the reserved `stream_type` byte.
pub const STREAM_TYPE: u8 = 0x00;

/// Kind of frame carried by the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Full replacement of the watched document.
    Snapshot = 0x01,
}

impl FrameType {
    /// Decode a header byte; `None` for values this build does not know.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// Payload serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SerializationFormat {
    Json = 0x00,
}

impl SerializationFormat {
    /// Decode a header byte; `None` for values this build does not know.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Json),
            _ => None,
        }
    }
}

/// Payload compression flag.
///
/// `Gzip` is reserved on the wire; the server never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Compression {
    None = 0x00,
    Gzip = 0x01,
}

impl Compression {
    /// Decode a header byte; `None` for values this build does not know.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// Build an envelope: header followed by `payload`.
pub fn encode(
    frame_type: FrameType,
    format: SerializationFormat,
    compression: Compression,
    timestamp_ms: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(STREAM_TYPE);
    buf.push(frame_type as u8);
    buf.push(format as u8);
    buf.push(compression as u8);
    buf.extend_from_slice(&timestamp_ms.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Clamped to zero for clocks set before 1970.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Decoded envelope header.
///
/// Fields hold the raw bytes so that frames using reserved values can still
/// be inspected; use the typed accessors to interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub stream_type: u8,
    pub frame_type: u8,
    pub serialization_format: u8,
    pub compression: u8,
    pub timestamp_ms: u64,
}

impl EnvelopeHeader {
    /// Split a received frame into its header and payload.
    pub fn parse(frame: &[u8]) -> CoreResult<(Self, &[u8])> {
        if frame.len() < HEADER_LEN {
            return Err(CoreError::TruncatedFrame {
                expected: HEADER_LEN,
                actual: frame.len(),
            });
        }

        let (head, payload) = frame.split_at(HEADER_LEN);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&head[4..HEADER_LEN]);

        let header = Self {
            stream_type: head[0],
            frame_type: head[1],
            serialization_format: head[2],
            compression: head[3],
            timestamp_ms: u64::from_be_bytes(ts),
        };
        Ok((header, payload))
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_byte(self.frame_type)
    }

    pub fn serialization_format(&self) -> Option<SerializationFormat> {
        SerializationFormat::from_byte(self.serialization_format)
    }

    pub fn compression(&self) -> Option<Compression> {
        Compression::from_byte(self.compression)
    }
}
