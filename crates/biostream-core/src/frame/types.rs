//! Frame types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First byte of a JPEG start-of-image marker
pub const START_OF_IMAGE: u8 = 0xFF;

/// Header field carrying the payload length
pub const CONTENT_LENGTH: &[u8] = b"Content-Length:";

/// Parsed block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload bytes following the start marker
    pub content_length: usize,
    /// Header text read up to and including `Content-Length:`
    pub raw: Vec<u8>,
}

/// One JPEG image pulled off the stream
///
/// Always `content_length + 1` bytes long and always starts with
/// [`START_OF_IMAGE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    pub(crate) fn from_buffer(buf: Vec<u8>) -> Self {
        debug_assert_eq!(buf.first(), Some(&START_OF_IMAGE));
        Self {
            bytes: Bytes::from(buf),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap reference-counted copy of the frame bytes
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Declared `Content-Length` this frame was read with
    pub fn content_length(&self) -> usize {
        self.bytes.len().saturating_sub(1)
    }
}

/// A frame as published to sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedFrame {
    /// Position within the session, starting at 0
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub frame: Frame,
}

impl TaggedFrame {
    pub fn new(sequence: u64, frame: Frame) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            frame,
        }
    }
}

/// Bounds applied while parsing untrusted stream bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorLimits {
    /// Header bytes read without finding `Content-Length:` before giving up
    pub max_header_len: usize,
    /// Longest accepted length field (spaces included)
    pub max_length_digits: usize,
    /// Largest declared payload accepted
    pub max_frame_len: usize,
}

impl Default for ExtractorLimits {
    fn default() -> Self {
        Self {
            max_header_len: 64 * 1024,
            max_length_digits: 32,
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}
