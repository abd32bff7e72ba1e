//! Stream error taxonomy
//!
//! Every failure a worker can hit ends that worker. Nothing here is retried
//! automatically; a fresh `start()` is required to resume streaming.

use std::time::Duration;

use thiserror::Error;

use crate::device::Modality;

/// Errors raised while negotiating or reading a device stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// No parseable `Content-Length` before the source ran out
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    /// End-of-data in the middle of a frame payload
    #[error("stream truncated: expected {expected} payload bytes, received {received}")]
    StreamTruncated { expected: usize, received: usize },

    #[error("no capture device found for {0}")]
    DeviceNotFound(Modality),

    #[error("stream unavailable for {0}")]
    StreamUnavailable(Modality),

    /// Raised by the close path when the source is shut down under a reader
    #[error("stream closed")]
    Closed,

    /// No frame arrived within the configured read timeout
    #[error("stream stalled: no frame within {0:?}")]
    Stalled(Duration),

    #[error("a stream worker is already running")]
    AlreadyRunning,

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl StreamError {
    /// Whether this failure came from an explicit close of the source
    pub fn is_explicit_close(&self) -> bool {
        matches!(self, StreamError::Closed)
    }

    /// Whether the failure originated in frame parsing rather than negotiation
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            StreamError::MalformedHeader(_) | StreamError::StreamTruncated { .. }
        )
    }
}

/// Result alias used across the stream layers
pub type Result<T> = std::result::Result<T, StreamError>;
