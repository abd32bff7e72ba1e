//! Source closing
//!
//! Closing a session's byte source is the only way to cancel its worker. The
//! close is observed by the worker's in-flight read, which races it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Shared close switch for one session's byte source
#[derive(Clone, Default)]
pub struct SourceCloser {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl SourceCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the source
    ///
    /// Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the source has been closed
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}
