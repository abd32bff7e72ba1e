//! Worker state tracking
//!
//! One session per worker run. The worker and `stop()` are the only writers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::info;

use super::cancellation::SourceCloser;
use crate::device::Modality;
use crate::error::StreamError;

/// Lifecycle of a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Negotiating,
    Streaming,
    Stopped,
    Error,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Error)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Negotiating => "negotiating",
            WorkerState::Streaming => "streaming",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Live run state of one worker
pub struct StreamSession {
    modality: Modality,
    running: AtomicBool,
    closer: SourceCloser,
    state: watch::Sender<WorkerState>,
}

impl StreamSession {
    pub fn new(modality: Modality) -> Self {
        let (state, _) = watch::channel(WorkerState::Negotiating);
        Self {
            modality,
            running: AtomicBool::new(true),
            closer: SourceCloser::new(),
            state,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn closer(&self) -> &SourceCloser {
        &self.closer
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Clear the running flag and close the source
    ///
    /// Returns true if this call closed the source.
    pub fn request_stop(&self) -> bool {
        self.set_running(false);
        let closed = self.closer.close();
        if closed {
            info!(modality = %self.modality, "Stream source closed on stop request");
        }
        closed
    }
}

/// What a worker did before it ended
#[derive(Debug)]
pub struct WorkerReport {
    pub modality: Modality,
    pub final_state: WorkerState,
    /// Frames published
    pub frames: u64,
    /// Frame bytes published
    pub bytes: u64,
    /// Failure that ended the worker, if any
    pub error: Option<StreamError>,
}
