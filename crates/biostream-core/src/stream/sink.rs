//! Frame sinks
//!
//! Publishing happens on the worker task and must never wait on the display
//! layer: bounded channels drop frames when the receiver falls behind.

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::frame::TaggedFrame;

/// Receives every frame a worker extracts
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: &TaggedFrame);
}

impl FrameSink for mpsc::Sender<TaggedFrame> {
    fn publish(&self, frame: &TaggedFrame) {
        match self.try_send(frame.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                debug!(sequence = dropped.sequence, "Frame dropped (receiver behind)");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Frame receiver gone");
            }
        }
    }
}

impl FrameSink for mpsc::UnboundedSender<TaggedFrame> {
    fn publish(&self, frame: &TaggedFrame) {
        let _ = self.send(frame.clone());
    }
}

/// Last write wins; readers only ever see whole frames
impl FrameSink for watch::Sender<Option<TaggedFrame>> {
    fn publish(&self, frame: &TaggedFrame) {
        self.send_replace(Some(frame.clone()));
    }
}

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F);

impl<F> FrameSink for FnSink<F>
where
    F: Fn(&TaggedFrame) + Send + Sync,
{
    fn publish(&self, frame: &TaggedFrame) {
        (self.0)(frame)
    }
}
