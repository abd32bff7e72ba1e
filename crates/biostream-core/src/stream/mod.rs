//! Device stream lifecycle
//!
//! - `controller`: start/stop surface, owns at most one worker
//! - `worker`: negotiation and the frame loop
//! - `state`: per-run session and worker state
//! - `cancellation`: source close switch
//! - `sink`: where frames go

mod cancellation;
mod controller;
mod sink;
mod state;
mod worker;

#[cfg(test)]
mod test_support;

pub use cancellation::SourceCloser;
pub use controller::StreamController;
pub use sink::{FnSink, FrameSink};
pub use state::{StreamSession, WorkerReport, WorkerState};
pub use worker::{StreamWorker, WorkerOptions, WorkerSinks};
