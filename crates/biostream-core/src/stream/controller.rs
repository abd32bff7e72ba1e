//! Stream controller
//!
//! Lifecycle surface for device streaming: start a worker, stop it, and hand
//! the latest frame to whoever needs it.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::sink::FrameSink;
use super::state::{StreamSession, WorkerReport, WorkerState};
use super::worker::{StreamWorker, WorkerOptions, WorkerSinks};
use crate::config::{StartPolicy, StreamConfig};
use crate::device::Modality;
use crate::error::{Result, StreamError};
use crate::frame::{FrameExtractor, TaggedFrame};
use crate::policy::Collaborators;

struct ActiveWorker {
    session: Arc<StreamSession>,
    handle: JoinHandle<WorkerReport>,
}

impl ActiveWorker {
    /// The terminal state is published just before the task returns
    fn is_finished(&self) -> bool {
        self.handle.is_finished() || self.session.state().is_terminal()
    }
}

/// Owns at most one stream worker at a time
pub struct StreamController {
    collaborators: Collaborators,
    config: StreamConfig,
    active: Mutex<Option<ActiveWorker>>,
    latest: Arc<watch::Sender<Option<TaggedFrame>>>,
}

impl StreamController {
    pub fn new(collaborators: Collaborators, config: StreamConfig) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            collaborators,
            config,
            active: Mutex::new(None),
            latest: Arc::new(latest),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Spawn a worker streaming `modality`
    ///
    /// Returns as soon as the worker is spawned; negotiation continues in the
    /// background. A worker that is still running is handled per the
    /// configured [`StartPolicy`].
    pub async fn start(
        &self,
        modality: Modality,
        display: Arc<dyn FrameSink>,
        overlay: Option<Arc<dyn FrameSink>>,
    ) -> Result<()> {
        loop {
            let previous = {
                let mut active = self.active.lock();
                let running = active
                    .as_ref()
                    .filter(|worker| !worker.is_finished())
                    .map(|worker| worker.session.modality());

                match (running, self.config.start_policy) {
                    (Some(running), StartPolicy::Reject) => {
                        warn!(
                            requested = %modality,
                            %running,
                            "Start rejected: worker already running"
                        );
                        return Err(StreamError::AlreadyRunning);
                    }
                    (Some(_), StartPolicy::Replace) => active.take(),
                    (None, _) => {
                        if let Some(stale) = active.take() {
                            // A finished worker may still hold an unclosed source
                            stale.session.request_stop();
                        }
                        *active = Some(self.spawn(modality, display, overlay));
                        info!(%modality, "Stream worker started");
                        return Ok(());
                    }
                }
            };

            // Wait outside the lock; another start may slip in, so re-check
            if let Some(previous) = previous {
                info!(
                    modality = %previous.session.modality(),
                    "Replacing running stream worker"
                );
                previous.session.request_stop();
                match previous.handle.await {
                    Ok(report) => debug!(
                        frames = report.frames,
                        state = %report.final_state,
                        "Replaced worker exited"
                    ),
                    Err(e) => warn!(error = %e, "Replaced worker panicked"),
                }
            }
        }
    }

    fn spawn(
        &self,
        modality: Modality,
        display: Arc<dyn FrameSink>,
        overlay: Option<Arc<dyn FrameSink>>,
    ) -> ActiveWorker {
        let session = Arc::new(StreamSession::new(modality));
        let worker = StreamWorker::new(
            session.clone(),
            self.collaborators.clone(),
            WorkerSinks {
                display,
                overlay,
                latest: self.latest.clone(),
            },
            WorkerOptions {
                extractor: FrameExtractor::new(self.config.limits),
                read_timeout: self.config.read_timeout(),
                read_buffer_size: self.config.read_buffer_size,
            },
        );
        let handle = tokio::spawn(worker.run());
        ActiveWorker { session, handle }
    }

    /// Stop the active worker, if any
    ///
    /// Never blocks on the worker: its source is closed and the worker exits
    /// once the in-flight read observes that. Safe to call repeatedly.
    pub fn stop(&self) {
        self.collaborators.auto_logout.set_enabled(true);

        let Some(worker) = self.active.lock().take() else {
            debug!("Stop requested with no active worker");
            return;
        };

        if !worker.session.request_stop() {
            debug!(
                modality = %worker.session.modality(),
                "Stream source was already closed"
            );
        }
    }

    /// Stop the active worker and wait for it to exit
    pub async fn shutdown(&self) -> Option<WorkerReport> {
        self.collaborators.auto_logout.set_enabled(true);

        let worker = self.active.lock().take()?;
        worker.session.request_stop();
        match worker.handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Stream worker panicked");
                None
            }
        }
    }

    /// Whether a worker is held and still running
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// State of the held worker
    pub fn state(&self) -> Option<WorkerState> {
        self.active.lock().as_ref().map(|worker| worker.session.state())
    }

    /// State changes of the held worker
    pub fn state_changes(&self) -> Option<watch::Receiver<WorkerState>> {
        self.active
            .lock()
            .as_ref()
            .map(|worker| worker.session.subscribe())
    }

    /// Bytes of the most recent frame
    pub fn latest_frame(&self) -> Option<Bytes> {
        self.latest
            .borrow()
            .as_ref()
            .map(|tagged| tagged.frame.bytes())
    }

    /// Follow the most recent frame
    pub fn subscribe(&self) -> watch::Receiver<Option<TaggedFrame>> {
        self.latest.subscribe()
    }

    /// Hand the most recent frame to the capture store as an attempt
    ///
    /// Returns false when no frame has been extracted yet.
    pub async fn publish_latest_frame(&self, bio_type: &str, attempt: u32) -> Result<bool> {
        info!(bio_type, attempt, "Publishing latest stream frame");

        let Some(bytes) = self.latest_frame() else {
            warn!(bio_type, attempt, "No stream frame to publish");
            return Ok(false);
        };

        self.collaborators
            .captures
            .record(bytes, bio_type, attempt)
            .await?;
        debug!(bio_type, attempt, "Stream frame published");
        Ok(true)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(worker) = self.active.get_mut().take() {
            worker.session.request_stop();
        }
    }
}
