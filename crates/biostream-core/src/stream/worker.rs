//! Stream worker
//!
//! Negotiates a device stream, then pulls frames off it until the source
//! fails or is closed. A worker runs once; restarting takes a new worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::sink::FrameSink;
use super::state::{StreamSession, WorkerReport, WorkerState};
use crate::device::ByteSource;
use crate::error::{Result, StreamError};
use crate::frame::{Frame, FrameExtractor, TaggedFrame};
use crate::policy::{Collaborators, StatusMessage};

/// Where a worker publishes frames
#[derive(Clone)]
pub struct WorkerSinks {
    pub display: Arc<dyn FrameSink>,
    pub overlay: Option<Arc<dyn FrameSink>>,
    pub latest: Arc<watch::Sender<Option<TaggedFrame>>>,
}

/// Read-side settings for one worker
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub extractor: FrameExtractor,
    pub read_timeout: Option<Duration>,
    pub read_buffer_size: usize,
}

pub struct StreamWorker {
    session: Arc<StreamSession>,
    collaborators: Collaborators,
    sinks: WorkerSinks,
    options: WorkerOptions,
    frames: u64,
    bytes: u64,
}

impl StreamWorker {
    pub fn new(
        session: Arc<StreamSession>,
        collaborators: Collaborators,
        sinks: WorkerSinks,
        options: WorkerOptions,
    ) -> Self {
        Self {
            session,
            collaborators,
            sinks,
            options,
            frames: 0,
            bytes: 0,
        }
    }

    /// Run to completion
    pub async fn run(mut self) -> WorkerReport {
        let started = Instant::now();
        let modality = self.session.modality();
        info!(%modality, "Stream worker negotiating");

        // Closing the session during negotiation abandons it
        let negotiated = tokio::select! {
            biased;
            () = self.session.closer().closed() => Ok(None),
            res = self.negotiate() => res,
        };

        let source = match negotiated {
            Ok(Some(source)) => source,
            Ok(None) => {
                info!(%modality, "Stop requested during negotiation");
                self.negotiation_abandoned();
                return self.finish(WorkerState::Stopped, None, started);
            }
            Err(err) => return self.finish(WorkerState::Error, Some(err), started),
        };

        let failure = self.stream(source).await;
        self.finish(WorkerState::Stopped, Some(failure), started)
    }

    /// Find the device and open its stream
    ///
    /// `Ok(None)` when a stop arrived before streaming could begin.
    async fn negotiate(&self) -> Result<Option<ByteSource>> {
        let c = &self.collaborators;
        let modality = self.session.modality();

        c.auto_logout.set_enabled(false);
        c.notifier.set_close_enabled(false);
        c.notifier.set_message(StatusMessage::SearchingDevice);

        let device = match c.devices.device_for_modality(modality).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!(%modality, "No capture device found");
                self.negotiation_failed(StatusMessage::NoDeviceFound);
                return Err(StreamError::DeviceNotFound(modality));
            }
            Err(e) => {
                error!(%modality, error = %e, "Device lookup failed");
                c.devices.reinitialize().await;
                self.negotiation_failed(StatusMessage::StreamUnavailable);
                return Err(StreamError::Collaborator(e));
            }
        };

        if !self.session.is_running() {
            return Ok(None);
        }

        debug!(%modality, device = %device.id, endpoint = %device.endpoint, "Opening device stream");
        c.notifier.set_message(StatusMessage::PreparingStream);

        let opened = match c.streams.open(&device, modality).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(%modality, device = %device.id, error = %e, "Stream open failed");
                None
            }
        };

        let Some(source) = opened else {
            warn!(%modality, device = %device.id, "Device returned no stream, reinitializing");
            c.devices.reinitialize().await;
            self.negotiation_failed(StatusMessage::StreamUnavailable);
            return Err(StreamError::StreamUnavailable(modality));
        };

        if !self.session.is_running() {
            // Dropping the fresh source closes it
            return Ok(None);
        }

        c.notifier.set_message(StatusMessage::StreamingInitialized);
        c.notifier.set_close_enabled(true);
        self.session.set_state(WorkerState::Streaming);
        info!(%modality, device = %device.id, "Streaming initialized");
        Ok(Some(source))
    }

    /// Undo the negotiation-time policy toggles when a stop cut it short
    fn negotiation_abandoned(&self) {
        let c = &self.collaborators;
        c.auto_logout.set_enabled(true);
        c.notifier.set_close_enabled(true);
    }

    fn negotiation_failed(&self, message: StatusMessage) {
        let c = &self.collaborators;
        c.auto_logout.set_enabled(true);
        c.notifier.set_message(message);
        c.notifier.set_close_enabled(true);
    }

    /// Frame loop; returns the failure that ended it
    ///
    /// The loop only ends on a failure: a cleared running flag is a stop and
    /// counts as an explicit close.
    async fn stream(&mut self, source: ByteSource) -> StreamError {
        let mut reader = BufReader::with_capacity(self.options.read_buffer_size, source);

        let failure = loop {
            if !self.session.is_running() {
                break StreamError::Closed;
            }

            let next = tokio::select! {
                biased;
                () = self.session.closer().closed() => Err(StreamError::Closed),
                res = read_frame(&self.options, &mut reader) => res,
            };

            match next {
                // A stop that raced the read still wins
                Ok(_) if !self.session.is_running() => break StreamError::Closed,
                Ok(frame) => self.publish(frame),
                Err(err) => break err,
            }
        };

        drop(reader);
        if self.session.closer().close() {
            debug!(modality = %self.session.modality(), "Worker closed its source");
        }
        self.session.set_running(false);

        self.stream_failed(&failure);
        failure
    }

    fn publish(&mut self, frame: Frame) {
        let tagged = TaggedFrame::new(self.frames, frame);
        self.frames += 1;
        self.bytes += tagged.frame.len() as u64;

        self.sinks.display.publish(&tagged);
        if let Some(overlay) = &self.sinks.overlay {
            overlay.publish(&tagged);
        }
        self.sinks.latest.send_replace(Some(tagged));
    }

    fn stream_failed(&self, err: &StreamError) {
        let c = &self.collaborators;
        let modality = self.session.modality();

        if err.is_explicit_close() {
            info!(%modality, frames = self.frames, "Stream closed");
        } else if err.is_parse_failure() {
            warn!(%modality, frames = self.frames, error = %err, "Device sent a malformed stream");
        } else {
            warn!(%modality, frames = self.frames, error = %err, "Stream failed");
        }

        c.auto_logout.set_enabled(true);
        if err.is_explicit_close() {
            c.notifier.set_message(StatusMessage::StreamClosed);
        }
        c.notifier.set_close_enabled(true);
    }

    fn finish(
        &self,
        final_state: WorkerState,
        error: Option<StreamError>,
        started: Instant,
    ) -> WorkerReport {
        self.session.set_running(false);
        self.session.set_state(final_state);
        info!(
            modality = %self.session.modality(),
            state = %final_state,
            frames = self.frames,
            bytes = self.bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stream worker finished"
        );
        WorkerReport {
            modality: self.session.modality(),
            final_state,
            frames: self.frames,
            bytes: self.bytes,
            error,
        }
    }
}

/// Next frame, bounded by the read timeout when one is configured
async fn read_frame<R>(options: &WorkerOptions, reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match options.read_timeout {
        Some(limit) => tokio::time::timeout(limit, options.extractor.next_frame(reader))
            .await
            .map_err(|_| StreamError::Stalled(limit))?,
        None => options.extractor.next_frame(reader).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Modality;
    use crate::stream::test_support::*;
    use crate::stream::FnSink;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn options() -> WorkerOptions {
        WorkerOptions {
            extractor: FrameExtractor::default(),
            read_timeout: None,
            read_buffer_size: 1024,
        }
    }

    fn sinks() -> (WorkerSinks, mpsc::UnboundedReceiver<TaggedFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (latest, _) = watch::channel(None);
        (
            WorkerSinks {
                display: Arc::new(tx),
                overlay: None,
                latest: Arc::new(latest),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_no_device_ends_in_error() {
        let harness = Harness::new(
            MockDevices {
                missing: true,
                ..Default::default()
            },
            MockStreams::default(),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        let (sinks, _rx) = sinks();

        let report = StreamWorker::new(session.clone(), harness.collaborators(), sinks, options())
            .run()
            .await;

        assert_eq!(report.final_state, WorkerState::Error);
        assert!(matches!(report.error, Some(StreamError::DeviceNotFound(Modality::Face))));
        assert_eq!(session.state(), WorkerState::Error);
        assert_eq!(harness.streams.opened.load(Ordering::SeqCst), 0);
        assert_eq!(
            harness.notifier.messages(),
            vec![StatusMessage::SearchingDevice, StatusMessage::NoDeviceFound]
        );
        assert_eq!(harness.notifier.close_toggles(), vec![false, true]);
        assert_eq!(harness.auto_logout.last(), Some(true));
    }

    #[tokio::test]
    async fn test_missing_stream_reinitializes_devices() {
        let harness = Harness::new(MockDevices::default(), MockStreams::default());
        let session = Arc::new(StreamSession::new(Modality::IrisDouble));
        let (sinks, _rx) = sinks();

        let report = StreamWorker::new(session, harness.collaborators(), sinks, options())
            .run()
            .await;

        assert_eq!(report.final_state, WorkerState::Error);
        assert!(matches!(report.error, Some(StreamError::StreamUnavailable(_))));
        assert_eq!(harness.devices.reinitialized.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.notifier.messages(),
            vec![
                StatusMessage::SearchingDevice,
                StatusMessage::PreparingStream,
                StatusMessage::StreamUnavailable
            ]
        );
        assert_eq!(harness.notifier.close_toggles(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_device_lookup_error_takes_generic_failure_path() {
        let harness = Harness::new(
            MockDevices {
                fail: true,
                ..Default::default()
            },
            MockStreams::default(),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        let (sinks, _rx) = sinks();

        let report = StreamWorker::new(session, harness.collaborators(), sinks, options())
            .run()
            .await;

        assert_eq!(report.final_state, WorkerState::Error);
        assert!(matches!(report.error, Some(StreamError::Collaborator(_))));
        assert_eq!(harness.devices.reinitialized.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.notifier.messages().last(),
            Some(&StatusMessage::StreamUnavailable)
        );
        assert_eq!(harness.auto_logout.last(), Some(true));
    }

    #[tokio::test]
    async fn test_frames_until_end_of_stream() {
        let (source, mut feed) = tracked_pair();
        let harness = Harness::new(
            MockDevices::default(),
            MockStreams::with_sources(vec![Box::new(source)]),
        );
        let session = Arc::new(StreamSession::new(Modality::FingerprintSlabLeft));
        let (sinks, mut rx) = sinks();
        let latest = sinks.latest.clone();

        let worker = StreamWorker::new(session, harness.collaborators(), sinks, options());
        let handle = tokio::spawn(worker.run());

        feed.send_frame(&[1, 2, 3]).await;
        feed.send_frame(&[4, 5]).await;
        feed.send_raw(b"--boundary\r\nContent-Length: 9\r\n\r\n\xff\x01\x02").await;
        let drops = feed.drops.clone();
        drop(feed);

        let report = handle.await.unwrap();
        assert_eq!(report.final_state, WorkerState::Stopped);
        assert_eq!(report.frames, 2);
        assert_eq!(report.bytes, 7);
        assert!(matches!(
            report.error,
            Some(StreamError::StreamTruncated {
                expected: 9,
                received: 2
            })
        ));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.sequence, second.sequence), (0, 1));
        assert_eq!(first.frame.as_bytes(), &[255, 1, 2, 3]);
        assert_eq!(
            latest.borrow().as_ref().unwrap().frame.as_bytes(),
            &[255, 4, 5]
        );

        // Truncation is not an explicit close: no "stream closed" message
        assert!(!harness
            .notifier
            .messages()
            .contains(&StatusMessage::StreamClosed));
        assert_eq!(harness.notifier.close_toggles(), vec![false, true, true]);
        assert_eq!(harness.auto_logout.last(), Some(true));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlay_receives_every_frame() {
        let (source, mut feed) = tracked_pair();
        let harness = Harness::new(
            MockDevices::default(),
            MockStreams::with_sources(vec![Box::new(source)]),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        let (mut sinks, _rx) = sinks();
        let (overlay_tx, mut overlay_rx) = mpsc::unbounded_channel();
        sinks.overlay = Some(Arc::new(overlay_tx));

        let handle = tokio::spawn(
            StreamWorker::new(session, harness.collaborators(), sinks, options()).run(),
        );
        feed.send_frame(&[7]).await;
        drop(feed);
        handle.await.unwrap();

        assert_eq!(overlay_rx.recv().await.unwrap().frame.as_bytes(), &[255, 7]);
    }

    #[tokio::test]
    async fn test_stalled_source_times_out() {
        let (source, feed) = tracked_pair();
        let harness = Harness::new(
            MockDevices::default(),
            MockStreams::with_sources(vec![Box::new(source)]),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        let (sinks, _rx) = sinks();
        let options = WorkerOptions {
            read_timeout: Some(Duration::from_millis(50)),
            ..options()
        };

        let report = StreamWorker::new(session, harness.collaborators(), sinks, options)
            .run()
            .await;

        assert!(matches!(report.error, Some(StreamError::Stalled(_))));
        assert_eq!(feed.source_drops(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_streaming_skips_stream() {
        let (source, feed) = tracked_pair();
        let harness = Harness::new(
            MockDevices::default(),
            MockStreams::with_sources(vec![Box::new(source)]),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        session.request_stop();
        let (sinks, _rx) = sinks();

        let report = StreamWorker::new(session, harness.collaborators(), sinks, options())
            .run()
            .await;

        assert_eq!(report.final_state, WorkerState::Stopped);
        assert!(report.error.is_none());
        assert!(!harness
            .notifier
            .messages()
            .contains(&StatusMessage::StreamingInitialized));
        drop(feed);
    }

    #[tokio::test]
    async fn test_stop_during_device_lookup_restores_close_control() {
        let harness = Harness::new(
            MockDevices {
                hang: true,
                ..Default::default()
            },
            MockStreams::default(),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        let (sinks, _rx) = sinks();

        let handle = tokio::spawn(
            StreamWorker::new(session.clone(), harness.collaborators(), sinks, options()).run(),
        );
        let notifier = harness.notifier.clone();
        wait_until(|| !notifier.messages().is_empty()).await;
        assert_eq!(harness.notifier.close_toggles(), vec![false]);

        session.request_stop();
        let report = handle.await.unwrap();

        assert_eq!(report.final_state, WorkerState::Stopped);
        assert!(report.error.is_none());
        assert_eq!(harness.notifier.messages(), vec![StatusMessage::SearchingDevice]);
        assert_eq!(harness.notifier.close_toggles(), vec![false, true]);
        assert_eq!(harness.auto_logout.last(), Some(true));
        assert_eq!(harness.streams.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_while_opening_stream_restores_close_control() {
        let harness = Harness::new(MockDevices::default(), MockStreams::hanging());
        let session = Arc::new(StreamSession::new(Modality::IrisDouble));
        let (sinks, _rx) = sinks();

        let handle = tokio::spawn(
            StreamWorker::new(session.clone(), harness.collaborators(), sinks, options()).run(),
        );
        let streams = harness.streams.clone();
        wait_until(|| streams.opened.load(Ordering::SeqCst) == 1).await;

        session.request_stop();
        let report = handle.await.unwrap();

        assert_eq!(report.final_state, WorkerState::Stopped);
        assert_eq!(
            harness.notifier.messages(),
            vec![StatusMessage::SearchingDevice, StatusMessage::PreparingStream]
        );
        assert_eq!(harness.notifier.close_toggles(), vec![false, true]);
        assert_eq!(harness.auto_logout.last(), Some(true));
    }

    #[tokio::test]
    async fn test_stop_between_reads_is_an_explicit_close() {
        let (source, mut feed) = tracked_pair();
        let harness = Harness::new(
            MockDevices::default(),
            MockStreams::with_sources(vec![Box::new(source)]),
        );
        let session = Arc::new(StreamSession::new(Modality::Face));
        let (mut sinks, _rx) = sinks();
        // Stop right after the first publish, before the loop reads again
        let stopper = session.clone();
        sinks.display = Arc::new(FnSink(move |_: &TaggedFrame| {
            stopper.request_stop();
        }));

        let handle = tokio::spawn(
            StreamWorker::new(session, harness.collaborators(), sinks, options()).run(),
        );
        feed.send_frame(&[9]).await;
        let report = handle.await.unwrap();

        assert_eq!(report.final_state, WorkerState::Stopped);
        assert_eq!(report.frames, 1);
        assert!(report.error.as_ref().is_some_and(StreamError::is_explicit_close));
        assert_eq!(
            harness.notifier.messages().last(),
            Some(&StatusMessage::StreamClosed)
        );
        assert_eq!(harness.notifier.close_toggles(), vec![false, true, true]);
        assert_eq!(harness.auto_logout.last(), Some(true));
    }
}
