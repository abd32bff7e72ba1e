//! Mock collaborators for worker and controller tests

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::watch;

use super::state::WorkerState;
use crate::device::{ByteSource, DeviceHandle, DeviceProvider, Modality, StreamSource};
use crate::policy::{AutoLogoutPolicy, CaptureStore, Collaborators, NotificationSink, StatusMessage};

/// One wire block carrying `payload`
pub fn block(payload: &[u8]) -> Vec<u8> {
    let mut wire = format!(
        "--boundary\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    )
    .into_bytes();
    wire.push(0xFF);
    wire.extend_from_slice(payload);
    wire
}

/// Reader half handed to the worker; counts how often it was dropped
pub struct TrackedSource {
    inner: DuplexStream,
    drops: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedSource {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writer half kept by the test
pub struct SourceFeed {
    writer: DuplexStream,
    pub drops: Arc<AtomicUsize>,
}

impl SourceFeed {
    pub async fn send_frame(&mut self, payload: &[u8]) {
        self.send_raw(&block(payload)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        // The reader may already be gone; that is what some tests check
        let _ = self.writer.write_all(bytes).await;
    }

    pub fn source_drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

pub fn tracked_pair() -> (TrackedSource, SourceFeed) {
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let drops = Arc::new(AtomicUsize::new(0));
    (
        TrackedSource {
            inner: reader,
            drops: drops.clone(),
        },
        SourceFeed { writer, drops },
    )
}

#[derive(Default)]
pub struct MockDevices {
    pub missing: bool,
    pub fail: bool,
    /// Lookup never completes
    pub hang: bool,
    pub reinitialized: AtomicUsize,
}

#[async_trait::async_trait]
impl DeviceProvider for MockDevices {
    async fn device_for_modality(&self, modality: Modality) -> anyhow::Result<Option<DeviceHandle>> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            anyhow::bail!("device service unreachable");
        }
        if self.missing {
            return Ok(None);
        }
        Ok(Some(DeviceHandle {
            id: "mock-0".to_string(),
            modality,
            endpoint: "mock://stream".to_string(),
        }))
    }

    async fn reinitialize(&self) {
        self.reinitialized.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out queued sources in order; `None` once the queue is empty
#[derive(Default)]
pub struct MockStreams {
    queue: Mutex<Vec<ByteSource>>,
    hang: bool,
    pub opened: AtomicUsize,
}

impl MockStreams {
    pub fn with_sources(sources: Vec<ByteSource>) -> Self {
        let mut queue = sources;
        queue.reverse();
        Self {
            queue: Mutex::new(queue),
            hang: false,
            opened: AtomicUsize::new(0),
        }
    }

    /// Every open stays pending forever
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl StreamSource for MockStreams {
    async fn open(
        &self,
        _device: &DeviceHandle,
        _modality: Modality,
    ) -> anyhow::Result<Option<ByteSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self.queue.lock().pop())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<StatusMessage>>,
    pub close_enabled: Mutex<Vec<bool>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages.lock().clone()
    }

    pub fn close_toggles(&self) -> Vec<bool> {
        self.close_enabled.lock().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn set_message(&self, message: StatusMessage) {
        self.messages.lock().push(message);
    }

    fn set_close_enabled(&self, enabled: bool) {
        self.close_enabled.lock().push(enabled);
    }
}

#[derive(Default)]
pub struct RecordingAutoLogout {
    pub toggles: Mutex<Vec<bool>>,
}

impl RecordingAutoLogout {
    pub fn last(&self) -> Option<bool> {
        self.toggles.lock().last().copied()
    }
}

impl AutoLogoutPolicy for RecordingAutoLogout {
    fn set_enabled(&self, enabled: bool) {
        self.toggles.lock().push(enabled);
    }
}

#[derive(Default)]
pub struct RecordingCaptureStore {
    pub records: Mutex<Vec<(Bytes, String, u32)>>,
}

#[async_trait::async_trait]
impl CaptureStore for RecordingCaptureStore {
    async fn record(&self, bytes: Bytes, bio_type: &str, attempt: u32) -> anyhow::Result<()> {
        self.records.lock().push((bytes, bio_type.to_string(), attempt));
        Ok(())
    }
}

/// Collaborators plus handles to inspect them
pub struct Harness {
    pub devices: Arc<MockDevices>,
    pub streams: Arc<MockStreams>,
    pub notifier: Arc<RecordingNotifier>,
    pub auto_logout: Arc<RecordingAutoLogout>,
    pub captures: Arc<RecordingCaptureStore>,
}

impl Harness {
    pub fn new(devices: MockDevices, streams: MockStreams) -> Self {
        Self {
            devices: Arc::new(devices),
            streams: Arc::new(streams),
            notifier: Arc::new(RecordingNotifier::default()),
            auto_logout: Arc::new(RecordingAutoLogout::default()),
            captures: Arc::new(RecordingCaptureStore::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.devices.clone(), self.streams.clone())
            .with_notifier(self.notifier.clone())
            .with_auto_logout(self.auto_logout.clone())
            .with_capture_store(self.captures.clone())
    }
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<WorkerState>,
    predicate: impl FnMut(&WorkerState) -> bool,
) -> WorkerState {
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("worker state change timed out")
        .expect("session dropped");
    *state
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition timed out");
}
