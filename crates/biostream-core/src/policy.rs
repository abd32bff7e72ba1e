//! Session-policy collaborators
//!
//! The worker reports progress and toggles session policy through these
//! traits. Rendering the messages, the auto-logout timer and the capture store
//! all live in the host application.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::device::{DeviceProvider, StreamSource};

/// Status shown to the operator while a stream is negotiated or running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    SearchingDevice,
    NoDeviceFound,
    PreparingStream,
    StreamingInitialized,
    /// Generic failure after the device refused or failed to stream
    StreamUnavailable,
    StreamClosed,
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatusMessage::SearchingDevice => "Searching for device",
            StatusMessage::NoDeviceFound => "No device found",
            StatusMessage::PreparingStream => "Preparing to stream",
            StatusMessage::StreamingInitialized => "Streaming initialized",
            StatusMessage::StreamUnavailable => "Unable to start the device stream",
            StatusMessage::StreamClosed => "Stream closed",
        };
        f.write_str(text)
    }
}

/// Operator-facing status surface (scan popup, status bar, ...)
pub trait NotificationSink: Send + Sync {
    fn set_message(&self, message: StatusMessage);
    fn set_close_enabled(&self, enabled: bool);
}

/// Session auto-logout switch; suspended while a device streams
pub trait AutoLogoutPolicy: Send + Sync {
    fn set_enabled(&self, enabled: bool);
}

/// Store for frames captured as biometric attempts
#[async_trait::async_trait]
pub trait CaptureStore: Send + Sync {
    async fn record(&self, bytes: Bytes, bio_type: &str, attempt: u32) -> anyhow::Result<()>;
}

/// Notification sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl NotificationSink for LoggingNotifier {
    fn set_message(&self, message: StatusMessage) {
        info!(status = ?message, "{}", message);
    }

    fn set_close_enabled(&self, enabled: bool) {
        tracing::debug!(enabled, "Close control toggled");
    }
}

/// Auto-logout policy for hosts without session timeouts
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAutoLogout;

impl AutoLogoutPolicy for NoAutoLogout {
    fn set_enabled(&self, enabled: bool) {
        tracing::debug!(enabled, "Auto-logout toggled");
    }
}

/// Capture store that drops every frame after logging it
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardingCaptureStore;

#[async_trait::async_trait]
impl CaptureStore for DiscardingCaptureStore {
    async fn record(&self, bytes: Bytes, bio_type: &str, attempt: u32) -> anyhow::Result<()> {
        info!(bio_type, attempt, len = bytes.len(), "Discarding captured frame");
        Ok(())
    }
}

/// Everything a controller needs from its host
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn DeviceProvider>,
    pub streams: Arc<dyn StreamSource>,
    pub notifier: Arc<dyn NotificationSink>,
    pub auto_logout: Arc<dyn AutoLogoutPolicy>,
    pub captures: Arc<dyn CaptureStore>,
}

impl Collaborators {
    /// Device glue only; session policy falls back to logging defaults
    pub fn new(devices: Arc<dyn DeviceProvider>, streams: Arc<dyn StreamSource>) -> Self {
        Self {
            devices,
            streams,
            notifier: Arc::new(LoggingNotifier),
            auto_logout: Arc::new(NoAutoLogout),
            captures: Arc::new(DiscardingCaptureStore),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_auto_logout(mut self, auto_logout: Arc<dyn AutoLogoutPolicy>) -> Self {
        self.auto_logout = auto_logout;
        self
    }

    pub fn with_capture_store(mut self, captures: Arc<dyn CaptureStore>) -> Self {
        self.captures = captures;
        self
    }
}
