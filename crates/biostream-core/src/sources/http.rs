//! HTTP device streams
//!
//! Capture devices serve their MJPEG push stream as a long-lived response
//! body. The body is adapted into a byte source; multipart headers are left
//! to the frame extractor.

use std::time::Duration;

use anyhow::Context as _;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::device::{ByteSource, DeviceHandle, Modality, StreamSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpStreamSource {
    client: reqwest::Client,
}

impl HttpStreamSource {
    pub fn new() -> anyhow::Result<Self> {
        // No overall timeout: the response body never ends on its own
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl StreamSource for HttpStreamSource {
    async fn open(
        &self,
        device: &DeviceHandle,
        modality: Modality,
    ) -> anyhow::Result<Option<ByteSource>> {
        debug!(device = %device.id, %modality, url = %device.endpoint, "Requesting device stream");

        let response = match self.client.get(&device.endpoint).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(device = %device.id, error = %e, "Device stream request failed");
                return Ok(None);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(device = %device.id, %status, "Device refused to stream");
            return Ok(None);
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(Box::pin(body));
        Ok(Some(Box::new(reader)))
    }
}
