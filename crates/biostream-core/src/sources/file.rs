//! Recorded streams on disk

use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context as _;
use tracing::{debug, warn};

use crate::device::{ByteSource, DeviceHandle, Modality, StreamSource};

/// Opens the device endpoint as a file path (an optional `file://` prefix is stripped)
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStreamSource;

pub(crate) fn endpoint_path(endpoint: &str) -> &Path {
    Path::new(endpoint.strip_prefix("file://").unwrap_or(endpoint))
}

#[async_trait::async_trait]
impl StreamSource for FileStreamSource {
    async fn open(
        &self,
        device: &DeviceHandle,
        modality: Modality,
    ) -> anyhow::Result<Option<ByteSource>> {
        let path = endpoint_path(&device.endpoint);
        debug!(device = %device.id, %modality, path = %path.display(), "Opening recorded stream");

        match tokio::fs::File::open(path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Recorded stream not found");
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("failed to open {}", path.display())),
        }
    }
}

/// Routes by endpoint scheme: `http(s)://` to HTTP, anything else to the file source
pub struct EndpointStreamSource<H> {
    http: H,
    file: FileStreamSource,
}

impl<H: StreamSource> EndpointStreamSource<H> {
    pub fn new(http: H) -> Self {
        Self {
            http,
            file: FileStreamSource,
        }
    }
}

fn is_http(endpoint: &str) -> bool {
    let lower = endpoint.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[async_trait::async_trait]
impl<H: StreamSource> StreamSource for EndpointStreamSource<H> {
    async fn open(
        &self,
        device: &DeviceHandle,
        modality: Modality,
    ) -> anyhow::Result<Option<ByteSource>> {
        if is_http(&device.endpoint) {
            self.http.open(device, modality).await
        } else {
            self.file.open(device, modality).await
        }
    }
}
