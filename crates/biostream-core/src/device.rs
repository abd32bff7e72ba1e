//! Capture devices and the byte streams they push
//!
//! Device discovery and stream negotiation live outside this crate; the worker
//! only talks to them through [`DeviceProvider`] and [`StreamSource`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// An open, possibly infinite device byte stream
///
/// Dropping the box closes the underlying connection or file.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Biometric modality a device streams for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Face,
    IrisDouble,
    FingerprintSlabLeft,
    FingerprintSlabRight,
    FingerprintSlabThumbs,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Face,
        Modality::IrisDouble,
        Modality::FingerprintSlabLeft,
        Modality::FingerprintSlabRight,
        Modality::FingerprintSlabThumbs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Face => "FACE",
            Modality::IrisDouble => "IRIS_DOUBLE",
            Modality::FingerprintSlabLeft => "FINGERPRINT_SLAB_LEFT",
            Modality::FingerprintSlabRight => "FINGERPRINT_SLAB_RIGHT",
            Modality::FingerprintSlabThumbs => "FINGERPRINT_SLAB_THUMBS",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Modality::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| format!("unknown modality: {s}"))
    }
}

/// Handle to a device that can stream for a modality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub modality: Modality,
    /// Where the device serves its stream (URL or file path)
    pub endpoint: String,
}

/// Resolves devices for a modality
#[async_trait::async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Look up the device serving `modality`, if any
    async fn device_for_modality(&self, modality: Modality) -> anyhow::Result<Option<DeviceHandle>>;

    /// Re-scan devices after a failed stream open
    async fn reinitialize(&self);
}

/// Opens device byte streams
#[async_trait::async_trait]
pub trait StreamSource: Send + Sync {
    /// Open the stream for `device`; `Ok(None)` means the device refused to stream
    async fn open(
        &self,
        device: &DeviceHandle,
        modality: Modality,
    ) -> anyhow::Result<Option<ByteSource>>;
}
