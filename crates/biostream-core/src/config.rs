//! Stream configuration
//!
//! Loaded from `~/.config/biostream/config.toml` (or an explicit path). Every
//! field has a default so an empty or missing file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::Modality;
use crate::frame::ExtractorLimits;

/// Largest accepted `limits.max_frame_len`
const FRAME_LEN_CEILING: usize = 1024 * 1024 * 1024;
/// Largest accepted `read_buffer_size`
const READ_BUFFER_CEILING: usize = 64 * 1024 * 1024;

/// What `start()` does when a worker is already active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Refuse with `AlreadyRunning`
    #[default]
    Reject,
    /// Stop the running worker, wait for it to exit, then start
    Replace,
}

/// Device stream endpoint for one modality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub limits: ExtractorLimits,
    /// Give up on a source that produces no frame for this long (None = wait forever)
    pub read_timeout_ms: Option<u64>,
    pub start_policy: StartPolicy,
    /// Capacity of the buffered reader wrapped around each source
    pub read_buffer_size: usize,
    /// Modality name (e.g. `FACE`) to device endpoint
    pub devices: BTreeMap<String, DeviceEntry>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            limits: ExtractorLimits::default(),
            read_timeout_ms: None,
            start_policy: StartPolicy::default(),
            read_buffer_size: 8 * 1024,
            devices: BTreeMap::new(),
        }
    }
}

impl StreamConfig {
    /// Default config location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("biostream").join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("invalid stream config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for name in self.devices.keys() {
            name.parse::<Modality>()
                .map_err(|e| anyhow::anyhow!("invalid [devices] entry: {e}"))?;
        }

        ensure!(
            self.read_timeout_ms != Some(0),
            "read_timeout_ms must be positive (omit it to wait forever)"
        );
        ensure!(
            (1..=READ_BUFFER_CEILING).contains(&self.read_buffer_size),
            "read_buffer_size must be between 1 and {READ_BUFFER_CEILING}"
        );

        let limits = &self.limits;
        ensure!(limits.max_header_len > 0, "limits.max_header_len must be positive");
        ensure!(
            limits.max_length_digits > 0,
            "limits.max_length_digits must be positive"
        );
        ensure!(
            (1..=FRAME_LEN_CEILING).contains(&limits.max_frame_len),
            "limits.max_frame_len must be between 1 and {FRAME_LEN_CEILING}"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), devices = config.devices.len(), "Loaded stream config");
        Ok(config)
    }

    /// Load from `path` or the default location, falling back to defaults when absent
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No stream config found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Device entry configured for `modality`
    pub fn device(&self, modality: Modality) -> Option<&DeviceEntry> {
        self.devices
            .iter()
            .find(|(name, _)| name.parse::<Modality>().ok() == Some(modality))
            .map(|(_, entry)| entry)
    }
}
