//! Config-backed device table

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::device::{DeviceHandle, DeviceProvider, Modality};

/// Devices listed in the `[devices]` table of the stream config
///
/// `reinitialize` re-reads the table when the provider was built from a file.
pub struct StaticDeviceProvider {
    devices: RwLock<BTreeMap<Modality, DeviceHandle>>,
    config_path: Option<PathBuf>,
}

impl StaticDeviceProvider {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            devices: RwLock::new(table(config)),
            config_path: None,
        }
    }

    /// Build from a config file that is re-read on `reinitialize`
    pub fn from_file(path: PathBuf) -> anyhow::Result<Self> {
        let config = StreamConfig::load(&path)?;
        Ok(Self {
            devices: RwLock::new(table(&config)),
            config_path: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

fn table(config: &StreamConfig) -> BTreeMap<Modality, DeviceHandle> {
    Modality::ALL
        .into_iter()
        .filter_map(|modality| {
            let entry = config.device(modality)?;
            Some((
                modality,
                DeviceHandle {
                    id: entry
                        .id
                        .clone()
                        .unwrap_or_else(|| modality.as_str().to_ascii_lowercase()),
                    modality,
                    endpoint: entry.endpoint.clone(),
                },
            ))
        })
        .collect()
}

#[async_trait::async_trait]
impl DeviceProvider for StaticDeviceProvider {
    async fn device_for_modality(&self, modality: Modality) -> anyhow::Result<Option<DeviceHandle>> {
        Ok(self.devices.read().get(&modality).cloned())
    }

    async fn reinitialize(&self) {
        let Some(path) = &self.config_path else {
            info!("Static device table has nothing to reload");
            return;
        };
        match StreamConfig::load(path) {
            Ok(config) => {
                let devices = table(&config);
                info!(count = devices.len(), "Device table reloaded");
                *self.devices.write() = devices;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Device table reload failed"),
        }
    }
}
