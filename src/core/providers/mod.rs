//! Sensor value sources.
//!
//! [`Provider`] is a closed set of variants dispatched with an exhaustive
//! match. Adding a source means adding a variant, its config, and a match arm.

use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::config::sensors::ProviderConfig;

pub mod error;
pub mod file;
pub mod hwmon;

pub use error::ReadError;
pub use file::FileProvider;
pub use hwmon::{HwmonBackend, SensorBackend};

/// A raw reading. Hardware sensors yield numbers, files yield text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => f.write_str(s),
        }
    }
}

/// Chip and feature lookup through the shared hardware backend.
#[derive(Clone)]
pub struct HardwareSensorProvider {
    chip: String,
    feature: String,
    backend: Arc<dyn SensorBackend>,
}

impl HardwareSensorProvider {
    pub fn new(
        chip: impl Into<String>,
        feature: impl Into<String>,
        backend: Arc<dyn SensorBackend>,
    ) -> Self {
        Self {
            chip: chip.into(),
            feature: feature.into(),
            backend,
        }
    }

    pub async fn read(&self) -> Result<SensorValue, ReadError> {
        self.backend
            .read(&self.chip, &self.feature)
            .await
            .map(SensorValue::Number)
    }
}

impl fmt::Debug for HardwareSensorProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareSensorProvider")
            .field("chip", &self.chip)
            .field("feature", &self.feature)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Provider {
    HardwareSensor(HardwareSensorProvider),
    File(FileProvider),
}

impl Provider {
    /// Builds the provider for one sensor. Hardware providers share `backend`.
    pub fn from_config(config: &ProviderConfig, backend: &Arc<dyn SensorBackend>) -> Self {
        match config {
            ProviderConfig::HardwareSensor(hw) => Provider::HardwareSensor(
                HardwareSensorProvider::new(&hw.chip, &hw.feature, Arc::clone(backend)),
            ),
            ProviderConfig::File(file) => Provider::File(FileProvider::new(&file.path)),
        }
    }

    /// One attempt, no retries.
    pub async fn read(&self) -> Result<SensorValue, ReadError> {
        match self {
            Provider::HardwareSensor(p) => p.read().await,
            Provider::File(p) => p.read().await,
        }
    }
}
