//! Sensor definitions as they appear in the configuration document.
//!
//! Each entry names exactly one provider key:
//!
//! ```json
//! { "label": "CPU", "topic": "cpu", "lm-sensors": { "chip": "coretemp-isa-0000", "feature": "Package id 0" } }
//! { "label": "Door", "topic": "door", "file": { "path": "/run/door/state" } }
//! ```
//!
//! Entries are deserialized into [`SensorEntry`] (all provider keys optional)
//! and converted into [`SensorDefinition`] only when exactly one provider is
//! present.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ConfigError;

/// Raw, unvalidated sensor entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SensorEntry {
    #[validate(length(min = 1, message = "Sensor label must not be empty"))]
    pub label: String,

    #[validate(length(min = 1, message = "Sensor topic must not be empty"))]
    pub topic: String,

    #[serde(rename = "lm-sensors", default, skip_serializing_if = "Option::is_none")]
    pub lm_sensors: Option<HardwareSensorConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct HardwareSensorConfig {
    #[validate(length(min = 1, message = "Chip name must not be empty"))]
    pub chip: String,
    #[validate(length(min = 1, message = "Feature name must not be empty"))]
    pub feature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
}

/// Provider selection for one sensor. Serializes back to the document shape
/// (`{"lm-sensors": {...}}` or `{"file": {...}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderConfig {
    #[serde(rename = "lm-sensors")]
    HardwareSensor(HardwareSensorConfig),
    #[serde(rename = "file")]
    File(FileConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::HardwareSensor(_) => "lm-sensors",
            ProviderConfig::File(_) => "file",
        }
    }
}

/// A validated sensor. Immutable after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SensorEntry")]
pub struct SensorDefinition {
    pub label: String,
    pub topic: String,
    #[serde(flatten)]
    pub provider: ProviderConfig,
}

impl TryFrom<SensorEntry> for SensorDefinition {
    type Error = ConfigError;

    fn try_from(entry: SensorEntry) -> Result<Self, Self::Error> {
        entry
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("sensor '{}': {}", entry.label, e)))?;

        let provider = match (entry.lm_sensors, entry.file) {
            (Some(hw), None) => {
                hw.validate().map_err(|e| {
                    ConfigError::ValidationError(format!("sensor '{}': {}", entry.label, e))
                })?;
                ProviderConfig::HardwareSensor(hw)
            }
            (None, Some(file)) => {
                if file.path.as_os_str().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "sensor '{}': file path must not be empty",
                        entry.label
                    )));
                }
                ProviderConfig::File(file)
            }
            (None, None) => {
                return Err(ConfigError::ValidationError(format!(
                    "sensor '{}' has no provider, expected one of 'lm-sensors' or 'file'",
                    entry.label
                )))
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationError(format!(
                    "sensor '{}' has more than one provider, expected exactly one of 'lm-sensors' or 'file'",
                    entry.label
                )))
            }
        };

        if entry.topic.contains(['+', '#']) {
            return Err(ConfigError::ValidationError(format!(
                "sensor '{}': topic '{}' must not contain MQTT wildcards",
                entry.label, entry.topic
            )));
        }

        Ok(SensorDefinition {
            label: entry.label,
            topic: entry.topic,
            provider,
        })
    }
}
