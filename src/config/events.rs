//! Payload mode and event envelope settings.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Which messages are published for each reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Bare value on the sensor topic.
    #[default]
    Plain,
    /// CloudEvents envelope on the envelope topic only.
    CloudEvents,
    /// Bare value plus envelope.
    Both,
}

impl PublishMode {
    pub fn publishes_plain(self) -> bool {
        matches!(self, PublishMode::Plain | PublishMode::Both)
    }

    pub fn publishes_envelope(self) -> bool {
        matches!(self, PublishMode::CloudEvents | PublishMode::Both)
    }
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Plain => write!(f, "plain"),
            PublishMode::CloudEvents => write!(f, "cloudevents"),
            PublishMode::Both => write!(f, "both"),
        }
    }
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" => Ok(PublishMode::Plain),
            "cloudevents" | "envelope" => Ok(PublishMode::CloudEvents),
            "both" => Ok(PublishMode::Both),
            other => Err(format!(
                "unknown publish mode '{other}', expected plain, cloudevents or both"
            )),
        }
    }
}

/// Envelope attributes and routing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EventsConfig {
    pub mode: PublishMode,

    /// CloudEvents `source` attribute.
    #[validate(length(min = 1, message = "Event source must not be empty"))]
    pub source: String,

    /// CloudEvents `type` attribute.
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "Event type must not be empty"))]
    pub event_type: String,

    /// Shared topic for every envelope. When unset each sensor gets
    /// `<topic>/CloudEvent`.
    #[validate(length(min = 1, message = "Envelope topic must not be empty when set"))]
    pub topic: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::Plain,
            source: "sensors-report".to_string(),
            event_type: "sensors-report.reading".to_string(),
            topic: None,
        }
    }
}
