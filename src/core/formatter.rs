//! Turns readings into MQTT messages.
//!
//! Plain messages carry the bare value on the sensor topic. Envelope messages
//! carry a CloudEvents 1.0 structured JSON document:
//!
//! ```json
//! {
//!   "specversion": "1.0",
//!   "id": "5f0c0a56-...",
//!   "source": "sensors-report",
//!   "type": "sensors-report.reading",
//!   "time": "2026-10-19T08:15:00Z",
//!   "subject": "home/sensors/cpu",
//!   "datacontenttype": "application/json",
//!   "data": {
//!     "sensor_config": { "label": "CPU", "topic": "cpu", "lm-sensors": { ... } },
//!     "value": 45.0
//!   }
//! }
//! ```

use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::{providers::SensorValue, reading::SensorReading, topics::TopicResolver};
use crate::config::{
    events::{EventsConfig, PublishMode},
    sensors::SensorDefinition,
};

pub const SPEC_VERSION: &str = "1.0";
pub const DATA_CONTENT_TYPE: &str = "application/json";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Sensor '{label}' produced a non-finite value ({value})")]
    NonFinite { label: String, value: f64 },

    #[error("Failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("Failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Plain,
    Envelope,
}

/// A formatted payload and its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub specversion: &'static str,
    pub id: Uuid,
    pub source: &'a str,
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub time: String,
    pub subject: String,
    pub datacontenttype: &'static str,
    pub data: EnvelopeData<'a>,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeData<'a> {
    pub sensor_config: &'a SensorDefinition,
    pub value: &'a SensorValue,
}

#[derive(Debug, Clone)]
pub struct PayloadFormatter {
    mode: PublishMode,
    source: String,
    event_type: String,
    topics: TopicResolver,
}

impl PayloadFormatter {
    pub fn new(events: &EventsConfig, topics: TopicResolver) -> Self {
        Self {
            mode: events.mode,
            source: events.source.clone(),
            event_type: events.event_type.clone(),
            topics,
        }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub fn topics(&self) -> &TopicResolver {
        &self.topics
    }

    /// Messages for one reading, plain first. Either all messages are built
    /// or none.
    pub fn format(&self, reading: &SensorReading<'_>) -> Result<Vec<Message>, FormatError> {
        check_finite(reading)?;

        let mut messages = Vec::with_capacity(2);
        if self.mode.publishes_plain() {
            messages.push(Message {
                kind: MessageKind::Plain,
                topic: self.topics.sensor_topic(reading.definition),
                payload: plain_payload(&reading.value).into_bytes(),
            });
        }
        if self.mode.publishes_envelope() {
            let envelope = self.envelope(reading)?;
            messages.push(Message {
                kind: MessageKind::Envelope,
                topic: self.topics.envelope_topic(reading.definition),
                payload: serde_json::to_vec(&envelope)?,
            });
        }
        Ok(messages)
    }

    /// Envelope with a fresh id and the reading's timestamp.
    pub fn envelope<'a>(
        &'a self,
        reading: &'a SensorReading<'_>,
    ) -> Result<Envelope<'a>, FormatError> {
        check_finite(reading)?;
        Ok(Envelope {
            specversion: SPEC_VERSION,
            id: Uuid::new_v4(),
            source: &self.source,
            event_type: &self.event_type,
            time: reading.timestamp.format(&Rfc3339)?,
            subject: self.topics.sensor_topic(reading.definition),
            datacontenttype: DATA_CONTENT_TYPE,
            data: EnvelopeData {
                sensor_config: reading.definition,
                value: &reading.value,
            },
        })
    }
}

/// Natural text of a value: numbers via `Display` (`3.14`, `45`), text
/// verbatim.
pub fn plain_payload(value: &SensorValue) -> String {
    value.to_string()
}

fn check_finite(reading: &SensorReading<'_>) -> Result<(), FormatError> {
    match reading.value {
        SensorValue::Number(n) if !n.is_finite() => Err(FormatError::NonFinite {
            label: reading.definition.label.clone(),
            value: n,
        }),
        _ => Ok(()),
    }
}
