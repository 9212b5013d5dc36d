//! Topic resolution for plain and envelope messages.

use crate::config::sensors::SensorDefinition;

/// Suffix appended to a sensor topic for envelopes when no shared envelope
/// topic is configured.
pub const ENVELOPE_SUFFIX: &str = "CloudEvent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicResolver {
    prefix: String,
    envelope_topic: Option<String>,
}

impl TopicResolver {
    pub fn new(prefix: &str, envelope_topic: Option<&str>) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            envelope_topic: envelope_topic
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }

    /// `<prefix>/<sensor.topic>`, or the bare sensor topic when the prefix is
    /// empty.
    pub fn sensor_topic(&self, sensor: &SensorDefinition) -> String {
        join(&self.prefix, &sensor.topic)
    }

    /// The shared envelope topic if configured, else
    /// `<prefix>/<sensor.topic>/CloudEvent`.
    pub fn envelope_topic(&self, sensor: &SensorDefinition) -> String {
        match &self.envelope_topic {
            Some(shared) => shared.clone(),
            None => join(&self.sensor_topic(sensor), ENVELOPE_SUFFIX),
        }
    }

    pub fn has_shared_envelope_topic(&self) -> bool {
        self.envelope_topic.is_some()
    }
}

fn join(base: &str, topic: &str) -> String {
    let base = base.trim_end_matches('/');
    let topic = topic.trim_start_matches('/');
    if base.is_empty() {
        topic.to_string()
    } else {
        format!("{}/{}", base, topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sensors::{FileConfig, ProviderConfig};

    fn sensor(topic: &str) -> SensorDefinition {
        SensorDefinition {
            label: "Test".into(),
            topic: topic.into(),
            provider: ProviderConfig::File(FileConfig {
                path: "/tmp/x".into(),
            }),
        }
    }

    #[test]
    fn test_prefix_and_topic_joined_once() {
        let resolver = TopicResolver::new("home/sensors/", None);
        assert_eq!(resolver.sensor_topic(&sensor("/cpu")), "home/sensors/cpu");
    }

    #[test]
    fn test_empty_prefix_uses_sensor_topic() {
        let resolver = TopicResolver::new("", None);
        assert_eq!(resolver.sensor_topic(&sensor("cpu")), "cpu");
    }

    #[test]
    fn test_envelope_topic_defaults_to_suffix() {
        let resolver = TopicResolver::new("lab", None);
        assert_eq!(resolver.envelope_topic(&sensor("door")), "lab/door/CloudEvent");
        assert!(!resolver.has_shared_envelope_topic());
    }

    #[test]
    fn test_shared_envelope_topic() {
        let resolver = TopicResolver::new("lab", Some("shared/events"));
        assert_eq!(resolver.envelope_topic(&sensor("a")), "shared/events");
        assert_eq!(resolver.envelope_topic(&sensor("b")), "shared/events");

        let blank = TopicResolver::new("lab", Some("  "));
        assert!(!blank.has_shared_envelope_topic());
    }
}
