//! Raw payload publishing.
//!
//! Callers hand over a fully resolved topic and an already formatted payload;
//! the publisher only checks the topic and enqueues the PUBLISH with the
//! instance's QoS and retain settings. Delivery happens asynchronously in the
//! connection kernel.

use std::sync::Arc;

use rumqttc::QoS;
use tracing::trace;

use super::{error::TransferError, manager::MqttInstance};

#[derive(Clone)]
pub struct Publisher {
    instance: Arc<MqttInstance>,
    qos: QoS,
    retain: bool,
}

impl Publisher {
    pub fn new(instance: Arc<MqttInstance>) -> Result<Self, TransferError> {
        let qos = qos_from_u8(instance.qos())?;
        let retain = instance.retain();
        Ok(Self {
            instance,
            qos,
            retain,
        })
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransferError> {
        validate_topic(topic)?;
        trace!(
            "Enqueue PUBLISH to '{}' ({} bytes, {:?}, retain={})",
            topic,
            payload.len(),
            self.qos,
            self.retain
        );
        self.instance
            .client()
            .publish(topic, self.qos, self.retain, payload)
            .await?;
        Ok(())
    }
}

pub fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value {other}, must be 0, 1, or 2"
        ))),
    }
}

/// Publish topics must be non-empty, at most 65535 bytes and free of
/// wildcards.
pub fn validate_topic(topic: &str) -> Result<(), TransferError> {
    if topic.is_empty() {
        return Err(TransferError::InvalidMetadata(
            "Topic must not be empty".into(),
        ));
    }
    if topic.len() > u16::MAX as usize {
        return Err(TransferError::InvalidMetadata(
            "Topic exceeds 65535 bytes".into(),
        ));
    }
    if topic.contains(['+', '#']) {
        return Err(TransferError::InvalidMetadata(format!(
            "Topic '{topic}' must not contain wildcards"
        )));
    }
    Ok(())
}
