use time::OffsetDateTime;

use super::providers::SensorValue;
use crate::config::sensors::SensorDefinition;

/// One value produced for one sensor in one cycle. Dropped after publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading<'a> {
    pub definition: &'a SensorDefinition,
    pub value: SensorValue,
    pub timestamp: OffsetDateTime,
}

impl<'a> SensorReading<'a> {
    pub fn new(definition: &'a SensorDefinition, value: SensorValue) -> Self {
        Self::at(definition, value, OffsetDateTime::now_utc())
    }

    pub fn at(
        definition: &'a SensorDefinition,
        value: SensorValue,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            definition,
            value,
            timestamp,
        }
    }
}
