//! Enriched records handed to the line-protocol renderer.

use crate::registry::model::{GpsFix, Sensor};

/// A decoded sample joined with its sensor metadata and position
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Sensor name from the registry
    pub name: String,
    pub channel: u16,
    pub value: f32,
    pub board_timestamp: u32,

    /// Sample timestamp in milliseconds since epoch
    pub unix_timestamp: u64,

    /// Fresh fix, or the zeroed fix when none applies
    pub gps: GpsFix,
}

/// A sensor registration stamped with the unit's board registration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    pub unix_timestamp: u64,
    pub sensor: Sensor,
}
