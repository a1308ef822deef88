//! # Unit Registry Module
//!
//! Authoritative record of known units, their boards, sensors and last
//! position.
//!
//! This module handles:
//! - Upserting boards and sensors, creating units on first reference
//! - Replacing the stored GPS fix of a unit
//! - Lookups used to enrich decoded samples
//! - Shared, lock-guarded access and atomic persistence (`store`)

pub mod model;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, Result};
use model::{Board, GpsFix, Sensor, Unit};

pub use store::SharedRegistry;

/// In-memory registry of all known units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitRegistry {
    /// Units keyed by unit id
    #[serde(rename = "aselist", default)]
    units: BTreeMap<String, Unit>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(&self, unit_id: &str) -> Option<&Unit> {
        self.units.get(unit_id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Insert or replace a sensor, creating the unit if needed
    pub fn add_sensor_to_unit(&mut self, unit_id: &str, sensor: Sensor) {
        debug!(unit = unit_id, channel = sensor.channel, "Registering sensor");
        self.unit_entry(unit_id).sensors.insert(sensor.channel, sensor);
    }

    /// Insert or replace a board, creating the unit if needed
    pub fn add_board_to_unit(&mut self, unit_id: &str, board: Board) {
        debug!(unit = unit_id, board_id = board.board_id, "Registering board");
        self.unit_entry(unit_id).boards.insert(board.board_id, board);
    }

    /// Replace the stored fix of an existing unit
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::UnknownUnit` if the unit was never registered.
    pub fn add_gps_info(&mut self, unit_id: &str, fix: GpsFix) -> Result<()> {
        let unit = self
            .units
            .get_mut(unit_id)
            .ok_or_else(|| BridgeError::UnknownUnit(unit_id.to_string()))?;
        unit.position = fix;
        Ok(())
    }

    /// Replace the stored fix, creating the unit if needed
    pub fn upsert_gps_info(&mut self, unit_id: &str, fix: GpsFix) {
        self.unit_entry(unit_id).position = fix;
    }

    pub fn get_sensor_info(&self, unit_id: &str, channel: u16) -> Result<&Sensor> {
        self.units
            .get(unit_id)
            .ok_or_else(|| BridgeError::UnknownUnit(unit_id.to_string()))?
            .sensors
            .get(&channel)
            .ok_or_else(|| BridgeError::SensorNotFound {
                unit: unit_id.to_string(),
                channel,
            })
    }

    pub fn get_gps_info(&self, unit_id: &str) -> Result<GpsFix> {
        self.units
            .get(unit_id)
            .map(|unit| unit.position)
            .ok_or_else(|| BridgeError::UnknownUnit(unit_id.to_string()))
    }

    /// Registration timestamp of the first board (lowest id) that has one
    ///
    /// Returns 0 for unknown units and units without timestamped boards.
    pub fn get_last_known_board_timestamp(&self, unit_id: &str) -> u64 {
        self.units
            .get(unit_id)
            .and_then(|unit| {
                unit.boards
                    .values()
                    .map(|board| board.unix_timestamp)
                    .find(|&ts| ts != 0)
            })
            .unwrap_or(0)
    }

    fn unit_entry(&mut self, unit_id: &str) -> &mut Unit {
        self.units
            .entry(unit_id.to_string())
            .or_insert_with(|| Unit::new(unit_id))
    }
}
