//! # ASE LoRa Bridge Library
//!
//! Decode AirSensEUR LoRa uplinks, keep a registry of units, boards and
//! sensors, and forward enriched telemetry to InfluxDB.
//!
//! Uplinks arrive as network-server JSON envelopes carrying a hex payload
//! and a LoRa port. The port selects the packet layout: sensor samples,
//! GPS fix, board registry or sensor registry.

pub mod config;
pub mod error;
pub mod lora;
pub mod registry;
pub mod sink;
pub mod pipeline;
