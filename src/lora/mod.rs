//! # LoRa Uplink Module
//!
//! Decoding of the AirSensEUR LoRa uplinks delivered by the network server.
//!
//! This module handles:
//! - The JSON envelope carrying device name, port and hex payload
//! - Cursor-based reading of big-endian hex fields
//! - Decoding of the four port layouts (samples, GPS, boards, sensors)
//! - Encoding of the same layouts for tests and tooling

pub mod protocol;
pub mod cursor;
pub mod decoder;
pub mod encoder;
pub mod envelope;
