//! # LoRa Payload Encoder
//!
//! Builds hex payloads in the same layouts the decoder reads. Used to
//! generate uplinks for tests and tooling.

use std::fmt::Write;

use super::protocol::*;

/// Encode a port 1 payload
///
/// # Examples
///
/// ```
/// use ase_lora_bridge::lora::encoder::encode_sensor_packet;
/// use ase_lora_bridge::lora::protocol::{SensorPacket, SensorValue};
///
/// let packet = SensorPacket {
///     unix_timestamp: 1,
///     board_timestamp: 2,
///     values: vec![SensorValue { channel: 3, value: 1.0 }],
/// };
/// assert_eq!(encode_sensor_packet(&packet), "000000000000000100000002033f800000");
/// ```
pub fn encode_sensor_packet(packet: &SensorPacket) -> String {
    let mut hex = String::with_capacity(
        HEX_WIDTH_U64 + HEX_WIDTH_U32 + packet.values.len() * SAMPLE_GROUP_HEX_WIDTH,
    );
    push_u64(&mut hex, packet.unix_timestamp);
    push_u32(&mut hex, packet.board_timestamp);
    for value in &packet.values {
        push_u8(&mut hex, value.channel);
        push_f32(&mut hex, value.value);
    }
    hex
}

/// Encode a port 2 payload
pub fn encode_gps_packet(packet: &GpsPacket) -> String {
    let mut hex = String::with_capacity(GPS_PAYLOAD_HEX_LEN);
    push_u64(&mut hex, packet.unix_timestamp);
    push_f32(&mut hex, packet.longitude);
    push_f32(&mut hex, packet.latitude);
    push_f32(&mut hex, packet.elevation);
    hex
}

/// Encode a port 3 payload
///
/// `unix_timestamp` is written once; the per-board timestamps are ignored.
pub fn encode_board_config_packet(unix_timestamp: u64, boards: &[BoardConfigPacket]) -> String {
    let mut hex = String::new();
    push_u64(&mut hex, unix_timestamp);
    for board in boards {
        push_u32(&mut hex, board.board_id);
        push_cstring(&mut hex, &board.board_type);
        push_cstring(&mut hex, &board.firmware_revision);
        push_cstring(&mut hex, &board.serial);
    }
    hex
}

/// Encode a port 4 payload
pub fn encode_sensor_config_packet(sensors: &[SensorConfigPacket]) -> String {
    let mut hex = String::new();
    for sensor in sensors {
        push_u16(&mut hex, sensor.sensor_id);
        push_u8(&mut hex, sensor.board_id);
        push_cstring(&mut hex, &sensor.name);
        push_cstring(&mut hex, &sensor.serial);
        push_cstring(&mut hex, &sensor.measurement_units);
    }
    hex
}

// Writing into a String cannot fail, the fmt::Result is discarded.

fn push_u8(hex: &mut String, value: u8) {
    let _ = write!(hex, "{:02x}", value);
}

fn push_u16(hex: &mut String, value: u16) {
    let _ = write!(hex, "{:04x}", value);
}

fn push_u32(hex: &mut String, value: u32) {
    let _ = write!(hex, "{:08x}", value);
}

fn push_u64(hex: &mut String, value: u64) {
    let _ = write!(hex, "{:016x}", value);
}

fn push_f32(hex: &mut String, value: f32) {
    push_u32(hex, value.to_bits());
}

fn push_cstring(hex: &mut String, value: &str) {
    for byte in value.bytes() {
        push_u8(hex, byte);
    }
    push_u8(hex, 0);
}
