//! # LoRa Payload Decoder
//!
//! Decodes the hex payloads of the four uplink ports into typed packets.
//! Decoding is pure: a failure anywhere aborts the whole packet and no
//! partial result is returned.

use super::cursor::HexCursor;
use super::protocol::*;
use crate::error::{BridgeError, DecodeError};

/// Bounds applied to the record loops of the registry ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_records: usize,
    pub max_iterations: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_records: MAX_RECORDS_PER_PACKET,
            max_iterations: MAX_DECODE_ITERATIONS,
        }
    }
}

/// Decode a payload according to its uplink port
///
/// # Arguments
///
/// * `port` - Uplink port number (1-4)
/// * `hex` - Hex-encoded payload
///
/// # Errors
///
/// Returns `BridgeError::UnknownPort` for ports outside 1-4 and
/// `BridgeError::Decode` for any malformed payload.
pub fn decode(port: i64, hex: &str) -> Result<Packet, BridgeError> {
    let packet = match Port::try_from(port)? {
        Port::SensorSamples => Packet::Samples(decode_sensor_packet(hex)?),
        Port::Gps => Packet::Gps(decode_gps_packet(hex)?),
        Port::BoardRegistry => Packet::Boards(decode_board_config_packet(hex)?),
        Port::SensorRegistry => Packet::Sensors(decode_sensor_config_packet(hex)?),
    };
    Ok(packet)
}

/// Decode a port 1 sensor samples payload
///
/// Layout: unix timestamp (8 bytes), board timestamp (4 bytes), then
/// `{channel (1 byte), value (4 bytes)}` groups until the payload ends.
///
/// # Example
///
/// ```
/// use ase_lora_bridge::lora::decoder::decode_sensor_packet;
///
/// let packet = decode_sensor_packet("000000076ae2b7300000187133422ea3d7").unwrap();
/// assert_eq!(packet.board_timestamp, 0x1871);
/// assert_eq!(packet.values[0].channel, 0x33);
/// ```
pub fn decode_sensor_packet(hex: &str) -> Result<SensorPacket, DecodeError> {
    let mut cursor = HexCursor::new(hex)?;

    let unix_timestamp = cursor.read_u64("unixTimeStamp")?;
    let board_timestamp = cursor.read_u32("boardTimeStamp")?;

    let mut values = Vec::with_capacity(cursor.remaining() / SAMPLE_GROUP_HEX_WIDTH);
    while !cursor.is_empty() {
        let channel = cursor.read_u8("channel")?;
        let value = cursor.read_f32("value")?;
        values.push(SensorValue { channel, value });
    }

    Ok(SensorPacket {
        unix_timestamp,
        board_timestamp,
        values,
    })
}

/// Decode a port 2 GPS payload
///
/// Layout: unix timestamp (8 bytes), longitude, latitude, elevation
/// (4-byte floats). The layout is fixed length; trailing hex is rejected.
pub fn decode_gps_packet(hex: &str) -> Result<GpsPacket, DecodeError> {
    let mut cursor = HexCursor::new(hex)?;

    let unix_timestamp = cursor.read_u64("unixTimeStamp")?;
    let longitude = cursor.read_f32("longitude")?;
    let latitude = cursor.read_f32("latitude")?;
    let elevation = cursor.read_f32("elevation")?;

    if !cursor.is_empty() {
        return Err(DecodeError::TrailingData {
            packet: "gps",
            offset: cursor.offset(),
            extra: cursor.remaining(),
        });
    }

    Ok(GpsPacket {
        longitude,
        latitude,
        elevation,
        unix_timestamp,
    })
}

/// Decode a port 3 board registry payload
///
/// Layout: one unix timestamp (8 bytes) shared by all boards, then
/// `{board id (4 bytes), type, firmware revision, serial}` records with
/// null-terminated strings until the payload ends.
pub fn decode_board_config_packet(hex: &str) -> Result<Vec<BoardConfigPacket>, DecodeError> {
    decode_board_config_packet_with_limits(hex, LoopLimits::default())
}

pub fn decode_board_config_packet_with_limits(
    hex: &str,
    limits: LoopLimits,
) -> Result<Vec<BoardConfigPacket>, DecodeError> {
    let mut cursor = HexCursor::new(hex)?;
    let unix_timestamp = cursor.read_u64("unixTimeStamp")?;

    decode_records(&mut cursor, "board registry", limits, |cursor| {
        Ok(BoardConfigPacket {
            unix_timestamp,
            board_id: cursor.read_u32("boardID")?,
            board_type: cursor.read_cstring("boardType")?,
            firmware_revision: cursor.read_cstring("fwRevision")?,
            serial: cursor.read_cstring("boardSerial")?,
        })
    })
}

/// Decode a port 4 sensor registry payload
///
/// Layout: `{sensor id (2 bytes), board id (1 byte), name, serial, units}`
/// records with null-terminated strings until the payload ends. There is no
/// leading timestamp.
pub fn decode_sensor_config_packet(hex: &str) -> Result<Vec<SensorConfigPacket>, DecodeError> {
    decode_sensor_config_packet_with_limits(hex, LoopLimits::default())
}

pub fn decode_sensor_config_packet_with_limits(
    hex: &str,
    limits: LoopLimits,
) -> Result<Vec<SensorConfigPacket>, DecodeError> {
    let mut cursor = HexCursor::new(hex)?;

    decode_records(&mut cursor, "sensor registry", limits, |cursor| {
        Ok(SensorConfigPacket {
            sensor_id: cursor.read_u16("sensorID")?,
            board_id: cursor.read_u8("boardID")?,
            name: cursor.read_cstring("sensorName")?,
            serial: cursor.read_cstring("sensorSerial")?,
            measurement_units: cursor.read_cstring("units")?,
        })
    })
}

/// Run a record decoder until the payload is consumed
///
/// At least one record is always decoded. Exceeding either limit fails the
/// whole packet.
fn decode_records<T>(
    cursor: &mut HexCursor<'_>,
    packet: &'static str,
    limits: LoopLimits,
    mut next: impl FnMut(&mut HexCursor<'_>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let mut records = Vec::new();
    let mut iterations = 0usize;

    loop {
        records.push(next(cursor)?);

        if records.len() > limits.max_records {
            return Err(DecodeError::TooManyRecords {
                packet,
                limit: limits.max_records,
            });
        }

        iterations += 1;
        if iterations > limits.max_iterations {
            return Err(DecodeError::TooManyIterations {
                packet,
                limit: limits.max_iterations,
            });
        }

        if cursor.is_empty() {
            break;
        }
    }

    Ok(records)
}
