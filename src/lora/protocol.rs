//! # LoRa Payload Constants and Types
//!
//! Port numbers, field widths and decoded packet definitions for the
//! AirSensEUR LoRa uplink payloads.

use std::fmt;

use crate::error::BridgeError;

/// Sensor samples port
pub const PORT_SENSOR_SAMPLES: i64 = 1;

/// GPS fix port
pub const PORT_GPS: i64 = 2;

/// Board registry port
pub const PORT_BOARD_REGISTRY: i64 = 3;

/// Sensor registry port
pub const PORT_SENSOR_REGISTRY: i64 = 4;

/// Hex width of a 64-bit unix timestamp
pub const HEX_WIDTH_U64: usize = 16;

/// Hex width of a 32-bit field (board timestamp, board id, float)
pub const HEX_WIDTH_U32: usize = 8;

/// Hex width of a 16-bit field (sensor id)
pub const HEX_WIDTH_U16: usize = 4;

/// Hex width of an 8-bit field (channel, short board id)
pub const HEX_WIDTH_U8: usize = 2;

/// Hex width of one sample group: channel (1 byte) + float value (4 bytes)
pub const SAMPLE_GROUP_HEX_WIDTH: usize = HEX_WIDTH_U8 + HEX_WIDTH_U32;

/// Fixed hex length of a GPS payload: timestamp + three floats
pub const GPS_PAYLOAD_HEX_LEN: usize = HEX_WIDTH_U64 + 3 * HEX_WIDTH_U32;

/// Maximum records accepted from a single registry uplink
pub const MAX_RECORDS_PER_PACKET: usize = 100;

/// Maximum loop iterations spent on a single registry uplink
pub const MAX_DECODE_ITERATIONS: usize = 200;

/// Payload layout selected by the uplink port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// Port 1: sensor samples
    SensorSamples,
    /// Port 2: GPS fix
    Gps,
    /// Port 3: board registry update
    BoardRegistry,
    /// Port 4: sensor registry update
    SensorRegistry,
}

impl Port {
    /// Numeric port value as carried by the network server
    pub fn number(self) -> i64 {
        match self {
            Port::SensorSamples => PORT_SENSOR_SAMPLES,
            Port::Gps => PORT_GPS,
            Port::BoardRegistry => PORT_BOARD_REGISTRY,
            Port::SensorRegistry => PORT_SENSOR_REGISTRY,
        }
    }
}

impl TryFrom<i64> for Port {
    type Error = BridgeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            PORT_SENSOR_SAMPLES => Ok(Port::SensorSamples),
            PORT_GPS => Ok(Port::Gps),
            PORT_BOARD_REGISTRY => Ok(Port::BoardRegistry),
            PORT_SENSOR_REGISTRY => Ok(Port::SensorRegistry),
            other => Err(BridgeError::UnknownPort(other)),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// One channel reading from a sample packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorValue {
    /// Sensor channel on the unit
    pub channel: u8,

    /// Evaluated value, reinterpreted from the raw 32-bit pattern
    pub value: f32,
}

/// Port 1 payload
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPacket {
    /// Host timestamp in milliseconds since epoch
    pub unix_timestamp: u64,

    /// Sensor board local timestamp
    pub board_timestamp: u32,

    /// Readings in payload order
    pub values: Vec<SensorValue>,
}

/// Port 2 payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPacket {
    pub longitude: f32,
    pub latitude: f32,
    pub elevation: f32,

    /// Fix timestamp in milliseconds since epoch
    pub unix_timestamp: u64,
}

/// One board entry of a port 3 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfigPacket {
    /// Leading timestamp shared by every board of the uplink
    pub unix_timestamp: u64,
    pub board_id: u32,
    pub board_type: String,
    pub firmware_revision: String,
    pub serial: String,
}

/// One sensor entry of a port 4 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfigPacket {
    pub sensor_id: u16,
    pub board_id: u8,
    pub name: String,
    pub serial: String,
    pub measurement_units: String,
}

/// Decoded uplink, one variant per port
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Samples(SensorPacket),
    Gps(GpsPacket),
    Boards(Vec<BoardConfigPacket>),
    Sensors(Vec<SensorConfigPacket>),
}

impl Packet {
    /// Port this packet was decoded from
    pub fn port(&self) -> Port {
        match self {
            Packet::Samples(_) => Port::SensorSamples,
            Packet::Gps(_) => Port::Gps,
            Packet::Boards(_) => Port::BoardRegistry,
            Packet::Sensors(_) => Port::SensorRegistry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_round_trip() {
        for number in 1..=4 {
            let port = Port::try_from(number).unwrap();
            assert_eq!(port.number(), number);
        }
    }

    #[test]
    fn test_unknown_port_rejected() {
        assert!(matches!(Port::try_from(0), Err(BridgeError::UnknownPort(0))));
        assert!(matches!(Port::try_from(5), Err(BridgeError::UnknownPort(5))));
    }

    #[test]
    fn test_field_widths() {
        assert_eq!(SAMPLE_GROUP_HEX_WIDTH, 10);
        assert_eq!(GPS_PAYLOAD_HEX_LEN, 40);
    }
}
