//! # Uplink Envelope
//!
//! JSON envelope posted by the LoRa network server's HTTP integration:
//!
//! ```json
//! {"deviceName": "AirSensEUR_ID", "fPort": 1, "object": {"DecodeDataHex": "0000..."}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Default cap on the size of an envelope body
pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 4096;

/// Incoming uplink message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uplink {
    /// Unit identifier
    #[serde(rename = "deviceName")]
    pub device_name: String,

    /// Payload layout selector
    #[serde(rename = "fPort")]
    pub port: i64,

    #[serde(rename = "object")]
    pub payload: UplinkPayload,
}

/// Decoded object section of the envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkPayload {
    #[serde(rename = "DecodeDataHex")]
    pub decode_data_hex: String,
}

impl Uplink {
    /// Parse an envelope body, rejecting bodies over `max_bytes`
    ///
    /// Unknown fields are ignored; network servers add metadata freely.
    pub fn from_slice(body: &[u8], max_bytes: usize) -> Result<Self> {
        if body.len() > max_bytes {
            return Err(BridgeError::EnvelopeTooLarge {
                size: body.len(),
                limit: max_bytes,
            });
        }

        serde_json::from_slice(body).map_err(BridgeError::Envelope)
    }

    /// Hex payload carried by the envelope
    pub fn hex(&self) -> &str {
        &self.payload.decode_data_hex
    }
}
