//! # Error Types
//!
//! Custom error types for the ASE LoRa bridge using `thiserror`.

use thiserror::Error;

/// Failure while decoding a hex-encoded LoRa payload
///
/// Offsets are expressed in hex characters from the start of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload does not contain a whole number of bytes
    #[error("payload has odd hex length {0}")]
    OddLength(usize),

    /// Non hex-digit character in the payload
    #[error("invalid hex digit at offset {offset} in {field}")]
    InvalidHex { field: &'static str, offset: usize },

    /// Field runs past the end of the payload
    #[error("{field} at offset {offset} needs {needed} hex chars, {available} available")]
    FieldBounds {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// String field without a null terminator
    #[error("{field} at offset {offset} has no null terminator")]
    MissingTerminator { field: &'static str, offset: usize },

    /// String field contains bytes outside ASCII
    #[error("{field} at offset {offset} contains non-ASCII byte 0x{byte:02X}")]
    NonAsciiString {
        field: &'static str,
        offset: usize,
        byte: u8,
    },

    /// More records than a single uplink may carry
    #[error("{packet} packet exceeds {limit} records")]
    TooManyRecords { packet: &'static str, limit: usize },

    /// Record loop did not terminate within its iteration cap
    #[error("{packet} packet exceeds {limit} decode iterations")]
    TooManyIterations { packet: &'static str, limit: usize },

    /// Hex left over after a fixed-length layout
    #[error("{packet} packet has {extra} unexpected hex chars at offset {offset}")]
    TrailingData {
        packet: &'static str,
        offset: usize,
        extra: usize,
    },
}

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Payload decoding errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Port number outside the four known layouts
    #[error("unknown uplink port {0}")]
    UnknownPort(i64),

    /// Envelope body could not be parsed
    #[error("invalid uplink envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Envelope body larger than the intake cap
    #[error("uplink envelope of {size} bytes exceeds {limit} byte limit")]
    EnvelopeTooLarge { size: usize, limit: usize },

    /// Registry lookup for a unit that was never registered
    #[error("unit {0} not found in registry")]
    UnknownUnit(String),

    /// Registry lookup for a channel that was never registered
    #[error("no sensor with channel {channel} registered for unit {unit}")]
    SensorNotFound { unit: String, channel: u16 },

    /// Telemetry sink transport errors
    #[error("sink error: {0}")]
    Sink(String),

    /// Telemetry sink answered with something other than 204
    #[error("sink responded with status {0}")]
    SinkStatus(u16),

    /// Registry file could not be written
    #[error("registry persistence error: {0}")]
    Persist(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
