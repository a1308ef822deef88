//! # Telemetry Sink Module
//!
//! Turns enriched records into line protocol and ships them to InfluxDB.
//!
//! This module handles:
//! - Enriched record types (samples, sensor registrations)
//! - Line protocol rendering and escaping
//! - Batching lines into a single write body
//! - Authenticated HTTP writes with timeout (`influx`)

pub mod records;
pub mod line_protocol;
pub mod influx;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use influx::InfluxSink;

/// Destination for line-protocol write bodies
///
/// Implementations deliver a whole batch or fail; they never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineSink: Send + Sync {
    /// Write a newline-joined batch of lines
    async fn write(&self, body: Bytes) -> Result<()>;
}
