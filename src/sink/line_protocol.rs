//! # Line Protocol Rendering
//!
//! Renders enriched records as InfluxDB line protocol:
//!
//! ```text
//! measurement,tag=value,tag=value field=value,field=value timestamp
//! ```
//!
//! The measurement is the unit id (suffixed with `_Boards` / `_Sensors` for
//! registry records). Timestamps are milliseconds; the write URL requests
//! `precision=ms`.
//!
//! Line protocol has no spelling for NaN or infinity and rejects empty tag
//! values. A single such line fails the whole write, so the renderers return
//! `None` for records that cannot be expressed.

use bytes::{Bytes, BytesMut};

use super::records::{SampleRecord, SensorRecord};
use crate::registry::model::Board;

/// Measurement suffix for board registry lines
pub const BOARDS_MEASUREMENT_SUFFIX: &str = "_Boards";

/// Measurement suffix for sensor registry lines
pub const SENSORS_MEASUREMENT_SUFFIX: &str = "_Sensors";

/// Render one sample line
///
/// Returns `None` if the sensor name is empty or a float field is not finite.
///
/// # Examples
///
/// ```
/// use ase_lora_bridge::registry::model::GpsFix;
/// use ase_lora_bridge::sink::line_protocol::render_sample_line;
/// use ase_lora_bridge::sink::records::SampleRecord;
///
/// let mut sample = SampleRecord {
///     name: "CO".to_string(),
///     channel: 1,
///     value: 2.5,
///     board_timestamp: 10,
///     unix_timestamp: 1000,
///     gps: GpsFix::default(),
/// };
/// let line = render_sample_line("ASE01", &sample).unwrap();
/// assert!(line.starts_with("ASE01,name=CO,channel=1 sampleEvaluatedVal=2.500000,"));
/// assert!(line.ends_with(" 1000\n"));
///
/// sample.value = f32::NAN;
/// assert!(render_sample_line("ASE01", &sample).is_none());
/// ```
pub fn render_sample_line(unit_id: &str, sample: &SampleRecord) -> Option<String> {
    let gps = &sample.gps;
    let finite = [sample.value, gps.latitude, gps.longitude, gps.elevation]
        .iter()
        .all(|v| v.is_finite());
    if sample.name.is_empty() || !finite {
        return None;
    }

    Some(format!(
        "{},name={},channel={} sampleEvaluatedVal={:.6},boardTimeStamp={},gpsTimeStamp={},latitude={:.6},longitude={:.6},altitude={:.6},calibrated={:.6} {}\n",
        escape_measurement(unit_id),
        escape_tag(&sample.name),
        sample.channel,
        sample.value,
        sample.board_timestamp,
        sample.gps.unix_timestamp,
        sample.gps.latitude,
        sample.gps.longitude,
        sample.gps.elevation,
        sample.value,
        sample.unix_timestamp,
    ))
}

/// Render one board registry line, `None` if the board type is empty
pub fn render_board_line(unit_id: &str, board: &Board) -> Option<String> {
    if board.board_type.is_empty() {
        return None;
    }

    Some(format!(
        "{}{},boardid={},boardtype={} firmwarerev=\"{}\",serialnumber=\"{}\" {}\n",
        escape_measurement(unit_id),
        BOARDS_MEASUREMENT_SUFFIX,
        board.board_id,
        escape_tag(&board.board_type),
        escape_string_field(&board.firmware_revision),
        escape_string_field(&board.serial),
        board.unix_timestamp,
    ))
}

/// Render one sensor registry line, `None` if the sensor name is empty
pub fn render_sensor_line(unit_id: &str, record: &SensorRecord) -> Option<String> {
    if record.sensor.name.is_empty() {
        return None;
    }

    Some(format!(
        "{}{},name={},sensorid={} serial=\"{}\",units=\"{}\",enabled=true {}\n",
        escape_measurement(unit_id),
        SENSORS_MEASUREMENT_SUFFIX,
        escape_tag(&record.sensor.name),
        record.sensor.channel,
        escape_string_field(&record.sensor.serial),
        escape_string_field(&record.sensor.measurement_units),
        record.unix_timestamp,
    ))
}

/// Newline-terminated lines collected into one write body
#[derive(Debug, Default)]
pub struct LineBatch {
    body: BytesMut,
    lines: usize,
}

impl LineBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rendered line (including its trailing newline)
    pub fn push(&mut self, line: &str) {
        self.body.extend_from_slice(line.as_bytes());
        self.lines += 1;
    }

    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }
}

fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

fn escape_tag(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

fn escape_string_field(value: &str) -> String {
    escape(value, &['"', '\\'])
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
