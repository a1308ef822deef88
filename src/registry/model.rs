//! # Registry Model
//!
//! Units, boards, sensors and GPS fixes as stored in the registry file.
//! Serialized field names follow the file layout already deployed next to
//! existing gateways.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum distance between a GPS fix and a sample for the fix to be used
pub const GPS_FRESHNESS_MS: u64 = 7_200_000;

/// Sensor channel metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub channel: u16,
    pub name: String,
    pub serial: String,
    #[serde(rename = "units")]
    pub measurement_units: String,
}

/// Sensor board metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Registration timestamp in milliseconds since epoch
    #[serde(rename = "UnixTimeStamp")]
    pub unix_timestamp: u64,

    #[serde(rename = "BoardID")]
    pub board_id: u32,

    #[serde(rename = "BoardType")]
    pub board_type: String,

    #[serde(rename = "FwRevision")]
    pub firmware_revision: String,

    #[serde(rename = "Serial")]
    pub serial: String,
}

impl Board {
    /// Registration time, if the timestamp is representable
    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.unix_timestamp)
    }
}

/// Last known position of a unit
///
/// An all-zero fix means "no position".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    #[serde(rename = "lon")]
    pub longitude: f32,

    #[serde(rename = "lat")]
    pub latitude: f32,

    #[serde(rename = "ele")]
    pub elevation: f32,

    /// Fix timestamp in milliseconds since epoch
    #[serde(rename = "ts")]
    pub unix_timestamp: u64,
}

impl GpsFix {
    /// The fix to attach to a sample taken at `sample_timestamp`
    ///
    /// Returns the zeroed fix when the stored one is more than
    /// [`GPS_FRESHNESS_MS`] away from the sample, in either direction.
    pub fn for_sample(&self, sample_timestamp: u64) -> GpsFix {
        if self.unix_timestamp.abs_diff(sample_timestamp) > GPS_FRESHNESS_MS {
            GpsFix::default()
        } else {
            *self
        }
    }

    pub fn fixed_at(&self) -> Option<DateTime<Utc>> {
        millis_to_datetime(self.unix_timestamp)
    }
}

/// One remote unit with everything known about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,

    /// Sensors keyed by channel
    #[serde(default, deserialize_with = "null_as_default")]
    pub sensors: BTreeMap<u16, Sensor>,

    /// Boards keyed by board id
    #[serde(default, deserialize_with = "null_as_default")]
    pub boards: BTreeMap<u32, Board>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub position: GpsFix,
}

impl Unit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sensors: BTreeMap::new(),
            boards: BTreeMap::new(),
            position: GpsFix::default(),
        }
    }
}

/// Older registry files carry `null` for empty maps and missing positions
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn millis_to_datetime(millis: u64) -> Option<DateTime<Utc>> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(ts: u64) -> GpsFix {
        GpsFix {
            longitude: 8.61,
            latitude: 45.81,
            elevation: 240.0,
            unix_timestamp: ts,
        }
    }

    #[test]
    fn test_fix_within_two_hours_is_used() {
        let t = 1_560_000_000_000;
        assert_eq!(fix(t).for_sample(t), fix(t));
        assert_eq!(fix(t).for_sample(t + 7_200_000), fix(t));
        assert_eq!(fix(t).for_sample(t - 7_200_000), fix(t));
    }

    #[test]
    fn test_stale_fix_is_zeroed() {
        let t = 1_560_000_000_000;
        assert_eq!(fix(t).for_sample(t + 7_200_001), GpsFix::default());
        assert_eq!(fix(t).for_sample(t - 7_200_001), GpsFix::default());
    }

    #[test]
    fn test_unit_json_shape() {
        let mut unit = Unit::new("ASE01");
        unit.sensors.insert(
            3,
            Sensor {
                channel: 3,
                name: "NO2".to_string(),
                serial: "212".to_string(),
                measurement_units: "nA".to_string(),
            },
        );

        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["id"], "ASE01");
        assert_eq!(json["sensors"]["3"]["units"], "nA");
        assert_eq!(json["position"]["ts"], 0);
        assert!(json["boards"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_unit_accepts_null_sections() {
        let json = r#"{"id": "ASE01", "sensors": null, "boards": null, "position": null}"#;
        let unit: Unit = serde_json::from_str(json).unwrap();
        assert_eq!(unit, Unit::new("ASE01"));
    }

    #[test]
    fn test_board_registration_time() {
        let board = Board {
            unix_timestamp: 1_560_000_000_000,
            board_id: 1,
            board_type: "ChemSensor".to_string(),
            firmware_revision: "R2.0".to_string(),
            serial: "SN1".to_string(),
        };
        let at = board.registered_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_560_000_000_000);
    }
}
