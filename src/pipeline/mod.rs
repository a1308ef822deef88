//! # Dispatch Pipeline
//!
//! Handles one uplink end to end:
//!
//! ```text
//! envelope → decode → enrich from registry → mutate registry → render/send → persist
//! ```
//!
//! A decode failure aborts before the registry is touched. Sink and
//! persistence failures are logged and reported but never undo a registry
//! mutation that already happened.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::lora::decoder;
use crate::lora::envelope::{Uplink, DEFAULT_MAX_ENVELOPE_BYTES};
use crate::lora::protocol::{
    BoardConfigPacket, GpsPacket, Packet, Port, SensorConfigPacket, SensorPacket,
};
use crate::registry::model::{Board, GpsFix, Sensor};
use crate::registry::SharedRegistry;
use crate::sink::line_protocol::{
    render_board_line, render_sample_line, render_sensor_line, LineBatch,
};
use crate::sink::records::{SampleRecord, SensorRecord};
use crate::sink::LineSink;

/// Behaviour switches for the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Log every uplink with its hex payload
    pub log_messages: bool,

    /// GPS uplinks from unknown units create the unit
    pub create_unit_on_gps: bool,

    pub max_envelope_bytes: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            log_messages: false,
            create_unit_on_gps: true,
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            log_messages: config.logging.log_messages,
            create_unit_on_gps: config.registry.create_unit_on_gps,
            max_envelope_bytes: config.ingest.max_envelope_bytes,
        }
    }
}

/// Result of a step that may not apply to every uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    NotNeeded,
    Done,
    Failed,
}

/// What happened to one uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub unit: String,
    pub port: Port,

    /// Lines rendered for the sink
    pub lines: usize,

    /// Records left out of the batch: samples for unregistered channels and
    /// records with no valid line-protocol form
    pub skipped: usize,

    pub registry_changed: bool,
    pub delivery: StepOutcome,
    pub persistence: StepOutcome,
}

impl DispatchReport {
    fn new(unit: &str, port: Port) -> Self {
        Self {
            unit: unit.to_string(),
            port,
            lines: 0,
            skipped: 0,
            registry_changed: false,
            delivery: StepOutcome::NotNeeded,
            persistence: StepOutcome::NotNeeded,
        }
    }
}

/// Uplink dispatcher owning handles to the registry and the sink
pub struct Pipeline {
    registry: Arc<SharedRegistry>,
    sink: Arc<dyn LineSink>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        registry: Arc<SharedRegistry>,
        sink: Arc<dyn LineSink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            sink,
            options,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Parse a raw envelope body and dispatch it
    ///
    /// # Errors
    ///
    /// Returns error if the body is oversized or not a valid envelope, or if
    /// dispatching fails (see [`Pipeline::dispatch`]).
    pub async fn handle_body(&self, body: &[u8]) -> Result<DispatchReport> {
        let uplink = Uplink::from_slice(body, self.options.max_envelope_bytes).map_err(|e| {
            warn!(error = %e, "Error decoding incoming LoRa envelope");
            e
        })?;
        self.dispatch(&uplink).await
    }

    /// Dispatch one uplink
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::UnknownPort` or `BridgeError::Decode` when the
    /// payload cannot be decoded; in that case neither the registry nor the
    /// sink has been touched. Sink and persistence failures are not errors
    /// here, they show up in the report.
    pub async fn dispatch(&self, uplink: &Uplink) -> Result<DispatchReport> {
        let unit = uplink.device_name.as_str();

        if self.options.log_messages {
            info!(unit, port = uplink.port, hex = uplink.hex(), "Message received");
        }

        let packet = decoder::decode(uplink.port, uplink.hex()).map_err(|e| {
            warn!(unit, port = uplink.port, error = %e, "Discarding uplink");
            e
        })?;

        let mut report = DispatchReport::new(unit, packet.port());
        let batch = match &packet {
            Packet::Samples(samples) => self.enrich_samples(unit, samples, &mut report),
            Packet::Gps(gps) => {
                self.store_position(unit, gps, &mut report);
                LineBatch::new()
            }
            Packet::Boards(boards) => self.register_boards(unit, boards, &mut report),
            Packet::Sensors(sensors) => self.register_sensors(unit, sensors, &mut report),
        };

        report.lines = batch.len();
        report.delivery = self.send(unit, report.port, batch).await;

        if report.registry_changed {
            report.persistence = self.persist(unit, report.port).await;
        }

        debug!(
            unit,
            port = %report.port,
            lines = report.lines,
            skipped = report.skipped,
            registry_changed = report.registry_changed,
            "Uplink dispatched"
        );
        Ok(report)
    }

    /// Port 1: join samples with sensor metadata and a fresh fix
    fn enrich_samples(
        &self,
        unit: &str,
        packet: &SensorPacket,
        report: &mut DispatchReport,
    ) -> LineBatch {
        let mut batch = LineBatch::new();

        self.registry.read(|registry| {
            let gps = registry
                .get_gps_info(unit)
                .map(|fix| fix.for_sample(packet.unix_timestamp))
                .unwrap_or_default();

            for value in &packet.values {
                let channel = u16::from(value.channel);
                let sensor = match registry.get_sensor_info(unit, channel) {
                    Ok(sensor) => sensor,
                    Err(e) => {
                        warn!(unit, channel, error = %e, "No sensor information found, discarding sample");
                        report.skipped += 1;
                        continue;
                    }
                };

                let record = SampleRecord {
                    name: sensor.name.clone(),
                    channel,
                    value: value.value,
                    board_timestamp: packet.board_timestamp,
                    unix_timestamp: packet.unix_timestamp,
                    gps,
                };
                match render_sample_line(unit, &record) {
                    Some(line) => batch.push(&line),
                    None => {
                        warn!(unit, channel, value = record.value, "Sample not representable in line protocol, discarding");
                        report.skipped += 1;
                    }
                }
            }
        });

        batch
    }

    /// Port 2: replace the unit's stored fix
    fn store_position(&self, unit: &str, packet: &GpsPacket, report: &mut DispatchReport) {
        let fix = GpsFix {
            longitude: packet.longitude,
            latitude: packet.latitude,
            elevation: packet.elevation,
            unix_timestamp: packet.unix_timestamp,
        };

        if ![fix.longitude, fix.latitude, fix.elevation]
            .iter()
            .all(|v| v.is_finite())
        {
            warn!(unit, ?fix, "Position with non-finite coordinates not stored");
            return;
        }

        let stored = self.registry.update(|registry| {
            if self.options.create_unit_on_gps {
                registry.upsert_gps_info(unit, fix);
                Ok(())
            } else {
                registry.add_gps_info(unit, fix)
            }
        });

        match stored {
            Ok(()) => {
                debug!(unit, fixed_at = ?fix.fixed_at(), "Position updated");
                report.registry_changed = true;
            }
            Err(e) => warn!(unit, error = %e, "Position not stored"),
        }
    }

    /// Port 3: upsert boards and render their registration lines
    fn register_boards(
        &self,
        unit: &str,
        packets: &[BoardConfigPacket],
        report: &mut DispatchReport,
    ) -> LineBatch {
        let mut batch = LineBatch::new();

        self.registry.update(|registry| {
            for packet in packets {
                let board = Board {
                    unix_timestamp: packet.unix_timestamp,
                    board_id: packet.board_id,
                    board_type: packet.board_type.clone(),
                    firmware_revision: packet.firmware_revision.clone(),
                    serial: packet.serial.clone(),
                };
                match render_board_line(unit, &board) {
                    Some(line) => batch.push(&line),
                    None => {
                        warn!(unit, board_id = board.board_id, "Board without type not written to InfluxDB");
                        report.skipped += 1;
                    }
                }
                debug!(unit, board_id = board.board_id, registered_at = ?board.registered_at(), "Board registered");
                registry.add_board_to_unit(unit, board);
            }
        });

        report.registry_changed = true;
        batch
    }

    /// Port 4: upsert sensors, stamped with the unit's board registration time
    fn register_sensors(
        &self,
        unit: &str,
        packets: &[SensorConfigPacket],
        report: &mut DispatchReport,
    ) -> LineBatch {
        let mut batch = LineBatch::new();

        self.registry.update(|registry| {
            // Boards are expected to be announced before sensors; the board
            // registration time marks the start of the sampling campaign.
            let unix_timestamp = registry.get_last_known_board_timestamp(unit);
            if unix_timestamp == 0 {
                warn!(unit, "No board registration timestamp known for sensor registry");
            }

            for packet in packets {
                let sensor = Sensor {
                    channel: packet.sensor_id,
                    name: packet.name.clone(),
                    serial: packet.serial.clone(),
                    measurement_units: packet.measurement_units.clone(),
                };
                let record = SensorRecord {
                    unix_timestamp,
                    sensor: sensor.clone(),
                };
                match render_sensor_line(unit, &record) {
                    Some(line) => batch.push(&line),
                    None => {
                        warn!(unit, channel = sensor.channel, "Sensor without name not written to InfluxDB");
                        report.skipped += 1;
                    }
                }
                registry.add_sensor_to_unit(unit, sensor);
            }
        });

        report.registry_changed = true;
        batch
    }

    async fn send(&self, unit: &str, port: Port, batch: LineBatch) -> StepOutcome {
        if batch.is_empty() {
            return StepOutcome::NotNeeded;
        }

        let lines = batch.len();
        match self.sink.write(batch.into_body()).await {
            Ok(()) => {
                debug!(unit, port = %port, lines, "Telemetry delivered");
                StepOutcome::Done
            }
            Err(e) => {
                error!(unit, port = %port, lines, error = %e, "Failed to write telemetry to InfluxDB");
                StepOutcome::Failed
            }
        }
    }

    async fn persist(&self, unit: &str, port: Port) -> StepOutcome {
        match self.registry.persist().await {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                error!(
                    unit,
                    port = %port,
                    path = %self.registry.path().display(),
                    error = %e,
                    "Failed to persist unit registry"
                );
                StepOutcome::Failed
            }
        }
    }
}

/// True for errors caused by the uplink content rather than the service
pub fn is_malformed_input(err: &BridgeError) -> bool {
    matches!(
        err,
        BridgeError::Decode(_)
            | BridgeError::UnknownPort(_)
            | BridgeError::Envelope(_)
            | BridgeError::EnvelopeTooLarge { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::lora::encoder::*;
    use crate::lora::envelope::UplinkPayload;
    use crate::registry::store::DEFAULT_WRITE_TIMEOUT;
    use crate::registry::UnitRegistry;
    use crate::sink::mocks::RecordingSink;
    use crate::sink::MockLineSink;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const UNIT: &str = "AirSensEUR_ID";
    const EXAMPLE_SAMPLES: &str =
        "000000076ae2b7300000187133422ea3d734433f2400004772d9000145f85800024771eb0003477fff000a43d70000";
    const BOARD_TS: u64 = 1_560_000_000_000;

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        sink: RecordingSink,
        pipeline: Pipeline,
    }

    fn fixture_with(options: PipelineOptions) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");
        let registry = Arc::new(SharedRegistry::new(
            UnitRegistry::new(),
            &path,
            DEFAULT_WRITE_TIMEOUT,
        ));
        let sink = RecordingSink::new();
        let pipeline = Pipeline::new(registry, Arc::new(sink.clone()), options);
        Fixture {
            _dir: dir,
            path,
            sink,
            pipeline,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(PipelineOptions::default())
    }

    fn uplink(port: i64, hex: String) -> Uplink {
        Uplink {
            device_name: UNIT.to_string(),
            port,
            payload: UplinkPayload {
                decode_data_hex: hex,
            },
        }
    }

    fn boards_uplink(ids: &[u32]) -> Uplink {
        let boards: Vec<_> = ids
            .iter()
            .map(|&id| BoardConfigPacket {
                unix_timestamp: BOARD_TS,
                board_id: id,
                board_type: "ChemSensor".to_string(),
                firmware_revision: "R2.1".to_string(),
                serial: format!("CS{}", id),
            })
            .collect();
        uplink(3, encode_board_config_packet(BOARD_TS, &boards))
    }

    fn sensors_uplink(channels: &[u16]) -> Uplink {
        let sensors: Vec<_> = channels
            .iter()
            .map(|&id| SensorConfigPacket {
                sensor_id: id,
                board_id: 0,
                name: format!("S{}", id),
                serial: format!("{}", 1000 + id),
                measurement_units: "ppb".to_string(),
            })
            .collect();
        uplink(4, encode_sensor_config_packet(&sensors))
    }

    fn gps_uplink(ts: u64) -> Uplink {
        uplink(
            2,
            encode_gps_packet(&GpsPacket {
                longitude: 8.5,
                latitude: 45.25,
                elevation: 200.0,
                unix_timestamp: ts,
            }),
        )
    }

    fn samples_uplink(ts: u64, channels: &[u8]) -> Uplink {
        let packet = SensorPacket {
            unix_timestamp: ts,
            board_timestamp: 42,
            values: channels
                .iter()
                .map(|&channel| crate::lora::protocol::SensorValue {
                    channel,
                    value: 1.5,
                })
                .collect(),
        };
        uplink(1, encode_sensor_packet(&packet))
    }

    #[tokio::test]
    async fn test_samples_enriched_and_unknown_channels_skipped() {
        let f = fixture();
        f.pipeline.dispatch(&sensors_uplink(&[0x33, 0x34])).await.unwrap();
        let before = f.pipeline.registry().snapshot();

        let report = f
            .pipeline
            .dispatch(&uplink(1, EXAMPLE_SAMPLES.to_string()))
            .await
            .unwrap();

        assert_eq!(report.port, Port::SensorSamples);
        assert_eq!(report.lines, 2);
        assert_eq!(report.skipped, 5);
        assert!(!report.registry_changed);
        assert_eq!(report.delivery, StepOutcome::Done);
        assert_eq!(report.persistence, StepOutcome::NotNeeded);
        assert_eq!(f.pipeline.registry().snapshot(), before);

        let bodies = f.sink.bodies();
        let samples = bodies.last().unwrap();
        assert!(samples.starts_with(
            "AirSensEUR_ID,name=S51,channel=51 sampleEvaluatedVal=43.660000,boardTimeStamp=6257,"
        ));
        assert!(samples.contains("name=S52,channel=52 sampleEvaluatedVal=191.140625,"));
        assert_eq!(samples.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_samples_for_unknown_unit_send_nothing() {
        let f = fixture();
        let report = f
            .pipeline
            .dispatch(&uplink(1, EXAMPLE_SAMPLES.to_string()))
            .await
            .unwrap();

        assert_eq!(report.lines, 0);
        assert_eq!(report.skipped, 7);
        assert_eq!(report.delivery, StepOutcome::NotNeeded);
        assert!(f.sink.bodies().is_empty());
        assert!(!f.path.exists());
    }

    #[tokio::test]
    async fn test_gps_freshness_window() {
        let f = fixture();
        let t = 1_600_000_000_000;
        f.pipeline.dispatch(&sensors_uplink(&[1])).await.unwrap();
        f.pipeline.dispatch(&gps_uplink(t)).await.unwrap();

        f.pipeline.dispatch(&samples_uplink(t + 7_200_000, &[1])).await.unwrap();
        let fresh = f.sink.bodies().last().unwrap().clone();
        assert!(fresh.contains(
            "gpsTimeStamp=1600000000000,latitude=45.250000,longitude=8.500000,altitude=200.000000"
        ));

        f.pipeline.dispatch(&samples_uplink(t + 7_200_001, &[1])).await.unwrap();
        let stale = f.sink.bodies().last().unwrap().clone();
        assert!(stale.contains(
            "gpsTimeStamp=0,latitude=0.000000,longitude=0.000000,altitude=0.000000"
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_leaves_registry_untouched() {
        let f = fixture();
        f.pipeline.dispatch(&boards_uplink(&[1])).await.unwrap();
        let before = f.pipeline.registry().snapshot();
        let writes = f.sink.bodies().len();

        // Truncated board record: missing the serial's terminator
        let mut hex = boards_uplink(&[1, 2]).payload.decode_data_hex;
        hex.truncate(hex.len() - 2);
        let err = f.pipeline.dispatch(&uplink(3, hex)).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Decode(DecodeError::MissingTerminator { .. })
        ));
        assert!(is_malformed_input(&err));

        // Short sample header
        let err = f
            .pipeline
            .dispatch(&uplink(1, "000000076ae2".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Decode(DecodeError::FieldBounds { .. })
        ));

        assert_eq!(f.pipeline.registry().snapshot(), before);
        assert_eq!(f.sink.bodies().len(), writes);
    }

    #[tokio::test]
    async fn test_oversized_board_registry_rejected_whole() {
        let f = fixture();
        let ids: Vec<u32> = (0..101).collect();
        let err = f.pipeline.dispatch(&boards_uplink(&ids)).await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Decode(DecodeError::TooManyRecords { limit: 100, .. })
        ));
        assert!(f.pipeline.registry().snapshot().is_empty());
        assert!(f.sink.bodies().is_empty());
        assert!(!f.path.exists());
    }

    #[tokio::test]
    async fn test_board_registry_is_idempotent_and_persisted() {
        let f = fixture();
        let report = f.pipeline.dispatch(&boards_uplink(&[1, 2])).await.unwrap();
        assert_eq!(report.lines, 2);
        assert!(report.registry_changed);
        assert_eq!(report.persistence, StepOutcome::Done);
        let once = f.pipeline.registry().snapshot();

        f.pipeline.dispatch(&boards_uplink(&[1, 2])).await.unwrap();
        assert_eq!(f.pipeline.registry().snapshot(), once);

        let reloaded = SharedRegistry::load_from_file(&f.path, DEFAULT_WRITE_TIMEOUT).unwrap();
        assert_eq!(reloaded.snapshot(), once);

        let body = f.sink.bodies().remove(0);
        assert!(body.starts_with(
            "AirSensEUR_ID_Boards,boardid=1,boardtype=ChemSensor firmwarerev=\"R2.1\",serialnumber=\"CS1\" 1560000000000\n"
        ));
    }

    #[tokio::test]
    async fn test_sensor_registry_creates_unit_without_boards() {
        let f = fixture();
        let report = f.pipeline.dispatch(&sensors_uplink(&[1, 2, 3])).await.unwrap();
        assert_eq!(report.port, Port::SensorRegistry);
        assert!(report.registry_changed);

        let registry = f.pipeline.registry().snapshot();
        let unit = registry.unit(UNIT).unwrap();
        assert_eq!(unit.sensors.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(unit.boards.is_empty());

        // No board known yet: sensors are stamped with 0
        let body = f.sink.bodies().remove(0);
        assert!(body.starts_with(
            "AirSensEUR_ID_Sensors,name=S1,sensorid=1 serial=\"1001\",units=\"ppb\",enabled=true 0\n"
        ));
    }

    #[tokio::test]
    async fn test_sensor_registry_uses_board_timestamp() {
        let f = fixture();
        f.pipeline.dispatch(&boards_uplink(&[7])).await.unwrap();
        f.pipeline.dispatch(&sensors_uplink(&[9])).await.unwrap();

        let body = f.sink.bodies().pop().unwrap();
        assert!(body.ends_with("enabled=true 1560000000000\n"));
    }

    #[tokio::test]
    async fn test_gps_for_unknown_unit_with_strict_policy() {
        let f = fixture_with(PipelineOptions {
            create_unit_on_gps: false,
            ..PipelineOptions::default()
        });

        let report = f.pipeline.dispatch(&gps_uplink(1000)).await.unwrap();
        assert!(!report.registry_changed);
        assert_eq!(report.persistence, StepOutcome::NotNeeded);
        assert!(f.pipeline.registry().snapshot().is_empty());

        f.pipeline.dispatch(&boards_uplink(&[1])).await.unwrap();
        let report = f.pipeline.dispatch(&gps_uplink(1000)).await.unwrap();
        assert!(report.registry_changed);
        assert_eq!(
            f.pipeline.registry().read(|r| r.get_gps_info(UNIT).unwrap().unix_timestamp),
            1000
        );
    }

    #[tokio::test]
    async fn test_gps_creates_unit_by_default() {
        let f = fixture();
        let report = f.pipeline.dispatch(&gps_uplink(1000)).await.unwrap();

        assert_eq!(report.port, Port::Gps);
        assert!(report.registry_changed);
        assert_eq!(report.delivery, StepOutcome::NotNeeded);
        assert_eq!(report.persistence, StepOutcome::Done);
        assert!(f.pipeline.registry().snapshot().unit(UNIT).is_some());
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_registry_mutation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asedb.json");
        let registry = Arc::new(SharedRegistry::new(
            UnitRegistry::new(),
            &path,
            DEFAULT_WRITE_TIMEOUT,
        ));

        let mut sink = MockLineSink::new();
        sink.expect_write()
            .times(1)
            .returning(|_| Err(BridgeError::SinkStatus(500)));

        let pipeline = Pipeline::new(registry, Arc::new(sink), PipelineOptions::default());
        let report = pipeline.dispatch(&boards_uplink(&[3])).await.unwrap();

        assert_eq!(report.delivery, StepOutcome::Failed);
        assert_eq!(report.persistence, StepOutcome::Done);
        assert_eq!(
            pipeline.registry().read(|r| r.get_last_known_board_timestamp(UNIT)),
            BOARD_TS
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SharedRegistry::new(
            UnitRegistry::new(),
            dir.path().join("missing").join("asedb.json"),
            DEFAULT_WRITE_TIMEOUT,
        ));
        let sink = RecordingSink::new();
        let pipeline = Pipeline::new(registry, Arc::new(sink.clone()), PipelineOptions::default());

        let report = pipeline.dispatch(&boards_uplink(&[1])).await.unwrap();
        assert_eq!(report.delivery, StepOutcome::Done);
        assert_eq!(report.persistence, StepOutcome::Failed);
        assert!(pipeline.registry().snapshot().unit(UNIT).is_some());
    }

    #[tokio::test]
    async fn test_non_finite_samples_skipped_without_losing_batch() {
        let f = fixture();
        f.pipeline.dispatch(&sensors_uplink(&[1, 2, 3])).await.unwrap();

        let packet = SensorPacket {
            unix_timestamp: 5000,
            board_timestamp: 7,
            values: vec![
                crate::lora::protocol::SensorValue { channel: 1, value: f32::NAN },
                crate::lora::protocol::SensorValue { channel: 2, value: 4.25 },
                crate::lora::protocol::SensorValue { channel: 3, value: f32::INFINITY },
            ],
        };
        let report = f
            .pipeline
            .dispatch(&uplink(1, encode_sensor_packet(&packet)))
            .await
            .unwrap();

        assert_eq!(report.lines, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.delivery, StepOutcome::Done);

        let body = f.sink.bodies().pop().unwrap();
        assert!(body.starts_with("AirSensEUR_ID,name=S2,channel=2 sampleEvaluatedVal=4.250000,"));
        assert_eq!(body.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_non_finite_position_not_stored() {
        let f = fixture();
        let report = f
            .pipeline
            .dispatch(&uplink(
                2,
                encode_gps_packet(&GpsPacket {
                    longitude: f32::NAN,
                    latitude: 45.0,
                    elevation: 10.0,
                    unix_timestamp: 1000,
                }),
            ))
            .await
            .unwrap();

        assert!(!report.registry_changed);
        assert_eq!(report.persistence, StepOutcome::NotNeeded);
        assert!(f.pipeline.registry().snapshot().is_empty());
        assert!(!f.path.exists());
    }

    #[tokio::test]
    async fn test_unknown_port_rejected() {
        let f = fixture();
        let err = f
            .pipeline
            .dispatch(&uplink(9, EXAMPLE_SAMPLES.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownPort(9)));
        assert!(f.sink.bodies().is_empty());
    }

    #[tokio::test]
    async fn test_handle_body() {
        let f = fixture();
        let body = format!(
            r#"{{"deviceName":"{}","fPort":3,"object":{{"DecodeDataHex":"{}"}}}}"#,
            UNIT,
            boards_uplink(&[1]).payload.decode_data_hex
        );

        let report = f.pipeline.handle_body(body.as_bytes()).await.unwrap();
        assert_eq!(report.unit, UNIT);
        assert_eq!(report.port, Port::BoardRegistry);

        assert!(matches!(
            f.pipeline.handle_body(b"not json").await,
            Err(BridgeError::Envelope(_))
        ));

        let oversized = vec![b'{'; 5000];
        let err = f.pipeline.handle_body(&oversized).await.unwrap_err();
        assert!(matches!(err, BridgeError::EnvelopeTooLarge { .. }));
        assert!(is_malformed_input(&err));
    }

    #[tokio::test]
    async fn test_sink_error_is_not_malformed_input() {
        assert!(!is_malformed_input(&BridgeError::SinkStatus(500)));
        assert!(!is_malformed_input(&BridgeError::Persist("x".to_string())));
    }
}
