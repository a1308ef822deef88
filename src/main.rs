//! # ASE LoRa Bridge
//!
//! Reads LoRa network-server uplink envelopes, one JSON document per line,
//! from standard input and forwards decoded AirSensEUR telemetry to InfluxDB.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use ase_lora_bridge::config::{Config, LoggingConfig, PASSWORD_ENV_VAR};
use ase_lora_bridge::pipeline::{
    is_malformed_input, DispatchReport, Pipeline, PipelineOptions, StepOutcome,
};
use ase_lora_bridge::registry::SharedRegistry;
use ase_lora_bridge::sink::InfluxSink;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Envelopes buffered between the reader and the dispatcher
const INTAKE_QUEUE_DEPTH: usize = 64;

/// Daily log file name prefix inside `logging.log_dir`
const LOG_FILE_PREFIX: &str = "ase-lora-bridge.log";

/// Main entry point for the ASE LoRa bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, default `config/default.toml`)
///    - Set up logging, optionally to a daily rotated file
///    - Load the unit registry and configure the InfluxDB sink
///
/// 2. **Main Loop**
///    - A reader task forwards every non-empty stdin line, dropping lines
///      longer than `ingest.max_envelope_bytes` without buffering them
///    - Each envelope is dispatched on its own task
///
/// 3. **Graceful Shutdown**
///    - Stop on Ctrl+C or end of input
///    - Wait for in-flight uplinks to finish
///
/// # Errors
///
/// Returns error if the configuration is invalid, the registry file exists
/// but cannot be parsed, or the HTTP client cannot be created.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("ASE LoRa Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);
    if std::env::var_os(PASSWORD_ENV_VAR).is_some() {
        info!("Using {} from environment", PASSWORD_ENV_VAR);
    }

    let registry = SharedRegistry::load_from_file(
        &config.registry.path,
        config.registry.write_timeout(),
    )
    .with_context(|| format!("Failed to load unit registry from {}", config.registry.path))?;
    info!(
        units = registry.read(|r| r.len()),
        path = %config.registry.path,
        "Unit registry loaded"
    );

    let sink = InfluxSink::new(&config.influx, config.logging.log_queries)
        .context("Failed to configure InfluxDB sink")?;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(registry),
        Arc::new(sink),
        PipelineOptions::from(&config),
    ));

    let (tx, mut rx) = mpsc::channel(INTAKE_QUEUE_DEPTH);
    let max_envelope_bytes = config.ingest.max_envelope_bytes;
    let reader = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        match read_envelopes(stdin, tx, max_envelope_bytes).await {
            Ok(lines) => debug!(lines, "Uplink input reader finished"),
            Err(e) => error!(error = %e, "Failed to read uplink input"),
        }
    });

    info!("Waiting for uplinks on stdin");
    info!("Press Ctrl+C to exit");

    let mut in_flight = JoinSet::new();
    let mut totals = Totals::default();

    loop {
        tokio::select! {
            body = rx.recv() => match body {
                Some(body) => {
                    let pipeline = Arc::clone(&pipeline);
                    in_flight.spawn(async move { pipeline.handle_body(&body).await });
                }
                None => {
                    info!("Uplink input closed, shutting down...");
                    break;
                }
            },

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                totals.record(joined);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    reader.abort();

    if !in_flight.is_empty() {
        info!("Waiting for {} in-flight uplinks", in_flight.len());
    }
    while let Some(joined) = in_flight.join_next().await {
        totals.record(joined);
    }

    info!(
        "Total uplinks handled: {} ({} rejected as malformed, {} with service failures)",
        totals.handled, totals.rejected, totals.degraded
    );
    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the default `info` level. When `log_dir` is set the
/// output goes to a daily rotated file; the returned guard must be held for
/// the lifetime of the process so buffered lines are flushed.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

/// Forward every non-empty line of `reader` to `tx`
///
/// At most `max_bytes` of a line are buffered; longer lines are skipped up
/// to the next newline and logged. Returns the number of lines forwarded.
/// Stops early if the receiver is gone.
async fn read_envelopes<R>(
    mut reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    max_bytes: usize,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut forwarded = 0;
    let mut line = Vec::with_capacity(max_bytes);
    // Room for the body plus a CRLF terminator
    let read_limit = max_bytes as u64 + 2;

    loop {
        line.clear();
        if (&mut reader).take(read_limit).read_until(b'\n', &mut line).await? == 0 {
            return Ok(forwarded);
        }

        if line.last() != Some(&b'\n') && line.len() > max_bytes {
            let dropped = line.len() + skip_line(&mut reader).await?;
            warn!(bytes = dropped, limit = max_bytes, "Discarding oversized uplink line");
            continue;
        }

        let body = line.trim_ascii();
        if body.is_empty() {
            continue;
        }

        if tx.send(body.to_vec()).await.is_err() {
            warn!("Uplink dispatcher gone, dropping input");
            return Ok(forwarded);
        }
        forwarded += 1;
    }
}

/// Consume input up to and including the next newline, returning the byte count
async fn skip_line<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(skipped);
        }

        match buf.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(skipped + end + 1);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
                skipped += len;
            }
        }
    }
}

/// Uplink counters reported at shutdown
#[derive(Debug, Default, PartialEq, Eq)]
struct Totals {
    handled: u64,

    /// Envelopes or payloads that could not be parsed
    rejected: u64,

    /// Sink, persistence or task failures
    degraded: u64,
}

impl Totals {
    fn record(
        &mut self,
        joined: std::result::Result<ase_lora_bridge::error::Result<DispatchReport>, tokio::task::JoinError>,
    ) {
        self.handled += 1;
        match joined {
            Ok(Ok(report)) => {
                if report.delivery == StepOutcome::Failed
                    || report.persistence == StepOutcome::Failed
                {
                    self.degraded += 1;
                }
            }
            Ok(Err(e)) if is_malformed_input(&e) => self.rejected += 1,
            Ok(Err(e)) => {
                self.degraded += 1;
                error!(error = %e, "Uplink handling failed");
            }
            Err(e) => {
                self.degraded += 1;
                error!(error = %e, "Uplink task failed");
            }
        }
    }
}
