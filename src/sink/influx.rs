//! # InfluxDB Writer
//!
//! Posts line-protocol batches to the InfluxDB 1.x compatible `/write`
//! endpoint with basic authentication. A write succeeds only on
//! `204 No Content`; anything else is reported to the caller, which logs it.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info};

use super::LineSink;
use crate::config::InfluxConfig;
use crate::error::{BridgeError, Result};

/// HTTP client for the InfluxDB write endpoint
pub struct InfluxSink {
    client: Client,
    url: Url,
    user: String,
    password: String,
    log_queries: bool,
}

impl std::fmt::Debug for InfluxSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxSink")
            .field("url", &self.url.as_str())
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl InfluxSink {
    /// Create a writer for the configured server
    ///
    /// # Arguments
    ///
    /// * `config` - Host, port, credentials, database and timeout
    /// * `log_queries` - Log every body before it is sent
    ///
    /// # Errors
    ///
    /// Returns error if the write URL cannot be built or the HTTP client
    /// fails to initialise.
    pub fn new(config: &InfluxConfig, log_queries: bool) -> Result<Self> {
        let url = write_url(&config.host, config.port, &config.database)?;
        let client = Client::builder().timeout(config.timeout()).build()?;

        info!(url = %url, user = %config.user, "InfluxDB sink configured");

        Ok(Self {
            client,
            url,
            user: config.user.clone(),
            password: config.password.clone(),
            log_queries,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl LineSink for InfluxSink {
    async fn write(&self, body: Bytes) -> Result<()> {
        if self.log_queries {
            info!(body = %String::from_utf8_lossy(&body), "Influx - Sending");
        }

        let len = body.len();
        let response = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(BridgeError::SinkStatus(status.as_u16()));
        }

        debug!(bytes = len, "Batch written to InfluxDB");
        Ok(())
    }
}

/// Build `http://{host}:{port}/write?db={database}&precision=ms`
pub fn write_url(host: &str, port: u16, database: &str) -> Result<Url> {
    Url::parse_with_params(
        &format!("http://{}:{}/write", host, port),
        &[("db", database), ("precision", "ms")],
    )
    .map_err(|e| BridgeError::Sink(format!("invalid InfluxDB write URL: {}", e)))
}
