//! Delivery client for the remote record service.
//!
//! Window records and session summaries are posted to the aggregation
//! server. Delivery is best effort: every call has its own timeout and
//! returns a [`DeliveryError`] that the caller logs and drops. Nothing here
//! touches local session statistics.

use crate::core::{SessionSummary, WindowRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for a single window record.
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the session summary; the server generates reports
/// and feedback before it answers.
pub const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(120);

/// Delivery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Base URL of the aggregation server (e.g. `http://127.0.0.1:8000`)
    pub base_url: String,
    /// Timeout for each window record
    #[serde(with = "crate::config::duration_secs")]
    pub record_timeout: Duration,
    /// Timeout for the session summary
    #[serde(with = "crate::config::duration_secs")]
    pub summary_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8000")
    }
}

impl DeliveryConfig {
    /// Create a configuration with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            record_timeout: DEFAULT_RECORD_TIMEOUT,
            summary_timeout: DEFAULT_SUMMARY_TIMEOUT,
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Window record endpoint.
    pub fn record_url(&self) -> String {
        format!("{}/record", self.base())
    }

    /// Session summary endpoint.
    pub fn summary_url(&self) -> String {
        format!("{}/report/daily", self.base())
    }

    /// Health check endpoint.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base())
    }
}

/// Delivery error types.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Connection refused, DNS failure and the like
    #[error("delivery network error: {0}")]
    Network(String),
    /// The request exceeded its timeout
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    /// Server answered with a non-2xx status
    #[error("delivery rejected ({status}): {message}")]
    Server { status: u16, message: String },
    /// Response body could not be decoded
    #[error("delivery serialization error: {0}")]
    Serialization(String),
}

/// Server acknowledgement of a session summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SummaryAck {
    /// Outcome reported by the server
    #[serde(default)]
    pub msg: String,
    /// Daily feedback text, when the report was generated
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Destination for window records and session summaries.
///
/// The session controller only talks to this trait so tests can stand in
/// for the network.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Deliver one flushed window.
    async fn deliver(&self, record: &WindowRecord) -> Result<(), DeliveryError>;

    /// Deliver the end-of-session summary.
    async fn deliver_summary(&self, summary: &SessionSummary) -> Result<SummaryAck, DeliveryError>;
}

/// HTTP delivery client.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    config: DeliveryConfig,
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Create a new delivery client.
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DeliveryError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Check that the server is reachable.
    pub async fn test_connection(&self) -> Result<bool, DeliveryError> {
        let response = self
            .client
            .get(self.config.health_url())
            .timeout(self.config.record_timeout)
            .send()
            .await
            .map_err(|e| classify(e, self.config.record_timeout))?;

        Ok(response.status().is_success())
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: String,
        body: &T,
        timeout: Duration,
    ) -> Result<reqwest::Response, DeliveryError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl RecordSink for DeliveryClient {
    async fn deliver(&self, record: &WindowRecord) -> Result<(), DeliveryError> {
        self.post(self.config.record_url(), record, self.config.record_timeout)
            .await?;
        Ok(())
    }

    async fn deliver_summary(&self, summary: &SessionSummary) -> Result<SummaryAck, DeliveryError> {
        let timeout = self.config.summary_timeout;
        let response = self
            .post(self.config.summary_url(), summary, timeout)
            .await?;

        response
            .json::<SummaryAck>()
            .await
            .map_err(|e| DeliveryError::Serialization(e.to_string()))
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout(timeout)
    } else {
        DeliveryError::Network(error.to_string())
    }
}
