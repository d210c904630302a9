// HTTP client for device telemetry. One GET per poll, retried within the cycle on transient errors.

pub mod payload;

use std::future::Future;
use std::time::Duration;

use tracing::instrument;

use crate::error::NetworkError;
use crate::retry::{RetryPolicy, run_with_retry};
use crate::version;

pub use payload::{Readings, TelemetryPayload, classify};

/// Successful fetch: validated readings plus the raw body for audit.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub readings: Readings,
    pub raw: String,
}

/// Where the scheduler gets telemetry from. Implemented by `DeviceClient`; tests supply fakes.
pub trait TelemetrySource: Send + Sync {
    fn fetch(&self, address: &str) -> impl Future<Output = Result<Fetched, NetworkError>> + Send;
}

pub struct DeviceClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl DeviceClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(version::user_agent())
            .build()
            .map_err(|e| NetworkError::ConnectionFailed(format!("client init: {}", e)))?;
        Ok(Self { client, retry })
    }

    async fn fetch_once(&self, url: &str) -> Result<Fetched, NetworkError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Http(status.as_u16()));
        }
        let raw = response.text().await?;
        let payload: TelemetryPayload =
            serde_json::from_str(&raw).map_err(|e| NetworkError::InvalidPayload(e.to_string()))?;
        let readings = payload.validate();
        for rejected in &readings.rejected {
            tracing::debug!(url, field = rejected.field, reason = %rejected.reason, "payload field dropped");
        }
        Ok(Fetched { readings, raw })
    }
}

/// Telemetry endpoint for a device address (host or host:port).
pub fn info_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}/api/system/info", address.trim_end_matches('/'))
    } else {
        format!("http://{}/api/system/info", address)
    }
}

impl TelemetrySource for DeviceClient {
    #[instrument(skip(self), fields(operation = "fetch_telemetry"))]
    async fn fetch(&self, address: &str) -> Result<Fetched, NetworkError> {
        let url = info_url(address);
        run_with_retry("fetch_telemetry", &self.retry, || self.fetch_once(&url)).await
    }
}
