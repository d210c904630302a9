// Raw telemetry sample: one poll of one device. Failure polls carry a status and no readings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status tag stored with every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Online,
    NoHashrate,
    Overheating,
    NoTempSensor,
    WifiIssues,
    HighRejection,
    HighPower,
    LowPower,
    Timeout,
    ConnectionFailed,
    HttpError,
    InvalidPayload,
}

impl SampleStatus {
    pub const ALL: [SampleStatus; 12] = [
        SampleStatus::Online,
        SampleStatus::NoHashrate,
        SampleStatus::Overheating,
        SampleStatus::NoTempSensor,
        SampleStatus::WifiIssues,
        SampleStatus::HighRejection,
        SampleStatus::HighPower,
        SampleStatus::LowPower,
        SampleStatus::Timeout,
        SampleStatus::ConnectionFailed,
        SampleStatus::HttpError,
        SampleStatus::InvalidPayload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SampleStatus::Online => "online",
            SampleStatus::NoHashrate => "no_hashrate",
            SampleStatus::Overheating => "overheating",
            SampleStatus::NoTempSensor => "no_temp_sensor",
            SampleStatus::WifiIssues => "wifi_issues",
            SampleStatus::HighRejection => "high_rejection",
            SampleStatus::HighPower => "high_power",
            SampleStatus::LowPower => "low_power",
            SampleStatus::Timeout => "timeout",
            SampleStatus::ConnectionFailed => "connection_failed",
            SampleStatus::HttpError => "http_error",
            SampleStatus::InvalidPayload => "invalid_payload",
        }
    }

    /// The device answered with a telemetry object.
    pub fn is_reachable(self) -> bool {
        !matches!(
            self,
            SampleStatus::Timeout
                | SampleStatus::ConnectionFailed
                | SampleStatus::HttpError
                | SampleStatus::InvalidPayload
        )
    }

    /// Counts toward uptime: reachable and hashing.
    pub fn counts_as_online(self) -> bool {
        self.is_reachable() && self != SampleStatus::NoHashrate
    }
}

impl fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SampleStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown sample status '{}'", s))
    }
}

/// One measurement. Readings are `None` when the poll failed or the field was invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub device_id: i64,
    pub hostname: String,
    /// Hostname came from the cache because the payload did not carry one.
    pub hostname_cached: bool,
    pub status: SampleStatus,
    pub hashrate_ghs: Option<f64>,
    pub temp_asic_c: Option<f64>,
    pub temp_vr_c: Option<f64>,
    pub power_w: Option<f64>,
    pub voltage_set_mv: Option<f64>,
    pub voltage_actual_mv: Option<f64>,
    pub frequency_mhz: Option<f64>,
    pub shares_accepted: Option<u64>,
    pub shares_rejected: Option<u64>,
    pub wifi_rssi: Option<i32>,
    pub uptime_seconds: Option<u64>,
    pub efficiency_j_th: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
}

impl Sample {
    /// Sample for a poll that produced no telemetry.
    pub fn failed(timestamp: i64, device_id: i64, hostname: String, hostname_cached: bool, status: SampleStatus) -> Self {
        Self {
            timestamp,
            device_id,
            hostname,
            hostname_cached,
            status,
            hashrate_ghs: None,
            temp_asic_c: None,
            temp_vr_c: None,
            power_w: None,
            voltage_set_mv: None,
            voltage_actual_mv: None,
            frequency_mhz: None,
            shares_accepted: None,
            shares_rejected: None,
            wifi_rssi: None,
            uptime_seconds: None,
            efficiency_j_th: None,
            raw_payload: None,
        }
    }
}

/// Energy per unit of work: J/TH = W / (GH/s / 1000). None without positive readings.
pub fn efficiency_j_per_th(hashrate_ghs: f64, power_w: f64) -> Option<f64> {
    if hashrate_ghs > 0.0 && power_w > 0.0 && hashrate_ghs.is_finite() && power_w.is_finite() {
        Some(power_w / (hashrate_ghs / 1000.0))
    } else {
        None
    }
}
