// Rollups: hourly and daily per device, plus the fleet snapshot.

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// One bucket of the per-hour status histogram (stored as a versioned wincode BLOB).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: u32,
}

/// One device, one aligned UTC hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyStat {
    pub device_id: i64,
    /// Epoch ms of the hour start (aligned to the hour).
    pub hour_start: i64,
    pub samples_count: u32,
    /// Samples whose status counts toward uptime.
    pub online_samples: u32,
    pub expected_samples: u32,
    pub uptime_percent: f64,
    pub avg_hashrate_ghs: Option<f64>,
    pub min_hashrate_ghs: Option<f64>,
    pub max_hashrate_ghs: Option<f64>,
    pub avg_temp_c: Option<f64>,
    pub max_temp_c: Option<f64>,
    pub avg_power_w: Option<f64>,
    pub avg_efficiency_j_th: Option<f64>,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub rejection_rate_percent: f64,
    pub status_histogram: Vec<StatusCount>,
}

/// Least-squares fit over trailing daily average hashrates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendFit {
    /// GH/s per day.
    pub slope: f64,
    /// Coefficient of determination, 0..=1.
    pub r_squared: f64,
    pub points: u32,
}

/// One device, one aligned UTC day, rolled up from hourly stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub device_id: i64,
    /// Epoch ms of the day start (UTC midnight).
    pub day_start: i64,
    pub hours_count: u32,
    pub samples_count: u32,
    pub uptime_percent: f64,
    pub avg_hashrate_ghs: Option<f64>,
    pub peak_hashrate_ghs: Option<f64>,
    pub avg_temp_c: Option<f64>,
    pub peak_temp_c: Option<f64>,
    pub energy_wh: f64,
    pub avg_efficiency_j_th: Option<f64>,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub rejection_rate_percent: f64,
    pub trend: Option<TrendFit>,
}

/// Fleet-wide snapshot derived from the latest sample of each active device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStat {
    pub timestamp: i64,
    pub total_devices: u32,
    pub online_devices: u32,
    pub total_hashrate_ghs: f64,
    pub total_power_w: f64,
    /// Fleet J/TH; None when nothing is hashing.
    pub efficiency_j_th: Option<f64>,
    pub avg_temp_c: Option<f64>,
    pub avg_vr_temp_c: Option<f64>,
    pub rejection_rate_percent: f64,
}
