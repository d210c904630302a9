// Domain models: devices, samples, rollups, alerts, analysis results

mod alert;
mod analysis;
mod device;
mod sample;
mod stats;

pub use alert::{Alert, AlertDraft, AlertKind, Severity};
pub use analysis::{Analysis, DataQuality};
pub use device::{Device, fallback_name};
pub use sample::{Sample, SampleStatus, efficiency_j_per_th};
pub use stats::{DailyStat, FleetStat, HourlyStat, StatusCount, TrendFit};

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
