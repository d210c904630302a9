// Alerts raised by the collector, the writer and the analytics worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HashrateAnomaly,
    TemperatureSpike,
    PowerAnomaly,
    MaintenanceNeeded,
    LowEfficiencyScore,
    DeviceOffline,
    Restart,
    PersistenceFailure,
    CollectionSuspended,
}

impl AlertKind {
    pub const ALL: [AlertKind; 9] = [
        AlertKind::HashrateAnomaly,
        AlertKind::TemperatureSpike,
        AlertKind::PowerAnomaly,
        AlertKind::MaintenanceNeeded,
        AlertKind::LowEfficiencyScore,
        AlertKind::DeviceOffline,
        AlertKind::Restart,
        AlertKind::PersistenceFailure,
        AlertKind::CollectionSuspended,
    ];

    /// Kinds owned by the analytics worker; it resolves them when the condition clears.
    pub const ANALYTICS: [AlertKind; 5] = [
        AlertKind::HashrateAnomaly,
        AlertKind::TemperatureSpike,
        AlertKind::PowerAnomaly,
        AlertKind::MaintenanceNeeded,
        AlertKind::LowEfficiencyScore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::HashrateAnomaly => "hashrate_anomaly",
            AlertKind::TemperatureSpike => "temperature_spike",
            AlertKind::PowerAnomaly => "power_anomaly",
            AlertKind::MaintenanceNeeded => "maintenance_needed",
            AlertKind::LowEfficiencyScore => "low_efficiency_score",
            AlertKind::DeviceOffline => "device_offline",
            AlertKind::Restart => "restart",
            AlertKind::PersistenceFailure => "persistence_failure",
            AlertKind::CollectionSuspended => "collection_suspended",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown alert kind '{}'", s))
    }
}

/// An alert to raise; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    /// None for fleet/system-level alerts.
    pub device_id: Option<i64>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
}

impl AlertDraft {
    pub fn new(device_id: Option<i64>, kind: AlertKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            device_id,
            kind,
            severity,
            message: message.into(),
            value: None,
            threshold: None,
        }
    }

    pub fn with_value(mut self, value: f64, threshold: f64) -> Self {
        self.value = Some(value);
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub device_id: Option<i64>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub raised_at: i64,
    pub updated_at: i64,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
}
