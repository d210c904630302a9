// Read-side queries over the store: status, fleet snapshot, history, analyses, alerts, export.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::analytics::{
    DeviceWindow, EfficiencyScore, FleetInsights, GrowthReport, MaintenancePrediction, efficiency_score, fleet_insights,
    growth_trend, predict_maintenance,
};
use crate::collector::context::CollectorStatus;
use crate::config::AnalyticsConfig;
use crate::error::PersistenceError;
use crate::journal;
use crate::models::{Alert, Analysis, Device, FleetStat, MS_PER_DAY, MS_PER_HOUR, Sample};
use crate::optimization::{self, OptimizationReport, OptimizerConfig};
use crate::telemetry_repo::TelemetryRepo;
use crate::telemetry_repo::aggregation::{self, MIN_TREND_POINTS};

/// History requests are capped at this many hours.
pub const MAX_HISTORY_HOURS: u32 = 24 * 31;
/// Growth trend looks back this many days.
const GROWTH_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device: Device,
    /// Newest stored sample, None before the first poll.
    pub latest: Option<Sample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Breaker, interval and counters of the running scheduler; None when no scheduler is attached.
    pub collector: Option<CollectorStatus>,
    pub devices: Vec<DeviceStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub device_id: i64,
    pub efficiency: Analysis<EfficiencyScore>,
    pub maintenance: Analysis<MaintenancePrediction>,
    pub growth: Analysis<GrowthReport>,
}

#[derive(Clone)]
pub struct QueryService {
    repo: Arc<TelemetryRepo>,
    analytics: AnalyticsConfig,
    optimizer: OptimizerConfig,
    collector: Option<watch::Receiver<CollectorStatus>>,
}

impl QueryService {
    pub fn new(repo: Arc<TelemetryRepo>, analytics: AnalyticsConfig, optimizer: OptimizerConfig) -> Self {
        Self {
            repo,
            analytics,
            optimizer,
            collector: None,
        }
    }

    /// Report the scheduler's published status alongside device status.
    pub fn with_collector(mut self, status_rx: watch::Receiver<CollectorStatus>) -> Self {
        self.collector = Some(status_rx);
        self
    }

    /// Every active device with its latest sample, plus collector state.
    pub async fn current_status(&self) -> Result<StatusReport, PersistenceError> {
        let devices = self.repo.list_devices(true).await?;
        let mut latest: HashMap<i64, Sample> = self
            .repo
            .latest_samples()
            .await?
            .into_iter()
            .map(|s| (s.device_id, s))
            .collect();
        Ok(StatusReport {
            collector: self.collector.as_ref().map(|rx| rx.borrow().clone()),
            devices: devices
                .into_iter()
                .map(|device| DeviceStatus {
                    latest: latest.remove(&device.id),
                    device,
                })
                .collect(),
        })
    }

    /// Fleet totals derived from the latest sample of each active device.
    pub async fn fleet_snapshot(&self, now: i64) -> Result<FleetStat, PersistenceError> {
        let devices = self.repo.list_devices(true).await?;
        let latest = self.repo.latest_samples().await?;
        Ok(aggregation::compute_fleet(now, devices.len() as u32, &latest))
    }

    /// Raw samples over the last `hours`, for one device or the whole fleet. Ascending.
    pub async fn history(&self, device_id: Option<i64>, hours: u32, now: i64) -> Result<Vec<Sample>, PersistenceError> {
        let from = now - hours.clamp(1, MAX_HISTORY_HOURS) as i64 * MS_PER_HOUR;
        match device_id {
            Some(id) => self.repo.samples_in_range(id, from, now + 1).await,
            None => self.repo.all_samples_in_range(from, now + 1).await,
        }
    }

    pub async fn optimization(
        &self,
        device_id: i64,
        hours: u32,
        now: i64,
    ) -> Result<Analysis<OptimizationReport>, PersistenceError> {
        let from = now - hours.clamp(1, MAX_HISTORY_HOURS) as i64 * MS_PER_HOUR;
        let samples = self.repo.samples_in_range(device_id, from, now + 1).await?;
        Ok(optimization::analyze(device_id, &samples, from, now, &self.optimizer))
    }

    pub async fn efficiency(&self, device_id: i64, now: i64) -> Result<Analysis<EfficiencyScore>, PersistenceError> {
        let from = now - self.analytics.efficiency_window_hours as i64 * MS_PER_HOUR;
        let hourly = self.repo.hourly_stats(device_id, from, now).await?;
        Ok(efficiency_score(&hourly, self.analytics.efficiency_min_hours))
    }

    pub async fn maintenance(
        &self,
        device_id: i64,
        now: i64,
    ) -> Result<Analysis<MaintenancePrediction>, PersistenceError> {
        let from = now - self.analytics.maintenance_window_hours as i64 * MS_PER_HOUR;
        let hourly = self.repo.hourly_stats(device_id, from, now).await?;
        Ok(predict_maintenance(&hourly, self.analytics.maintenance_min_hours))
    }

    pub async fn growth(&self, device_id: i64, now: i64) -> Result<Analysis<GrowthReport>, PersistenceError> {
        let daily = self
            .repo
            .daily_stats(device_id, now - GROWTH_WINDOW_DAYS * MS_PER_DAY, now)
            .await?;
        Ok(growth_trend(&daily, MIN_TREND_POINTS))
    }

    /// Efficiency, maintenance and growth for one device. None when the device is unknown.
    pub async fn health(&self, device_id: i64, now: i64) -> Result<Option<DeviceHealth>, PersistenceError> {
        if self.repo.get_device(device_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(DeviceHealth {
            device_id,
            efficiency: self.efficiency(device_id, now).await?,
            maintenance: self.maintenance(device_id, now).await?,
            growth: self.growth(device_id, now).await?,
        }))
    }

    /// Fleet averages, leaders, problem miners and cost over the last `days` of hourly rollups.
    /// `None` uses the configured window.
    pub async fn fleet_insights(&self, days: Option<u32>, now: i64) -> Result<Analysis<FleetInsights>, PersistenceError> {
        let days = days.unwrap_or(self.analytics.fleet_window_days).clamp(1, 31);
        let from = now - days as i64 * MS_PER_DAY;
        let devices = self.repo.list_devices(true).await?;
        let mut rollups = Vec::with_capacity(devices.len());
        for device in &devices {
            let hourly = self.repo.hourly_stats(device.id, from, now).await?;
            let alert_count = self.repo.device_alerts(device.id, from).await?.len();
            rollups.push((hourly, alert_count));
        }
        let windows: Vec<DeviceWindow<'_>> = devices
            .iter()
            .zip(&rollups)
            .map(|(device, (hourly, alert_count))| DeviceWindow {
                device,
                hourly,
                alert_count: *alert_count,
            })
            .collect();
        Ok(fleet_insights(&windows, from, now, self.analytics.power_price_per_kwh))
    }

    pub async fn open_alerts(&self) -> Result<Vec<Alert>, PersistenceError> {
        self.repo.open_alerts().await
    }

    /// Writes the last `hours` of samples (all devices) to `path` in the journal format.
    pub async fn export(&self, hours: u32, path: PathBuf, now: i64) -> Result<usize, PersistenceError> {
        let samples = self.history(None, hours, now).await?;
        let addresses: HashMap<i64, String> = self
            .repo
            .list_devices(false)
            .await?
            .into_iter()
            .map(|d| (d.id, d.address))
            .collect();
        let written = tokio::task::spawn_blocking(move || journal::export(&path, &samples, &addresses))
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;
        tracing::info!(written, hours, "export complete");
        Ok(written)
    }
}
