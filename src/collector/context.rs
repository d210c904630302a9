// Scheduler state carried across cycles. Loaded at start, saved at shutdown.

use std::time::Duration;

use serde::Serialize;

use super::backoff::IntervalBackoff;
use super::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::AppConfig;
use crate::error::PersistenceError;
use crate::hostname_cache::HostnameCache;
use crate::models::Device;
use crate::telemetry_repo::TelemetryRepo;

/// Per-device bookkeeping.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub device: Device,
    pub consecutive_failures: u32,
    /// Timestamp of the last sample handed to the writer (or found in the store).
    pub last_timestamp: Option<i64>,
    pub last_uptime: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStats {
    pub cycles: u64,
    pub cycles_suspended: u64,
    pub polls_ok: u64,
    pub polls_failed: u64,
    /// Failed polls across the fleet since start.
    pub fleet_failures: u64,
}

/// What the status endpoint reports about collection. Published after every cycle.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub breaker: BreakerSnapshot,
    pub interval_secs: f64,
    pub stats: CollectorStats,
}

pub struct SchedulerContext {
    /// Configured order; results are processed in this order.
    pub devices: Vec<DeviceState>,
    pub hostnames: HostnameCache,
    pub breaker: CircuitBreaker,
    pub backoff: IntervalBackoff,
    pub stats: CollectorStats,
}

impl SchedulerContext {
    pub fn new(devices: Vec<Device>, hostnames: HostnameCache, breaker: CircuitBreaker, backoff: IntervalBackoff) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|device| DeviceState {
                    device,
                    consecutive_failures: 0,
                    last_timestamp: None,
                    last_uptime: None,
                })
                .collect(),
            hostnames,
            breaker,
            backoff,
            stats: CollectorStats::default(),
        }
    }

    /// Build from configuration, the hostname cache file, and the last stored sample per device.
    pub async fn load(repo: &TelemetryRepo, devices: Vec<Device>, config: &AppConfig) -> Result<Self, PersistenceError> {
        let hostnames = HostnameCache::load(&config.collector.hostname_cache_path);
        let breaker = CircuitBreaker::new(
            config.circuit_breaker.failure_threshold,
            Duration::from_secs(config.circuit_breaker.cooldown_secs),
        );
        let backoff = IntervalBackoff::new(
            Duration::from_secs(config.collector.poll_interval_secs),
            Duration::from_secs(config.backoff.max_interval_secs),
            config.backoff.multiplier,
            config.backoff.reset_after_successes,
        );
        let mut ctx = Self::new(devices, hostnames, breaker, backoff);
        let last = repo.last_samples().await?;
        for state in &mut ctx.devices {
            if let Some(l) = last.get(&state.device.id) {
                state.last_timestamp = Some(l.timestamp);
                state.last_uptime = l.uptime_seconds;
            }
        }
        tracing::info!(
            devices_count = ctx.devices.len(),
            cached_hostnames = ctx.hostnames.len(),
            "scheduler context loaded"
        );
        Ok(ctx)
    }

    pub fn status(&self) -> CollectorStatus {
        CollectorStatus {
            breaker: self.breaker.snapshot(),
            interval_secs: self.backoff.interval().as_secs_f64(),
            stats: self.stats.clone(),
        }
    }

    /// Persist what must survive a restart (the hostname cache).
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        self.hostnames.save()
    }

    /// Cycle timestamp clamped so a device's samples never go backwards (clock steps, restarts).
    pub fn next_timestamp(&mut self, index: usize, cycle_ts: i64) -> i64 {
        let state = &mut self.devices[index];
        let ts = state.last_timestamp.map_or(cycle_ts, |last| cycle_ts.max(last));
        state.last_timestamp = Some(ts);
        ts
    }
}
