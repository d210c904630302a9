// Background worker: raw samples -> hourly stats -> daily stats (+ trend), fleet snapshot, retention.
// Runs every aggregation.interval_secs. VACUUM runs on a cron expression or a fixed interval.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::error::PersistenceError;
use crate::journal::JournalHandle;
use crate::models::{Device, MS_PER_DAY, MS_PER_HOUR, now_ms};
use crate::telemetry_repo::TelemetryRepo;
use crate::telemetry_repo::aggregation;

/// Resolved alerts are kept this long.
pub const ALERT_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AggregationWorkerConfig {
    pub aggregation_interval_secs: u64,
    /// Collector poll interval; sets the expected samples per hour.
    pub poll_interval_secs: u64,
    pub hourly_lookback_hours: u32,
    pub daily_lookback_days: u32,
    pub trend_window_days: u32,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

impl AggregationWorkerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            aggregation_interval_secs: config.aggregation.interval_secs,
            poll_interval_secs: config.collector.poll_interval_secs,
            hourly_lookback_hours: config.aggregation.hourly_lookback_hours,
            daily_lookback_days: config.aggregation.daily_lookback_days,
            trend_window_days: config.aggregation.trend_window_days,
            vacuum_schedule: config.aggregation.vacuum_schedule.clone(),
            vacuum_interval_secs: config.aggregation.vacuum_interval_secs,
        }
    }
}

/// What one pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub hourly_rows: usize,
    pub daily_rows: usize,
    pub raw_pruned: u64,
    pub journal_pruned: usize,
    pub alerts_purged: u64,
}

/// Spawns the aggregation worker. Returns a join handle; exits on shutdown.
pub fn spawn(
    repo: Arc<TelemetryRepo>,
    journal: Option<JournalHandle>,
    config: AggregationWorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, journal, config, shutdown_rx).await;
    })
}

#[instrument(skip(repo, journal, shutdown_rx), fields(interval_secs = config.aggregation_interval_secs))]
async fn run(
    repo: Arc<TelemetryRepo>,
    journal: Option<JournalHandle>,
    config: AggregationWorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut agg_interval = tokio::time::interval(Duration::from_secs(config.aggregation_interval_secs));
    agg_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    let vacuum_task = tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = agg_interval.tick() => {
                if let Err(e) = run_one_tick(&repo, journal.as_ref(), &config, now_ms()).await {
                    warn!(error = %e, "aggregation tick failed");
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = repo.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
    vacuum_task.abort();
    tracing::debug!("Aggregation worker shutting down");
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: AggregationWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// One aggregation pass at `now`: recent completed hours and days, fleet row, retention.
pub async fn run_one_tick(
    repo: &TelemetryRepo,
    journal: Option<&JournalHandle>,
    config: &AggregationWorkerConfig,
    now: i64,
) -> anyhow::Result<TickSummary> {
    let devices = repo.list_devices(true).await?;
    let current_hour = aggregation::hour_floor(now);
    let current_day = aggregation::day_floor(now);

    let hourly_rows = rollup_hours(
        repo,
        &devices,
        config,
        current_hour - config.hourly_lookback_hours as i64 * MS_PER_HOUR,
        current_hour,
    )
    .await?;
    let daily_rows = rollup_days(
        repo,
        &devices,
        config,
        current_day - config.daily_lookback_days as i64 * MS_PER_DAY,
        current_day,
    )
    .await?;

    let latest = repo.latest_samples().await?;
    let fleet = aggregation::compute_fleet(now, devices.len() as u32, &latest);
    repo.save_fleet_stat(&fleet).await?;

    let mut summary = apply_retention(repo, journal, now).await?;
    summary.hourly_rows = hourly_rows;
    summary.daily_rows = daily_rows;
    if hourly_rows > 0 || daily_rows > 0 || summary.raw_pruned > 0 {
        info!(
            hourly_rows,
            daily_rows,
            raw_pruned = summary.raw_pruned,
            journal_pruned = summary.journal_pruned,
            online_devices = fleet.online_devices,
            "aggregation pass"
        );
    }
    Ok(summary)
}

/// Recompute every completed hour and day from the oldest stored raw sample up to `now`.
/// Run once at startup so rollups cover downtime before retention removes the raw rows.
pub async fn backfill(repo: &TelemetryRepo, config: &AggregationWorkerConfig, now: i64) -> anyhow::Result<TickSummary> {
    let Some(earliest) = repo.earliest_sample_ts().await? else {
        return Ok(TickSummary::default());
    };
    let devices = repo.list_devices(true).await?;
    let hourly_rows = rollup_hours(
        repo,
        &devices,
        config,
        aggregation::hour_floor(earliest),
        aggregation::hour_floor(now),
    )
    .await?;
    let daily_rows = rollup_days(
        repo,
        &devices,
        config,
        aggregation::day_floor(earliest),
        aggregation::day_floor(now),
    )
    .await?;
    info!(hourly_rows, daily_rows, "backfill complete");
    Ok(TickSummary {
        hourly_rows,
        daily_rows,
        ..Default::default()
    })
}

/// Hourly stats for every hour starting in [from_hour, to_hour).
async fn rollup_hours(
    repo: &TelemetryRepo,
    devices: &[Device],
    config: &AggregationWorkerConfig,
    from_hour: i64,
    to_hour: i64,
) -> Result<usize, PersistenceError> {
    let mut rows = 0;
    let mut hour_start = from_hour;
    while hour_start + MS_PER_HOUR <= to_hour {
        for device in devices {
            let samples = repo
                .samples_in_range(device.id, hour_start, hour_start + MS_PER_HOUR)
                .await?;
            if let Some(stat) =
                aggregation::compute_hourly(device.id, hour_start, &samples, config.poll_interval_secs)
            {
                repo.save_hourly_stat(&stat).await?;
                rows += 1;
            }
        }
        hour_start += MS_PER_HOUR;
    }
    Ok(rows)
}

/// Daily stats (with trend) for every day starting in [from_day, to_day), oldest first so each
/// trend sees the days rolled just before it.
async fn rollup_days(
    repo: &TelemetryRepo,
    devices: &[Device],
    config: &AggregationWorkerConfig,
    from_day: i64,
    to_day: i64,
) -> Result<usize, PersistenceError> {
    let window = config.trend_window_days.max(1) as i64;
    let mut rows = 0;
    let mut day_start = from_day;
    while day_start + MS_PER_DAY <= to_day {
        for device in devices {
            let hourly = repo
                .hourly_stats(device.id, day_start, day_start + MS_PER_DAY)
                .await?;
            let Some(mut stat) =
                aggregation::compute_daily(device.id, day_start, &hourly, config.poll_interval_secs)
            else {
                continue;
            };
            let mut trailing = repo
                .daily_stats(device.id, day_start - (window - 1) * MS_PER_DAY, day_start)
                .await?;
            trailing.push(stat.clone());
            stat.trend = aggregation::fit_trend(&trailing);
            repo.save_daily_stat(&stat).await?;
            rows += 1;
        }
        day_start += MS_PER_DAY;
    }
    Ok(rows)
}

/// Drop raw samples (store and journal) older than the horizon, aligned to the hour so an
/// hour is either fully present or fully gone. Old resolved alerts are purged too.
pub async fn apply_retention(
    repo: &TelemetryRepo,
    journal: Option<&JournalHandle>,
    now: i64,
) -> Result<TickSummary, PersistenceError> {
    let cutoff = aggregation::hour_floor(now - repo.retention_ms());
    let raw_pruned = repo.delete_raw_before(cutoff).await?;
    let journal_pruned = match journal {
        Some(j) => j.prune_before(cutoff).await?,
        None => 0,
    };
    let alerts_purged = repo
        .purge_resolved_alerts(now - ALERT_RETENTION_DAYS * MS_PER_DAY)
        .await?;
    Ok(TickSummary {
        raw_pruned,
        journal_pruned,
        alerts_purged,
        ..Default::default()
    })
}
