// SQLite telemetry store: devices, raw samples, rollups, alerts.
// One writer (the sample writer task + workers), readers on a separate query-only pool.

pub mod aggregation;
mod alerts;
mod blob;

pub use alerts::RaiseOutcome;

use crate::config::DeviceEntry;
use crate::error::PersistenceError;
use crate::models::{DailyStat, Device, FleetStat, HourlyStat, Sample, TrendFit, fallback_name, now_ms};
use crate::retry::{RetryPolicy, run_with_retry};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

const SCHEMA_VERSION: i64 = 1;

/// Last stored sample of a device, used to restore scheduler state at start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastSample {
    pub timestamp: i64,
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreIntegrity {
    /// `PRAGMA integrity_check` output; ["ok"] when healthy.
    pub integrity: Vec<String>,
    pub orphaned_samples: i64,
    pub orphaned_hourly: i64,
    pub orphaned_daily: i64,
}

impl StoreIntegrity {
    pub fn is_ok(&self) -> bool {
        self.integrity == ["ok"]
            && self.orphaned_samples == 0
            && self.orphaned_hourly == 0
            && self.orphaned_daily == 0
    }
}

#[derive(Debug, Clone)]
pub struct RepoOptions {
    pub max_pool_size: u32,
    pub retention_days: u32,
    /// Bounded wait for the SQLite write lock per attempt.
    pub busy_timeout: Duration,
    pub write_retry: RetryPolicy,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 4,
            retention_days: 7,
            busy_timeout: Duration::from_secs(5),
            write_retry: RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
                jitter: 0.1,
            },
        }
    }
}

pub struct TelemetryRepo {
    pool: SqlitePool,
    read_pool: SqlitePool,
    retention_ms: i64,
    write_retry: RetryPolicy,
}

impl TelemetryRepo {
    pub async fn connect(path: &str, opts: RepoOptions) -> Result<Self, PersistenceError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let base = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(opts.busy_timeout)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base.clone().create_if_missing(true))
            .await?;
        // Readers never take the write lock; WAL lets them run beside the writer.
        let read_pool = SqlitePoolOptions::new()
            .max_connections(opts.max_pool_size.max(1))
            .connect_with(base.pragma("query_only", "ON"))
            .await?;
        let retention_ms = (opts.retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self {
            pool,
            read_pool,
            retention_ms,
            write_retry: opts.write_retry,
        })
    }

    pub async fn init(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (key, value) VALUES ('telemetry', $1)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                baseline_hashrate_ghs REAL NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id INTEGER NOT NULL REFERENCES devices(id),
                timestamp INTEGER NOT NULL,
                hostname TEXT NOT NULL,
                hostname_cached INTEGER NOT NULL,
                status TEXT NOT NULL,
                hashrate_ghs REAL,
                temp_asic_c REAL,
                temp_vr_c REAL,
                power_w REAL,
                voltage_set_mv REAL,
                voltage_actual_mv REAL,
                frequency_mhz REAL,
                shares_accepted INTEGER,
                shares_rejected INTEGER,
                wifi_rssi INTEGER,
                uptime_seconds INTEGER,
                efficiency_j_th REAL,
                payload TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_samples_device_ts ON raw_samples(device_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_raw_samples_ts ON raw_samples(timestamp)")
            .execute(&self.pool)
            .await?;

        aggregation::init_rollup_tables(&self.pool).await?;
        alerts::init_alerts_table(&self.pool).await?;

        Ok(())
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    // ---- devices ----

    /// Upsert configured devices and deactivate any stored device no longer configured.
    #[instrument(skip(self, entries), fields(repo = "telemetry", operation = "sync_devices", devices_count = entries.len()))]
    pub async fn sync_devices(&self, entries: &[DeviceEntry]) -> Result<Vec<Device>, PersistenceError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        for e in entries {
            let name = e.name.clone().unwrap_or_else(|| fallback_name(&e.address));
            sqlx::query(
                r#"
                INSERT INTO devices (address, display_name, baseline_hashrate_ghs, is_active, created_at, updated_at)
                VALUES ($1, $2, $3, 1, $4, $4)
                ON CONFLICT(address) DO UPDATE SET
                    baseline_hashrate_ghs = excluded.baseline_hashrate_ghs,
                    display_name = CASE WHEN $5 THEN excluded.display_name ELSE devices.display_name END,
                    is_active = 1,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&e.address)
            .bind(&name)
            .bind(e.baseline_hashrate_ghs)
            .bind(now)
            .bind(e.name.is_some())
            .execute(&mut *tx)
            .await?;
        }
        let stored: Vec<(i64, String)> = sqlx::query_as("SELECT id, address FROM devices WHERE is_active = 1")
            .fetch_all(&mut *tx)
            .await?;
        for (id, address) in stored {
            if !entries.iter().any(|e| e.address == address) {
                sqlx::query("UPDATE devices SET is_active = 0, updated_at = $1 WHERE id = $2")
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tracing::info!(device_id = id, address = %address, "device removed from configuration, deactivated");
            }
        }
        tx.commit().await?;

        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            let row = sqlx::query("SELECT * FROM devices WHERE address = $1")
                .bind(&e.address)
                .fetch_one(&self.pool)
                .await?;
            out.push(parse_device_row(&row)?);
        }
        Ok(out)
    }

    /// Keep the display name in step with the hostname cache.
    pub async fn update_display_name(&self, device_id: i64, name: &str) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE devices SET display_name = $1, updated_at = $2 WHERE id = $3 AND display_name <> $1")
            .bind(name)
            .bind(now_ms())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_devices(&self, active_only: bool) -> Result<Vec<Device>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM devices WHERE is_active = 1 OR $1 = 0 ORDER BY id")
            .bind(active_only)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter().map(parse_device_row).collect()
    }

    pub async fn get_device(&self, device_id: i64) -> Result<Option<Device>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = $1")
            .bind(device_id)
            .fetch_optional(&self.read_pool)
            .await?;
        row.as_ref().map(parse_device_row).transpose()
    }

    // ---- raw samples ----

    /// Insert a batch in one transaction, retrying when the database is locked.
    #[instrument(skip(self, samples), fields(repo = "telemetry", operation = "save_samples", samples_count = samples.len()))]
    pub async fn save_samples(&self, samples: &[Sample]) -> Result<(), PersistenceError> {
        if samples.is_empty() {
            return Ok(());
        }
        run_with_retry("save_samples", &self.write_retry, || self.save_samples_once(samples)).await
    }

    async fn save_samples_once(&self, samples: &[Sample]) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        for s in samples {
            sqlx::query(
                r#"
                INSERT INTO raw_samples
                (device_id, timestamp, hostname, hostname_cached, status, hashrate_ghs, temp_asic_c, temp_vr_c,
                 power_w, voltage_set_mv, voltage_actual_mv, frequency_mhz, shares_accepted, shares_rejected,
                 wifi_rssi, uptime_seconds, efficiency_j_th, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(s.device_id)
            .bind(s.timestamp)
            .bind(&s.hostname)
            .bind(s.hostname_cached)
            .bind(s.status.as_str())
            .bind(s.hashrate_ghs)
            .bind(s.temp_asic_c)
            .bind(s.temp_vr_c)
            .bind(s.power_w)
            .bind(s.voltage_set_mv)
            .bind(s.voltage_actual_mv)
            .bind(s.frequency_mhz)
            .bind(s.shares_accepted.map(|v| v as i64))
            .bind(s.shares_rejected.map(|v| v as i64))
            .bind(s.wifi_rssi)
            .bind(s.uptime_seconds.map(|v| v as i64))
            .bind(s.efficiency_j_th)
            .bind(s.raw_payload.as_deref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Raw samples of one device in [from_ts, to_ts). Order: ascending by timestamp, then insert order.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "samples_in_range"))]
    pub async fn samples_in_range(
        &self,
        device_id: i64,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Sample>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM raw_samples WHERE device_id = $1 AND timestamp >= $2 AND timestamp < $3
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(device_id)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_sample_row).collect()
    }

    /// Raw samples of every device in [from_ts, to_ts), ascending.
    pub async fn all_samples_in_range(&self, from_ts: i64, to_ts: i64) -> Result<Vec<Sample>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM raw_samples WHERE timestamp >= $1 AND timestamp < $2 ORDER BY timestamp ASC, id ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_sample_row).collect()
    }

    /// The most recent `limit` samples of a device, ascending.
    pub async fn recent_samples(&self, device_id: i64, limit: u32) -> Result<Vec<Sample>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM raw_samples WHERE device_id = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
        )
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.read_pool)
        .await?;
        let mut out = rows.iter().map(parse_sample_row).collect::<Result<Vec<_>, _>>()?;
        out.reverse();
        Ok(out)
    }

    /// Latest sample of every active device.
    pub async fn latest_samples(&self) -> Result<Vec<Sample>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM raw_samples r
            JOIN devices d ON d.id = r.device_id AND d.is_active = 1
            WHERE r.id = (
                SELECT r2.id FROM raw_samples r2 WHERE r2.device_id = r.device_id
                ORDER BY r2.timestamp DESC, r2.id DESC LIMIT 1
            )
            ORDER BY r.device_id
            "#,
        )
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_sample_row).collect()
    }

    /// Last stored timestamp and reported uptime per device.
    pub async fn last_samples(&self) -> Result<HashMap<i64, LastSample>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT r.device_id, r.timestamp,
                   (SELECT r3.uptime_seconds FROM raw_samples r3
                     WHERE r3.device_id = r.device_id AND r3.uptime_seconds IS NOT NULL
                     ORDER BY r3.timestamp DESC, r3.id DESC LIMIT 1) AS uptime_seconds
            FROM raw_samples r
            WHERE r.id = (
                SELECT r2.id FROM raw_samples r2 WHERE r2.device_id = r.device_id
                ORDER BY r2.timestamp DESC, r2.id DESC LIMIT 1
            )
            "#,
        )
        .fetch_all(&self.read_pool)
        .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let device_id: i64 = row.try_get("device_id")?;
            let uptime: Option<i64> = row.try_get("uptime_seconds")?;
            out.insert(
                device_id,
                LastSample {
                    timestamp: row.try_get("timestamp")?,
                    uptime_seconds: uptime.map(|u| u.max(0) as u64),
                },
            );
        }
        Ok(out)
    }

    /// Oldest stored raw sample timestamp.
    pub async fn earliest_sample_ts(&self) -> Result<Option<i64>, PersistenceError> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MIN(timestamp) FROM raw_samples")
            .fetch_one(&self.read_pool)
            .await?;
        Ok(ts)
    }

    /// Delete raw samples with timestamp < cutoff_ts, oldest first.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "delete_raw_before"))]
    pub async fn delete_raw_before(&self, cutoff_ts: i64) -> Result<u64, PersistenceError> {
        run_with_retry("delete_raw_before", &self.write_retry, || async {
            let r = sqlx::query("DELETE FROM raw_samples WHERE timestamp < $1")
                .bind(cutoff_ts)
                .execute(&self.pool)
                .await?;
            Ok(r.rows_affected())
        })
        .await
    }

    // ---- rollups ----

    /// Insert or overwrite the row for (device, hour).
    #[instrument(skip(self, stat), fields(repo = "telemetry", operation = "save_hourly_stat"))]
    pub async fn save_hourly_stat(&self, stat: &HourlyStat) -> Result<(), PersistenceError> {
        let histogram = blob::encode_histogram(&stat.status_histogram)?;
        run_with_retry("save_hourly_stat", &self.write_retry, || async {
            sqlx::query(
                r#"
                INSERT INTO hourly_stats
                (device_id, hour_start, samples_count, online_samples, expected_samples, uptime_percent,
                 avg_hashrate_ghs, min_hashrate_ghs, max_hashrate_ghs, avg_temp_c, max_temp_c, avg_power_w,
                 avg_efficiency_j_th, shares_accepted, shares_rejected, rejection_rate_percent, status_histogram)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT(device_id, hour_start) DO UPDATE SET
                    samples_count = excluded.samples_count,
                    online_samples = excluded.online_samples,
                    expected_samples = excluded.expected_samples,
                    uptime_percent = excluded.uptime_percent,
                    avg_hashrate_ghs = excluded.avg_hashrate_ghs,
                    min_hashrate_ghs = excluded.min_hashrate_ghs,
                    max_hashrate_ghs = excluded.max_hashrate_ghs,
                    avg_temp_c = excluded.avg_temp_c,
                    max_temp_c = excluded.max_temp_c,
                    avg_power_w = excluded.avg_power_w,
                    avg_efficiency_j_th = excluded.avg_efficiency_j_th,
                    shares_accepted = excluded.shares_accepted,
                    shares_rejected = excluded.shares_rejected,
                    rejection_rate_percent = excluded.rejection_rate_percent,
                    status_histogram = excluded.status_histogram
                "#,
            )
            .bind(stat.device_id)
            .bind(stat.hour_start)
            .bind(stat.samples_count as i64)
            .bind(stat.online_samples as i64)
            .bind(stat.expected_samples as i64)
            .bind(stat.uptime_percent)
            .bind(stat.avg_hashrate_ghs)
            .bind(stat.min_hashrate_ghs)
            .bind(stat.max_hashrate_ghs)
            .bind(stat.avg_temp_c)
            .bind(stat.max_temp_c)
            .bind(stat.avg_power_w)
            .bind(stat.avg_efficiency_j_th)
            .bind(stat.shares_accepted as i64)
            .bind(stat.shares_rejected as i64)
            .bind(stat.rejection_rate_percent)
            .bind(&histogram)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Hourly stats of one device with hour_start in [from_ts, to_ts), ascending.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "hourly_stats"))]
    pub async fn hourly_stats(
        &self,
        device_id: i64,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<HourlyStat>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM hourly_stats WHERE device_id = $1 AND hour_start >= $2 AND hour_start < $3
             ORDER BY hour_start ASC",
        )
        .bind(device_id)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_hourly_row).collect()
    }

    /// Insert or overwrite the row for (device, day).
    #[instrument(skip(self, stat), fields(repo = "telemetry", operation = "save_daily_stat"))]
    pub async fn save_daily_stat(&self, stat: &DailyStat) -> Result<(), PersistenceError> {
        run_with_retry("save_daily_stat", &self.write_retry, || async {
            sqlx::query(
                r#"
                INSERT INTO daily_stats
                (device_id, day_start, hours_count, samples_count, uptime_percent, avg_hashrate_ghs,
                 peak_hashrate_ghs, avg_temp_c, peak_temp_c, energy_wh, avg_efficiency_j_th, shares_accepted,
                 shares_rejected, rejection_rate_percent, trend_slope, trend_r_squared, trend_points)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT(device_id, day_start) DO UPDATE SET
                    hours_count = excluded.hours_count,
                    samples_count = excluded.samples_count,
                    uptime_percent = excluded.uptime_percent,
                    avg_hashrate_ghs = excluded.avg_hashrate_ghs,
                    peak_hashrate_ghs = excluded.peak_hashrate_ghs,
                    avg_temp_c = excluded.avg_temp_c,
                    peak_temp_c = excluded.peak_temp_c,
                    energy_wh = excluded.energy_wh,
                    avg_efficiency_j_th = excluded.avg_efficiency_j_th,
                    shares_accepted = excluded.shares_accepted,
                    shares_rejected = excluded.shares_rejected,
                    rejection_rate_percent = excluded.rejection_rate_percent,
                    trend_slope = excluded.trend_slope,
                    trend_r_squared = excluded.trend_r_squared,
                    trend_points = excluded.trend_points
                "#,
            )
            .bind(stat.device_id)
            .bind(stat.day_start)
            .bind(stat.hours_count as i64)
            .bind(stat.samples_count as i64)
            .bind(stat.uptime_percent)
            .bind(stat.avg_hashrate_ghs)
            .bind(stat.peak_hashrate_ghs)
            .bind(stat.avg_temp_c)
            .bind(stat.peak_temp_c)
            .bind(stat.energy_wh)
            .bind(stat.avg_efficiency_j_th)
            .bind(stat.shares_accepted as i64)
            .bind(stat.shares_rejected as i64)
            .bind(stat.rejection_rate_percent)
            .bind(stat.trend.map(|t| t.slope))
            .bind(stat.trend.map(|t| t.r_squared))
            .bind(stat.trend.map(|t| t.points as i64))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Daily stats of one device with day_start in [from_ts, to_ts), ascending.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "daily_stats"))]
    pub async fn daily_stats(
        &self,
        device_id: i64,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<DailyStat>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM daily_stats WHERE device_id = $1 AND day_start >= $2 AND day_start < $3
             ORDER BY day_start ASC",
        )
        .bind(device_id)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_daily_row).collect()
    }

    #[instrument(skip(self, stat), fields(repo = "telemetry", operation = "save_fleet_stat"))]
    pub async fn save_fleet_stat(&self, stat: &FleetStat) -> Result<(), PersistenceError> {
        run_with_retry("save_fleet_stat", &self.write_retry, || async {
            sqlx::query(
                r#"
                INSERT INTO fleet_stats
                (created_at, total_devices, online_devices, total_hashrate_ghs, total_power_w,
                 efficiency_j_th, avg_temp_c, avg_vr_temp_c, rejection_rate_percent)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(stat.timestamp)
            .bind(stat.total_devices as i64)
            .bind(stat.online_devices as i64)
            .bind(stat.total_hashrate_ghs)
            .bind(stat.total_power_w)
            .bind(stat.efficiency_j_th)
            .bind(stat.avg_temp_c)
            .bind(stat.avg_vr_temp_c)
            .bind(stat.rejection_rate_percent)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Recorded fleet snapshots in [from_ts, to_ts), ascending.
    pub async fn fleet_stats(&self, from_ts: i64, to_ts: i64) -> Result<Vec<FleetStat>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM fleet_stats WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(FleetStat {
                    timestamp: row.try_get("created_at")?,
                    total_devices: row.try_get::<i64, _>("total_devices")? as u32,
                    online_devices: row.try_get::<i64, _>("online_devices")? as u32,
                    total_hashrate_ghs: row.try_get("total_hashrate_ghs")?,
                    total_power_w: row.try_get("total_power_w")?,
                    efficiency_j_th: row.try_get("efficiency_j_th")?,
                    avg_temp_c: row.try_get("avg_temp_c")?,
                    avg_vr_temp_c: row.try_get("avg_vr_temp_c")?,
                    rejection_rate_percent: row.try_get("rejection_rate_percent")?,
                })
            })
            .collect()
    }

    // ---- maintenance ----

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "telemetry", operation = "vacuum"))]
    pub async fn vacuum(&self) -> Result<(), PersistenceError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// SQLite page check plus rows that reference a missing device.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "integrity_check"))]
    pub async fn integrity_check(&self) -> Result<StoreIntegrity, PersistenceError> {
        let integrity: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_all(&self.read_pool)
            .await?;
        let orphans = |table: &'static str| {
            let sql = format!(
                "SELECT COUNT(*) FROM {} t WHERE NOT EXISTS (SELECT 1 FROM devices d WHERE d.id = t.device_id)",
                table
            );
            async move {
                sqlx::query_scalar::<_, i64>(&sql)
                    .fetch_one(&self.read_pool)
                    .await
            }
        };
        Ok(StoreIntegrity {
            integrity,
            orphaned_samples: orphans("raw_samples").await?,
            orphaned_hourly: orphans("hourly_stats").await?,
            orphaned_daily: orphans("daily_stats").await?,
        })
    }
}

fn parse_device_row(row: &SqliteRow) -> Result<Device, PersistenceError> {
    Ok(Device {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        display_name: row.try_get("display_name")?,
        baseline_hashrate_ghs: row.try_get("baseline_hashrate_ghs")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_sample_row(row: &SqliteRow) -> Result<Sample, PersistenceError> {
    let status: String = row.try_get("status")?;
    let status = status.parse().map_err(PersistenceError::Corruption)?;
    let counter = |name: &str| -> Result<Option<u64>, PersistenceError> {
        let v: Option<i64> = row.try_get(name)?;
        Ok(v.map(|v| v.max(0) as u64))
    };
    Ok(Sample {
        timestamp: row.try_get("timestamp")?,
        device_id: row.try_get("device_id")?,
        hostname: row.try_get("hostname")?,
        hostname_cached: row.try_get("hostname_cached")?,
        status,
        hashrate_ghs: row.try_get("hashrate_ghs")?,
        temp_asic_c: row.try_get("temp_asic_c")?,
        temp_vr_c: row.try_get("temp_vr_c")?,
        power_w: row.try_get("power_w")?,
        voltage_set_mv: row.try_get("voltage_set_mv")?,
        voltage_actual_mv: row.try_get("voltage_actual_mv")?,
        frequency_mhz: row.try_get("frequency_mhz")?,
        shares_accepted: counter("shares_accepted")?,
        shares_rejected: counter("shares_rejected")?,
        wifi_rssi: row.try_get("wifi_rssi")?,
        uptime_seconds: counter("uptime_seconds")?,
        efficiency_j_th: row.try_get("efficiency_j_th")?,
        raw_payload: row.try_get("payload")?,
    })
}

fn parse_hourly_row(row: &SqliteRow) -> Result<HourlyStat, PersistenceError> {
    let histogram: Vec<u8> = row.try_get("status_histogram")?;
    Ok(HourlyStat {
        device_id: row.try_get("device_id")?,
        hour_start: row.try_get("hour_start")?,
        samples_count: row.try_get::<i64, _>("samples_count")? as u32,
        online_samples: row.try_get::<i64, _>("online_samples")? as u32,
        expected_samples: row.try_get::<i64, _>("expected_samples")? as u32,
        uptime_percent: row.try_get("uptime_percent")?,
        avg_hashrate_ghs: row.try_get("avg_hashrate_ghs")?,
        min_hashrate_ghs: row.try_get("min_hashrate_ghs")?,
        max_hashrate_ghs: row.try_get("max_hashrate_ghs")?,
        avg_temp_c: row.try_get("avg_temp_c")?,
        max_temp_c: row.try_get("max_temp_c")?,
        avg_power_w: row.try_get("avg_power_w")?,
        avg_efficiency_j_th: row.try_get("avg_efficiency_j_th")?,
        shares_accepted: row.try_get::<i64, _>("shares_accepted")?.max(0) as u64,
        shares_rejected: row.try_get::<i64, _>("shares_rejected")?.max(0) as u64,
        rejection_rate_percent: row.try_get("rejection_rate_percent")?,
        status_histogram: blob::decode_histogram(&histogram),
    })
}

fn parse_daily_row(row: &SqliteRow) -> Result<DailyStat, PersistenceError> {
    let slope: Option<f64> = row.try_get("trend_slope")?;
    let r_squared: Option<f64> = row.try_get("trend_r_squared")?;
    let points: Option<i64> = row.try_get("trend_points")?;
    let trend = match (slope, r_squared, points) {
        (Some(slope), Some(r_squared), Some(points)) => Some(TrendFit {
            slope,
            r_squared,
            points: points as u32,
        }),
        _ => None,
    };
    Ok(DailyStat {
        device_id: row.try_get("device_id")?,
        day_start: row.try_get("day_start")?,
        hours_count: row.try_get::<i64, _>("hours_count")? as u32,
        samples_count: row.try_get::<i64, _>("samples_count")? as u32,
        uptime_percent: row.try_get("uptime_percent")?,
        avg_hashrate_ghs: row.try_get("avg_hashrate_ghs")?,
        peak_hashrate_ghs: row.try_get("peak_hashrate_ghs")?,
        avg_temp_c: row.try_get("avg_temp_c")?,
        peak_temp_c: row.try_get("peak_temp_c")?,
        energy_wh: row.try_get("energy_wh")?,
        avg_efficiency_j_th: row.try_get("avg_efficiency_j_th")?,
        shares_accepted: row.try_get::<i64, _>("shares_accepted")?.max(0) as u64,
        shares_rejected: row.try_get::<i64, _>("shares_rejected")?.max(0) as u64,
        rejection_rate_percent: row.try_get("rejection_rate_percent")?,
        trend,
    })
}
