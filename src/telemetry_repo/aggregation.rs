// Rollups: schema for hourly/daily/fleet tables + pure aggregation logic.
// DB access (get by range, save) stays in telemetry_repo::mod.

use std::collections::BTreeMap;

use crate::error::PersistenceError;
use crate::models::{
    DailyStat, FleetStat, HourlyStat, MS_PER_DAY, MS_PER_HOUR, Sample, StatusCount, TrendFit,
    efficiency_j_per_th,
};
use crate::stats;
use sqlx::SqlitePool;

/// Daily points required before a trend is fitted.
pub const MIN_TREND_POINTS: usize = 7;

/// Creates the rollup tables and indexes if not present.
pub async fn init_rollup_tables(pool: &SqlitePool) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hourly_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL REFERENCES devices(id),
            hour_start INTEGER NOT NULL,
            samples_count INTEGER NOT NULL,
            online_samples INTEGER NOT NULL,
            expected_samples INTEGER NOT NULL,
            uptime_percent REAL NOT NULL,
            avg_hashrate_ghs REAL,
            min_hashrate_ghs REAL,
            max_hashrate_ghs REAL,
            avg_temp_c REAL,
            max_temp_c REAL,
            avg_power_w REAL,
            avg_efficiency_j_th REAL,
            shares_accepted INTEGER NOT NULL,
            shares_rejected INTEGER NOT NULL,
            rejection_rate_percent REAL NOT NULL,
            status_histogram BLOB NOT NULL,
            UNIQUE(device_id, hour_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL REFERENCES devices(id),
            day_start INTEGER NOT NULL,
            hours_count INTEGER NOT NULL,
            samples_count INTEGER NOT NULL,
            uptime_percent REAL NOT NULL,
            avg_hashrate_ghs REAL,
            peak_hashrate_ghs REAL,
            avg_temp_c REAL,
            peak_temp_c REAL,
            energy_wh REAL NOT NULL,
            avg_efficiency_j_th REAL,
            shares_accepted INTEGER NOT NULL,
            shares_rejected INTEGER NOT NULL,
            rejection_rate_percent REAL NOT NULL,
            trend_slope REAL,
            trend_r_squared REAL,
            trend_points INTEGER,
            UNIQUE(device_id, day_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fleet_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            total_devices INTEGER NOT NULL,
            online_devices INTEGER NOT NULL,
            total_hashrate_ghs REAL NOT NULL,
            total_power_w REAL NOT NULL,
            efficiency_j_th REAL,
            avg_temp_c REAL,
            avg_vr_temp_c REAL,
            rejection_rate_percent REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fleet_stats_created_at ON fleet_stats(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

pub fn hour_floor(ts: i64) -> i64 {
    ts.div_euclid(MS_PER_HOUR) * MS_PER_HOUR
}

pub fn day_floor(ts: i64) -> i64 {
    ts.div_euclid(MS_PER_DAY) * MS_PER_DAY
}

/// Polls expected in one hour at the given interval.
pub fn expected_per_hour(poll_interval_secs: u64) -> u32 {
    let interval = poll_interval_secs.max(1);
    3600u64.div_ceil(interval) as u32
}

/// Accepted/rejected shares gained across samples, from cumulative device counters.
/// A counter that goes backwards means the device restarted; the new value counts as gained.
pub fn share_deltas(samples: &[Sample]) -> (u64, u64) {
    fn delta(values: impl Iterator<Item = u64>) -> u64 {
        let mut total = 0u64;
        let mut prev: Option<u64> = None;
        for v in values {
            total += match prev {
                Some(p) if v >= p => v - p,
                Some(_) => v,
                None => 0,
            };
            prev = Some(v);
        }
        total
    }
    (
        delta(samples.iter().filter_map(|s| s.shares_accepted)),
        delta(samples.iter().filter_map(|s| s.shares_rejected)),
    )
}

pub(crate) fn rejection_percent(accepted: u64, rejected: u64) -> f64 {
    let total = accepted + rejected;
    if total == 0 {
        0.0
    } else {
        rejected as f64 / total as f64 * 100.0
    }
}

/// Aggregates one device's samples for the hour starting at `hour_start`.
/// Samples must be ascending by timestamp. None when there are no samples.
pub fn compute_hourly(
    device_id: i64,
    hour_start: i64,
    samples: &[Sample],
    poll_interval_secs: u64,
) -> Option<HourlyStat> {
    if samples.is_empty() {
        return None;
    }
    let expected = expected_per_hour(poll_interval_secs);
    let online = samples.iter().filter(|s| s.status.counts_as_online()).count() as u32;

    let hashrates: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.hashrate_ghs)
        .filter(|h| *h > 0.0)
        .collect();
    let temps: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.temp_asic_c)
        .filter(|t| *t > 0.0)
        .collect();
    let powers: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.power_w)
        .filter(|p| *p > 0.0)
        .collect();
    let efficiencies: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.efficiency_j_th.or_else(|| efficiency_j_per_th(s.hashrate_ghs?, s.power_w?)))
        .collect();

    let mut histogram: BTreeMap<&'static str, u32> = BTreeMap::new();
    for s in samples {
        *histogram.entry(s.status.as_str()).or_default() += 1;
    }
    let (shares_accepted, shares_rejected) = share_deltas(samples);

    Some(HourlyStat {
        device_id,
        hour_start,
        samples_count: samples.len() as u32,
        online_samples: online,
        expected_samples: expected,
        uptime_percent: (online as f64 / expected as f64 * 100.0).min(100.0),
        avg_hashrate_ghs: stats::mean(&hashrates),
        min_hashrate_ghs: stats::min(&hashrates),
        max_hashrate_ghs: stats::max(&hashrates),
        avg_temp_c: stats::mean(&temps),
        max_temp_c: stats::max(&temps),
        avg_power_w: stats::mean(&powers),
        avg_efficiency_j_th: stats::mean(&efficiencies),
        shares_accepted,
        shares_rejected,
        rejection_rate_percent: rejection_percent(shares_accepted, shares_rejected),
        status_histogram: histogram
            .into_iter()
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count,
            })
            .collect(),
    })
}

fn weighted_mean(pairs: impl Iterator<Item = (Option<f64>, u32)>) -> Option<f64> {
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (value, w) in pairs {
        if let Some(v) = value
            && w > 0
        {
            sum += v * w as f64;
            weight += w as f64;
        }
    }
    (weight > 0.0).then(|| sum / weight)
}

/// Rolls one device's hourly stats for a UTC day into a DailyStat. Hours with no row count as offline.
pub fn compute_daily(
    device_id: i64,
    day_start: i64,
    hourly: &[HourlyStat],
    poll_interval_secs: u64,
) -> Option<DailyStat> {
    if hourly.is_empty() {
        return None;
    }
    let expected_day = expected_per_hour(poll_interval_secs) as f64 * 24.0;
    let online: u32 = hourly.iter().map(|h| h.online_samples).sum();
    let samples: u32 = hourly.iter().map(|h| h.samples_count).sum();
    let shares_accepted: u64 = hourly.iter().map(|h| h.shares_accepted).sum();
    let shares_rejected: u64 = hourly.iter().map(|h| h.shares_rejected).sum();

    // Each hour contributes its average power for the fraction of the hour it was observed.
    let energy_wh = hourly
        .iter()
        .filter_map(|h| {
            let coverage = (h.samples_count as f64 / h.expected_samples.max(1) as f64).min(1.0);
            h.avg_power_w.map(|p| p * coverage)
        })
        .sum();

    Some(DailyStat {
        device_id,
        day_start,
        hours_count: hourly.len() as u32,
        samples_count: samples,
        uptime_percent: (online as f64 / expected_day * 100.0).min(100.0),
        avg_hashrate_ghs: weighted_mean(hourly.iter().map(|h| (h.avg_hashrate_ghs, h.samples_count))),
        peak_hashrate_ghs: hourly.iter().filter_map(|h| h.max_hashrate_ghs).reduce(f64::max),
        avg_temp_c: weighted_mean(hourly.iter().map(|h| (h.avg_temp_c, h.samples_count))),
        peak_temp_c: hourly.iter().filter_map(|h| h.max_temp_c).reduce(f64::max),
        energy_wh,
        avg_efficiency_j_th: weighted_mean(hourly.iter().map(|h| (h.avg_efficiency_j_th, h.samples_count))),
        shares_accepted,
        shares_rejected,
        rejection_rate_percent: rejection_percent(shares_accepted, shares_rejected),
        trend: None,
    })
}

/// Least-squares fit of daily average hashrate against day index.
/// None with fewer than `MIN_TREND_POINTS` days carrying a hashrate.
pub fn fit_trend(daily: &[DailyStat]) -> Option<TrendFit> {
    let points: Vec<(f64, f64)> = daily
        .iter()
        .filter_map(|d| {
            d.avg_hashrate_ghs
                .map(|h| ((d.day_start / MS_PER_DAY) as f64, h))
        })
        .collect();
    if points.len() < MIN_TREND_POINTS {
        return None;
    }
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let fit = stats::linear_regression(&xs, &ys)?;
    Some(TrendFit {
        slope: fit.slope,
        r_squared: fit.r_squared,
        points: points.len() as u32,
    })
}

/// Fleet snapshot from the most recent sample of each active device.
pub fn compute_fleet(timestamp: i64, total_devices: u32, latest: &[Sample]) -> FleetStat {
    let hashing: Vec<&Sample> = latest
        .iter()
        .filter(|s| s.status.counts_as_online())
        .collect();
    let total_hashrate: f64 = hashing.iter().filter_map(|s| s.hashrate_ghs).sum();
    let total_power: f64 = hashing.iter().filter_map(|s| s.power_w).sum();
    let temps: Vec<f64> = hashing
        .iter()
        .filter_map(|s| s.temp_asic_c)
        .filter(|t| *t > 0.0)
        .collect();
    let vr_temps: Vec<f64> = hashing
        .iter()
        .filter_map(|s| s.temp_vr_c)
        .filter(|t| *t > 0.0)
        .collect();
    let accepted: u64 = hashing.iter().filter_map(|s| s.shares_accepted).sum();
    let rejected: u64 = hashing.iter().filter_map(|s| s.shares_rejected).sum();

    FleetStat {
        timestamp,
        total_devices,
        online_devices: hashing.len() as u32,
        total_hashrate_ghs: total_hashrate,
        total_power_w: total_power,
        efficiency_j_th: efficiency_j_per_th(total_hashrate, total_power),
        avg_temp_c: stats::mean(&temps),
        avg_vr_temp_c: stats::mean(&vr_temps),
        rejection_rate_percent: rejection_percent(accepted, rejected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleStatus;

    fn sample(ts: i64, hashrate: f64, accepted: u64, rejected: u64) -> Sample {
        let mut s = Sample::failed(ts, 1, "bitaxe".into(), false, SampleStatus::Online);
        s.hashrate_ghs = Some(hashrate);
        s.temp_asic_c = Some(60.0);
        s.power_w = Some(15.0);
        s.shares_accepted = Some(accepted);
        s.shares_rejected = Some(rejected);
        s.efficiency_j_th = efficiency_j_per_th(hashrate, 15.0);
        s
    }

    #[test]
    fn share_counter_reset_counts_new_value() {
        let samples = vec![
            sample(0, 1000.0, 100, 2),
            sample(1, 1000.0, 110, 2),
            // restart
            sample(2, 1000.0, 5, 1),
            sample(3, 1000.0, 8, 1),
        ];
        assert_eq!(share_deltas(&samples), (10 + 5 + 3, 1));
    }

    #[test]
    fn hourly_uptime_is_capped_and_offline_excluded() {
        let mut samples: Vec<Sample> = (0..130).map(|i| sample(i * 27_000, 1000.0, 100, 0)).collect();
        samples.push(Sample::failed(3_550_000, 1, "bitaxe".into(), true, SampleStatus::Timeout));
        let stat = compute_hourly(1, 0, &samples, 30).unwrap();
        assert_eq!(stat.expected_samples, 120);
        assert_eq!(stat.online_samples, 130);
        assert_eq!(stat.uptime_percent, 100.0);
        assert_eq!(stat.samples_count, 131);
        assert_eq!(stat.avg_hashrate_ghs, Some(1000.0));
        assert_eq!(stat.avg_efficiency_j_th, Some(15.0));
        let timeouts = stat.status_histogram.iter().find(|c| c.status == "timeout").unwrap();
        assert_eq!(timeouts.count, 1);
    }

    #[test]
    fn no_hashrate_does_not_count_as_online() {
        let mut idle = sample(0, 0.0, 0, 0);
        idle.status = SampleStatus::NoHashrate;
        let stat = compute_hourly(1, 0, &[idle, sample(30_000, 1000.0, 0, 0)], 30).unwrap();
        assert_eq!(stat.online_samples, 1);
        assert_eq!(stat.min_hashrate_ghs, Some(1000.0));
        assert!(compute_hourly(1, 0, &[], 30).is_none());
    }

    #[test]
    fn daily_energy_scales_with_coverage() {
        let full = compute_hourly(1, 0, &(0..120).map(|i| sample(i * 30_000, 1000.0, 0, 0)).collect::<Vec<_>>(), 30)
            .unwrap();
        let half = compute_hourly(
            1,
            MS_PER_HOUR,
            &(0..60).map(|i| sample(MS_PER_HOUR + i * 30_000, 1000.0, 0, 0)).collect::<Vec<_>>(),
            30,
        )
        .unwrap();
        let day = compute_daily(1, 0, &[full, half], 30).unwrap();
        assert_eq!(day.hours_count, 2);
        assert!((day.energy_wh - 22.5).abs() < 1e-9);
        assert!((day.uptime_percent - 180.0 / 2880.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn trend_needs_seven_days() {
        let day = |i: i64, h: f64| {
            let mut d = compute_daily(
                1,
                i * MS_PER_DAY,
                &[compute_hourly(1, i * MS_PER_DAY, &[sample(i * MS_PER_DAY, h, 0, 0)], 30).unwrap()],
                30,
            )
            .unwrap();
            d.trend = None;
            d
        };
        let six: Vec<DailyStat> = (0..6).map(|i| day(i, 1000.0 + 10.0 * i as f64)).collect();
        assert!(fit_trend(&six).is_none());
        let seven: Vec<DailyStat> = (0..7).map(|i| day(i, 1000.0 + 10.0 * i as f64)).collect();
        let fit = fit_trend(&seven).unwrap();
        assert!((fit.slope - 10.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(fit.points, 7);
    }

    #[test]
    fn hour_and_day_alignment() {
        assert_eq!(hour_floor(MS_PER_HOUR + 1), MS_PER_HOUR);
        assert_eq!(day_floor(2 * MS_PER_DAY - 1), MS_PER_DAY);
        assert_eq!(hour_floor(-1), -MS_PER_HOUR);
    }
}
