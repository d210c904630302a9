// Day-over-day growth trend per metric from daily stats.

use serde::Serialize;

use crate::models::{Analysis, DailyStat, DataQuality};
use crate::stats;

/// Slopes smaller than this fraction of the metric's mean per day count as flat.
const STABLE_RELATIVE_SLOPE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrend {
    pub metric: &'static str,
    /// Units of the metric per day.
    pub slope: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
    /// Most recent daily value.
    pub current: f64,
    /// Percent change from the first to the last day in the window.
    pub period_change_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthReport {
    pub metrics: Vec<MetricTrend>,
    pub overall: TrendDirection,
    pub days: usize,
    pub data_quality: DataQuality,
}

/// Whether a rising value is good for the metric.
#[derive(Clone, Copy)]
enum Better {
    Higher,
    Lower,
}

fn metric_trend(metric: &'static str, better: Better, points: &[(f64, f64)]) -> Option<MetricTrend> {
    if points.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    let fit = stats::linear_regression(&xs, &ys)?;
    let mean = stats::mean(&ys)?;
    let flat = mean == 0.0 || (fit.slope / mean).abs() < STABLE_RELATIVE_SLOPE;
    let direction = match (flat, fit.slope > 0.0, better) {
        (true, _, _) => TrendDirection::Stable,
        (false, true, Better::Higher) | (false, false, Better::Lower) => TrendDirection::Improving,
        _ => TrendDirection::Declining,
    };
    let first = ys[0];
    let current = ys[ys.len() - 1];
    Some(MetricTrend {
        metric,
        slope: fit.slope,
        r_squared: fit.r_squared,
        direction,
        current,
        period_change_percent: (first != 0.0).then(|| (current - first) / first * 100.0),
    })
}

/// Daily stats must be ascending by day. Needs at least `min_days` days with a hashrate.
pub fn growth_trend(daily: &[DailyStat], min_days: usize) -> Analysis<GrowthReport> {
    let with_hashrate = daily.iter().filter(|d| d.avg_hashrate_ghs.is_some()).count();
    let required = min_days.max(2);
    if with_hashrate < required {
        return Analysis::InsufficientData {
            required,
            available: with_hashrate,
        };
    }
    let Some(origin) = daily.first().map(|d| d.day_start) else {
        return Analysis::InsufficientData {
            required,
            available: 0,
        };
    };
    let day_index = |d: &DailyStat| (d.day_start - origin) as f64 / crate::models::MS_PER_DAY as f64;
    let series = |f: &dyn Fn(&DailyStat) -> Option<f64>| -> Vec<(f64, f64)> {
        daily
            .iter()
            .filter_map(|d| f(d).filter(|v| v.is_finite()).map(|v| (day_index(d), v)))
            .collect()
    };

    let hashrate = series(&|d| d.avg_hashrate_ghs);
    let power = series(&|d| (d.hours_count > 0).then(|| d.energy_wh / d.hours_count as f64));
    let efficiency = series(&|d| d.avg_efficiency_j_th);
    let uptime = series(&|d| Some(d.uptime_percent));

    let metrics: Vec<MetricTrend> = [
        metric_trend("hashrate", Better::Higher, &hashrate),
        metric_trend("power", Better::Lower, &power),
        metric_trend("efficiency", Better::Lower, &efficiency),
        metric_trend("uptime", Better::Higher, &uptime),
    ]
    .into_iter()
    .flatten()
    .collect();

    let score: i32 = metrics
        .iter()
        .map(|m| match m.direction {
            TrendDirection::Improving => 1,
            TrendDirection::Declining => -1,
            TrendDirection::Stable => 0,
        })
        .sum();
    let overall = match score {
        s if s > 0 => TrendDirection::Improving,
        s if s < 0 => TrendDirection::Declining,
        _ => TrendDirection::Stable,
    };
    let skipped = daily
        .iter()
        .filter(|d| d.avg_hashrate_ghs.is_none() || d.avg_efficiency_j_th.is_none())
        .count();

    Analysis::Ready(GrowthReport {
        metrics,
        overall,
        days: daily.len(),
        data_quality: DataQuality::from_skipped(skipped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MS_PER_DAY;

    fn day(i: i64, hashrate: f64, eff: f64) -> DailyStat {
        DailyStat {
            device_id: 1,
            day_start: i * MS_PER_DAY,
            hours_count: 24,
            samples_count: 2880,
            uptime_percent: 100.0,
            avg_hashrate_ghs: Some(hashrate),
            peak_hashrate_ghs: Some(hashrate),
            avg_temp_c: Some(60.0),
            peak_temp_c: Some(62.0),
            energy_wh: 24.0 * 15.0,
            avg_efficiency_j_th: Some(eff),
            shares_accepted: 0,
            shares_rejected: 0,
            rejection_rate_percent: 0.0,
            trend: None,
        }
    }

    fn direction(report: &GrowthReport, metric: &str) -> TrendDirection {
        report
            .metrics
            .iter()
            .find(|m| m.metric == metric)
            .map(|m| m.direction)
            .unwrap()
    }

    #[test]
    fn rising_hashrate_and_falling_jth_improve() {
        let days: Vec<_> = (0..10).map(|i| day(i, 1000.0 + 20.0 * i as f64, 16.0 - 0.3 * i as f64)).collect();
        let report = growth_trend(&days, 7).ready().unwrap();
        assert_eq!(direction(&report, "hashrate"), TrendDirection::Improving);
        assert_eq!(direction(&report, "efficiency"), TrendDirection::Improving);
        assert_eq!(direction(&report, "power"), TrendDirection::Stable);
        assert_eq!(report.overall, TrendDirection::Improving);
        let h = report.metrics.iter().find(|m| m.metric == "hashrate").unwrap();
        assert!((h.slope - 20.0).abs() < 1e-9);
    }

    #[test]
    fn falling_hashrate_declines() {
        let days: Vec<_> = (0..8).map(|i| day(i, 1000.0 - 30.0 * i as f64, 15.0)).collect();
        let report = growth_trend(&days, 7).ready().unwrap();
        assert_eq!(direction(&report, "hashrate"), TrendDirection::Declining);
        assert_eq!(report.overall, TrendDirection::Declining);
    }

    #[test]
    fn six_days_is_not_enough() {
        let days: Vec<_> = (0..6).map(|i| day(i, 1000.0, 15.0)).collect();
        assert!(growth_trend(&days, 7).is_insufficient());
    }
}
