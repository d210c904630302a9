// Fleet insights over a window of hourly stats: fleet averages, leaders, problem miners,
// a power cost estimate and recommendations.

use serde::Serialize;

use crate::models::{Analysis, Device, HourlyStat};
use crate::stats;
use crate::telemetry_repo::aggregation::rejection_percent;

/// Devices below this average uptime need attention.
pub const UPTIME_TARGET_PERCENT: f64 = 95.0;
/// Devices above this rejection rate need attention.
pub const MAX_REJECTION_PERCENT: f64 = 5.0;
const EFFICIENCY_CONCERN_J_TH: f64 = 16.0;
const EFFICIENCY_TUNING_J_TH: f64 = 15.0;
const LIST_LIMIT: usize = 5;

/// One device's rollups over the window.
pub struct DeviceWindow<'a> {
    pub device: &'a Device,
    pub hourly: &'a [HourlyStat],
    /// Alerts raised for the device within the window.
    pub alert_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerSummary {
    pub device_id: i64,
    pub address: String,
    pub display_name: String,
    pub hours: usize,
    pub avg_uptime_percent: f64,
    pub avg_hashrate_ghs: Option<f64>,
    pub avg_efficiency_j_th: Option<f64>,
    pub avg_power_w: Option<f64>,
    pub rejection_rate_percent: f64,
    pub alert_count: usize,
}

impl MinerSummary {
    fn needs_attention(&self) -> bool {
        self.avg_uptime_percent < UPTIME_TARGET_PERCENT || self.rejection_rate_percent > MAX_REJECTION_PERCENT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub devices_reporting: usize,
    pub avg_uptime_percent: f64,
    /// Sum of per-device average hashrate.
    pub total_hashrate_ghs: f64,
    /// Sum of per-device average power.
    pub total_power_w: f64,
    pub avg_efficiency_j_th: Option<f64>,
    pub avg_temp_c: Option<f64>,
    pub avg_rejection_rate_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    UptimeConcern,
    EfficiencyConcern,
    ProblemMiners,
    DailyPowerCost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
    pub impact: Option<Impact>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetInsights {
    pub window_start: i64,
    pub window_end: i64,
    pub summary: FleetSummary,
    /// Highest uptime first, then highest hashrate.
    pub top_performers: Vec<MinerSummary>,
    /// Lowest uptime first, then most alerts.
    pub problem_miners: Vec<MinerSummary>,
    pub performance: Vec<Insight>,
    pub operational: Vec<Insight>,
    pub financial: Vec<Insight>,
    pub daily_power_cost: f64,
    pub recommendations: Vec<String>,
}

fn summarize(w: &DeviceWindow<'_>) -> Option<MinerSummary> {
    if w.hourly.is_empty() {
        return None;
    }
    let series = |f: fn(&HourlyStat) -> Option<f64>| -> Vec<f64> {
        w.hourly.iter().filter_map(f).filter(|v| v.is_finite()).collect()
    };
    let uptimes: Vec<f64> = w.hourly.iter().map(|h| h.uptime_percent).collect();
    let accepted: u64 = w.hourly.iter().map(|h| h.shares_accepted).sum();
    let rejected: u64 = w.hourly.iter().map(|h| h.shares_rejected).sum();
    Some(MinerSummary {
        device_id: w.device.id,
        address: w.device.address.clone(),
        display_name: w.device.display_name.clone(),
        hours: w.hourly.len(),
        avg_uptime_percent: stats::mean(&uptimes)?,
        avg_hashrate_ghs: stats::mean(&series(|h| h.avg_hashrate_ghs)),
        avg_efficiency_j_th: stats::mean(&series(|h| h.avg_efficiency_j_th)),
        avg_power_w: stats::mean(&series(|h| h.avg_power_w)),
        rejection_rate_percent: rejection_percent(accepted, rejected),
        alert_count: w.alert_count,
    })
}

/// Insights over every device that has at least one hourly row in the window.
pub fn fleet_insights(
    windows: &[DeviceWindow<'_>],
    window_start: i64,
    window_end: i64,
    power_price_per_kwh: f64,
) -> Analysis<FleetInsights> {
    let miners: Vec<MinerSummary> = windows.iter().filter_map(summarize).collect();
    if miners.is_empty() {
        return Analysis::InsufficientData {
            required: 1,
            available: 0,
        };
    }

    let uptimes: Vec<f64> = miners.iter().map(|m| m.avg_uptime_percent).collect();
    let efficiencies: Vec<f64> = miners.iter().filter_map(|m| m.avg_efficiency_j_th).collect();
    let rejections: Vec<f64> = miners.iter().map(|m| m.rejection_rate_percent).collect();
    let temps: Vec<f64> = windows
        .iter()
        .flat_map(|w| w.hourly.iter().filter_map(|h| h.avg_temp_c))
        .filter(|t| *t > 0.0 && t.is_finite())
        .collect();
    let summary = FleetSummary {
        devices_reporting: miners.len(),
        avg_uptime_percent: stats::mean(&uptimes).unwrap_or_default(),
        total_hashrate_ghs: miners.iter().filter_map(|m| m.avg_hashrate_ghs).sum(),
        total_power_w: miners.iter().filter_map(|m| m.avg_power_w).sum(),
        avg_efficiency_j_th: stats::mean(&efficiencies),
        avg_temp_c: stats::mean(&temps),
        avg_rejection_rate_percent: stats::mean(&rejections).unwrap_or_default(),
    };

    let mut top_performers = miners.clone();
    top_performers.sort_by(|a, b| {
        b.avg_uptime_percent
            .total_cmp(&a.avg_uptime_percent)
            .then(b.avg_hashrate_ghs.unwrap_or(0.0).total_cmp(&a.avg_hashrate_ghs.unwrap_or(0.0)))
    });
    top_performers.truncate(LIST_LIMIT);

    let mut problem_miners: Vec<MinerSummary> = miners.into_iter().filter(MinerSummary::needs_attention).collect();
    problem_miners.sort_by(|a, b| {
        a.avg_uptime_percent
            .total_cmp(&b.avg_uptime_percent)
            .then(b.alert_count.cmp(&a.alert_count))
    });
    problem_miners.truncate(LIST_LIMIT);

    let mut performance = Vec::new();
    if summary.avg_uptime_percent < UPTIME_TARGET_PERCENT {
        performance.push(Insight {
            kind: InsightKind::UptimeConcern,
            message: format!(
                "Fleet uptime ({:.1}%) is below target ({:.0}%)",
                summary.avg_uptime_percent, UPTIME_TARGET_PERCENT
            ),
            impact: Some(Impact::Medium),
            value: Some(summary.avg_uptime_percent),
        });
    }
    if let Some(eff) = summary.avg_efficiency_j_th
        && eff > EFFICIENCY_CONCERN_J_TH
    {
        performance.push(Insight {
            kind: InsightKind::EfficiencyConcern,
            message: format!("Fleet efficiency ({:.1} J/TH) could be improved", eff),
            impact: Some(Impact::Low),
            value: Some(eff),
        });
    }

    let mut operational = Vec::new();
    if !problem_miners.is_empty() {
        operational.push(Insight {
            kind: InsightKind::ProblemMiners,
            message: format!("{} miners need attention", problem_miners.len()),
            impact: Some(Impact::High),
            value: Some(problem_miners.len() as f64),
        });
    }

    let daily_power_cost = summary.total_power_w / 1000.0 * 24.0 * power_price_per_kwh;
    let financial = vec![Insight {
        kind: InsightKind::DailyPowerCost,
        message: format!("Estimated daily power cost: {:.2}", daily_power_cost),
        impact: None,
        value: Some(daily_power_cost),
    }];

    let mut recommendations = Vec::new();
    if summary.avg_uptime_percent < UPTIME_TARGET_PERCENT {
        recommendations.push("Focus on improving network stability and power reliability".to_string());
    }
    if !problem_miners.is_empty() {
        recommendations.push("Address issues with underperforming miners to improve fleet efficiency".to_string());
    }
    if summary.avg_efficiency_j_th.is_some_and(|e| e > EFFICIENCY_TUNING_J_TH) {
        recommendations.push("Consider optimizing voltage/frequency settings for better energy efficiency".to_string());
    }

    Analysis::Ready(FleetInsights {
        window_start,
        window_end,
        summary,
        top_performers,
        problem_miners,
        performance,
        operational,
        financial,
        daily_power_cost,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MS_PER_HOUR;

    fn device(id: i64) -> Device {
        Device {
            id,
            address: format!("10.0.0.{}", id),
            display_name: format!("miner-{}", id),
            baseline_hashrate_ghs: 1000.0,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn hour(device_id: i64, i: i64, uptime: f64, accepted: u64, rejected: u64) -> HourlyStat {
        HourlyStat {
            device_id,
            hour_start: i * MS_PER_HOUR,
            samples_count: 120,
            online_samples: 120,
            expected_samples: 120,
            uptime_percent: uptime,
            avg_hashrate_ghs: Some(1000.0),
            min_hashrate_ghs: Some(1000.0),
            max_hashrate_ghs: Some(1000.0),
            avg_temp_c: Some(60.0),
            max_temp_c: Some(60.0),
            avg_power_w: Some(15.0),
            avg_efficiency_j_th: Some(15.0),
            shares_accepted: accepted,
            shares_rejected: rejected,
            rejection_rate_percent: rejection_percent(accepted, rejected),
            status_histogram: vec![],
        }
    }

    #[test]
    fn no_rollups_is_insufficient() {
        let d = device(1);
        let windows = [DeviceWindow {
            device: &d,
            hourly: &[],
            alert_count: 0,
        }];
        assert!(fleet_insights(&windows, 0, MS_PER_HOUR, 0.10).is_insufficient());
    }

    #[test]
    fn high_rejection_alone_marks_a_problem_miner() {
        let (a, b) = (device(1), device(2));
        let healthy: Vec<_> = (0..24).map(|i| hour(1, i, 100.0, 100, 0)).collect();
        let rejecting: Vec<_> = (0..24).map(|i| hour(2, i, 100.0, 90, 10)).collect();
        let windows = [
            DeviceWindow {
                device: &a,
                hourly: &healthy,
                alert_count: 0,
            },
            DeviceWindow {
                device: &b,
                hourly: &rejecting,
                alert_count: 0,
            },
        ];
        let insights = fleet_insights(&windows, 0, 24 * MS_PER_HOUR, 0.10).ready().unwrap();
        let ids: Vec<i64> = insights.problem_miners.iter().map(|m| m.device_id).collect();
        assert_eq!(ids, vec![2]);
        assert!((insights.problem_miners[0].rejection_rate_percent - 10.0).abs() < 1e-9);
        // Full uptime across the fleet: no uptime concern.
        assert!(insights.performance.is_empty());
        // 30 W for a day at 0.10 per kWh.
        assert!((insights.daily_power_cost - 0.072).abs() < 1e-9);
        assert_eq!(insights.summary.total_hashrate_ghs, 2000.0);
    }
}
