// Predictive maintenance: urgency 0..100 from thermal stress, hashrate decline and efficiency decline.

use serde::Serialize;

use crate::models::{Analysis, DataQuality, HourlyStat};
use crate::stats;

const THERMAL_WEIGHT: f64 = 0.40;
const HASHRATE_WEIGHT: f64 = 0.35;
const EFFICIENCY_WEIGHT: f64 = 0.25;
/// Points averaged at each end of the window when measuring decline.
const EDGE_POINTS: usize = 5;
/// Points at which confidence reaches 1.
const FULL_CONFIDENCE_POINTS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ThermalStress,
    PerformanceDegradation,
    EfficiencyDecline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedIssue {
    pub kind: IssueKind,
    pub description: String,
    pub recommendation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenancePrediction {
    /// 0..=100, higher is more urgent.
    pub urgency: f64,
    pub thermal_stress: f64,
    pub hashrate_decline: f64,
    pub efficiency_decline: f64,
    pub predicted_issues: Vec<PredictedIssue>,
    /// 0..=1, grows with the number of points analysed.
    pub confidence: f64,
    pub points: usize,
    pub data_quality: DataQuality,
}

/// Relative change from the mean of the first points to the mean of the last points.
/// Positive when the tail is lower than the head.
fn head_to_tail_drop(values: &[f64]) -> Option<f64> {
    if values.len() < EDGE_POINTS * 2 {
        return None;
    }
    let head = stats::mean(&values[..EDGE_POINTS])?;
    let tail = stats::mean(&values[values.len() - EDGE_POINTS..])?;
    (head > 0.0).then(|| (head - tail) / head)
}

/// Hourly stats must be ascending by hour. Needs at least `min_hours` hours with a hashrate.
pub fn predict_maintenance(hourly: &[HourlyStat], min_hours: usize) -> Analysis<MaintenancePrediction> {
    let hashrates: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.avg_hashrate_ghs)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let required = min_hours.max(EDGE_POINTS * 2);
    if hashrates.len() < required {
        return Analysis::InsufficientData {
            required,
            available: hashrates.len(),
        };
    }
    let temps: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.avg_temp_c)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let efficiencies: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.avg_efficiency_j_th)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let skipped = hourly
        .iter()
        .filter(|h| h.avg_hashrate_ghs.is_none() || h.avg_temp_c.is_none() || h.avg_efficiency_j_th.is_none())
        .count();

    let mut issues = Vec::new();

    let avg_temp = stats::mean(&temps);
    let rising = stats::trend(&temps).is_some_and(|r| r.slope > 0.0);
    let thermal = avg_temp.map_or(0.0, |t| {
        let level = ((t - 70.0) / 20.0).clamp(0.0, 1.0);
        if rising { (level + 0.25).min(1.0) } else { level }
    });
    if let Some(t) = avg_temp
        && (t > 80.0 || (rising && t > 75.0))
    {
        issues.push(PredictedIssue {
            kind: IssueKind::ThermalStress,
            description: format!(
                "average ASIC temperature {:.1} °C{}",
                t,
                if rising { " and rising" } else { "" }
            ),
            recommendation: "Schedule thermal maintenance check",
        });
    }

    let hashrate_drop = head_to_tail_drop(&hashrates).unwrap_or(0.0);
    let hashrate_decline = (hashrate_drop / 0.2).clamp(0.0, 1.0);
    if hashrate_drop > 0.05 {
        issues.push(PredictedIssue {
            kind: IssueKind::PerformanceDegradation,
            description: format!("hashrate declined {:.1}% over the window", hashrate_drop * 100.0),
            recommendation: "Investigate hardware health and settings",
        });
    }

    // J/TH going up is the decline, so the sign flips.
    let efficiency_rise = head_to_tail_drop(&efficiencies).map_or(0.0, |d| -d);
    let efficiency_decline = (efficiency_rise / 0.3).clamp(0.0, 1.0);
    if efficiency_rise > 0.10 {
        issues.push(PredictedIssue {
            kind: IssueKind::EfficiencyDecline,
            description: format!("J/TH worsened {:.1}% over the window", efficiency_rise * 100.0),
            recommendation: "Review power supply and component health",
        });
    }

    let urgency =
        100.0 * (THERMAL_WEIGHT * thermal + HASHRATE_WEIGHT * hashrate_decline + EFFICIENCY_WEIGHT * efficiency_decline);

    Analysis::Ready(MaintenancePrediction {
        urgency: stats::round_to(urgency, 1),
        thermal_stress: thermal,
        hashrate_decline,
        efficiency_decline,
        predicted_issues: issues,
        confidence: (hourly.len() as f64 / FULL_CONFIDENCE_POINTS).min(1.0),
        points: hourly.len(),
        data_quality: DataQuality::from_skipped(skipped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(i: i64, hashrate: f64, temp: f64, eff: f64) -> HourlyStat {
        HourlyStat {
            device_id: 1,
            hour_start: i * 3_600_000,
            samples_count: 120,
            online_samples: 120,
            expected_samples: 120,
            uptime_percent: 100.0,
            avg_hashrate_ghs: Some(hashrate),
            min_hashrate_ghs: Some(hashrate),
            max_hashrate_ghs: Some(hashrate),
            avg_temp_c: Some(temp),
            max_temp_c: Some(temp),
            avg_power_w: Some(15.0),
            avg_efficiency_j_th: Some(eff),
            shares_accepted: 0,
            shares_rejected: 0,
            rejection_rate_percent: 0.0,
            status_histogram: vec![],
        }
    }

    #[test]
    fn cool_stable_device_needs_nothing() {
        let hours: Vec<_> = (0..24).map(|i| hour(i, 1000.0, 60.0, 15.0)).collect();
        let p = predict_maintenance(&hours, 10).ready().unwrap();
        assert_eq!(p.urgency, 0.0);
        assert!(p.predicted_issues.is_empty());
        assert!((p.confidence - 24.0 / 50.0).abs() < 1e-9);
    }

    #[test]
    fn degrading_device_is_urgent() {
        // 20% hashrate loss, +30% J/TH, hot and rising.
        let hours: Vec<_> = (0..20)
            .map(|i| {
                let f = i as f64 / 19.0;
                hour(i, 1000.0 - 200.0 * f, 80.0 + 5.0 * f, 15.0 + 4.5 * f)
            })
            .collect();
        let p = predict_maintenance(&hours, 10).ready().unwrap();
        assert!(p.urgency > 70.0, "urgency {}", p.urgency);
        let kinds: Vec<_> = p.predicted_issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![IssueKind::ThermalStress, IssueKind::PerformanceDegradation, IssueKind::EfficiencyDecline]
        );
    }

    #[test]
    fn short_history_is_insufficient() {
        let hours: Vec<_> = (0..9).map(|i| hour(i, 1000.0, 60.0, 15.0)).collect();
        assert_eq!(
            predict_maintenance(&hours, 10),
            Analysis::InsufficientData {
                required: 10,
                available: 9
            }
        );
    }
}
