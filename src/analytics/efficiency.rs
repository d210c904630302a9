// Weighted efficiency score over hourly stats, graded A+..F.

use serde::Serialize;

use super::Grade;
use crate::models::{Analysis, DataQuality, HourlyStat};
use crate::stats;

const UPTIME_WEIGHT: f64 = 0.25;
const STABILITY_WEIGHT: f64 = 0.30;
const TEMPERATURE_WEIGHT: f64 = 0.20;
const ENERGY_WEIGHT: f64 = 0.15;
const REJECTION_WEIGHT: f64 = 0.10;

/// Uptime at or above this counts as perfect.
const TARGET_UPTIME_PERCENT: f64 = 95.0;
/// Average temperature at or below this is not penalised.
const IDEAL_TEMP_C: f64 = 75.0;
const MAX_TEMP_LIMIT_C: f64 = 85.0;
const BASELINE_J_PER_TH: f64 = 12.0;

/// One weighted component of the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Factor {
    pub name: &'static str,
    /// Input the factor was computed from (None when no reading was available).
    pub value: Option<f64>,
    /// 0..=1
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyScore {
    /// 0..=100, one decimal.
    pub score: f64,
    pub grade: Grade,
    pub factors: Vec<Factor>,
    pub recommendations: Vec<String>,
    pub hours: usize,
    pub data_quality: DataQuality,
}

/// Score a device from its hourly stats. Needs at least `min_hours` rows.
pub fn efficiency_score(hourly: &[HourlyStat], min_hours: usize) -> Analysis<EfficiencyScore> {
    if hourly.len() < min_hours.max(1) {
        return Analysis::InsufficientData {
            required: min_hours.max(1),
            available: hourly.len(),
        };
    }

    let uptimes: Vec<f64> = hourly.iter().map(|h| h.uptime_percent).collect();
    let hashrates: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.avg_hashrate_ghs)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let avg_temps: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.avg_temp_c)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let max_temps: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.max_temp_c)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let efficiencies: Vec<f64> = hourly
        .iter()
        .filter_map(|h| h.avg_efficiency_j_th)
        .filter(|v| *v > 0.0 && v.is_finite())
        .collect();
    let rejections: Vec<f64> = hourly
        .iter()
        .map(|h| h.rejection_rate_percent)
        .filter(|v| *v >= 0.0 && v.is_finite())
        .collect();
    let skipped = hourly
        .iter()
        .filter(|h| h.avg_hashrate_ghs.is_none() || h.avg_temp_c.is_none() || h.avg_efficiency_j_th.is_none())
        .count();

    let avg_uptime = stats::mean(&uptimes);
    let uptime = avg_uptime.map_or(0.0, |u| (u / TARGET_UPTIME_PERCENT).min(1.0));

    // CV here is a fraction, not a percentage.
    let cv = stats::cv_percent(&hashrates).map(|c| c / 100.0);
    let stability = cv.map_or(0.0, |c| (1.0 - 2.0 * c).max(0.0));

    let avg_temp = stats::mean(&avg_temps);
    let peak_temp = stats::max(&max_temps).or(avg_temp);
    let temperature = match (avg_temp, peak_temp) {
        (Some(avg), Some(peak)) => {
            (1.0 - (avg - IDEAL_TEMP_C).max(0.0) / 20.0).max(0.0)
                * (1.0 - (peak - MAX_TEMP_LIMIT_C).max(0.0) / 15.0).max(0.0)
        }
        _ => 0.0,
    };

    let avg_efficiency = stats::mean(&efficiencies);
    let energy = avg_efficiency.map_or(0.0, |e| (1.0 - (e - BASELINE_J_PER_TH).max(0.0) / 10.0).max(0.0));

    let avg_rejection = stats::mean(&rejections);
    let rejection = avg_rejection.map_or(0.0, |r| (1.0 - r / 5.0).max(0.0));

    let factors = vec![
        Factor {
            name: "uptime",
            value: avg_uptime,
            score: uptime,
            weight: UPTIME_WEIGHT,
        },
        Factor {
            name: "hashrate_stability",
            value: cv,
            score: stability,
            weight: STABILITY_WEIGHT,
        },
        Factor {
            name: "temperature",
            value: avg_temp,
            score: temperature,
            weight: TEMPERATURE_WEIGHT,
        },
        Factor {
            name: "energy_efficiency",
            value: avg_efficiency,
            score: energy,
            weight: ENERGY_WEIGHT,
        },
        Factor {
            name: "rejection_rate",
            value: avg_rejection,
            score: rejection,
            weight: REJECTION_WEIGHT,
        },
    ];

    let total: f64 = factors.iter().map(|f| f.score * f.weight).sum();
    let score = stats::round_to((total * 100.0).min(100.0), 1);

    Analysis::Ready(EfficiencyScore {
        score,
        grade: Grade::from_score(score),
        recommendations: recommendations(&factors),
        factors,
        hours: hourly.len(),
        data_quality: DataQuality::from_skipped(skipped),
    })
}

fn recommendations(factors: &[Factor]) -> Vec<String> {
    let mut out = Vec::new();
    for f in factors {
        let (limit, advice): (f64, &[&str]) = match f.name {
            "uptime" => (
                0.8,
                &[
                    "Monitor network connectivity and power stability",
                    "Check for frequent reboots or connection issues",
                ],
            ),
            "hashrate_stability" => (
                0.7,
                &[
                    "Review overclocking settings for stability",
                    "Check for thermal throttling or power fluctuations",
                ],
            ),
            "temperature" => (
                0.8,
                &[
                    "Improve cooling or reduce ambient temperature",
                    "Consider reducing frequency to lower temperatures",
                ],
            ),
            "energy_efficiency" => (
                0.8,
                &[
                    "Optimize voltage settings for better efficiency",
                    "Consider underclocking for a better J/TH ratio",
                ],
            ),
            _ => (
                0.8,
                &["Check pool connection stability", "Verify network latency and quality"],
            ),
        };
        if f.score < limit {
            out.extend(advice.iter().map(|s| s.to_string()));
        }
    }
    out
}
