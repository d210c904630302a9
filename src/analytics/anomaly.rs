// Statistical anomaly detection over a device's trailing sample window.

use serde::Serialize;

use crate::models::{AlertKind, Analysis, DataQuality, Sample, Severity};
use crate::stats;

/// Deviation (in standard deviations) that flags a hashrate or power reading.
const WARNING_SIGMA: f64 = 2.0;
const CRITICAL_SIGMA: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct AnomalyThresholds {
    pub min_samples: usize,
    pub temp_warning_c: f64,
    pub temp_critical_c: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            min_samples: 6,
            temp_warning_c: 85.0,
            temp_critical_c: 90.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub kind: AlertKind,
    pub severity: Severity,
    pub timestamp: i64,
    pub value: f64,
    /// Window mean the value was compared against (statistical checks only).
    pub expected: Option<f64>,
    pub threshold: f64,
    /// |value - mean| / stddev.
    pub deviation_sigma: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
    pub samples: usize,
    /// Timestamp of the newest sample analysed.
    pub latest_timestamp: i64,
    pub data_quality: DataQuality,
}

impl AnomalyReport {
    /// Anomalies found on the newest sample, i.e. conditions that are still present.
    pub fn current(&self) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter().filter(move |a| a.timestamp == self.latest_timestamp)
    }
}

/// Samples must be ascending by timestamp. Only reachable, hashing samples are analysed.
pub fn detect_anomalies(samples: &[Sample], thresholds: &AnomalyThresholds) -> Analysis<AnomalyReport> {
    let valid: Vec<&Sample> = samples
        .iter()
        .filter(|s| s.status.is_reachable() && s.hashrate_ghs.is_some_and(|h| h > 0.0 && h.is_finite()))
        .collect();
    let required = thresholds.min_samples.max(2);
    if valid.len() < required {
        return Analysis::InsufficientData {
            required,
            available: valid.len(),
        };
    }
    let mut anomalies = Vec::new();

    let hashrates: Vec<(i64, f64)> = valid
        .iter()
        .filter_map(|s| Some((s.timestamp, s.hashrate_ghs?)))
        .collect();
    let values: Vec<f64> = hashrates.iter().map(|p| p.1).collect();
    if let Some(mean) = stats::mean(&values) {
        let sd = stats::std_dev(&values);
        if sd > 0.0 {
            for &(ts, h) in &hashrates {
                let sigma = (h - mean).abs() / sd;
                if sigma > WARNING_SIGMA {
                    anomalies.push(Anomaly {
                        kind: AlertKind::HashrateAnomaly,
                        severity: if sigma > CRITICAL_SIGMA {
                            Severity::Critical
                        } else {
                            Severity::Warning
                        },
                        timestamp: ts,
                        value: h,
                        expected: Some(mean),
                        threshold: WARNING_SIGMA * sd,
                        deviation_sigma: Some(sigma),
                    });
                }
            }
        }
    }

    for s in &valid {
        let Some(t) = s.temp_asic_c.filter(|t| *t > 0.0 && t.is_finite()) else {
            continue;
        };
        if t > thresholds.temp_warning_c {
            anomalies.push(Anomaly {
                kind: AlertKind::TemperatureSpike,
                severity: if t > thresholds.temp_critical_c {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                timestamp: s.timestamp,
                value: t,
                expected: None,
                threshold: thresholds.temp_warning_c,
                deviation_sigma: None,
            });
        }
    }

    let powers: Vec<(i64, f64)> = valid
        .iter()
        .filter_map(|s| Some((s.timestamp, s.power_w.filter(|p| *p > 0.0 && p.is_finite())?)))
        .collect();
    if powers.len() >= required {
        let values: Vec<f64> = powers.iter().map(|p| p.1).collect();
        let sd = stats::std_dev(&values);
        if let Some(mean) = stats::mean(&values)
            && sd > 0.0
        {
            for &(ts, p) in &powers {
                if p > mean + WARNING_SIGMA * sd {
                    anomalies.push(Anomaly {
                        kind: AlertKind::PowerAnomaly,
                        severity: Severity::Warning,
                        timestamp: ts,
                        value: p,
                        expected: Some(mean),
                        threshold: mean + WARNING_SIGMA * sd,
                        deviation_sigma: Some((p - mean) / sd),
                    });
                }
            }
        }
    }

    anomalies.sort_by_key(|a| a.timestamp);
    Analysis::Ready(AnomalyReport {
        anomalies,
        samples: valid.len(),
        latest_timestamp: valid.last().map_or(0, |s| s.timestamp),
        data_quality: DataQuality::from_skipped(samples.len() - valid.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleStatus;

    fn sample(ts: i64, hashrate: f64, temp: f64, power: f64) -> Sample {
        let mut s = Sample::failed(ts, 1, "bitaxe".into(), false, SampleStatus::Online);
        s.hashrate_ghs = Some(hashrate);
        s.temp_asic_c = Some(temp);
        s.power_w = Some(power);
        s
    }

    #[test]
    fn needs_minimum_valid_samples() {
        let mut samples: Vec<_> = (0..5).map(|i| sample(i, 1000.0, 60.0, 15.0)).collect();
        samples.push(Sample::failed(5, 1, "bitaxe".into(), true, SampleStatus::Timeout));
        assert!(detect_anomalies(&samples, &AnomalyThresholds::default()).is_insufficient());
    }

    #[test]
    fn hashrate_drop_is_flagged_critical() {
        let mut samples: Vec<_> = (0..20)
            .map(|i| sample(i, 1000.0 + (i % 3) as f64, 60.0, 15.0))
            .collect();
        samples.push(sample(20, 500.0, 60.0, 15.0));
        let report = detect_anomalies(&samples, &AnomalyThresholds::default()).ready().unwrap();
        let current: Vec<_> = report.current().collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].kind, AlertKind::HashrateAnomaly);
        assert_eq!(current[0].severity, Severity::Critical);
    }

    #[test]
    fn temperature_thresholds() {
        let mut samples: Vec<_> = (0..6).map(|i| sample(i, 1000.0, 60.0, 15.0)).collect();
        samples.push(sample(6, 1000.0, 87.0, 15.0));
        samples.push(sample(7, 1000.0, 91.0, 15.0));
        let report = detect_anomalies(&samples, &AnomalyThresholds::default()).ready().unwrap();
        let temps: Vec<_> = report
            .anomalies
            .iter()
            .filter(|a| a.kind == AlertKind::TemperatureSpike)
            .map(|a| a.severity)
            .collect();
        assert_eq!(temps, vec![Severity::Warning, Severity::Critical]);
    }

    #[test]
    fn steady_device_has_no_anomalies() {
        let samples: Vec<_> = (0..30).map(|i| sample(i, 1000.0, 60.0, 15.0)).collect();
        let report = detect_anomalies(&samples, &AnomalyThresholds::default()).ready().unwrap();
        assert!(report.anomalies.is_empty());
        assert_eq!(report.data_quality, DataQuality::Complete);
    }
}
