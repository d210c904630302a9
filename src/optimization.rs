// Operating-point analysis: benchmark session detection and sweet-spot ranking of
// (voltage, frequency) settings from a device's samples.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::OptimizationConfig;
use crate::models::{Analysis, DataQuality, MS_PER_HOUR, Sample};
use crate::stats;

/// Recommendation ranges and stability timelines are drawn from this many top settings.
const TOP_SETTINGS: usize = 5;
/// A setting needs this many valid samples before its stability is tracked over time.
const MIN_TIMELINE_SAMPLES: usize = 10;
const MAX_TIMELINE_WINDOW: usize = 20;
/// Hashrate CV change per window above which stability counts as moving.
const TREND_SLOPE_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub min_samples_per_setting: usize,
    pub benchmark_window_ms: i64,
    pub benchmark_min_settings: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::from(&OptimizationConfig::default())
    }
}

impl From<&OptimizationConfig> for OptimizerConfig {
    fn from(c: &OptimizationConfig) -> Self {
        Self {
            min_samples_per_setting: c.min_samples_per_setting,
            benchmark_window_ms: c.benchmark_window_minutes as i64 * 60_000,
            benchmark_min_settings: c.benchmark_min_settings,
        }
    }
}

/// A (voltage, frequency) operating point, rounded to whole mV and MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub voltage_mv: i64,
    pub frequency_mhz: i64,
}

impl Setting {
    fn of(s: &Sample) -> Option<Self> {
        Some(Self {
            voltage_mv: s.voltage_set_mv?.round() as i64,
            frequency_mhz: s.frequency_mhz?.round() as i64,
        })
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}V @ {}MHz", self.voltage_mv as f64 / 1000.0, self.frequency_mhz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingCount {
    #[serde(flatten)]
    pub setting: Setting,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSession {
    pub start: i64,
    pub end: i64,
    pub settings_tested: usize,
    pub samples: usize,
    pub settings: Vec<SettingCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashrateMetrics {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub cv_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureMetrics {
    pub mean: f64,
    pub max: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingScore {
    #[serde(flatten)]
    pub setting: Setting,
    pub samples: usize,
    pub duration_hours: f64,
    pub hashrate: HashrateMetrics,
    pub efficiency: MeanStd,
    pub temperature: TemperatureMetrics,
    pub power: MeanStd,
    pub rejection_rate_percent: f64,
    /// 0..=100, higher is better.
    pub performance_score: f64,
    /// Weighted variability, lower is better.
    pub stability_score: f64,
    pub sweet_spot_score: f64,
}

/// Variability of one rolling window of a setting's samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityPoint {
    /// Timestamp of the window's last sample.
    pub timestamp: i64,
    pub hashrate_cv_percent: f64,
    pub efficiency_std: f64,
    pub temp_std: f64,
    pub mean_hashrate_ghs: f64,
    pub mean_efficiency_j_th: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityTrend {
    /// Hashrate CV falling.
    Improving,
    /// Hashrate CV rising.
    Degrading,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingStability {
    #[serde(flatten)]
    pub setting: Setting,
    pub window_size: usize,
    pub points: Vec<StabilityPoint>,
    /// Mean hashrate CV across points.
    pub overall_stability: f64,
    pub trend: StabilityTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub device_id: i64,
    pub window_start: i64,
    pub window_end: i64,
    pub valid_samples: usize,
    pub benchmark_sessions: Vec<BenchmarkSession>,
    /// Best first.
    pub rankings: Vec<SettingScore>,
    pub recommendations: Vec<String>,
    /// Rolling stability of the top-ranked settings, in ranking order.
    pub stability_timeline: Vec<SettingStability>,
    pub data_quality: DataQuality,
}

fn positive(v: Option<f64>) -> bool {
    v.is_some_and(|x| x > 0.0 && x.is_finite())
}

/// Samples usable for scoring, ascending by timestamp, plus the number skipped.
pub fn valid_samples(samples: &[Sample]) -> (Vec<&Sample>, usize) {
    let mut valid: Vec<&Sample> = samples
        .iter()
        .filter(|s| {
            s.status.is_reachable()
                && positive(s.voltage_set_mv)
                && positive(s.frequency_mhz)
                && positive(s.hashrate_ghs)
                && positive(s.power_w)
                && positive(s.temp_asic_c)
                && positive(s.efficiency_j_th)
        })
        .collect();
    valid.sort_by_key(|s| s.timestamp);
    let skipped = samples.len() - valid.len();
    (valid, skipped)
}

/// Sliding window over ascending samples: a window spanning at most `window_ms` that holds at
/// least `min_settings` distinct settings is flagged. Overlapping flagged windows merge.
pub fn detect_benchmark_sessions(valid: &[&Sample], window_ms: i64, min_settings: usize) -> Vec<BenchmarkSession> {
    let settings: Vec<Option<Setting>> = valid.iter().map(|s| Setting::of(s)).collect();
    let mut counts: HashMap<Setting, usize> = HashMap::new();
    // Inclusive index ranges of merged sessions.
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut left = 0;

    for right in 0..valid.len() {
        if let Some(s) = settings[right] {
            *counts.entry(s).or_default() += 1;
        }
        while valid[right].timestamp - valid[left].timestamp > window_ms {
            if let Some(s) = settings[left]
                && let Some(c) = counts.get_mut(&s)
            {
                *c -= 1;
                if *c == 0 {
                    counts.remove(&s);
                }
            }
            left += 1;
        }
        if counts.len() >= min_settings.max(1) {
            match ranges.last_mut() {
                Some(last) if left <= last.1 => last.1 = right,
                _ => ranges.push((left, right)),
            }
        }
    }

    ranges
        .into_iter()
        .map(|(from, to)| {
            let window = &valid[from..=to];
            let mut per_setting: HashMap<Setting, usize> = HashMap::new();
            for s in window.iter().filter_map(|s| Setting::of(s)) {
                *per_setting.entry(s).or_default() += 1;
            }
            let mut settings: Vec<SettingCount> = per_setting
                .into_iter()
                .map(|(setting, samples)| SettingCount { setting, samples })
                .collect();
            settings.sort_by_key(|c| c.setting);
            BenchmarkSession {
                start: window[0].timestamp,
                end: window[window.len() - 1].timestamp,
                settings_tested: settings.len(),
                samples: window.len(),
                settings,
            }
        })
        .collect()
}

/// Performance discounted by variability.
pub fn sweet_spot(performance: f64, stability: f64) -> f64 {
    performance / (1.0 + stability / 100.0)
}

fn norm(x: f64, best: f64) -> f64 {
    if best > 0.0 { 100.0 * x / best } else { 0.0 }
}

struct Accumulated<'a> {
    samples: Vec<&'a Sample>,
    accepted: u64,
    rejected: u64,
}

/// Scores every setting with at least `min_samples` valid samples, best first.
pub fn score_settings(valid: &[&Sample], min_samples: usize) -> Vec<SettingScore> {
    let mut groups: HashMap<Setting, Accumulated<'_>> = HashMap::new();
    let mut prev: Option<&Sample> = None;
    for s in valid {
        let Some(setting) = Setting::of(s) else { continue };
        let group = groups.entry(setting).or_insert_with(|| Accumulated {
            samples: Vec::new(),
            accepted: 0,
            rejected: 0,
        });
        // Counter movement since the previous sample is credited to the setting now running.
        if let Some(p) = prev {
            group.accepted += counter_delta(p.shares_accepted, s.shares_accepted);
            group.rejected += counter_delta(p.shares_rejected, s.shares_rejected);
        }
        group.samples.push(s);
        prev = Some(s);
    }

    struct Raw {
        setting: Setting,
        samples: usize,
        duration_hours: f64,
        hashrate: HashrateMetrics,
        efficiency: MeanStd,
        temperature: TemperatureMetrics,
        power: MeanStd,
        rejection_rate_percent: f64,
        stability: f64,
    }

    let mut raw: Vec<Raw> = groups
        .into_iter()
        .filter(|(_, g)| g.samples.len() >= min_samples.max(2))
        .filter_map(|(setting, g)| {
            let series = |f: fn(&Sample) -> Option<f64>| -> Vec<f64> { g.samples.iter().filter_map(|s| f(s)).collect() };
            let hashrates = series(|s| s.hashrate_ghs);
            let efficiencies = series(|s| s.efficiency_j_th);
            let temps = series(|s| s.temp_asic_c);
            let powers = series(|s| s.power_w);

            let hashrate = HashrateMetrics {
                mean: stats::mean(&hashrates)?,
                std: stats::std_dev(&hashrates),
                min: stats::min(&hashrates)?,
                max: stats::max(&hashrates)?,
                cv_percent: stats::cv_percent(&hashrates)?,
            };
            let efficiency = MeanStd {
                mean: stats::mean(&efficiencies)?,
                std: stats::std_dev(&efficiencies),
            };
            let temperature = TemperatureMetrics {
                mean: stats::mean(&temps)?,
                max: stats::max(&temps)?,
                std: stats::std_dev(&temps),
            };
            let power = MeanStd {
                mean: stats::mean(&powers)?,
                std: stats::std_dev(&powers),
            };
            let stability = 0.5 * hashrate.cv_percent + 0.3 * temperature.std + 0.2 * efficiency.std;
            let first = g.samples.first()?.timestamp;
            let last = g.samples.last()?.timestamp;
            let shares = g.accepted + g.rejected;
            Some(Raw {
                setting,
                samples: g.samples.len(),
                duration_hours: (last - first) as f64 / MS_PER_HOUR as f64,
                hashrate,
                efficiency,
                temperature,
                power,
                rejection_rate_percent: if shares == 0 {
                    0.0
                } else {
                    g.rejected as f64 / shares as f64 * 100.0
                },
                stability,
            })
        })
        .collect();
    raw.sort_by_key(|r| r.setting);

    let best = |f: &dyn Fn(&Raw) -> f64| raw.iter().map(f).fold(0.0_f64, f64::max);
    let best_hashrate = best(&|r| r.hashrate.mean);
    let best_inv_eff = best(&|r| 1.0 / r.efficiency.mean);
    let best_inv_temp = best(&|r| 1.0 / r.temperature.mean);
    let best_per_watt = best(&|r| r.hashrate.mean / r.power.mean);

    let mut scores: Vec<SettingScore> = raw
        .iter()
        .map(|r| {
            let performance = 0.4 * norm(r.hashrate.mean, best_hashrate)
                + 0.3 * norm(1.0 / r.efficiency.mean, best_inv_eff)
                + 0.2 * norm(1.0 / r.temperature.mean, best_inv_temp)
                + 0.1 * norm(r.hashrate.mean / r.power.mean, best_per_watt);
            SettingScore {
                setting: r.setting,
                samples: r.samples,
                duration_hours: r.duration_hours,
                hashrate: r.hashrate.clone(),
                efficiency: r.efficiency.clone(),
                temperature: r.temperature.clone(),
                power: r.power.clone(),
                rejection_rate_percent: r.rejection_rate_percent,
                performance_score: performance,
                stability_score: r.stability,
                sweet_spot_score: sweet_spot(performance, r.stability),
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.sweet_spot_score
            .total_cmp(&a.sweet_spot_score)
            .then(b.performance_score.total_cmp(&a.performance_score))
            .then(a.stability_score.total_cmp(&b.stability_score))
    });
    scores
}

fn counter_delta(prev: Option<u64>, cur: Option<u64>) -> u64 {
    match (prev, cur) {
        (Some(p), Some(c)) if c >= p => c - p,
        // Counter reset (restart): the new value is what accumulated since.
        (Some(_), Some(c)) => c,
        _ => 0,
    }
}

/// Direction of a series by least-squares slope over its index.
pub fn trend_label(values: &[f64]) -> StabilityTrend {
    if values.len() < 3 {
        return StabilityTrend::InsufficientData;
    }
    match stats::trend(values) {
        Some(fit) if fit.slope > TREND_SLOPE_THRESHOLD => StabilityTrend::Degrading,
        Some(fit) if fit.slope < -TREND_SLOPE_THRESHOLD => StabilityTrend::Improving,
        Some(_) => StabilityTrend::Stable,
        None => StabilityTrend::InsufficientData,
    }
}

/// Rolling-window variability of one setting's ascending samples. The window is a quarter of
/// the samples, capped at 20. None below 10 samples.
pub fn stability_over_time(setting: Setting, samples: &[&Sample]) -> Option<SettingStability> {
    if samples.len() < MIN_TIMELINE_SAMPLES {
        return None;
    }
    let window_size = MAX_TIMELINE_WINDOW.min(samples.len() / 4);
    let points: Vec<StabilityPoint> = samples
        .windows(window_size)
        .filter_map(|window| {
            let series = |f: fn(&Sample) -> Option<f64>| -> Vec<f64> { window.iter().filter_map(|s| f(s)).collect() };
            let hashrates = series(|s| s.hashrate_ghs);
            let efficiencies = series(|s| s.efficiency_j_th);
            let temps = series(|s| s.temp_asic_c);
            Some(StabilityPoint {
                timestamp: window.last()?.timestamp,
                hashrate_cv_percent: stats::cv_percent(&hashrates)?,
                efficiency_std: stats::std_dev(&efficiencies),
                temp_std: stats::std_dev(&temps),
                mean_hashrate_ghs: stats::mean(&hashrates)?,
                mean_efficiency_j_th: stats::mean(&efficiencies)?,
            })
        })
        .collect();
    let cvs: Vec<f64> = points.iter().map(|p| p.hashrate_cv_percent).collect();
    Some(SettingStability {
        setting,
        window_size,
        overall_stability: stats::mean(&cvs)?,
        trend: trend_label(&cvs),
        points,
    })
}

fn recommendations(rankings: &[SettingScore]) -> Vec<String> {
    let Some(best) = rankings.first() else {
        return vec!["No qualifying settings. Collect more data with varied voltage/frequency combinations.".into()];
    };
    let mut out = Vec::new();
    let top = &rankings[..rankings.len().min(TOP_SETTINGS)];
    if top.len() > 1 {
        let volts = top.iter().map(|s| s.setting.voltage_mv);
        let (lo, hi) = (volts.clone().min().unwrap_or_default(), volts.max().unwrap_or_default());
        out.push(format!(
            "Optimal voltage range: {:.3}V - {:.3}V",
            lo as f64 / 1000.0,
            hi as f64 / 1000.0
        ));
        let freqs = top.iter().map(|s| s.setting.frequency_mhz);
        let (lo, hi) = (freqs.clone().min().unwrap_or_default(), freqs.max().unwrap_or_default());
        out.push(format!("Optimal frequency range: {}MHz - {}MHz", lo, hi));
    }
    if best.stability_score > 5.0 {
        out.push("Consider reducing frequency or voltage for better stability".into());
    }
    if best.temperature.mean > 80.0 {
        out.push("High temperatures detected. Improve cooling or reduce frequency".into());
    }
    if best.efficiency.mean > 16.0 {
        out.push("Consider underclocking for better energy efficiency".into());
    }
    out.push(format!(
        "Recommended setting: {} (sweet spot score {:.2})",
        best.setting, best.sweet_spot_score
    ));
    out
}

/// Full report over one device's samples in [window_start, window_end).
pub fn analyze(
    device_id: i64,
    samples: &[Sample],
    window_start: i64,
    window_end: i64,
    config: &OptimizerConfig,
) -> Analysis<OptimizationReport> {
    let (valid, skipped) = valid_samples(samples);
    let rankings = score_settings(&valid, config.min_samples_per_setting);
    if rankings.is_empty() {
        return Analysis::InsufficientData {
            required: config.min_samples_per_setting,
            available: valid.len(),
        };
    }
    let benchmark_sessions =
        detect_benchmark_sessions(&valid, config.benchmark_window_ms, config.benchmark_min_settings);
    let stability_timeline: Vec<SettingStability> = rankings
        .iter()
        .take(TOP_SETTINGS)
        .filter_map(|r| {
            let held: Vec<&Sample> = valid
                .iter()
                .copied()
                .filter(|s| Setting::of(s) == Some(r.setting))
                .collect();
            stability_over_time(r.setting, &held)
        })
        .collect();
    tracing::debug!(
        device_id,
        valid = valid.len(),
        skipped,
        settings = rankings.len(),
        sessions = benchmark_sessions.len(),
        "optimization analysed"
    );
    Analysis::Ready(OptimizationReport {
        device_id,
        window_start,
        window_end,
        valid_samples: valid.len(),
        benchmark_sessions,
        recommendations: recommendations(&rankings),
        rankings,
        stability_timeline,
        data_quality: DataQuality::from_skipped(skipped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleStatus;

    const MINUTE: i64 = 60_000;

    fn sample(ts: i64, mv: f64, mhz: f64, hashrate: f64) -> Sample {
        let mut s = Sample::failed(ts, 1, "bitaxe".into(), false, SampleStatus::Online);
        s.voltage_set_mv = Some(mv);
        s.frequency_mhz = Some(mhz);
        s.hashrate_ghs = Some(hashrate);
        s.power_w = Some(15.0);
        s.temp_asic_c = Some(60.0);
        s.efficiency_j_th = Some(15.0 / (hashrate / 1000.0));
        s
    }

    /// `pairs` distinct settings, two samples each, spread over 20 minutes.
    fn sweep(pairs: usize) -> Vec<Sample> {
        (0..pairs * 2)
            .map(|i| {
                let p = (i / 2) as f64;
                sample(i as i64 * 2 * MINUTE, 1100.0 + 10.0 * p, 500.0 + 25.0 * p, 1000.0)
            })
            .collect()
    }

    #[test]
    fn four_settings_are_not_a_benchmark() {
        let samples = sweep(4);
        let (valid, _) = valid_samples(&samples);
        assert!(detect_benchmark_sessions(&valid, 30 * MINUTE, 5).is_empty());
    }

    #[test]
    fn five_settings_are_a_benchmark() {
        let samples = sweep(5);
        let (valid, _) = valid_samples(&samples);
        let sessions = detect_benchmark_sessions(&valid, 30 * MINUTE, 5);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].settings_tested, 5);
        assert_eq!(sessions[0].samples, 10);
    }

    #[test]
    fn settings_spread_beyond_window_are_not_a_benchmark() {
        // Five settings, but 10 minutes apart: any 30-minute window sees at most four.
        let samples: Vec<_> = (0..5)
            .map(|p| sample(p * 10 * MINUTE, 1100.0 + 10.0 * p as f64, 500.0, 1000.0))
            .collect();
        let (valid, _) = valid_samples(&samples);
        assert!(detect_benchmark_sessions(&valid, 30 * MINUTE, 5).is_empty());
    }

    #[test]
    fn overlapping_windows_merge() {
        let mut samples = sweep(5);
        let offset = 10 * 2 * MINUTE;
        samples.extend(sweep(5).into_iter().map(|mut s| {
            s.timestamp += offset;
            s
        }));
        let (valid, _) = valid_samples(&samples);
        let sessions = detect_benchmark_sessions(&valid, 30 * MINUTE, 5);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].samples, 20);
    }

    #[test]
    fn sweet_spot_is_monotonic() {
        assert!(sweet_spot(80.0, 5.0) > sweet_spot(70.0, 5.0));
        assert!(sweet_spot(80.0, 2.0) > sweet_spot(80.0, 5.0));
        assert_eq!(sweet_spot(80.0, 0.0), 80.0);
    }

    #[test]
    fn invalid_samples_are_skipped_not_fatal() {
        let mut samples: Vec<_> = (0..12).map(|i| sample(i * MINUTE, 1150.0, 525.0, 1000.0)).collect();
        samples[3].power_w = None;
        samples.push(Sample::failed(13 * MINUTE, 1, "bitaxe".into(), true, SampleStatus::Timeout));
        let report = analyze(1, &samples, 0, 14 * MINUTE, &OptimizerConfig::default())
            .ready()
            .unwrap();
        assert_eq!(report.rankings.len(), 1);
        assert_eq!(report.rankings[0].samples, 11);
        assert_eq!(report.data_quality, DataQuality::Partial { skipped: 2 });
        // A single setting is its own best on every normalised term.
        assert!((report.rankings[0].performance_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_samples_per_setting_is_insufficient() {
        let samples: Vec<_> = (0..9).map(|i| sample(i * MINUTE, 1150.0, 525.0, 1000.0)).collect();
        assert!(analyze(1, &samples, 0, 10 * MINUTE, &OptimizerConfig::default()).is_insufficient());
    }

    /// `n` samples at one setting whose hashrate swings by `swing(i)` around 1000 GH/s.
    fn swinging(n: usize, swing: impl Fn(usize) -> f64) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                sample(i as i64 * MINUTE, 1150.0, 525.0, 1000.0 + sign * swing(i))
            })
            .collect()
    }

    fn setting() -> Setting {
        Setting {
            voltage_mv: 1150,
            frequency_mhz: 525,
        }
    }

    #[test]
    fn trend_labels_follow_slope() {
        assert_eq!(trend_label(&[10.0, 9.5, 9.0, 8.5, 8.0]), StabilityTrend::Improving);
        assert_eq!(trend_label(&[8.0, 8.5, 9.0, 9.5, 10.0]), StabilityTrend::Degrading);
        assert_eq!(trend_label(&[9.0, 9.1, 8.9, 9.0, 9.1]), StabilityTrend::Stable);
        assert_eq!(trend_label(&[9.0, 12.0]), StabilityTrend::InsufficientData);
    }

    #[test]
    fn growing_swings_degrade_stability() {
        let samples = swinging(40, |i| 5.0 * i as f64);
        let (valid, _) = valid_samples(&samples);
        let timeline = stability_over_time(setting(), &valid).unwrap();
        assert_eq!(timeline.window_size, 10);
        assert_eq!(timeline.points.len(), 31);
        assert_eq!(timeline.points.last().unwrap().timestamp, 39 * MINUTE);
        assert_eq!(timeline.trend, StabilityTrend::Degrading);
        let cvs: Vec<f64> = timeline.points.iter().map(|p| p.hashrate_cv_percent).collect();
        assert!((timeline.overall_stability - stats::mean(&cvs).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn shrinking_swings_improve_stability() {
        let samples = swinging(40, |i| 5.0 * (39 - i) as f64);
        let (valid, _) = valid_samples(&samples);
        let timeline = stability_over_time(setting(), &valid).unwrap();
        assert_eq!(timeline.trend, StabilityTrend::Improving);
    }

    #[test]
    fn steady_hashrate_is_stable() {
        let samples = swinging(40, |_| 0.0);
        let (valid, _) = valid_samples(&samples);
        let timeline = stability_over_time(setting(), &valid).unwrap();
        assert_eq!(timeline.trend, StabilityTrend::Stable);
        assert_eq!(timeline.overall_stability, 0.0);
        assert!(timeline.points.iter().all(|p| p.mean_hashrate_ghs == 1000.0));
    }

    #[test]
    fn short_settings_get_no_timeline() {
        let samples = swinging(9, |i| i as f64);
        let (valid, _) = valid_samples(&samples);
        assert!(stability_over_time(setting(), &valid).is_none());

        // Ranked, but below the timeline minimum.
        let config = OptimizerConfig {
            min_samples_per_setting: 5,
            ..OptimizerConfig::default()
        };
        let report = analyze(1, &samples, 0, 10 * MINUTE, &config).ready().unwrap();
        assert_eq!(report.rankings.len(), 1);
        assert!(report.stability_timeline.is_empty());
    }

    #[test]
    fn share_counters_feed_rejection_rate() {
        let samples: Vec<_> = (0..11u64)
            .map(|i| {
                let mut s = sample(i as i64 * MINUTE, 1150.0, 525.0, 1000.0);
                s.shares_accepted = Some(100 + 9 * i);
                s.shares_rejected = Some(i);
                s
            })
            .collect();
        let (valid, _) = valid_samples(&samples);
        let scores = score_settings(&valid, 10);
        assert!((scores[0].rejection_rate_percent - 10.0).abs() < 1e-9);
    }
}
