// Background analytics: per active device, run anomaly / efficiency / maintenance analyses on a
// timer and turn their findings into alert commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::Grade;
use super::anomaly::{AnomalyReport, AnomalyThresholds, detect_anomalies};
use super::efficiency::{EfficiencyScore, efficiency_score};
use super::maintenance::{MaintenancePrediction, predict_maintenance};
use crate::alerts::{AlertCommand, AlertSender, send_alert};
use crate::config::AnalyticsConfig;
use crate::error::PersistenceError;
use crate::models::{AlertDraft, AlertKind, Device, MS_PER_HOUR, Severity, now_ms};
use crate::telemetry_repo::TelemetryRepo;

/// Maintenance urgency at or above this is critical.
const CRITICAL_URGENCY: f64 = 85.0;

pub fn spawn(
    repo: Arc<TelemetryRepo>,
    alert_tx: AlertSender,
    config: AnalyticsConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, alert_tx, config, shutdown_rx).await;
    })
}

#[instrument(skip_all, fields(interval_secs = config.interval_secs))]
async fn run(
    repo: Arc<TelemetryRepo>,
    alert_tx: AlertSender,
    config: AnalyticsConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_one_pass(&repo, &alert_tx, &config, now_ms()).await {
                    Ok(raised) => debug!(raised, "analytics pass complete"),
                    Err(e) => warn!(error = %e, "analytics pass failed"),
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("Analytics worker shutting down");
}

/// Analyse every active device once and send raise + reconcile commands.
/// Returns the number of raise commands sent.
pub async fn run_one_pass(
    repo: &TelemetryRepo,
    alert_tx: &AlertSender,
    config: &AnalyticsConfig,
    now: i64,
) -> Result<usize, PersistenceError> {
    let mut raised = 0;
    for device in repo.list_devices(true).await? {
        let drafts = analyze_device(repo, &device, config, now).await?;
        let active: Vec<AlertKind> = drafts.iter().map(|d| d.kind).collect();
        raised += drafts.len();
        for draft in drafts {
            send_alert(alert_tx, AlertCommand::Raise(draft));
        }
        send_alert(
            alert_tx,
            AlertCommand::Reconcile {
                device_id: Some(device.id),
                managed: AlertKind::ANALYTICS.to_vec(),
                active,
            },
        );
    }
    Ok(raised)
}

/// Runs the analyses for one device and returns the alerts its current state warrants.
pub async fn analyze_device(
    repo: &TelemetryRepo,
    device: &Device,
    config: &AnalyticsConfig,
    now: i64,
) -> Result<Vec<AlertDraft>, PersistenceError> {
    let thresholds = AnomalyThresholds {
        min_samples: config.anomaly_min_samples,
        temp_warning_c: config.temp_warning_c,
        temp_critical_c: config.temp_critical_c,
    };
    let samples = repo
        .recent_samples(device.id, config.anomaly_window_samples as u32)
        .await?;
    let anomalies = detect_anomalies(&samples, &thresholds).ready();

    let efficiency_from = now - config.efficiency_window_hours as i64 * MS_PER_HOUR;
    let hourly = repo.hourly_stats(device.id, efficiency_from, now).await?;
    let efficiency = efficiency_score(&hourly, config.efficiency_min_hours).ready();

    let maintenance_from = now - config.maintenance_window_hours as i64 * MS_PER_HOUR;
    let hourly = repo.hourly_stats(device.id, maintenance_from, now).await?;
    let maintenance = predict_maintenance(&hourly, config.maintenance_min_hours).ready();

    Ok(alerts_for_device(
        device,
        anomalies.as_ref(),
        efficiency.as_ref(),
        maintenance.as_ref(),
        config,
    ))
}

/// At most one draft per kind; several anomalies of a kind collapse into the most severe.
pub fn alerts_for_device(
    device: &Device,
    anomalies: Option<&AnomalyReport>,
    efficiency: Option<&EfficiencyScore>,
    maintenance: Option<&MaintenancePrediction>,
    config: &AnalyticsConfig,
) -> Vec<AlertDraft> {
    let mut drafts: Vec<AlertDraft> = Vec::new();

    for a in anomalies.into_iter().flat_map(|r| r.current()) {
        if a.severity < Severity::Warning {
            continue;
        }
        let message = match a.kind {
            AlertKind::HashrateAnomaly => format!(
                "{}: hashrate {:.1} GH/s deviates {:.1}σ from {:.1}",
                device.display_name,
                a.value,
                a.deviation_sigma.unwrap_or_default(),
                a.expected.unwrap_or_default()
            ),
            AlertKind::TemperatureSpike => format!("{}: ASIC temperature {:.1} °C", device.display_name, a.value),
            _ => format!("{}: power {:.1} W above normal", device.display_name, a.value),
        };
        let draft = AlertDraft::new(Some(device.id), a.kind, a.severity, message).with_value(a.value, a.threshold);
        match drafts.iter_mut().find(|d| d.kind == draft.kind) {
            Some(existing) if existing.severity < draft.severity => *existing = draft,
            Some(_) => {}
            None => drafts.push(draft),
        }
    }

    if let Some(m) = maintenance
        && m.urgency > config.maintenance_alert_score
    {
        let severity = if m.urgency >= CRITICAL_URGENCY {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let issues: Vec<&str> = m.predicted_issues.iter().map(|i| i.recommendation).collect();
        drafts.push(
            AlertDraft::new(
                Some(device.id),
                AlertKind::MaintenanceNeeded,
                severity,
                format!(
                    "{}: maintenance urgency {:.1}. {}",
                    device.display_name,
                    m.urgency,
                    issues.join("; ")
                ),
            )
            .with_value(m.urgency, config.maintenance_alert_score),
        );
    }

    if let Some(e) = efficiency
        && e.grade == Grade::F
    {
        drafts.push(
            AlertDraft::new(
                Some(device.id),
                AlertKind::LowEfficiencyScore,
                Severity::Warning,
                format!("{}: efficiency score {:.1} (grade F)", device.display_name, e.score),
            )
            .with_value(e.score, 60.0),
        );
    }

    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::anomaly::Anomaly;
    use crate::models::DataQuality;

    fn device() -> Device {
        Device {
            id: 3,
            address: "10.0.0.3".into(),
            display_name: "bitaxe-3".into(),
            baseline_hashrate_ghs: 1000.0,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn anomaly(kind: AlertKind, severity: Severity, timestamp: i64) -> Anomaly {
        Anomaly {
            kind,
            severity,
            timestamp,
            value: 88.0,
            expected: None,
            threshold: 85.0,
            deviation_sigma: None,
        }
    }

    #[test]
    fn only_current_anomalies_raise_and_collapse_per_kind() {
        let report = AnomalyReport {
            anomalies: vec![
                anomaly(AlertKind::HashrateAnomaly, Severity::Critical, 5),
                anomaly(AlertKind::TemperatureSpike, Severity::Warning, 9),
                anomaly(AlertKind::TemperatureSpike, Severity::Critical, 9),
            ],
            samples: 10,
            latest_timestamp: 9,
            data_quality: DataQuality::Complete,
        };
        let drafts = alerts_for_device(&device(), Some(&report), None, None, &AnalyticsConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, AlertKind::TemperatureSpike);
        assert_eq!(drafts[0].severity, Severity::Critical);
    }

    #[test]
    fn maintenance_urgency_sets_severity() {
        let prediction = |urgency| MaintenancePrediction {
            urgency,
            thermal_stress: 1.0,
            hashrate_decline: 1.0,
            efficiency_decline: 0.0,
            predicted_issues: vec![],
            confidence: 1.0,
            points: 50,
            data_quality: DataQuality::Complete,
        };
        let config = AnalyticsConfig::default();
        assert!(alerts_for_device(&device(), None, None, Some(&prediction(70.0)), &config).is_empty());
        let warn = alerts_for_device(&device(), None, None, Some(&prediction(75.0)), &config);
        assert_eq!(warn[0].severity, Severity::Warning);
        let crit = alerts_for_device(&device(), None, None, Some(&prediction(85.0)), &config);
        assert_eq!(crit[0].severity, Severity::Critical);
    }

    #[test]
    fn grade_f_raises_low_efficiency() {
        let score = EfficiencyScore {
            score: 42.0,
            grade: Grade::F,
            factors: vec![],
            recommendations: vec![],
            hours: 24,
            data_quality: DataQuality::Complete,
        };
        let drafts = alerts_for_device(&device(), None, Some(&score), None, &AnalyticsConfig::default());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, AlertKind::LowEfficiencyScore);
    }
}
