// Collection scheduler. One task runs cycles back to back: fan out one poll per device,
// join them all, turn results into samples, hand the batch to the writer, then wait.

pub mod backoff;
pub mod breaker;
pub mod context;
pub mod writer;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, interval, sleep_until};
use tracing::Instrument;

use crate::alerts::{AlertCommand, AlertSender, send_alert};
use crate::device_client::{TelemetrySource, classify};
use crate::models::{AlertDraft, AlertKind, Sample, Severity, now_ms};
use crate::telemetry_repo::TelemetryRepo;
use breaker::{CircuitState, Permission};
use context::{CollectorStatus, SchedulerContext};
use writer::WriterCounters;

/// Uptime drop (seconds) versus the previous sample that counts as a restart.
pub const RESTART_UPTIME_DROP_SECS: u64 = 360;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub offline_after_failures: u32,
    pub shutdown_grace: Duration,
    pub stats_log_interval: Duration,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub timestamp: i64,
    /// One sample per device, in configured order.
    pub samples: Vec<Sample>,
    /// Devices that returned usable telemetry.
    pub successes: usize,
    pub network_failures: usize,
    pub data_failures: usize,
    /// (device id, hostname) pairs reported fresh this cycle.
    pub hostnames: Vec<(i64, String)>,
}

impl CycleReport {
    /// A cycle succeeds when at least one device returned usable telemetry.
    pub fn succeeded(&self) -> bool {
        self.successes > 0
    }
}

/// Poll every device once and build the cycle's samples.
/// Breaker failures are recorded per poll; trial handling is left to the caller.
pub async fn run_cycle<S: TelemetrySource>(
    source: &S,
    ctx: &mut SchedulerContext,
    cycle_ts: i64,
    config: &SchedulerConfig,
    alert_tx: &AlertSender,
) -> CycleReport {
    let addresses: Vec<String> = ctx.devices.iter().map(|d| d.device.address.clone()).collect();
    let mut results: Vec<_> = stream::iter(0..addresses.len())
        .map(|i| {
            let address = addresses[i].as_str();
            async move { (i, source.fetch(address).await) }
        })
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(i, _)| *i);

    let mut report = CycleReport {
        timestamp: cycle_ts,
        ..Default::default()
    };
    for (i, result) in results {
        let ts = ctx.next_timestamp(i, cycle_ts);
        let device_id = ctx.devices[i].device.id;
        let address = addresses[i].as_str();
        match result {
            Ok(fetched) => {
                let readings = fetched.readings;
                let name = ctx.hostnames.resolve(address, readings.hostname.as_deref());
                if !name.cached {
                    report.hostnames.push((device_id, name.name.clone()));
                }
                let state = &mut ctx.devices[i];
                if state.consecutive_failures >= config.offline_after_failures {
                    send_alert(
                        alert_tx,
                        AlertCommand::Resolve {
                            device_id: Some(device_id),
                            kind: AlertKind::DeviceOffline,
                        },
                    );
                }
                state.consecutive_failures = 0;

                if let (Some(prev), Some(current)) = (state.last_uptime, readings.uptime_seconds)
                    && prev > current + RESTART_UPTIME_DROP_SECS
                {
                    tracing::info!(device_id, prev_uptime = prev, uptime = current, "device restart detected");
                    send_alert(
                        alert_tx,
                        AlertCommand::RecordEvent(
                            AlertDraft::new(
                                Some(device_id),
                                AlertKind::Restart,
                                Severity::Info,
                                format!("{} restarted (uptime {}s -> {}s)", name.name, prev, current),
                            )
                            .with_value(current as f64, prev as f64),
                        ),
                    );
                }
                if readings.uptime_seconds.is_some() {
                    state.last_uptime = readings.uptime_seconds;
                }

                ctx.breaker.record_success();
                ctx.stats.polls_ok += 1;
                report.successes += 1;
                report.samples.push(Sample {
                    timestamp: ts,
                    device_id,
                    hostname: name.name,
                    hostname_cached: name.cached,
                    status: classify(&readings),
                    hashrate_ghs: readings.hashrate_ghs,
                    temp_asic_c: readings.temp_asic_c,
                    temp_vr_c: readings.temp_vr_c,
                    power_w: readings.power_w,
                    voltage_set_mv: readings.voltage_set_mv,
                    voltage_actual_mv: readings.voltage_actual_mv,
                    frequency_mhz: readings.frequency_mhz,
                    shares_accepted: readings.shares_accepted,
                    shares_rejected: readings.shares_rejected,
                    wifi_rssi: readings.wifi_rssi,
                    uptime_seconds: readings.uptime_seconds,
                    efficiency_j_th: readings.efficiency_j_th(),
                    raw_payload: Some(fetched.raw),
                });
            }
            Err(e) => {
                let name = ctx.hostnames.resolve(address, None);
                let state = &mut ctx.devices[i];
                state.consecutive_failures += 1;
                let failures = state.consecutive_failures;
                ctx.stats.polls_failed += 1;
                ctx.stats.fleet_failures += 1;
                tracing::debug!(device_id, address, error = %e, consecutive_failures = failures, "poll failed");

                if e.is_data_failure() {
                    report.data_failures += 1;
                } else {
                    report.network_failures += 1;
                    if ctx.breaker.record_failure(Instant::now()) {
                        send_alert(
                            alert_tx,
                            AlertCommand::Raise(AlertDraft::new(
                                None,
                                AlertKind::CollectionSuspended,
                                Severity::Critical,
                                format!(
                                    "collection suspended after {} consecutive network failures",
                                    ctx.breaker.consecutive_failures()
                                ),
                            )),
                        );
                    }
                }
                // Re-sent every failing cycle past the threshold; the store keeps one open alert.
                if failures >= config.offline_after_failures {
                    send_alert(
                        alert_tx,
                        AlertCommand::Raise(
                            AlertDraft::new(
                                Some(device_id),
                                AlertKind::DeviceOffline,
                                Severity::Warning,
                                format!("{} unreachable for {} polls: {}", name.name, failures, e),
                            )
                            .with_value(failures as f64, config.offline_after_failures as f64),
                        ),
                    );
                }
                report
                    .samples
                    .push(Sample::failed(ts, device_id, name.name, name.cached, e.status_tag()));
            }
        }
    }
    report
}

/// Channels, store handle and shutdown signal for the scheduler task.
pub struct SchedulerDeps<S> {
    pub source: Arc<S>,
    pub repo: Arc<TelemetryRepo>,
    pub write_tx: mpsc::Sender<Vec<Sample>>,
    pub alert_tx: AlertSender,
    pub writer_counters: Arc<WriterCounters>,
    pub status_tx: watch::Sender<CollectorStatus>,
    pub shutdown_rx: watch::Receiver<bool>,
}

enum CycleEnd {
    Done(CycleReport),
    /// Shutdown arrived mid-cycle; Some if the cycle finished within the grace period.
    Shutdown(Option<CycleReport>),
}

/// Spawns the scheduler. Exits on shutdown after saving the context; dropping `write_tx`
/// lets the writer drain and stop.
pub fn spawn<S: TelemetrySource + 'static>(
    deps: SchedulerDeps<S>,
    mut ctx: SchedulerContext,
    config: SchedulerConfig,
) -> tokio::task::JoinHandle<()> {
    let SchedulerDeps {
        source,
        repo,
        write_tx,
        alert_tx,
        writer_counters,
        status_tx,
        mut shutdown_rx,
    } = deps;

    let scheduler_span = tracing::debug_span!("scheduler", devices = ctx.devices.len());
    tokio::spawn(
        async move {
            let mut stats_log_tick = interval(config.stats_log_interval);
            stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut next_cycle_at = Instant::now();

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = sleep_until(next_cycle_at) => {}
                    _ = shutdown_rx.changed() => break,
                    _ = stats_log_tick.tick() => {
                        tracing::info!(
                            cycles = ctx.stats.cycles,
                            cycles_suspended = ctx.stats.cycles_suspended,
                            polls_ok = ctx.stats.polls_ok,
                            polls_failed = ctx.stats.polls_failed,
                            breaker_state = ctx.breaker.state().as_str(),
                            interval_secs = ctx.backoff.interval().as_secs_f64(),
                            samples_saved_total = writer_counters.samples_saved_total.load(Ordering::Relaxed),
                            "collector stats"
                        );
                        continue;
                    }
                }

                let started = Instant::now();
                let trial = match ctx.breaker.permission(started) {
                    Permission::Allow => false,
                    Permission::Trial => true,
                    Permission::Deny { remaining } => {
                        ctx.stats.cycles_suspended += 1;
                        status_tx.send_replace(ctx.status());
                        tracing::debug!(remaining_secs = remaining.as_secs(), "polling suspended by circuit breaker");
                        next_cycle_at = started + remaining;
                        continue;
                    }
                };

                let end = {
                    let cycle = run_cycle(source.as_ref(), &mut ctx, now_ms(), &config, &alert_tx);
                    tokio::pin!(cycle);
                    tokio::select! {
                        report = &mut cycle => CycleEnd::Done(report),
                        _ = shutdown_rx.changed() => {
                            match tokio::time::timeout(config.shutdown_grace, &mut cycle).await {
                                Ok(report) => CycleEnd::Shutdown(Some(report)),
                                Err(_) => CycleEnd::Shutdown(None),
                            }
                        }
                    }
                };

                let (report, stop) = match end {
                    CycleEnd::Done(report) => (report, false),
                    CycleEnd::Shutdown(Some(report)) => (report, true),
                    CycleEnd::Shutdown(None) => {
                        tracing::warn!(grace_secs = config.shutdown_grace.as_secs(), "in-flight cycle abandoned at shutdown");
                        break;
                    }
                };
                ctx.stats.cycles += 1;
                let succeeded = report.succeeded();
                tracing::debug!(
                    successes = report.successes,
                    network_failures = report.network_failures,
                    data_failures = report.data_failures,
                    "cycle complete"
                );

                for (device_id, hostname) in &report.hostnames {
                    if let Err(e) = repo.update_display_name(*device_id, hostname).await {
                        tracing::warn!(error = %e, device_id, operation = "update_display_name", "display name update failed");
                    }
                }
                if write_tx.send(report.samples).await.is_err() {
                    tracing::debug!("Sample writer channel closed");
                }
                if stop {
                    break;
                }

                if trial {
                    ctx.breaker.finish_trial(succeeded, Instant::now());
                    if ctx.breaker.state() == CircuitState::Closed {
                        send_alert(
                            &alert_tx,
                            AlertCommand::Resolve {
                                device_id: None,
                                kind: AlertKind::CollectionSuspended,
                            },
                        );
                    }
                }
                let wait = ctx.backoff.on_cycle(succeeded);
                status_tx.send_replace(ctx.status());
                next_cycle_at = started + wait;
            }

            if let Err(e) = ctx.save() {
                tracing::warn!(error = %e, operation = "save_hostname_cache", "hostname cache save failed");
            }
            tracing::debug!("Scheduler shutting down");
        }
        .instrument(scheduler_span),
    )
}
