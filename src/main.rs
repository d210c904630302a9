use anyhow::{Context, Result};
use minerwatch::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        name = version::NAME,
        version = version::VERSION,
        devices = app_config.devices.len(),
        "starting"
    );

    let write_retry = retry::RetryPolicy {
        max_attempts: app_config.database.write_attempts,
        ..telemetry_repo::RepoOptions::default().write_retry
    };
    let repo = Arc::new(
        telemetry_repo::TelemetryRepo::connect(
            &app_config.database.path,
            telemetry_repo::RepoOptions {
                max_pool_size: app_config.database.max_pool_size,
                retention_days: app_config.database.retention_days,
                write_retry: write_retry.clone(),
                ..Default::default()
            },
        )
        .await?,
    );
    repo.init().await?;
    let devices = repo.sync_devices(&app_config.devices).await?;

    let mut sample_journal = journal::SampleJournal::open(journal::JournalOptions {
        path: PathBuf::from(&app_config.journal.path),
        backup_dir: PathBuf::from(&app_config.journal.backup_dir),
        backup_every_commits: app_config.journal.backup_every_commits,
        backups_to_keep: app_config.journal.backups_to_keep,
    })?;
    for d in &devices {
        sample_journal.register_device(d.id, &d.address);
    }
    if !sample_journal.quick_check()? {
        let outcome = sample_journal.repair()?;
        tracing::warn!(?outcome, "journal repaired at startup");
    }
    let journal_handle = journal::JournalHandle::new(sample_journal);
    if let Err(e) = integrity::verify_stores(&repo, &journal_handle).await {
        tracing::warn!(error = %e, operation = "verify_stores", "startup integrity check could not run");
    }

    let agg_config = aggregation_worker::AggregationWorkerConfig::from_app(&app_config);
    aggregation_worker::backfill(&repo, &agg_config, models::now_ms())
        .await
        .context("startup backfill")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (alert_tx, alert_rx) = mpsc::channel(alerts::ALERT_CHANNEL_CAPACITY);
    let alert_handle = alerts::spawn_alert_task(alert_rx, alerts::AlertManager::new(repo.clone()));

    let (write_tx, write_rx) = mpsc::channel(collector::writer::writer_channel_capacity(
        app_config.database.flush_rate,
    ));
    let writer_counters = Arc::new(collector::writer::WriterCounters::default());
    let writer_handle = collector::writer::spawn_sample_writer(
        write_rx,
        journal_handle.clone(),
        repo.clone(),
        alert_tx.clone(),
        collector::writer::SampleWriterConfig {
            flush_rate: app_config.database.flush_rate,
            flush_interval_secs: app_config.database.flush_interval_secs,
            max_pending_batches: app_config.database.max_pending_batches,
            journal_retry: write_retry,
        },
        writer_counters.clone(),
    );

    let client = device_client::DeviceClient::new(
        Duration::from_secs(app_config.collector.request_timeout_secs),
        retry::RetryPolicy {
            max_attempts: app_config.collector.poll_attempts,
            base_delay: Duration::from_millis(app_config.collector.poll_retry_base_ms),
            ..Default::default()
        },
    )?;
    let ctx = collector::context::SchedulerContext::load(&repo, devices, &app_config).await?;
    let (status_tx, status_rx) = watch::channel(ctx.status());
    let scheduler_handle = collector::spawn(
        collector::SchedulerDeps {
            source: Arc::new(client),
            repo: repo.clone(),
            write_tx,
            alert_tx: alert_tx.clone(),
            writer_counters,
            status_tx,
            shutdown_rx: shutdown_rx.clone(),
        },
        ctx,
        collector::SchedulerConfig {
            max_concurrency: app_config.collector.max_concurrency,
            offline_after_failures: app_config.collector.offline_after_failures,
            shutdown_grace: Duration::from_secs(app_config.collector.shutdown_grace_secs),
            stats_log_interval: Duration::from_secs(app_config.monitoring.stats_log_interval_secs),
        },
    );

    let aggregation_handle = aggregation_worker::spawn(
        repo.clone(),
        Some(journal_handle),
        agg_config,
        shutdown_rx.clone(),
    );
    let analytics_handle = analytics::worker::spawn(
        repo.clone(),
        alert_tx,
        app_config.analytics.clone(),
        shutdown_rx,
    );

    let query = query::QueryService::new(
        repo.clone(),
        app_config.analytics.clone(),
        optimization::OptimizerConfig::from(&app_config.optimization),
    )
    .with_collector(status_rx);
    let app = routes::app(query, app_config.optimization.default_window_hours);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    // Scheduler first: it owns the last write_tx, so the writer drains and exits after it.
    let _ = scheduler_handle.await;
    let _ = writer_handle.await;
    let _ = aggregation_handle.await;
    let _ = analytics_handle.await;
    // Every alert sender is gone now; the alert task finishes its queue.
    let _ = alert_handle.await;
    tracing::info!("shutdown complete");

    Ok(())
}
