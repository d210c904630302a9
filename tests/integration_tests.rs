// Integration tests: HTTP endpoints over a temp store

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use common::{device_entry, online_sample, temp_repo};
use minerwatch::collector::backoff::IntervalBackoff;
use minerwatch::collector::breaker::CircuitBreaker;
use minerwatch::collector::context::SchedulerContext;
use minerwatch::config::AnalyticsConfig;
use minerwatch::hostname_cache::HostnameCache;
use minerwatch::models::*;
use minerwatch::optimization::OptimizerConfig;
use minerwatch::query::QueryService;
use minerwatch::routes;
use minerwatch::telemetry_repo::TelemetryRepo;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::Instant;

const FIVE_MINUTES: i64 = 5 * 60_000;

async fn test_server() -> (TempDir, Arc<TelemetryRepo>, Vec<Device>, TestServer) {
    let (dir, repo) = temp_repo(7).await;
    let devices = repo
        .sync_devices(&[device_entry("10.0.0.1"), device_entry("10.0.0.2")])
        .await
        .unwrap();
    let query = QueryService::new(repo.clone(), AnalyticsConfig::default(), OptimizerConfig::default());
    let server = TestServer::new(routes::app(query, 48));
    (dir, repo, devices, server)
}

/// A sample at one operating point. Efficiency follows from hashrate and power.
fn at_setting(ts: i64, device_id: i64, mv: f64, mhz: f64, hashrate: f64, power: f64) -> Sample {
    let mut s = online_sample(ts, device_id, hashrate);
    s.voltage_set_mv = Some(mv);
    s.frequency_mhz = Some(mhz);
    s.power_w = Some(power);
    s.efficiency_j_th = efficiency_j_per_th(hashrate, power);
    s
}

/// 48 hours in 6-hour blocks rotating through three settings; the middle one is best overall.
fn rotating_settings(device_id: i64, end: i64) -> Vec<Sample> {
    let settings = [
        (1150.0, 525.0, 1000.0, 15.0),
        (1200.0, 600.0, 1150.0, 19.0),
        (1100.0, 490.0, 900.0, 13.0),
    ];
    let start = end - 48 * MS_PER_HOUR + FIVE_MINUTES;
    (0..48 * 12)
        .map(|i| {
            let ts = start + i * FIVE_MINUTES;
            let block = ((ts - start) / (6 * MS_PER_HOUR)) as usize;
            let (mv, mhz, hashrate, power) = settings[block % settings.len()];
            at_setting(ts, device_id, mv, mhz, hashrate, power)
        })
        .collect()
}

#[tokio::test]
async fn test_version_endpoint() {
    let (_dir, _repo, _devices, server) = test_server().await;
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("minerwatch"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_status_lists_devices_with_latest_sample() {
    let (_dir, repo, devices, server) = test_server().await;
    let now = now_ms();
    repo.save_samples(&[
        online_sample(now - 60_000, devices[0].id, 990.0),
        online_sample(now - 30_000, devices[0].id, 1010.0),
    ])
    .await
    .unwrap();

    let response = server.get("/api/status").await;
    response.assert_status_ok();
    let json: Value = response.json();
    let entries = json["devices"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["device"]["displayName"], "miner-1");
    assert_eq!(entries[0]["latest"]["hashrateGhs"], 1010.0);
    assert!(entries[1]["latest"].is_null());
    assert!(json["collector"].is_null());
}

#[tokio::test]
async fn test_status_reports_breaker_state() {
    let (dir, repo, devices, _server) = test_server().await;
    let mut ctx = SchedulerContext::new(
        devices,
        HostnameCache::load(dir.path().join("hostnames.json")),
        CircuitBreaker::new(2, Duration::from_secs(300)),
        IntervalBackoff::new(Duration::from_secs(30), Duration::from_secs(300), 2.0, 3),
    );
    let (status_tx, status_rx) = watch::channel(ctx.status());
    let query = QueryService::new(repo.clone(), AnalyticsConfig::default(), OptimizerConfig::default())
        .with_collector(status_rx);
    let server = TestServer::new(routes::app(query, 48));

    let json: Value = server.get("/api/status").await.json();
    assert_eq!(json["collector"]["breaker"]["state"], "closed");

    ctx.breaker.record_failure(Instant::now());
    ctx.breaker.record_failure(Instant::now());
    status_tx.send_replace(ctx.status());
    let json: Value = server.get("/api/status").await.json();
    assert_eq!(json["collector"]["breaker"]["state"], "open");
    assert_eq!(json["collector"]["breaker"]["consecutiveFailures"], 2);
    assert_eq!(json["collector"]["breaker"]["timesOpened"], 1);
    assert_eq!(json["collector"]["intervalSecs"], 30.0);
}

#[tokio::test]
async fn test_history_filters_by_device_and_window() {
    let (_dir, repo, devices, server) = test_server().await;
    let now = now_ms();
    repo.save_samples(&[
        online_sample(now - 3 * MS_PER_HOUR, devices[0].id, 1000.0),
        online_sample(now - 10 * 60_000, devices[0].id, 1000.0),
        online_sample(now - 10 * 60_000, devices[1].id, 1000.0),
    ])
    .await
    .unwrap();

    let all: Value = server.get("/api/history").await.json();
    assert_eq!(all.as_array().unwrap().len(), 3);

    let recent: Value = server
        .get("/api/history")
        .add_query_param("hours", 1)
        .add_query_param("device_id", devices[0].id)
        .await
        .json();
    let recent = recent.as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["deviceId"], devices[0].id);
}

#[tokio::test]
async fn test_fleet_counts_online_devices() {
    let (_dir, repo, devices, server) = test_server().await;
    let now = now_ms();
    repo.save_samples(&[
        online_sample(now - 30_000, devices[0].id, 1000.0),
        Sample::failed(now - 30_000, devices[1].id, "miner-2".into(), false, SampleStatus::Timeout),
    ])
    .await
    .unwrap();

    let response = server.get("/api/fleet").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["totalDevices"], 2);
    assert_eq!(json["onlineDevices"], 1);
    assert_eq!(json["totalHashrateGhs"], 1000.0);
}

/// One hour of rollup at 1000 GH/s and 15 W.
fn hourly(device_id: i64, hour_start: i64, uptime: f64) -> HourlyStat {
    HourlyStat {
        device_id,
        hour_start,
        samples_count: 120,
        online_samples: (120.0 * uptime / 100.0) as u32,
        expected_samples: 120,
        uptime_percent: uptime,
        avg_hashrate_ghs: Some(1000.0),
        min_hashrate_ghs: Some(990.0),
        max_hashrate_ghs: Some(1010.0),
        avg_temp_c: Some(60.0),
        max_temp_c: Some(62.0),
        avg_power_w: Some(15.0),
        avg_efficiency_j_th: Some(15.0),
        shares_accepted: 100,
        shares_rejected: 1,
        rejection_rate_percent: 100.0 / 101.0,
        status_histogram: vec![],
    }
}

#[tokio::test]
async fn test_fleet_insights_without_rollups_is_insufficient() {
    let (_dir, _repo, _devices, server) = test_server().await;
    let json: Value = server.get("/api/fleet/insights").await.json();
    assert_eq!(json["state"], "insufficientData");
}

#[tokio::test]
async fn test_fleet_insights_flags_the_unreliable_miner() {
    let (_dir, repo, devices, server) = test_server().await;
    let (healthy, flaky) = (devices[0].id, devices[1].id);
    let first_hour = (now_ms() / MS_PER_HOUR - 30) * MS_PER_HOUR;
    for i in 0..24 {
        let hour_start = first_hour + i * MS_PER_HOUR;
        repo.save_hourly_stat(&hourly(healthy, hour_start, 100.0)).await.unwrap();
        repo.save_hourly_stat(&hourly(flaky, hour_start, 80.0)).await.unwrap();
    }
    repo.raise_alert(&AlertDraft::new(
        Some(flaky),
        AlertKind::DeviceOffline,
        Severity::Warning,
        "miner-2 unreachable",
    ))
    .await
    .unwrap();

    let response = server.get("/api/fleet/insights").add_query_param("days", 3).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["state"], "ready");
    assert_eq!(json["summary"]["devicesReporting"], 2);
    assert_eq!(json["summary"]["avgUptimePercent"], 90.0);

    let problems = json["problemMiners"].as_array().unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0]["deviceId"], flaky);
    assert_eq!(problems[0]["alertCount"], 1);
    assert_eq!(problems[0]["hours"], 24);
    let top = json["topPerformers"].as_array().unwrap();
    assert_eq!(top[0]["deviceId"], healthy);
    assert_eq!(top[1]["deviceId"], flaky);

    // 30 W around the clock at the default 0.10 per kWh.
    assert!((json["dailyPowerCost"].as_f64().unwrap() - 0.072).abs() < 1e-9);
    assert_eq!(json["performance"][0]["kind"], "uptime_concern");
    assert_eq!(json["operational"][0]["kind"], "problem_miners");
    let recommendations = json["recommendations"].as_array().unwrap();
    assert_eq!(recommendations.len(), 2);
    assert!(recommendations[0].as_str().unwrap().contains("network stability"));
}

#[tokio::test]
async fn test_optimization_without_data_is_insufficient() {
    let (_dir, _repo, devices, server) = test_server().await;
    let response = server.get(&format!("/api/optimization/{}", devices[0].id)).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["state"], "insufficientData");
    assert_eq!(json["available"], 0);
}

#[tokio::test]
async fn test_optimization_ranks_rotating_settings() {
    let (_dir, repo, devices, server) = test_server().await;
    repo.save_samples(&rotating_settings(devices[0].id, now_ms()))
        .await
        .unwrap();

    let response = server
        .get(&format!("/api/optimization/{}", devices[0].id))
        .add_query_param("hours", 48)
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["state"], "ready");
    let rankings = json["rankings"].as_array().unwrap();
    assert_eq!(rankings.len(), 3);
    assert_eq!(rankings[0]["voltageMv"], 1200);
    assert_eq!(rankings[0]["frequencyMhz"], 600);
    // Settings held for hours are not a benchmark sweep.
    assert!(json["benchmarkSessions"].as_array().unwrap().is_empty());
    assert_eq!(json["dataQuality"]["quality"], "complete");
}

#[tokio::test]
async fn test_optimization_report_through_query_service() {
    let (_dir, repo, devices, _server) = test_server().await;
    let now = 30 * MS_PER_DAY;
    repo.save_samples(&rotating_settings(devices[0].id, now)).await.unwrap();
    let query = QueryService::new(repo.clone(), AnalyticsConfig::default(), OptimizerConfig::default());

    let report = query.optimization(devices[0].id, 48, now).await.unwrap().ready().unwrap();
    assert_eq!(report.valid_samples, 48 * 12);
    let scores: Vec<f64> = report.rankings.iter().map(|r| r.sweet_spot_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(report.rankings.iter().all(|r| r.stability_score.abs() < 1e-9));
    assert!(report.recommendations.last().unwrap().contains("1.200V @ 600MHz"));
}

#[tokio::test]
async fn test_health_unknown_device_is_404() {
    let (_dir, _repo, _devices, server) = test_server().await;
    let response = server.get("/api/health/999").expect_failure().await;
    response.assert_status_not_found();
    let json: Value = response.json();
    assert_eq!(json["error"], "unknown device 999");
}

#[tokio::test]
async fn test_health_without_history_reports_insufficient_data() {
    let (_dir, _repo, devices, server) = test_server().await;
    let json: Value = server.get(&format!("/api/health/{}", devices[1].id)).await.json();
    assert_eq!(json["deviceId"], devices[1].id);
    assert_eq!(json["efficiency"]["state"], "insufficientData");
    assert_eq!(json["maintenance"]["state"], "insufficientData");
    assert_eq!(json["growth"]["state"], "insufficientData");
}

#[tokio::test]
async fn test_alerts_lists_open_alerts() {
    let (_dir, repo, devices, server) = test_server().await;
    repo.raise_alert(&AlertDraft::new(
        Some(devices[0].id),
        AlertKind::DeviceOffline,
        Severity::Warning,
        "miner-1 unreachable",
    ))
    .await
    .unwrap();

    let json: Value = server.get("/api/alerts").await.json();
    let alerts = json.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["kind"], "device_offline");
    assert_eq!(alerts[0]["severity"], "warning");
    assert_eq!(alerts[0]["deviceId"], devices[0].id);
}

#[tokio::test]
async fn test_export_writes_window_in_journal_format() {
    let (dir, repo, devices, _server) = test_server().await;
    let now = 30 * MS_PER_DAY;
    repo.save_samples(&[
        online_sample(now - 3 * MS_PER_HOUR, devices[0].id, 1000.0),
        online_sample(now - 20 * 60_000, devices[0].id, 1000.0),
        Sample::failed(now - 20 * 60_000, devices[1].id, "miner-2".into(), true, SampleStatus::Timeout),
    ])
    .await
    .unwrap();
    let query = QueryService::new(repo.clone(), AnalyticsConfig::default(), OptimizerConfig::default());

    let out = dir.path().join("export.csv");
    assert_eq!(query.export(1, out.clone(), now).await.unwrap(), 2);
    let text = std::fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("timestamp,device_id,device_address"));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.contains("10.0.0.2") && r.contains("timeout")));
}
