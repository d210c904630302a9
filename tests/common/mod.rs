// Shared test helpers
#![allow(dead_code)]

use std::sync::Arc;

use minerwatch::config::{AppConfig, DeviceEntry};
use minerwatch::models::*;
use minerwatch::telemetry_repo::{RepoOptions, TelemetryRepo};
use tempfile::TempDir;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/test.db"
max_pool_size = 2
flush_rate = 5

[journal]
path = "data/samples.csv"
backup_dir = "data/backups"

[collector]
poll_interval_secs = 30
hostname_cache_path = "data/hostnames.json"

[[devices]]
address = "10.0.0.11"
name = "alpha"
baseline_hashrate_ghs = 1100.0

[[devices]]
address = "10.0.0.12"
baseline_hashrate_ghs = 1100.0

[monitoring]
stats_log_interval_secs = 60
"#;

pub fn test_app_config() -> AppConfig {
    AppConfig::load_from_str(TEST_CONFIG).unwrap()
}

pub fn device_entry(address: &str) -> DeviceEntry {
    DeviceEntry {
        address: address.into(),
        name: None,
        baseline_hashrate_ghs: 1100.0,
    }
}

/// Fresh store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_repo(retention_days: u32) -> (TempDir, Arc<TelemetryRepo>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("telemetry.db");
    let repo = TelemetryRepo::connect(
        path.to_str().unwrap(),
        RepoOptions {
            retention_days,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    repo.init().await.unwrap();
    (dir, Arc::new(repo))
}

/// A healthy reading at the given setting.
pub fn online_sample(timestamp: i64, device_id: i64, hashrate: f64) -> Sample {
    let mut s = Sample::failed(timestamp, device_id, "bitaxe".into(), false, SampleStatus::Online);
    s.hashrate_ghs = Some(hashrate);
    s.temp_asic_c = Some(60.0);
    s.temp_vr_c = Some(55.0);
    s.power_w = Some(15.0);
    s.voltage_set_mv = Some(1150.0);
    s.voltage_actual_mv = Some(1140.0);
    s.frequency_mhz = Some(525.0);
    s.shares_accepted = Some(100);
    s.shares_rejected = Some(1);
    s.wifi_rssi = Some(-55);
    s.uptime_seconds = Some(3600);
    s.efficiency_j_th = efficiency_j_per_th(hashrate, 15.0);
    s
}
