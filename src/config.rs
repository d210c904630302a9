use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub journal: JournalConfig,
    pub collector: CollectorConfig,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Cycles buffered by the writer before a flush.
    pub flush_rate: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Raw-sample retention horizon. Aggregates are kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Attempts per write when the database is locked.
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    /// Batches held by the writer while the store is failing; oldest dropped beyond this.
    #[serde(default = "default_max_pending_batches")]
    pub max_pending_batches: usize,
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    7
}

fn default_write_attempts() -> u32 {
    4
}

fn default_max_pending_batches() -> usize {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    pub path: String,
    pub backup_dir: String,
    #[serde(default = "default_backup_every_commits")]
    pub backup_every_commits: u64,
    #[serde(default = "default_backups_to_keep")]
    pub backups_to_keep: usize,
}

fn default_backup_every_commits() -> u64 {
    100
}

fn default_backups_to_keep() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Attempts per device per cycle (network retries inside one cycle).
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_retry_base_ms")]
    pub poll_retry_base_ms: u64,
    pub hostname_cache_path: String,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Consecutive failures before a device_offline alert.
    #[serde(default = "default_offline_after_failures")]
    pub offline_after_failures: u32,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    8
}

fn default_poll_attempts() -> u32 {
    2
}

fn default_poll_retry_base_ms() -> u64 {
    500
}

fn default_shutdown_grace_secs() -> u64 {
    15
}

fn default_offline_after_failures() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Declared nominal hashrate in GH/s.
    pub baseline_hashrate_ghs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    10
}

fn default_cooldown_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_reset_after_successes")]
    pub reset_after_successes: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            max_interval_secs: default_max_interval_secs(),
            reset_after_successes: default_reset_after_successes(),
        }
    }
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_interval_secs() -> u64 {
    300
}

fn default_reset_after_successes() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_aggregation_interval_secs")]
    pub interval_secs: u64,
    /// Completed hours recomputed on each tick.
    #[serde(default = "default_hourly_lookback_hours")]
    pub hourly_lookback_hours: u32,
    /// Completed days recomputed on each tick.
    #[serde(default = "default_daily_lookback_days")]
    pub daily_lookback_days: u32,
    #[serde(default = "default_trend_window_days")]
    pub trend_window_days: u32,
    /// Cron expression for VACUUM (local time), e.g. "0 0 3 * * *".
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_aggregation_interval_secs(),
            hourly_lookback_hours: default_hourly_lookback_hours(),
            daily_lookback_days: default_daily_lookback_days(),
            trend_window_days: default_trend_window_days(),
            vacuum_schedule: None,
            vacuum_interval_secs: default_vacuum_interval_secs(),
        }
    }
}

fn default_aggregation_interval_secs() -> u64 {
    300
}

fn default_hourly_lookback_hours() -> u32 {
    3
}

fn default_daily_lookback_days() -> u32 {
    2
}

fn default_trend_window_days() -> u32 {
    30
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_temp_warning_c")]
    pub temp_warning_c: f64,
    #[serde(default = "default_temp_critical_c")]
    pub temp_critical_c: f64,
    #[serde(default = "default_anomaly_window_samples")]
    pub anomaly_window_samples: usize,
    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,
    #[serde(default = "default_efficiency_window_hours")]
    pub efficiency_window_hours: u32,
    #[serde(default = "default_efficiency_min_hours")]
    pub efficiency_min_hours: usize,
    #[serde(default = "default_maintenance_window_hours")]
    pub maintenance_window_hours: u32,
    #[serde(default = "default_maintenance_min_hours")]
    pub maintenance_min_hours: usize,
    #[serde(default = "default_maintenance_alert_score")]
    pub maintenance_alert_score: f64,
    /// Default window for fleet insights.
    #[serde(default = "default_fleet_window_days")]
    pub fleet_window_days: u32,
    /// Electricity price per kWh, used for the fleet power cost estimate.
    #[serde(default = "default_power_price_per_kwh")]
    pub power_price_per_kwh: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_analytics_interval_secs(),
            temp_warning_c: default_temp_warning_c(),
            temp_critical_c: default_temp_critical_c(),
            anomaly_window_samples: default_anomaly_window_samples(),
            anomaly_min_samples: default_anomaly_min_samples(),
            efficiency_window_hours: default_efficiency_window_hours(),
            efficiency_min_hours: default_efficiency_min_hours(),
            maintenance_window_hours: default_maintenance_window_hours(),
            maintenance_min_hours: default_maintenance_min_hours(),
            maintenance_alert_score: default_maintenance_alert_score(),
            fleet_window_days: default_fleet_window_days(),
            power_price_per_kwh: default_power_price_per_kwh(),
        }
    }
}

fn default_analytics_interval_secs() -> u64 {
    3_600
}

fn default_temp_warning_c() -> f64 {
    85.0
}

fn default_temp_critical_c() -> f64 {
    90.0
}

fn default_anomaly_window_samples() -> usize {
    120
}

fn default_anomaly_min_samples() -> usize {
    6
}

fn default_efficiency_window_hours() -> u32 {
    24
}

fn default_efficiency_min_hours() -> usize {
    3
}

fn default_maintenance_window_hours() -> u32 {
    168
}

fn default_maintenance_min_hours() -> usize {
    10
}

fn default_maintenance_alert_score() -> f64 {
    70.0
}

fn default_fleet_window_days() -> u32 {
    7
}

fn default_power_price_per_kwh() -> f64 {
    0.10
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default = "default_min_samples_per_setting")]
    pub min_samples_per_setting: usize,
    #[serde(default = "default_benchmark_window_minutes")]
    pub benchmark_window_minutes: u32,
    #[serde(default = "default_benchmark_min_settings")]
    pub benchmark_min_settings: usize,
    #[serde(default = "default_window_hours")]
    pub default_window_hours: u32,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            min_samples_per_setting: default_min_samples_per_setting(),
            benchmark_window_minutes: default_benchmark_window_minutes(),
            benchmark_min_settings: default_benchmark_min_settings(),
            default_window_hours: default_window_hours(),
        }
    }
}

fn default_min_samples_per_setting() -> usize {
    10
}

fn default_benchmark_window_minutes() -> u32 {
    30
}

fn default_benchmark_min_settings() -> usize {
    5
}

fn default_window_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log collector stats (cycles, failures, breaker state) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.database.write_attempts > 0,
            "database.write_attempts must be > 0, got {}",
            self.database.write_attempts
        );
        anyhow::ensure!(
            !self.journal.path.is_empty(),
            "journal.path must be non-empty"
        );
        anyhow::ensure!(
            !self.journal.backup_dir.is_empty(),
            "journal.backup_dir must be non-empty"
        );
        anyhow::ensure!(
            self.journal.backup_every_commits > 0,
            "journal.backup_every_commits must be > 0, got {}",
            self.journal.backup_every_commits
        );
        anyhow::ensure!(
            self.journal.backups_to_keep > 0,
            "journal.backups_to_keep must be > 0, got {}",
            self.journal.backups_to_keep
        );
        anyhow::ensure!(
            self.collector.poll_interval_secs > 0,
            "collector.poll_interval_secs must be > 0, got {}",
            self.collector.poll_interval_secs
        );
        anyhow::ensure!(
            self.collector.request_timeout_secs > 0,
            "collector.request_timeout_secs must be > 0, got {}",
            self.collector.request_timeout_secs
        );
        anyhow::ensure!(
            self.collector.max_concurrency > 0,
            "collector.max_concurrency must be > 0, got {}",
            self.collector.max_concurrency
        );
        anyhow::ensure!(
            self.collector.poll_attempts > 0,
            "collector.poll_attempts must be > 0, got {}",
            self.collector.poll_attempts
        );
        anyhow::ensure!(
            self.collector.offline_after_failures > 0,
            "collector.offline_after_failures must be > 0, got {}",
            self.collector.offline_after_failures
        );
        anyhow::ensure!(
            !self.collector.hostname_cache_path.is_empty(),
            "collector.hostname_cache_path must be non-empty"
        );
        let mut seen = std::collections::HashSet::new();
        for d in &self.devices {
            anyhow::ensure!(!d.address.is_empty(), "devices.address must be non-empty");
            anyhow::ensure!(
                seen.insert(d.address.as_str()),
                "devices.address '{}' is listed twice",
                d.address
            );
            anyhow::ensure!(
                d.baseline_hashrate_ghs > 0.0,
                "devices.baseline_hashrate_ghs must be > 0 for '{}', got {}",
                d.address,
                d.baseline_hashrate_ghs
            );
        }
        anyhow::ensure!(
            self.circuit_breaker.failure_threshold > 0,
            "circuit_breaker.failure_threshold must be > 0, got {}",
            self.circuit_breaker.failure_threshold
        );
        anyhow::ensure!(
            self.backoff.multiplier >= 1.0,
            "backoff.multiplier must be >= 1.0, got {}",
            self.backoff.multiplier
        );
        anyhow::ensure!(
            self.backoff.max_interval_secs >= self.collector.poll_interval_secs,
            "backoff.max_interval_secs must be >= collector.poll_interval_secs, got {}",
            self.backoff.max_interval_secs
        );
        anyhow::ensure!(
            self.backoff.reset_after_successes > 0,
            "backoff.reset_after_successes must be > 0, got {}",
            self.backoff.reset_after_successes
        );
        anyhow::ensure!(
            self.aggregation.interval_secs > 0,
            "aggregation.interval_secs must be > 0, got {}",
            self.aggregation.interval_secs
        );
        anyhow::ensure!(
            self.aggregation.hourly_lookback_hours > 0,
            "aggregation.hourly_lookback_hours must be > 0, got {}",
            self.aggregation.hourly_lookback_hours
        );
        if let Some(ref expr) = self.aggregation.vacuum_schedule {
            anyhow::ensure!(
                <cron::Schedule as std::str::FromStr>::from_str(expr).is_ok(),
                "aggregation.vacuum_schedule is not a valid cron expression: {}",
                expr
            );
        }
        anyhow::ensure!(
            self.analytics.interval_secs > 0,
            "analytics.interval_secs must be > 0, got {}",
            self.analytics.interval_secs
        );
        anyhow::ensure!(
            self.analytics.temp_warning_c < self.analytics.temp_critical_c,
            "analytics.temp_warning_c must be below temp_critical_c"
        );
        anyhow::ensure!(
            self.analytics.fleet_window_days > 0,
            "analytics.fleet_window_days must be > 0, got {}",
            self.analytics.fleet_window_days
        );
        anyhow::ensure!(
            self.analytics.power_price_per_kwh >= 0.0 && self.analytics.power_price_per_kwh.is_finite(),
            "analytics.power_price_per_kwh must be a non-negative number, got {}",
            self.analytics.power_price_per_kwh
        );
        anyhow::ensure!(
            self.optimization.min_samples_per_setting > 1,
            "optimization.min_samples_per_setting must be > 1, got {}",
            self.optimization.min_samples_per_setting
        );
        anyhow::ensure!(
            self.optimization.benchmark_min_settings > 1,
            "optimization.benchmark_min_settings must be > 1, got {}",
            self.optimization.benchmark_min_settings
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
