// Export recent samples from the store as a flat CSV in the journal format.
//
// Usage: cargo run --example export_window -- [DB_PATH] [HOURS] [OUT]
//   DB_PATH  default: ./data/telemetry.db
//   HOURS    default: 24
//   OUT      default: ./export.csv

use minerwatch::config::AnalyticsConfig;
use minerwatch::models::now_ms;
use minerwatch::optimization::OptimizerConfig;
use minerwatch::query::QueryService;
use minerwatch::telemetry_repo::{RepoOptions, TelemetryRepo};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let path = args.get(1).map(String::as_str).unwrap_or("./data/telemetry.db");
    let hours: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(24);
    let out = PathBuf::from(args.get(3).map(String::as_str).unwrap_or("./export.csv"));

    let repo = TelemetryRepo::connect(path, RepoOptions::default()).await?;
    let query = QueryService::new(Arc::new(repo), AnalyticsConfig::default(), OptimizerConfig::default());
    let written = query.export(hours, out.clone(), now_ms()).await?;

    println!("{} samples written to {}", written, out.display());
    Ok(())
}
