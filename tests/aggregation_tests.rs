// Aggregation worker tests: backfill, retention horizon, fleet row

mod common;

use common::{device_entry, online_sample, temp_repo, test_app_config};
use minerwatch::aggregation_worker::{AggregationWorkerConfig, apply_retention, backfill, run_one_tick};
use minerwatch::journal::{JournalHandle, JournalOptions, SampleJournal};
use minerwatch::models::*;
use minerwatch::telemetry_repo::aggregation::hour_floor;

const TEN_MINUTES: i64 = 10 * 60_000;

fn worker_config() -> AggregationWorkerConfig {
    AggregationWorkerConfig::from_app(&test_app_config())
}

#[tokio::test]
async fn retention_keeps_seven_days_raw_and_all_aggregates() {
    let (dir, repo) = temp_repo(7).await;
    let device = repo.sync_devices(&[device_entry("10.0.0.1")]).await.unwrap()[0].clone();

    let mut journal = SampleJournal::open(JournalOptions {
        path: dir.path().join("samples.csv"),
        backup_dir: dir.path().join("backups"),
        backup_every_commits: 1_000,
        backups_to_keep: 2,
    })
    .unwrap();
    journal.register_device(device.id, &device.address);
    let journal = JournalHandle::new(journal);

    // Ten days, one sample every ten minutes, ending just before `now`.
    let now = 20 * MS_PER_DAY + 6 * MS_PER_HOUR;
    let start = now - 10 * MS_PER_DAY;
    let samples: Vec<Sample> = (0..10 * 144)
        .map(|i| online_sample(start + i * TEN_MINUTES, device.id, 1000.0))
        .collect();
    repo.save_samples(&samples).await.unwrap();
    assert_eq!(journal.append(samples.clone()).await.unwrap(), samples.len());

    let summary = backfill(&repo, &worker_config(), now).await.unwrap();
    assert_eq!(summary.hourly_rows, 240);
    assert_eq!(summary.daily_rows, 10);

    let retained = apply_retention(&repo, Some(&journal), now).await.unwrap();
    let cutoff = hour_floor(now - 7 * MS_PER_DAY);
    assert_eq!(retained.raw_pruned, 3 * 144);
    assert_eq!(retained.journal_pruned, 3 * 144);

    let raw = repo.all_samples_in_range(0, now + 1).await.unwrap();
    assert_eq!(raw.len(), 7 * 144);
    assert!(raw.iter().all(|s| s.timestamp >= cutoff));
    assert_eq!(journal.read_all().await.unwrap().len(), 7 * 144);

    // Aggregates for all ten days survive.
    let hourly = repo.hourly_stats(device.id, 0, now).await.unwrap();
    assert_eq!(hourly.len(), 240);
    let daily = repo.daily_stats(device.id, 0, now).await.unwrap();
    assert_eq!(daily.len(), 10);
    assert!(daily[0].trend.is_none());
    let trend = daily[9].trend.as_ref().expect("trend after seven days");
    assert!(trend.slope.abs() < 1e-9);
    assert_eq!(trend.points, 10);
}

#[tokio::test]
async fn backfill_after_retention_leaves_old_hours_untouched() {
    let (_dir, repo) = temp_repo(7).await;
    let device = repo.sync_devices(&[device_entry("10.0.0.1")]).await.unwrap()[0].clone();
    let now = 20 * MS_PER_DAY + 30 * 60_000;
    let start = now - 8 * MS_PER_DAY;
    let samples: Vec<Sample> = (0..8 * 144)
        .map(|i| online_sample(start + i * TEN_MINUTES, device.id, 1000.0))
        .collect();
    repo.save_samples(&samples).await.unwrap();
    backfill(&repo, &worker_config(), now).await.unwrap();
    let before = repo.hourly_stats(device.id, 0, now).await.unwrap();

    apply_retention(&repo, None, now).await.unwrap();
    // A restart recomputes from what raw data is left; no hour is rewritten from a partial set.
    backfill(&repo, &worker_config(), now).await.unwrap();
    let after = repo.hourly_stats(device.id, 0, now).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn tick_records_fleet_snapshot() {
    let (_dir, repo) = temp_repo(7).await;
    let devices = repo
        .sync_devices(&[device_entry("10.0.0.1"), device_entry("10.0.0.2")])
        .await
        .unwrap();
    let now = 5 * MS_PER_DAY;
    repo.save_samples(&[
        online_sample(now - 60_000, devices[0].id, 1000.0),
        Sample::failed(now - 60_000, devices[1].id, "miner-2".into(), false, SampleStatus::Timeout),
    ])
    .await
    .unwrap();

    let summary = run_one_tick(&repo, None, &worker_config(), now).await.unwrap();
    // The hour just before `now` is complete; the offline device still gets a row.
    assert_eq!(summary.hourly_rows, 2);
    assert_eq!(summary.daily_rows, 2);

    let fleet = repo.fleet_stats(now - 1, now + 1).await.unwrap();
    assert_eq!(fleet.len(), 1);
    assert_eq!(fleet[0].total_devices, 2);
    assert_eq!(fleet[0].online_devices, 1);
    assert_eq!(fleet[0].total_hashrate_ghs, 1000.0);
    assert_eq!(fleet[0].efficiency_j_th, Some(15.0));
}
