// Startup integrity pass over journal and store

mod common;

use common::{device_entry, online_sample, temp_repo};
use minerwatch::integrity::verify_stores;
use minerwatch::journal::{JournalHandle, JournalOptions, RepairOutcome, SampleJournal};

#[tokio::test]
async fn clean_stores_pass() {
    let (dir, repo) = temp_repo(7).await;
    let devices = repo.sync_devices(&[device_entry("10.0.0.1")]).await.unwrap();
    let mut journal = SampleJournal::open(JournalOptions {
        path: dir.path().join("samples.csv"),
        backup_dir: dir.path().join("backups"),
        backup_every_commits: 1_000,
        backups_to_keep: 3,
    })
    .unwrap();
    journal.append(&[online_sample(1_000, devices[0].id, 1000.0)]).unwrap();

    let report = verify_stores(&repo, &JournalHandle::new(journal)).await.unwrap();
    assert!(report.is_ok(), "{:?}", report);
    assert!(report.journal_repair.is_none());
    assert_eq!(report.store.integrity, vec!["ok".to_string()]);
}

#[tokio::test]
async fn damage_behind_a_good_tail_is_found_and_repaired() {
    let (dir, repo) = temp_repo(7).await;
    let devices = repo.sync_devices(&[device_entry("10.0.0.1")]).await.unwrap();
    let id = devices[0].id;
    let mut journal = SampleJournal::open(JournalOptions {
        path: dir.path().join("samples.csv"),
        backup_dir: dir.path().join("backups"),
        backup_every_commits: 1_000,
        backups_to_keep: 3,
    })
    .unwrap();
    journal
        .append(&[online_sample(1_000, id, 1000.0), online_sample(2_000, id, 1000.0)])
        .unwrap();
    // A device the store has never heard of.
    journal.append(&[online_sample(3_000, 9_999, 1000.0)]).unwrap();

    let text = std::fs::read_to_string(journal.path()).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.insert(2, "2024-01-01T00:00:00.000Z,1,half a row");
    std::fs::write(journal.path(), lines.join("\n") + "\n").unwrap();
    // Header and last row are fine, so the cheap check cannot see it.
    assert!(journal.quick_check().unwrap());

    let handle = JournalHandle::new(journal);
    let report = verify_stores(&repo, &handle).await.unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.journal.malformed.len(), 1);
    assert_eq!(report.journal.malformed[0].line, 3);
    assert_eq!(report.journal.orphaned, 1);
    assert_eq!(report.journal_repair, Some(RepairOutcome::Salvaged { dropped: 1 }));
    assert!(report.store.is_ok());
    assert_eq!(handle.read_all().await.unwrap().len(), 3);
}
