// Rolling journal backups: timestamped copies, newest K kept.

use std::path::{Path, PathBuf};

use crate::error::PersistenceError;

const BACKUP_PREFIX: &str = "samples_backup_";
const BACKUP_SUFFIX: &str = ".csv";

fn backup_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}{}{}", BACKUP_PREFIX, now.format("%Y%m%d_%H%M%S_%3f"), BACKUP_SUFFIX)
}

/// Backups in `dir`, oldest first. Names sort chronologically.
pub fn list(dir: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX));
        if is_backup {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Copy `source` into `dir` and purge all but the newest `keep` backups.
pub fn create(source: &Path, dir: &Path, keep: usize) -> Result<PathBuf, PersistenceError> {
    std::fs::create_dir_all(dir)?;
    let mut target = dir.join(backup_name(chrono::Utc::now()));
    // Two backups in the same millisecond: keep both.
    let mut n = 1;
    while target.exists() {
        target = dir.join(format!(
            "{}{}_{}{}",
            BACKUP_PREFIX,
            chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f"),
            n,
            BACKUP_SUFFIX
        ));
        n += 1;
    }
    std::fs::copy(source, &target)?;
    purge(dir, keep)?;
    Ok(target)
}

/// Delete the oldest backups beyond `keep`. Returns how many were removed.
pub fn purge(dir: &Path, keep: usize) -> Result<usize, PersistenceError> {
    let backups = list(dir)?;
    if backups.len() <= keep {
        return Ok(0);
    }
    let excess = backups.len() - keep;
    for old in &backups[..excess] {
        std::fs::remove_file(old)?;
        tracing::debug!(path = %old.display(), "old journal backup removed");
    }
    Ok(excess)
}
