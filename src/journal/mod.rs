// Flat sample journal. Every change is staged next to the file, validated, then renamed into place,
// so a crash at any point leaves the previous committed file intact.

pub mod backup;
mod row;

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use tracing::instrument;

use crate::error::PersistenceError;
use crate::hostname_cache::staging_path;
use crate::models::Sample;

pub use row::{HEADER, JournalRecord, MAX_ROW_BYTES, parse_record};
use row::{JournalRow, is_header};

#[derive(Debug, Clone)]
pub struct JournalOptions {
    pub path: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_every_commits: u64,
    pub backups_to_keep: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MalformedRow {
    /// 1-based line number in the file.
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub exists: bool,
    pub header_ok: bool,
    pub rows: usize,
    pub valid_rows: usize,
    pub malformed: Vec<MalformedRow>,
    /// Rows whose timestamp is earlier than the previous row of the same device.
    pub out_of_order: usize,
    /// Rows referring to a device id not in the known set (when one was given).
    pub orphaned: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        !self.exists || (self.header_ok && self.malformed.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RepairOutcome {
    Clean,
    TruncatedTrailing { removed: usize },
    RestoredFromBackup { backup: PathBuf },
    Salvaged { dropped: usize },
}

/// Result of scanning the whole file.
struct Scan {
    header_ok: bool,
    valid: Vec<JournalRecord>,
    malformed: Vec<MalformedRow>,
    /// Every malformed row comes after the last valid one.
    malformed_all_trailing: bool,
}

pub struct SampleJournal {
    opts: JournalOptions,
    addresses: HashMap<i64, String>,
    commits_since_backup: u64,
}

impl SampleJournal {
    /// Open the journal, discarding any staged file left by an interrupted commit.
    pub fn open(opts: JournalOptions) -> Result<Self, PersistenceError> {
        if let Some(parent) = opts.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let staged = staging_path(&opts.path);
        if staged.exists() {
            tracing::warn!(path = %staged.display(), "discarding staged journal from interrupted commit");
            std::fs::remove_file(&staged)?;
        }
        Ok(Self {
            opts,
            addresses: HashMap::new(),
            commits_since_backup: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.opts.path
    }

    /// Device addresses written into the `device_address` column.
    pub fn register_device(&mut self, device_id: i64, address: &str) {
        self.addresses.insert(device_id, address.to_string());
    }

    fn address_of(&self, device_id: i64) -> &str {
        self.addresses.get(&device_id).map(String::as_str).unwrap_or("")
    }

    /// Append samples atomically. The file is checked first and repaired if damaged.
    #[instrument(skip(self, samples), fields(journal = "samples", operation = "append", samples_count = samples.len()))]
    pub fn append(&mut self, samples: &[Sample]) -> Result<usize, PersistenceError> {
        if samples.is_empty() {
            return Ok(0);
        }
        if !self.quick_check()? {
            let outcome = self.repair()?;
            tracing::warn!(?outcome, "journal failed pre-append check and was repaired");
        }
        let rows: Vec<JournalRow> = samples
            .iter()
            .map(|s| JournalRow::from_sample(s, self.address_of(s.device_id)))
            .collect();
        let path = self.opts.path.clone();
        self.stage_and_commit(true, |w| {
            for row in &rows {
                w.serialize(row)?;
            }
            Ok(rows.len())
        })?;
        self.commits_since_backup += 1;
        if self.commits_since_backup >= self.opts.backup_every_commits {
            match backup::create(&path, &self.opts.backup_dir, self.opts.backups_to_keep) {
                Ok(p) => {
                    self.commits_since_backup = 0;
                    tracing::info!(backup = %p.display(), "journal backup written");
                }
                Err(e) => tracing::warn!(error = %e, "journal backup failed"),
            }
        }
        Ok(rows.len())
    }

    /// Stage a new version of the file and rename it into place.
    /// With `keep_existing`, the committed content is copied first and `write` appends;
    /// otherwise `write` produces every row after the header.
    /// `write` returns how many rows it wrote; they are re-read and validated before commit.
    pub(crate) fn stage_and_commit(
        &self,
        keep_existing: bool,
        write: impl FnOnce(&mut csv::Writer<&mut File>) -> Result<usize, PersistenceError>,
    ) -> Result<(), PersistenceError> {
        let path = &self.opts.path;
        let staged = staging_path(path);
        let result = (|| -> Result<(), PersistenceError> {
            let has_content = keep_existing && path.exists() && std::fs::metadata(path)?.len() > 0;
            let mut file = if has_content {
                // Retention bounds the copy; on Linux it stays in the kernel (copy_file_range).
                std::fs::copy(path, &staged)?;
                OpenOptions::new().append(true).open(&staged)?
            } else {
                let mut f = File::create(&staged)?;
                let mut w = WriterBuilder::new().has_headers(false).from_writer(&mut f);
                w.write_record(HEADER)?;
                w.flush()?;
                drop(w);
                f
            };
            let offset = file.seek(SeekFrom::End(0))?;
            let written = {
                let mut w = WriterBuilder::new().has_headers(false).from_writer(&mut file);
                let n = write(&mut w)?;
                w.flush()?;
                n
            };
            file.sync_all()?;
            drop(file);

            let staged_rows = validate_tail(&staged, offset)?;
            if staged_rows != written {
                return Err(PersistenceError::Corruption(format!(
                    "staged {} rows, read back {}",
                    written, staged_rows
                )));
            }
            std::fs::rename(&staged, path)?;
            sync_parent(path);
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&staged);
        }
        result
    }

    /// Header intact and the last row decodes. Cheap enough to run before every append.
    pub fn quick_check(&self) -> Result<bool, PersistenceError> {
        let path = &self.opts.path;
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(true);
        }
        let mut first = Vec::new();
        BufReader::new(&mut file).read_until(b'\n', &mut first)?;
        let header = read_records(&first).into_iter().next();
        if !matches!(header, Some(Ok(ref h)) if is_header(h)) {
            return Ok(false);
        }

        let tail_start = len.saturating_sub(4 * MAX_ROW_BYTES as u64);
        file.seek(SeekFrom::Start(tail_start))?;
        let mut tail = Vec::with_capacity((len - tail_start) as usize);
        file.read_to_end(&mut tail)?;
        if tail.last() != Some(&b'\n') {
            return Ok(false);
        }
        // Records may span lines (quoted fields), so the last one comes from the csv reader.
        let from = match tail_start {
            0 => 0,
            _ => match tail.iter().position(|b| *b == b'\n') {
                Some(i) => i + 1,
                None => return Ok(false),
            },
        };
        let Some(Ok(last)) = read_records(&tail[from..]).into_iter().last() else {
            return Ok(false);
        };
        Ok(is_header(&last) || parse_record(&last).is_ok())
    }

    fn scan(&self) -> Result<Option<Scan>, PersistenceError> {
        scan_file(&self.opts.path)
    }

    /// Full structural check. `known_devices` enables orphan detection.
    #[instrument(skip(self, known_devices), fields(journal = "samples", operation = "check"))]
    pub fn check(&self, known_devices: Option<&HashSet<i64>>) -> Result<IntegrityReport, PersistenceError> {
        let Some(scan) = self.scan()? else {
            return Ok(IntegrityReport::default());
        };
        let mut last_ts: HashMap<i64, i64> = HashMap::new();
        let mut out_of_order = 0;
        let mut orphaned = 0;
        for r in &scan.valid {
            let prev = last_ts.entry(r.sample.device_id).or_insert(i64::MIN);
            if r.sample.timestamp < *prev {
                out_of_order += 1;
            } else {
                *prev = r.sample.timestamp;
            }
            if let Some(known) = known_devices
                && !known.contains(&r.sample.device_id)
            {
                orphaned += 1;
            }
        }
        Ok(IntegrityReport {
            exists: true,
            header_ok: scan.header_ok,
            rows: scan.valid.len() + scan.malformed.len(),
            valid_rows: scan.valid.len(),
            malformed: scan.malformed,
            out_of_order,
            orphaned,
        })
    }

    /// Restore a usable journal: truncate trailing damage, else restore the newest clean backup,
    /// else keep only the rows that decode.
    #[instrument(skip(self), fields(journal = "samples", operation = "repair"))]
    pub fn repair(&mut self) -> Result<RepairOutcome, PersistenceError> {
        let Some(scan) = self.scan()? else {
            return Ok(RepairOutcome::Clean);
        };
        if scan.header_ok && scan.malformed.is_empty() {
            return Ok(RepairOutcome::Clean);
        }

        if scan.header_ok && scan.malformed_all_trailing {
            let removed = scan.malformed.len();
            self.rewrite(&scan.valid)?;
            tracing::warn!(removed, "journal: truncated malformed trailing rows");
            return Ok(RepairOutcome::TruncatedTrailing { removed });
        }

        for candidate in backup::list(&self.opts.backup_dir)?.into_iter().rev() {
            match scan_file(&candidate)? {
                Some(b) if b.header_ok && b.malformed.is_empty() => {
                    let staged = staging_path(&self.opts.path);
                    std::fs::copy(&candidate, &staged)?;
                    std::fs::rename(&staged, &self.opts.path)?;
                    sync_parent(&self.opts.path);
                    tracing::warn!(backup = %candidate.display(), "journal: restored from backup");
                    return Ok(RepairOutcome::RestoredFromBackup { backup: candidate });
                }
                _ => {
                    tracing::debug!(backup = %candidate.display(), "journal backup is not clean, skipping");
                }
            }
        }

        let dropped = scan.malformed.len() + usize::from(!scan.header_ok);
        self.rewrite(&scan.valid)?;
        tracing::warn!(dropped, "journal: no clean backup, salvaged valid rows");
        Ok(RepairOutcome::Salvaged { dropped })
    }

    fn rewrite(&self, records: &[JournalRecord]) -> Result<(), PersistenceError> {
        self.stage_and_commit(false, |w| {
            for r in records {
                w.serialize(JournalRow::from_sample(&r.sample, &r.device_address))?;
            }
            Ok(records.len())
        })
    }

    /// Every decodable row, in file order.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>, PersistenceError> {
        Ok(self.scan()?.map(|s| s.valid).unwrap_or_default())
    }

    /// Drop rows older than `cutoff_ms`. Returns how many were removed.
    #[instrument(skip(self), fields(journal = "samples", operation = "prune_before"))]
    pub fn prune_before(&mut self, cutoff_ms: i64) -> Result<usize, PersistenceError> {
        if !oldest_row_before(&self.opts.path, cutoff_ms)? {
            return Ok(0);
        }
        let Some(scan) = self.scan()? else {
            return Ok(0);
        };
        let before = scan.valid.len() + scan.malformed.len();
        let kept: Vec<JournalRecord> = scan
            .valid
            .into_iter()
            .filter(|r| r.sample.timestamp >= cutoff_ms)
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.rewrite(&kept)?;
        }
        Ok(removed)
    }
}

/// Shared journal for async callers. File work runs on the blocking pool under the lock.
#[derive(Clone)]
pub struct JournalHandle {
    inner: Arc<Mutex<SampleJournal>>,
}

impl JournalHandle {
    pub fn new(journal: SampleJournal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(journal)),
        }
    }

    pub async fn append(&self, samples: Vec<Sample>) -> Result<usize, PersistenceError> {
        self.run(move |j| j.append(&samples)).await
    }

    pub async fn prune_before(&self, cutoff_ms: i64) -> Result<usize, PersistenceError> {
        self.run(move |j| j.prune_before(cutoff_ms)).await
    }

    pub async fn check(&self, known_devices: Option<HashSet<i64>>) -> Result<IntegrityReport, PersistenceError> {
        self.run(move |j| j.check(known_devices.as_ref())).await
    }

    pub async fn repair(&self) -> Result<RepairOutcome, PersistenceError> {
        self.run(|j| j.repair()).await
    }

    pub async fn read_all(&self) -> Result<Vec<JournalRecord>, PersistenceError> {
        self.run(|j| j.read_all()).await
    }

    async fn run<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut SampleJournal) -> Result<T, PersistenceError> + Send + 'static,
    ) -> Result<T, PersistenceError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut journal = inner
                .lock()
                .map_err(|e| PersistenceError::Corruption(format!("journal lock poisoned: {}", e)))?;
            f(&mut journal)
        })
        .await
        .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))?
    }
}

/// Write samples to `path` in the journal format (flat export), atomically.
pub fn export(
    path: &Path,
    samples: &[Sample],
    addresses: &HashMap<i64, String>,
) -> Result<usize, PersistenceError> {
    crate::hostname_cache::write_atomic(path, |f| {
        let mut w = WriterBuilder::new().has_headers(false).from_writer(f);
        w.write_record(HEADER)?;
        for s in samples {
            let address = addresses.get(&s.device_id).map(String::as_str).unwrap_or("");
            w.serialize(JournalRow::from_sample(s, address))?;
        }
        w.flush()?;
        Ok(())
    })?;
    Ok(samples.len())
}

fn read_records(bytes: &[u8]) -> Vec<Result<StringRecord, csv::Error>> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes)
        .records()
        .collect()
}

/// Rows are appended in time order, so the first decodable row decides. Reads no further.
fn oldest_row_before(path: &Path, cutoff_ms: i64) -> Result<bool, PersistenceError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));
    for record in reader.records() {
        let Ok(record) = record else { break };
        if is_header(&record) {
            continue;
        }
        if let Ok(r) = parse_record(&record) {
            return Ok(r.sample.timestamp < cutoff_ms);
        }
    }
    Ok(false)
}

/// Re-read rows written after `offset` in the staged file; all must decode.
fn validate_tail(path: &Path, offset: u64) -> Result<usize, PersistenceError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));
    let mut count = 0;
    for record in reader.records() {
        let record = record?;
        parse_record(&record).map_err(|reason| {
            PersistenceError::Corruption(format!("staged row {}: {}", count + 1, reason))
        })?;
        count += 1;
    }
    Ok(count)
}

fn scan_file(path: &Path) -> Result<Option<Scan>, PersistenceError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut header_ok = false;
    let mut valid = Vec::new();
    let mut malformed = Vec::new();
    let mut last_valid_line = 0u64;
    let mut first_malformed_line: Option<u64> = None;

    let mut record = csv::ByteRecord::new();
    let mut index = 0u64;
    loop {
        let line = reader.position().line();
        match reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                index += 1;
                let line = record.position().map(|p| p.line()).unwrap_or(line);
                let parsed = StringRecord::from_byte_record(record.clone())
                    .map_err(|e| format!("invalid utf-8: {}", e))
                    .and_then(|r| {
                        if index == 1 && is_header(&r) {
                            header_ok = true;
                            return Ok(None);
                        }
                        parse_record(&r).map(Some)
                    });
                match parsed {
                    Ok(None) => {}
                    Ok(Some(rec)) => {
                        valid.push(rec);
                        last_valid_line = line;
                    }
                    Err(reason) => {
                        first_malformed_line.get_or_insert(line);
                        malformed.push(MalformedRow { line, reason });
                    }
                }
            }
            Err(e) => {
                // Unrecoverable read error; everything after is unreadable.
                first_malformed_line.get_or_insert(line);
                malformed.push(MalformedRow {
                    line,
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    let malformed_all_trailing = match first_malformed_line {
        Some(first) => first > last_valid_line,
        None => true,
    };
    Ok(Some(Scan {
        header_ok,
        valid,
        malformed,
        malformed_all_trailing,
    }))
}

/// Persist the rename. Best effort: directories cannot be opened on every platform.
fn sync_parent(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
}
