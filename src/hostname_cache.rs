// Durable address -> hostname map. Payloads sometimes omit the hostname; the last good one is reused.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::models::fallback_name;

/// How a display name was resolved for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    /// Not taken from this poll's payload.
    pub cached: bool,
}

#[derive(Debug)]
pub struct HostnameCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl HostnameCache {
    /// Load from disk. A missing file is an empty cache; an unreadable one is logged and ignored.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "hostname cache unreadable, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "hostname cache unreadable, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, address: &str) -> Option<&str> {
        self.entries.get(address).map(String::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the name for a poll. A reported hostname refreshes the cache.
    pub fn resolve(&mut self, address: &str, reported: Option<&str>) -> ResolvedName {
        if let Some(name) = reported.map(clean).filter(|n| !n.is_empty()) {
            if self.entries.get(address) != Some(&name) {
                self.entries.insert(address.to_string(), name.clone());
                self.dirty = true;
            }
            return ResolvedName { name, cached: false };
        }
        let name = self
            .entries
            .get(address)
            .cloned()
            .unwrap_or_else(|| fallback_name(address));
        ResolvedName { name, cached: true }
    }

    /// Write atomically (temp file + rename) if anything changed.
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        if !self.dirty {
            return Ok(());
        }
        write_atomic(&self.path, |f| {
            serde_json::to_writer_pretty(&mut *f, &self.entries)
                .map_err(|e| PersistenceError::Encode(e.to_string()))?;
            Ok(())
        })?;
        self.dirty = false;
        Ok(())
    }
}

/// Hostnames end up in one journal row each: control characters (newlines included)
/// collapse to single spaces.
fn clean(reported: &str) -> String {
    reported
        .split(|c: char| c.is_control())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write a file by staging next to it and renaming over the target.
pub(crate) fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut std::fs::File) -> Result<(), PersistenceError>,
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = staging_path(path);
    let result: Result<(), PersistenceError> = (|| {
        let mut f = std::fs::File::create(&tmp)?;
        write(&mut f)?;
        f.flush()?;
        f.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reported_name_wins_and_is_cached() {
        let dir = TempDir::new().unwrap();
        let mut cache = HostnameCache::load(dir.path().join("hostnames.json"));
        let r = cache.resolve("10.0.0.5", Some("bitaxe-five"));
        assert_eq!(r, ResolvedName { name: "bitaxe-five".into(), cached: false });
        assert!(cache.is_dirty());

        let r = cache.resolve("10.0.0.5", None);
        assert_eq!(r, ResolvedName { name: "bitaxe-five".into(), cached: true });
    }

    #[test]
    fn control_characters_are_flattened() {
        let dir = TempDir::new().unwrap();
        let mut cache = HostnameCache::load(dir.path().join("hostnames.json"));
        let r = cache.resolve("10.0.0.5", Some("bitaxe\r\nlab\t2 "));
        assert_eq!(r.name, "bitaxe lab 2");
        assert_eq!(cache.get("10.0.0.5"), Some("bitaxe lab 2"));
        // Nothing printable left: fall back like a missing hostname.
        assert!(cache.resolve("10.0.0.6", Some("\n\n")).cached);
    }

    #[test]
    fn unknown_device_falls_back_to_address() {
        let dir = TempDir::new().unwrap();
        let mut cache = HostnameCache::load(dir.path().join("hostnames.json"));
        let r = cache.resolve("10.0.0.9", None);
        assert_eq!(r.name, "miner-9");
        assert!(r.cached);
        assert!(!cache.is_dirty());
    }

    #[test]
    fn survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("hostnames.json");
        let mut cache = HostnameCache::load(&path);
        cache.resolve("10.0.0.5", Some("bitaxe-five"));
        cache.save().unwrap();
        assert!(!cache.is_dirty());
        assert!(!staging_path(&path).exists());

        let reloaded = HostnameCache::load(&path);
        assert_eq!(reloaded.get("10.0.0.5"), Some("bitaxe-five"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostnames.json");
        std::fs::write(&path, "{not json").unwrap();
        let cache = HostnameCache::load(&path);
        assert!(cache.is_empty());
    }
}
