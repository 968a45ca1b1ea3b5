//! File-per-key disk tier.
//!
//! Records live in a single writable root named by [`filename_for`] of their
//! key. Read-only overlay roots (e.g. resources bundled with an application)
//! are searched in registration order when the writable root misses, but are
//! never written, removed from, or swept.
//!
//! All mutating methods are expected to run on the cache's background I/O
//! worker; reads may run on any thread because writes are published with an
//! atomic rename.

use crate::key::filename_for;
use crate::types::{DiskRecord, DiskUsage, SweepReport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Prefix of in-flight temporary files, skipped by every directory walk
const TEMP_PREFIX: &str = ".tmp-";

/// A root that can answer point lookups.
pub trait LookupRoot {
    fn root(&self) -> &Path;

    fn record_path(&self, key: &str) -> PathBuf {
        self.root().join(filename_for(key))
    }

    fn exists(&self, key: &str) -> bool {
        self.record_path(key).is_file()
    }

    /// Read the record for `key`. A missing file is `Ok(None)`.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A root that can also be written to and housekept.
pub trait MutableRoot: LookupRoot {
    fn write(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// Remove the record for `key`. Returns whether a file was deleted.
    fn remove(&self, key: &str) -> io::Result<bool>;

    fn remove_all(&self) -> io::Result<()>;

    /// Every record currently in the root.
    fn records(&self) -> Vec<DiskRecord>;
}

/// An overlay directory searched after the writable root.
#[derive(Debug, Clone)]
pub struct ReadOnlyRoot {
    path: PathBuf,
}

impl ReadOnlyRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LookupRoot for ReadOnlyRoot {
    fn root(&self) -> &Path {
        &self.path
    }
}

/// The cache's own directory.
#[derive(Debug)]
pub struct WritableRoot {
    path: PathBuf,
    temp_counter: AtomicU64,
}

impl WritableRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp_counter: AtomicU64::new(0),
        }
    }

    fn temp_path(&self, filename: &str) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.path.join(format!(
            "{}{}-{}-{}",
            TEMP_PREFIX,
            filename,
            std::process::id(),
            n
        ))
    }
}

impl LookupRoot for WritableRoot {
    fn root(&self) -> &Path {
        &self.path
    }
}

impl MutableRoot for WritableRoot {
    fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.path)?;

        let filename = filename_for(key);
        let temp = self.temp_path(&filename);
        let result = (|| {
            let mut file = fs::File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp, self.path.join(&filename))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn remove_all(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.path)
    }

    fn records(&self) -> Vec<DiskRecord> {
        let mut records = Vec::new();
        collect_records(&self.path, &mut records);
        records
    }
}

/// Recursively collect records below `dir`, skipping temporary files.
fn collect_records(dir: &Path, records: &mut Vec<DiskRecord>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                debug!(dir = %dir.display(), error = %e, "Failed to read cache directory");
            }
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }

        if path.is_dir() {
            collect_records(&path, records);
        } else if let Ok(metadata) = entry.metadata() {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            records.push(DiskRecord {
                path,
                size: metadata.len(),
                modified_at: DateTime::<Utc>::from(modified),
            });
        }
    }
}

/// The writable root plus its read-only overlays.
pub struct DiskStore {
    primary: WritableRoot,
    overlays: RwLock<Vec<ReadOnlyRoot>>,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            primary: WritableRoot::new(root),
            overlays: RwLock::new(Vec::new()),
        }
    }

    /// Directory of the writable root
    pub fn root(&self) -> &Path {
        self.primary.root()
    }

    /// Ensure the writable root exists.
    pub fn init(&self) -> io::Result<()> {
        fs::create_dir_all(self.primary.root())
    }

    /// Register an overlay searched after the writable root and any earlier overlays.
    pub fn add_overlay(&self, path: impl Into<PathBuf>) {
        let overlay = ReadOnlyRoot::new(path);
        info!(path = %overlay.root().display(), "Added read-only cache path");
        self.overlays.write().push(overlay);
    }

    /// Overlay directories in search order.
    pub fn overlay_paths(&self) -> Vec<PathBuf> {
        self.overlays
            .read()
            .iter()
            .map(|o| o.root().to_path_buf())
            .collect()
    }

    pub fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.primary.write(key, data)?;
        debug!(key, size = data.len(), "Wrote disk record");
        Ok(())
    }

    /// Read `key` from the first root that has it.
    ///
    /// Read errors are logged and treated as a miss for that root.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(data) = read_logged(&self.primary, key) {
            return Some(data);
        }
        let overlays = self.overlays.read();
        overlays.iter().find_map(|overlay| read_logged(overlay, key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.primary.exists(key) || self.overlays.read().iter().any(|o| o.exists(key))
    }

    pub fn remove(&self, key: &str) -> io::Result<bool> {
        self.primary.remove(key)
    }

    pub fn remove_all(&self) -> io::Result<()> {
        self.primary.remove_all()
    }

    /// Walk the writable root and total its files.
    ///
    /// This is a full directory scan; keep it off latency-sensitive threads.
    pub fn usage(&self) -> DiskUsage {
        let records = self.primary.records();
        DiskUsage {
            file_count: records.len(),
            total_size: records.iter().map(|r| r.size).sum(),
        }
    }

    /// Delete expired records, then the oldest survivors until under `max_size`.
    ///
    /// A record is expired when its modification time is at or before
    /// `now - max_age`. Files that cannot be deleted are counted and skipped.
    pub fn sweep_expired(&self, max_age: Duration, max_size: Option<u64>) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let mut remaining = Vec::new();
        for record in self.primary.records() {
            let expired = cutoff.is_some_and(|cutoff| record.modified_at <= cutoff);
            if !expired {
                remaining.push(record);
                continue;
            }
            match fs::remove_file(&record.path) {
                Ok(()) => {
                    report.expired += 1;
                    report.bytes_freed += record.size;
                }
                Err(e) => {
                    report.failures += 1;
                    debug!(path = %record.path.display(), error = %e, "Failed to delete expired record");
                    remaining.push(record);
                }
            }
        }

        let mut size: u64 = remaining.iter().map(|r| r.size).sum();

        if let Some(max_size) = max_size {
            if size > max_size {
                remaining.sort_by_key(|r| r.modified_at);

                for record in &remaining {
                    if size <= max_size {
                        break;
                    }
                    match fs::remove_file(&record.path) {
                        Ok(()) => {
                            report.evicted += 1;
                            report.bytes_freed += record.size;
                            size = size.saturating_sub(record.size);
                        }
                        Err(e) => {
                            report.failures += 1;
                            debug!(path = %record.path.display(), error = %e, "Failed to delete record during size eviction");
                        }
                    }
                }

                if size > max_size {
                    warn!(
                        size,
                        max_size,
                        shortfall_bytes = size - max_size,
                        "Disk sweep could not reach size limit"
                    );
                }
            }
        }

        report.size_after = size;
        report
    }
}

fn read_logged(root: &impl LookupRoot, key: &str) -> Option<Vec<u8>> {
    match root.read(key) {
        Ok(data) => data,
        Err(e) => {
            warn!(root = %root.root().display(), key, error = %e, "Failed to read disk record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    /// Write a record for `key` and backdate it by `age_secs`.
    fn create_aged_record(store: &DiskStore, key: &str, size: usize, age_secs: u64) {
        store.write(key, &vec![0u8; size]).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        filetime::set_file_mtime(
            store.primary.record_path(key),
            FileTime::from_system_time(mtime),
        )
        .unwrap();
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|e| e.count()).unwrap_or(0)
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path().join("root"));

        store.write("key", b"payload").unwrap();

        assert_eq!(store.read("key").unwrap(), b"payload");
        assert!(store.exists("key"));
        assert!(store.root().join(filename_for("key")).is_file());
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());

        assert!(store.read("nope").is_none());
        assert!(!store.exists("nope"));
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());

        store.write("a", b"1").unwrap();
        store.write("a", b"22").unwrap();

        assert_eq!(count_files(dir.path()), 1);
        assert_eq!(store.read("a").unwrap(), b"22");
    }

    #[test]
    fn test_overlay_lookup_order() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path().join("primary"));
        let first = WritableRoot::new(dir.path().join("first"));
        let second = WritableRoot::new(dir.path().join("second"));
        first.write("shared", b"from-first").unwrap();
        second.write("shared", b"from-second").unwrap();
        second.write("only-second", b"second").unwrap();

        store.add_overlay(dir.path().join("first"));
        store.add_overlay(dir.path().join("second"));

        assert_eq!(store.read("shared").unwrap(), b"from-first");
        assert_eq!(store.read("only-second").unwrap(), b"second");
        assert!(store.exists("only-second"));

        // Primary wins over overlays
        store.write("shared", b"primary").unwrap();
        assert_eq!(store.read("shared").unwrap(), b"primary");
    }

    #[test]
    fn test_remove_only_touches_primary() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path().join("primary"));
        let overlay = WritableRoot::new(dir.path().join("overlay"));
        overlay.write("k", b"bundled").unwrap();
        store.add_overlay(dir.path().join("overlay"));
        store.write("k", b"cached").unwrap();

        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());

        // Still served from the overlay
        assert_eq!(store.read("k").unwrap(), b"bundled");

        store.remove_all().unwrap();
        assert!(overlay.exists("k"));
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_usage() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());

        assert_eq!(store.usage(), DiskUsage::default());

        store.write("a", &[0u8; 100]).unwrap();
        store.write("b", &[0u8; 250]).unwrap();

        let usage = store.usage();
        assert_eq!(usage.file_count, 2);
        assert_eq!(usage.total_size, 350);
    }

    #[test]
    fn test_usage_ignores_overlays() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path().join("primary"));
        let overlay = WritableRoot::new(dir.path().join("overlay"));
        overlay.write("x", &[0u8; 64]).unwrap();
        store.add_overlay(dir.path().join("overlay"));

        assert_eq!(store.usage().file_count, 0);
    }

    #[test]
    fn test_sweep_zero_age_removes_everything_but_overlays() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path().join("primary"));
        let overlay = WritableRoot::new(dir.path().join("overlay"));
        overlay.write("bundled", b"keep me").unwrap();
        store.add_overlay(dir.path().join("overlay"));

        create_aged_record(&store, "a", 10, 5);
        create_aged_record(&store, "b", 10, 0);

        let report = store.sweep_expired(Duration::ZERO, None);

        assert_eq!(report.expired, 2);
        assert_eq!(report.size_after, 0);
        assert_eq!(store.usage().file_count, 0);
        assert!(overlay.exists("bundled"));
    }

    #[test]
    fn test_sweep_age_phase_keeps_fresh_records() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());

        create_aged_record(&store, "old", 10, 3 * 3600);
        create_aged_record(&store, "fresh", 10, 60);

        let report = store.sweep_expired(Duration::from_secs(3600), None);

        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert!(!store.exists("old"));
        assert!(store.exists("fresh"));
    }

    #[test]
    fn test_sweep_size_phase_evicts_oldest_first() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());

        create_aged_record(&store, "age1", 10, 100);
        create_aged_record(&store, "age2", 10, 200);
        create_aged_record(&store, "age3", 10, 300);
        create_aged_record(&store, "age4", 10, 400);

        let report = store.sweep_expired(Duration::MAX, Some(25));

        assert_eq!(report.expired, 0);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.bytes_freed, 20);
        assert_eq!(report.size_after, 20);
        assert!(store.exists("age1"));
        assert!(store.exists("age2"));
        assert!(!store.exists("age3"));
        assert!(!store.exists("age4"));
    }

    #[test]
    fn test_sweep_under_limit_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());
        create_aged_record(&store, "a", 10, 10);

        let report = store.sweep_expired(Duration::from_secs(3600), Some(1000));

        assert_eq!(report.expired + report.evicted, 0);
        assert_eq!(report.size_after, 10);
    }

    #[test]
    fn test_records_skip_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());
        store.write("a", b"abc").unwrap();
        fs::write(dir.path().join(".tmp-inflight"), b"partial").unwrap();

        assert_eq!(store.usage().file_count, 1);
    }
}
