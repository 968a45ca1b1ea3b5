//! Two-tier blob cache: memory over disk
//!
//! Writes land in memory immediately and are queued to disk on the background
//! I/O worker. Reads check memory first and fall back to disk, either on the
//! calling thread (`query_disk`) or on the worker (`query_disk_async`,
//! `query`). Disk hits are promoted back into memory.

use crate::codec::Codec;
use crate::config::CacheConfig;
use crate::disk::DiskStore;
use crate::error::{CacheError, Result};
use crate::key::{is_valid_key, scaled_key};
use crate::memory::MemoryStore;
use crate::task::{CancelOnDrop, PendingQuery, QueryHandle};
use crate::types::{CachePolicy, CacheStats, CacheType, DiskUsage, SweepReport};
use crate::worker::IoQueue;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Where a `store` should put the resource
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Bytes to write to disk instead of encoding the resource
    pub encoded: Option<Vec<u8>>,
    pub to_memory: bool,
    pub to_disk: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            encoded: None,
            to_memory: true,
            to_disk: true,
        }
    }
}

impl StoreOptions {
    pub fn memory_only() -> Self {
        Self {
            to_disk: false,
            ..Default::default()
        }
    }

    pub fn disk_only() -> Self {
        Self {
            to_memory: false,
            ..Default::default()
        }
    }

    /// Write these bytes to disk as-is, e.g. the payload exactly as downloaded.
    pub fn with_encoded(mut self, encoded: Vec<u8>) -> Self {
        self.encoded = Some(encoded);
        self
    }
}

/// State shared with jobs running on the I/O worker
struct Shared<C: Codec> {
    codec: C,
    memory: MemoryStore<C::Resource>,
    disk: DiskStore,
    policy: RwLock<CachePolicy>,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl<C: Codec> Shared<C> {
    /// Read and decode `key` from disk. Decode failures are logged and treated as a miss.
    fn load_from_disk(&self, key: &str) -> Option<Arc<C::Resource>> {
        let data = self.disk.read(key)?;
        match self.codec.decode(&data) {
            Ok(resource) => Some(Arc::new(resource)),
            Err(e) => {
                warn!(key, size = data.len(), error = %e, "Discarding undecodable disk record");
                None
            }
        }
    }

    fn promote(&self, key: &str, resource: &Arc<C::Resource>) {
        let cost = self.codec.cost(resource);
        self.memory.put(key, Arc::clone(resource), cost);
        debug!(key, cost, "Promoted disk hit into memory");
    }

    fn record(&self, cache_type: CacheType) {
        let counter = match cache_type {
            CacheType::Memory => &self.memory_hits,
            CacheType::Disk => &self.disk_hits,
            CacheType::None => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn sweep(&self) -> SweepReport {
        let policy = *self.policy.read();
        let report = self.disk.sweep_expired(policy.max_age, policy.max_size);
        info!(
            expired = report.expired,
            evicted = report.evicted,
            bytes_freed = report.bytes_freed,
            failures = report.failures,
            size_after = report.size_after,
            "Disk cache clean complete"
        );
        report
    }
}

/// A memory + disk cache for resources produced by codec `C`.
///
/// Disk mutations run in submission order on one background thread, so a
/// `store` followed by a `remove` of the same key always applies in that order.
pub struct BlobCache<C: Codec> {
    shared: Arc<Shared<C>>,
    queue: IoQueue,
    namespace: String,
}

impl<C: Codec> BlobCache<C> {
    /// Create a cache, creating its namespaced writable root if needed.
    pub fn new(config: CacheConfig, codec: C) -> Result<Self> {
        config.validate()?;

        let disk = DiskStore::new(config.disk_root());
        disk.init()?;
        for path in &config.read_only_paths {
            disk.add_overlay(path);
        }

        let shared = Arc::new(Shared {
            codec,
            memory: MemoryStore::new(config.memory_capacity),
            disk,
            policy: RwLock::new(config.policy),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });
        let queue = IoQueue::spawn("blob-cache-io")?;

        info!(
            namespace = %config.namespace,
            root = %shared.disk.root().display(),
            memory_capacity = config.memory_capacity,
            "Cache initialized"
        );

        Ok(Self {
            shared,
            queue,
            namespace: config.namespace,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Directory of the writable root
    pub fn disk_root(&self) -> &Path {
        self.shared.disk.root()
    }

    /// Search `path` for records after the writable root and earlier overlays.
    ///
    /// Useful for shipping pre-populated records with an application. The
    /// directory is never written to or swept.
    pub fn add_read_only_path(&self, path: impl Into<PathBuf>) {
        self.shared.disk.add_overlay(path);
    }

    /// Registered overlay directories in search order
    pub fn read_only_paths(&self) -> Vec<PathBuf> {
        self.shared.disk.overlay_paths()
    }

    /// Store `resource` in both tiers.
    pub fn store(&self, key: &str, resource: C::Resource) {
        self.store_with_options(key, resource, StoreOptions::default());
    }

    /// Store `resource` in the tiers selected by `options`.
    ///
    /// The memory tier is updated before returning; the disk write is queued.
    pub fn store_with_options(&self, key: &str, resource: C::Resource, options: StoreOptions) {
        self.store_with_completion(key, resource, options, |result| {
            if let Err(e) = result {
                warn!(error = %e, "Failed to write disk record");
            }
        });
    }

    /// Like [`BlobCache::store_with_options`], reporting the outcome to `done` once.
    ///
    /// `done` runs on the I/O worker after the disk write, or inline when no
    /// disk write was requested.
    pub fn store_with_completion(
        &self,
        key: &str,
        resource: C::Resource,
        options: StoreOptions,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        if !is_valid_key(key) {
            done(Err(CacheError::InvalidKey(format!("{:?}", key))));
            return;
        }

        let resource = Arc::new(resource);
        if options.to_memory {
            let cost = self.shared.codec.cost(&resource);
            self.shared.memory.put(key, Arc::clone(&resource), cost);
        }

        if !options.to_disk {
            done(Ok(()));
            return;
        }

        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        let encoded = options.encoded;
        self.queue.submit(move || {
            let result = match encoded {
                Some(data) => Ok(data),
                None => shared.codec.encode(&resource),
            }
            .and_then(|data| shared.disk.write(&key, &data).map_err(CacheError::from));
            done(result);
        });
    }

    /// Look `key` up in memory only.
    pub fn query_memory(&self, key: &str) -> Option<Arc<C::Resource>> {
        let resource = self.shared.memory.get(key)?;
        self.shared.record(CacheType::Memory);
        Some(resource)
    }

    /// Look `key` up in memory, then on disk, blocking the calling thread on disk I/O.
    ///
    /// A disk hit is promoted into memory.
    pub fn query_disk(&self, key: &str) -> (Option<Arc<C::Resource>>, CacheType) {
        if !is_valid_key(key) {
            return (None, CacheType::None);
        }
        if let Some(resource) = self.query_memory(key) {
            return (Some(resource), CacheType::Memory);
        }

        let result = match self.shared.load_from_disk(key) {
            Some(resource) => {
                self.shared.promote(key, &resource);
                (Some(resource), CacheType::Disk)
            }
            None => (None, CacheType::None),
        };
        self.shared.record(result.1);
        result
    }

    /// Look `key` up without blocking on disk I/O.
    ///
    /// On a memory hit `done` fires before this returns. Otherwise the disk
    /// read runs on the I/O worker and `done` fires there, unless the returned
    /// handle is canceled first, in which case it never fires and nothing is
    /// promoted into memory.
    pub fn query_disk_async(
        &self,
        key: &str,
        done: impl FnOnce(Option<Arc<C::Resource>>, CacheType) + Send + 'static,
    ) -> QueryHandle {
        if !is_valid_key(key) {
            done(None, CacheType::None);
            return QueryHandle::completed();
        }
        if let Some(resource) = self.query_memory(key) {
            done(Some(resource), CacheType::Memory);
            return QueryHandle::completed();
        }

        let handle = QueryHandle::new();
        let pending = PendingQuery::new(handle.clone(), done);
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();

        self.queue.submit(move || {
            if !pending.start() {
                debug!(key = %key, "Disk query canceled before it ran");
                return;
            }

            let resource = shared.load_from_disk(&key);
            let cache_type = if resource.is_some() {
                CacheType::Disk
            } else {
                CacheType::None
            };

            let fired = pending.complete(resource, cache_type, |resource| {
                if let Some(resource) = resource {
                    shared.promote(&key, resource);
                }
                shared.record(cache_type);
            });
            if !fired {
                debug!(key = %key, "Disk query canceled while running");
            }
        });

        handle
    }

    /// Query the variant of `key` scaled to `pixel_size`.
    ///
    /// Only the scaled key is consulted; the original is not used as a fallback.
    pub fn query_disk_scaled_async(
        &self,
        key: &str,
        pixel_size: u32,
        done: impl FnOnce(Option<Arc<C::Resource>>, CacheType) + Send + 'static,
    ) -> QueryHandle {
        self.query_disk_async(&scaled_key(key, pixel_size), done)
    }

    /// Future form of [`BlobCache::query_disk_async`].
    ///
    /// Dropping the future before it resolves cancels the query.
    pub async fn query(&self, key: &str) -> (Option<Arc<C::Resource>>, CacheType) {
        let (tx, rx) = oneshot::channel();
        let handle = self.query_disk_async(key, move |resource, cache_type| {
            let _ = tx.send((resource, cache_type));
        });
        let _guard = CancelOnDrop(handle);
        rx.await.unwrap_or((None, CacheType::None))
    }

    /// Remove `key` from memory and, if `from_disk`, from the writable root.
    ///
    /// The disk removal is queued behind earlier writes and this call blocks
    /// until it has been applied.
    pub fn remove(&self, key: &str, from_disk: bool) -> Result<()> {
        self.shared.memory.remove(key);
        if !from_disk {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        let removed = self.queue.run_blocking(move || {
            let removed = shared.disk.remove(&key);
            // A disk query queued before this job may have promoted the record again
            shared.memory.remove(&key);
            removed
        })??;
        debug!(removed, "Removed disk record");
        Ok(())
    }

    pub fn clear_memory(&self) {
        self.shared.memory.clear();
        debug!("Cleared memory cache");
    }

    /// Delete every record in the writable root, in the background.
    pub fn clear_disk(&self) {
        self.clear_disk_with_completion(|_| {});
    }

    pub fn clear_disk_with_completion(&self, done: impl FnOnce(Result<()>) + Send + 'static) {
        let shared = Arc::clone(&self.shared);
        self.queue.submit(move || {
            let result = shared.disk.remove_all().map_err(CacheError::from);
            match &result {
                Ok(()) => info!(root = %shared.disk.root().display(), "Cleared disk cache"),
                Err(e) => warn!(error = %e, "Failed to clear disk cache"),
            }
            done(result);
        });
    }

    /// Sweep expired and over-size records in the background using the current policy.
    pub fn clean_disk(&self) {
        self.clean_disk_with_completion(|_| {});
    }

    pub fn clean_disk_with_completion(&self, done: impl FnOnce(SweepReport) + Send + 'static) {
        let shared = Arc::clone(&self.shared);
        self.queue.submit(move || done(shared.sweep()));
    }

    /// Walk the writable root on the calling thread.
    ///
    /// This scans every file; prefer [`BlobCache::calculate_size_async`] where
    /// latency matters.
    pub fn disk_usage(&self) -> DiskUsage {
        self.shared.disk.usage()
    }

    /// Total bytes in the writable root. Scans the directory.
    pub fn get_size(&self) -> u64 {
        self.disk_usage().total_size
    }

    /// Number of records in the writable root. Scans the directory.
    pub fn get_disk_count(&self) -> usize {
        self.disk_usage().file_count
    }

    /// Compute `(file_count, total_size)` on the I/O worker.
    pub fn calculate_size_async(&self, done: impl FnOnce(usize, u64) + Send + 'static) {
        let shared = Arc::clone(&self.shared);
        self.queue.submit(move || {
            let usage = shared.disk.usage();
            done(usage.file_count, usage.total_size);
        });
    }

    /// Whether a record for `key` exists in the writable root or any overlay.
    pub fn disk_exists(&self, key: &str) -> bool {
        self.shared.disk.exists(key)
    }

    pub fn policy(&self) -> CachePolicy {
        *self.shared.policy.read()
    }

    /// Replace the housekeeping policy. Applies from the next `clean_disk`.
    pub fn set_policy(&self, policy: CachePolicy) {
        *self.shared.policy.write() = policy;
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.shared.policy.write().max_age = max_age;
    }

    pub fn set_max_size(&self, max_size: Option<u64>) {
        self.shared.policy.write().max_size = max_size;
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.shared.memory.len(),
            memory_cost: self.shared.memory.total_cost(),
            memory_hits: self.shared.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.shared.disk_hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
        }
    }

    /// Wait until all previously queued background work has run.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    pub fn flush_blocking(&self) -> Result<()> {
        self.queue.flush_blocking()
    }
}
