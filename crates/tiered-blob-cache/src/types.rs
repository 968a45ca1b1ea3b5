//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One week, the default maximum age of a disk record
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Which tier satisfied a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Not cached anywhere
    None,
    Disk,
    Memory,
}

/// Disk housekeeping limits, consulted on every `clean_disk` pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub max_age: Duration,
    /// `None` means the disk tier is unbounded
    pub max_size: Option<u64>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_size: None,
        }
    }
}

/// A file found while walking the writable root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// File count and byte total of the writable root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub file_count: usize,
    pub total_size: u64,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Files removed for being older than the max age
    pub expired: usize,
    /// Files removed to get under the size cap
    pub evicted: usize,
    pub bytes_freed: u64,
    /// Files that could not be deleted
    pub failures: usize,
    pub size_after: u64,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_cost: usize,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}
