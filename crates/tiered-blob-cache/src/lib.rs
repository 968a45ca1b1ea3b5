//! Two-tier blob cache
//!
//! A bounded in-memory LRU tier over a durable file-per-key disk tier, for
//! immutable resources (decoded images and the like) addressed by string
//! keys. Disk writes and housekeeping run on a single background thread in
//! submission order; lookups can block on disk or complete asynchronously
//! through a cancelable [`QueryHandle`].

mod cache;
mod codec;
mod config;
mod disk;
mod error;
mod key;
mod memory;
mod task;
mod types;
mod worker;

pub use cache::{BlobCache, StoreOptions};
pub use codec::{BytesCodec, Codec};
pub use config::{CacheConfig, NAMESPACE_PREFIX};
pub use disk::{DiskStore, LookupRoot, MutableRoot, ReadOnlyRoot, WritableRoot};
pub use error::{CacheError, Result};
pub use key::{filename_for, is_valid_key, scaled_key, UNSCALED};
pub use memory::MemoryStore;
pub use task::{QueryHandle, TaskState};
pub use types::{CachePolicy, CacheStats, CacheType, DiskRecord, DiskUsage, SweepReport};
