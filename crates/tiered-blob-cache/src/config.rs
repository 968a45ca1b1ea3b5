//! Cache configuration

use crate::error::{CacheError, Result};
use crate::types::{CachePolicy, DEFAULT_MAX_AGE};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of the writable root's directory name; the namespace follows it.
pub const NAMESPACE_PREFIX: &str = "blob-cache.";

/// Configuration for a [`BlobCache`](crate::BlobCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory the namespaced writable root is created in
    pub base_dir: PathBuf,
    pub namespace: String,
    /// Maximum total cost of the memory tier in bytes
    pub memory_capacity: usize,
    pub policy: CachePolicy,
    /// Read-only roots searched after the writable root, in order
    pub read_only_paths: Vec<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./cache"),
            namespace: "default".to_string(),
            memory_capacity: 64 * 1024 * 1024, // 64MB
            policy: CachePolicy::default(),
            read_only_paths: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn new(base_dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Load configuration from the environment.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let base_dir = lookup("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.base_dir);

        let namespace = lookup("CACHE_NAMESPACE").unwrap_or(defaults.namespace);

        let memory_capacity = lookup("MEMORY_CACHE_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.memory_capacity);

        // 0 or unset means unlimited
        let max_size = lookup("MAX_CACHE_SIZE")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&size| size > 0);

        let max_age = lookup("CACHE_TTL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAX_AGE);

        let read_only_paths = lookup("READ_ONLY_CACHE_PATHS")
            .map(|paths| {
                paths
                    .split(':')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            base_dir,
            namespace,
            memory_capacity,
            policy: CachePolicy { max_age, max_size },
            read_only_paths,
        };
        config.validate()?;
        Ok(config)
    }

    /// The namespace must be a single, non-empty path component.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CacheError::Config("namespace must not be empty".to_string()));
        }
        if self.namespace.contains(['/', '\\']) {
            return Err(CacheError::Config(format!(
                "namespace {:?} must not contain path separators",
                self.namespace
            )));
        }
        Ok(())
    }

    /// Directory of the writable root
    pub fn disk_root(&self) -> PathBuf {
        self.base_dir
            .join(format!("{}{}", NAMESPACE_PREFIX, self.namespace))
    }
}
