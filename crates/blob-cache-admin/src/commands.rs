//! Maintenance commands run against the cache

use crate::error::Result;
use crate::types::StatusReport;
use std::future::Future;
use std::time::Duration;
use tiered_blob_cache::{BlobCache, BytesCodec, CacheError, DiskUsage, SweepReport};
use tokio::sync::oneshot;
use tracing::{info, warn};

pub type Cache = BlobCache<BytesCodec>;

/// Snapshot of usage and policy. Walks the disk on the I/O worker.
pub async fn status(cache: &Cache) -> Result<StatusReport> {
    let (tx, rx) = oneshot::channel();
    cache.calculate_size_async(move |file_count, total_size| {
        let _ = tx.send((file_count, total_size));
    });
    let (file_count, total_size) = rx.await.map_err(|_| CacheError::QueueClosed)?;

    Ok(StatusReport {
        namespace: cache.namespace().to_string(),
        root: cache.disk_root().to_path_buf(),
        read_only_paths: cache.read_only_paths(),
        usage: DiskUsage {
            file_count,
            total_size,
        },
        policy: cache.policy(),
    })
}

/// Run one sweep with the cache's current policy.
pub async fn clean(cache: &Cache) -> Result<SweepReport> {
    let (tx, rx) = oneshot::channel();
    cache.clean_disk_with_completion(move |report| {
        let _ = tx.send(report);
    });
    Ok(rx.await.map_err(|_| CacheError::QueueClosed)?)
}

pub async fn clear(cache: &Cache) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    cache.clear_disk_with_completion(move |result| {
        let _ = tx.send(result);
    });
    rx.await.map_err(|_| CacheError::QueueClosed)??;
    Ok(())
}

/// Sweep every `interval` until `shutdown` resolves.
pub async fn run_daemon(
    cache: &Cache,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!(
        root = %cache.disk_root().display(),
        interval_secs = interval.as_secs(),
        "Starting disk cache housekeeping daemon"
    );

    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Housekeeping daemon shutting down");
                break;
            }
            _ = ticker.tick() => {
                match clean(cache).await {
                    Ok(report) if report.failures > 0 => warn!(
                        failures = report.failures,
                        "Some cache files could not be deleted"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Disk cache clean failed"),
                }
                if let Ok(status) = status(cache).await {
                    info!(
                        file_count = status.usage.file_count,
                        total_size = status.usage.total_size,
                        "Disk cache usage"
                    );
                }
            }
        }
    }

    cache.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tiered_blob_cache::CacheConfig;

    fn create_test_cache(dir: &std::path::Path) -> Cache {
        BlobCache::new(CacheConfig::new(dir, "admin"), BytesCodec).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_usage() {
        let dir = tempdir().unwrap();
        let cache = create_test_cache(dir.path());
        cache.store("a", vec![0u8; 10]);
        cache.store("b", vec![0u8; 20]);

        let status = status(&cache).await.unwrap();
        assert_eq!(status.namespace, "admin");
        assert_eq!(status.usage.file_count, 2);
        assert_eq!(status.usage.total_size, 30);
    }

    #[tokio::test]
    async fn test_clean_applies_policy() {
        let dir = tempdir().unwrap();
        let cache = create_test_cache(dir.path());
        cache.store("a", vec![0u8; 10]);
        cache.set_max_age(Duration::ZERO);

        let report = clean(&cache).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(cache.get_disk_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_empties_root() {
        let dir = tempdir().unwrap();
        let cache = create_test_cache(dir.path());
        cache.store("a", vec![1, 2, 3]);

        clear(&cache).await.unwrap();
        assert_eq!(cache.get_disk_count(), 0);
    }

    #[tokio::test]
    async fn test_daemon_sweeps_until_shutdown() {
        let dir = tempdir().unwrap();
        let cache = create_test_cache(dir.path());
        cache.store("a", vec![0u8; 10]);
        cache.set_max_age(Duration::ZERO);

        let shutdown = tokio::time::sleep(Duration::from_millis(200));
        tokio::time::timeout(
            Duration::from_secs(5),
            run_daemon(&cache, Duration::from_millis(20), shutdown),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(cache.get_disk_count(), 0);
    }
}
