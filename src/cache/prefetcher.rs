//! Warm-up: mirrors the shared tier into the local tier before a node serves.
//!
//! Every key the remote tier lists is fetched and stored locally. Fetches are
//! independent of each other and run concurrently up to a configured bound;
//! the warm-up only returns once all of them have finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::stream::{self, TryStreamExt};
use tracing::{debug, info, trace};

use crate::config::PrefetchConfig;
use crate::storage::{BackendError, RemoteBackend, StorageBackend};

/// Outcome of one warm-up pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    /// Keys the remote tier listed.
    pub listed: usize,
    /// Keys copied into the local tier.
    pub mirrored: usize,
    /// Listed keys that were gone by the time they were fetched.
    pub vanished: usize,
    /// Bytes copied into the local tier.
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Copies remote contents into the local tier.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    config: PrefetchConfig,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }

    /// Mirror every listed remote key into `local`.
    ///
    /// The first listing, fetch or store failure aborts the pass and is
    /// returned unchanged.
    pub async fn warm<L, R>(&self, local: &L, remote: &R) -> Result<WarmupReport, BackendError>
    where
        L: StorageBackend + ?Sized,
        R: RemoteBackend + ?Sized,
    {
        let start = Instant::now();
        let keys = remote.list().await?;
        let listed = keys.len();
        info!(keys = listed, "Found keys in remote backend");

        let mirrored = AtomicUsize::new(0);
        let bytes = AtomicUsize::new(0);

        stream::iter(keys.into_iter().map(Ok::<_, BackendError>))
            .try_for_each_concurrent(self.config.concurrency.max(1), |key| {
                let mirrored = &mirrored;
                let bytes = &bytes;
                async move {
                    match remote.get(&key).await? {
                        Some(value) => {
                            let len = value.len();
                            local.put(&key, value).await?;
                            mirrored.fetch_add(1, Ordering::Relaxed);
                            bytes.fetch_add(len, Ordering::Relaxed);
                            trace!(key = %key, bytes = len, "Mirrored remote chunk");
                        }
                        None => debug!(key = %key, "Listed key vanished before fetch"),
                    }
                    Ok(())
                }
            })
            .await?;

        let mirrored = mirrored.into_inner();
        let report = WarmupReport {
            listed,
            mirrored,
            vanished: listed - mirrored,
            bytes: bytes.into_inner(),
            elapsed: start.elapsed(),
        };

        info!(
            listed = report.listed,
            mirrored = report.mirrored,
            bytes = report.bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Warm-up complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKey;
    use crate::storage::MemoryBackend;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_warm_copies_everything() {
        let remote = MemoryBackend::new();
        for i in 0..50 {
            let key = CacheKey::new(format!("prefix-{i}"), "f16");
            remote.put(&key, Bytes::from(vec![i as u8; 10])).await.unwrap();
        }
        let local = MemoryBackend::new();

        let report = Prefetcher::new(PrefetchConfig { concurrency: 4 })
            .warm(&local, &remote)
            .await
            .unwrap();

        assert_eq!(report.listed, 50);
        assert_eq!(report.mirrored, 50);
        assert_eq!(report.vanished, 0);
        assert_eq!(report.bytes, 500);
        assert_eq!(local.len().await, 50);
    }

    #[tokio::test]
    async fn test_warm_empty_remote() {
        let report = Prefetcher::new(PrefetchConfig { concurrency: 0 })
            .warm(&MemoryBackend::new(), &MemoryBackend::new())
            .await
            .unwrap();
        assert_eq!(report.listed, 0);
        assert_eq!(report.mirrored, 0);
    }
}
