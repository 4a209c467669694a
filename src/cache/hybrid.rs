//! Hybrid backend: one logical store over a fast local tier and a shared remote tier.
//!
//! - Construction mirrors the remote tier into the local tier (warm-up) and
//!   does not return until that has finished
//! - Writes go to the local tier, then the remote tier (write-through)
//! - Reads are served locally when possible; remote hits are copied into the
//!   local tier before being returned (read-through with promotion)
//!
//! A remote write failing after the local write succeeded leaves the tiers
//! diverged. That is reported as [`BackendError::PartialWrite`], never
//! swallowed, and never rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prometheus::{IntCounter, Opts, Registry};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument, Span};

use crate::cache::key::CacheKey;
use crate::cache::prefetcher::{Prefetcher, WarmupReport};
use crate::config::PrefetchConfig;
use crate::storage::{BackendError, RemoteBackend, StorageBackend};

/// Counters describing how requests were served.
#[derive(Debug, Clone)]
pub struct HybridMetrics {
    pub local_hits: IntCounter,
    pub remote_hits: IntCounter,
    pub misses: IntCounter,
    pub promotions: IntCounter,
    pub partial_writes: IntCounter,
    pub prefetched: IntCounter,
}

impl HybridMetrics {
    fn new() -> Self {
        fn counter(name: &str, help: &str) -> IntCounter {
            // Names and help strings are static and valid.
            IntCounter::with_opts(Opts::new(name, help).namespace("kv_chunk_store"))
                .unwrap_or_else(|e| unreachable!("invalid counter {name}: {e}"))
        }

        Self {
            local_hits: counter("hybrid_local_hits_total", "Reads served by the local tier"),
            remote_hits: counter("hybrid_remote_hits_total", "Reads served by the remote tier"),
            misses: counter("hybrid_misses_total", "Reads absent from both tiers"),
            promotions: counter("hybrid_promotions_total", "Remote hits copied into the local tier"),
            partial_writes: counter(
                "hybrid_partial_writes_total",
                "Writes stored locally whose remote write failed",
            ),
            prefetched: counter("hybrid_prefetched_total", "Chunks mirrored during warm-up"),
        }
    }

    /// Register all counters with `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        for c in [
            &self.local_hits,
            &self.remote_hits,
            &self.misses,
            &self.promotions,
            &self.partial_writes,
            &self.prefetched,
        ] {
            registry.register(Box::new(c.clone()))?;
        }
        Ok(())
    }
}

/// Completion handle for a deferred remote write.
///
/// Dropping the handle does not cancel the write.
#[derive(Debug)]
pub struct WriteHandle {
    key: CacheKey,
    task: JoinHandle<Result<(), BackendError>>,
}

impl WriteHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Whether the remote write has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the remote write.
    pub async fn wait(self) -> Result<(), BackendError> {
        match self.task.await {
            Ok(result) => result,
            Err(join) => Err(BackendError::PartialWrite {
                key: self.key,
                source: Box::new(BackendError::unavailable("remote write task", join)),
            }),
        }
    }
}

/// Builder for [`HybridBackend`].
pub struct HybridBuilder<L, R> {
    local: L,
    remote: R,
    span: Option<Span>,
    prefetch: PrefetchConfig,
}

impl<L, R> HybridBuilder<L, R>
where
    L: StorageBackend + 'static,
    R: RemoteBackend + 'static,
{
    /// Span that warm-up and every operation run in.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn prefetch(mut self, config: PrefetchConfig) -> Self {
        self.prefetch = config;
        self
    }

    /// Warm the local tier from the remote tier and return the ready backend.
    pub async fn build(self) -> Result<HybridBackend<L, R>, BackendError> {
        let span = self.span.unwrap_or_else(|| info_span!("hybrid_backend"));
        let metrics = HybridMetrics::new();

        let report = Prefetcher::new(self.prefetch)
            .warm(&self.local, &self.remote)
            .instrument(span.clone())
            .await?;
        metrics.prefetched.inc_by(report.mirrored as u64);

        Ok(HybridBackend {
            local: Arc::new(self.local),
            remote: Arc::new(self.remote),
            span,
            metrics,
            warmup: report,
        })
    }
}

/// Write-through, read-through composition of a local and a remote tier.
#[derive(Debug)]
pub struct HybridBackend<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    span: Span,
    metrics: HybridMetrics,
    warmup: WarmupReport,
}

impl<L, R> HybridBackend<L, R>
where
    L: StorageBackend + 'static,
    R: RemoteBackend + 'static,
{
    /// Warm up with default settings. See [`HybridBackend::builder`].
    pub async fn new(local: L, remote: R) -> Result<Self, BackendError> {
        Self::builder(local, remote).build().await
    }

    pub fn builder(local: L, remote: R) -> HybridBuilder<L, R> {
        HybridBuilder {
            local,
            remote,
            span: None,
            prefetch: PrefetchConfig::default(),
        }
    }

    /// The local tier, for direct inspection.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// The remote tier, for direct inspection.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn metrics(&self) -> &HybridMetrics {
        &self.metrics
    }

    /// What the construction-time warm-up found.
    pub fn warmup_report(&self) -> &WarmupReport {
        &self.warmup
    }

    /// Write to the local tier now and to the remote tier in the background.
    ///
    /// When this returns `Ok`, the value is visible to local reads. The remote
    /// outcome is delivered through the returned handle.
    pub async fn put_deferred(
        &self,
        key: &CacheKey,
        value: Bytes,
    ) -> Result<WriteHandle, BackendError> {
        self.local
            .put(key, value.clone())
            .instrument(self.span.clone())
            .await?;

        let remote = Arc::clone(&self.remote);
        let partial_writes = self.metrics.partial_writes.clone();
        let task_key = key.clone();
        let task = tokio::spawn(
            async move {
                remote.put(&task_key, value).await.map_err(|e| {
                    partial_writes.inc();
                    warn!(key = %task_key, error = %e, "Deferred remote write failed; tiers diverged");
                    BackendError::PartialWrite {
                        key: task_key.clone(),
                        source: Box::new(e),
                    }
                })
            }
            .instrument(self.span.clone()),
        );

        Ok(WriteHandle {
            key: key.clone(),
            task,
        })
    }
}

#[async_trait]
impl<L, R> StorageBackend for HybridBackend<L, R>
where
    L: StorageBackend + 'static,
    R: RemoteBackend + 'static,
{
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<(), BackendError> {
        async {
            self.local.put(key, value.clone()).await?;

            if let Err(e) = self.remote.put(key, value).await {
                self.metrics.partial_writes.inc();
                warn!(key = %key, error = %e, "Remote write failed after local write; tiers diverged");
                return Err(BackendError::PartialWrite {
                    key: key.clone(),
                    source: Box::new(e),
                });
            }

            debug!(key = %key, "Wrote through both tiers");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool, BackendError> {
        async {
            if self.local.contains(key).await? {
                return Ok(true);
            }
            self.remote.contains(key).await
        }
        .instrument(self.span.clone())
        .await
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        async {
            if let Some(value) = self.local.get(key).await? {
                self.metrics.local_hits.inc();
                debug!(key = %key, "Local hit");
                return Ok(Some(value));
            }

            match self.remote.get(key).await? {
                Some(value) => {
                    self.metrics.remote_hits.inc();
                    self.local.put(key, value.clone()).await?;
                    self.metrics.promotions.inc();
                    debug!(key = %key, bytes = value.len(), "Promoted remote hit to local tier");
                    Ok(Some(value))
                }
                None => {
                    self.metrics.misses.inc();
                    debug!(key = %key, "Miss in both tiers");
                    Ok(None)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[tokio::test]
    async fn test_scenario_abc123() {
        let remote = MemoryBackend::new();
        let key = CacheKey::new("abc123", "half");
        remote
            .put(&key, Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]))
            .await
            .unwrap();

        let hybrid = HybridBackend::new(MemoryBackend::new(), remote).await.unwrap();

        assert!(hybrid.contains(&key).await.unwrap());
        assert_eq!(
            hybrid.get(&key).await.unwrap().unwrap().as_ref(),
            &[0x01, 0x02, 0x03, 0x04]
        );
        assert!(hybrid.local().contains(&key).await.unwrap());
        assert_eq!(
            hybrid.local().get(&key).await.unwrap().unwrap().as_ref(),
            &[0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(hybrid.metrics().prefetched.get(), 1);
        assert_eq!(hybrid.metrics().local_hits.get(), 1);
    }

    #[tokio::test]
    async fn test_metrics_register_once() {
        let hybrid = HybridBackend::new(MemoryBackend::new(), MemoryBackend::new())
            .await
            .unwrap();
        let registry = Registry::new();
        hybrid.metrics().register(&registry).unwrap();
        assert!(hybrid.metrics().register(&registry).is_err());
        assert_eq!(registry.gather().len(), 6);
    }
}
