//! In-process storage backend.
//!
//! Entries live in a hash map guarded by an async lock. Clones share the same
//! map, so one instance can serve as the shared tier for several hybrids in a
//! single process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::evictor::{EvictionPolicy, Unbounded};
use crate::cache::key::CacheKey;
use crate::storage::{BackendError, RemoteBackend, StorageBackend};

struct MemoryState {
    entries: HashMap<CacheKey, Bytes>,
    policy: Box<dyn EvictionPolicy>,
    bytes: usize,
    evictions: u64,
}

/// Hash-map backed store.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    /// A store that never evicts.
    pub fn new() -> Self {
        Self::with_policy(Box::new(Unbounded))
    }

    /// A store whose size is governed by `policy`.
    pub fn with_policy(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                entries: HashMap::new(),
                policy,
                bytes: 0,
                evictions: 0,
            })),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Bytes held across all entries.
    pub async fn bytes_used(&self) -> usize {
        self.state.read().await.bytes
    }

    /// Entries dropped by the eviction policy so far.
    pub async fn evictions(&self) -> u64 {
        self.state.read().await.evictions
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let size = value.len();
        if let Some(old) = state.entries.insert(key.clone(), value) {
            state.bytes -= old.len();
        }
        state.bytes += size;

        let victims = state.policy.on_insert(key, size);
        for victim in &victims {
            if let Some(old) = state.entries.remove(victim) {
                state.bytes -= old.len();
            }
            debug!(key = %victim, "Evicted entry");
        }
        state.evictions += victims.len() as u64;

        debug!(key = %key, bytes = size, "Stored entry in memory");
        Ok(())
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool, BackendError> {
        Ok(self.state.read().await.entries.contains_key(key))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        {
            let state = self.state.read().await;
            if !state.policy.tracks_access() {
                return Ok(state.entries.get(key).cloned());
            }
        }

        let mut state = self.state.write().await;
        let value = state.entries.get(key).cloned();
        if value.is_some() {
            state.policy.on_access(key);
        }
        Ok(value)
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn list(&self) -> Result<Vec<CacheKey>, BackendError> {
        Ok(self.state.read().await.entries.keys().cloned().collect())
    }
}
