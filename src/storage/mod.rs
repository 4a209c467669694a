//! Storage backends.
//!
//! Every cache tier implements [`StorageBackend`]. Tiers that can be shared
//! between nodes additionally implement [`RemoteBackend`], whose `list()` is
//! used to warm a fresh node's local tier.
//!
//! - [`memory`]: in-process map with a pluggable eviction policy
//! - [`disk`]: directory store for a local SSD or a shared mount

pub mod disk;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cache::codec::CodecError;
use crate::cache::key::CacheKey;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend} backend unavailable: {source}")]
    Unavailable {
        backend: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("partial write for {key}: stored locally but remote write failed: {source}")]
    PartialWrite {
        key: CacheKey,
        #[source]
        source: Box<BackendError>,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl BackendError {
    pub fn unavailable(
        backend: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        BackendError::Unavailable {
            backend: backend.into(),
            source: source.into(),
        }
    }

    /// Whether the tiers were left diverged by this failure.
    pub fn is_partial_write(&self) -> bool {
        matches!(self, BackendError::PartialWrite { .. })
    }
}

/// The capability set every cache tier provides.
///
/// Values are the opaque bytes produced by a [`Serializer`](crate::cache::codec::Serializer).
/// A missing key is `Ok(None)` / `Ok(false)`, never an error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<(), BackendError>;

    /// Whether `key` is present. Has no side effects.
    async fn contains(&self, key: &CacheKey) -> Result<bool, BackendError>;

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError>;
}

/// A shared tier whose contents can be enumerated.
#[async_trait]
pub trait RemoteBackend: StorageBackend {
    /// All keys currently stored, in no particular order.
    async fn list(&self) -> Result<Vec<CacheKey>, BackendError>;
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<(), BackendError> {
        (**self).put(key, value).await
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool, BackendError> {
        (**self).contains(key).await
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        (**self).get(key).await
    }
}

#[async_trait]
impl<T: RemoteBackend + ?Sized> RemoteBackend for Arc<T> {
    async fn list(&self) -> Result<Vec<CacheKey>, BackendError> {
        (**self).list().await
    }
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<(), BackendError> {
        (**self).put(key, value).await
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool, BackendError> {
        (**self).contains(key).await
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        (**self).get(key).await
    }
}
