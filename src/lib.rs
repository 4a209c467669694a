//! kv-chunk-store: two-tier cache for KV-cache chunks.
//!
//! Lets an inference node reuse attention KV chunks already computed for a
//! shared token prefix, by itself or by another node:
//!   local tier (memory / SSD, node-scoped) → remote tier (shared)
//!
//! Callers only see [`StorageBackend`]; [`HybridBackend`] composes a local
//! and a remote tier behind it.

pub mod cache;
pub mod config;
pub mod storage;

pub use cache::codec::{CodecError, Deserializer, Serializer};
pub use cache::hybrid::{HybridBackend, HybridBuilder, WriteHandle};
pub use cache::key::CacheKey;
pub use cache::tensor::{DType, TensorBlock};
pub use storage::{BackendError, RemoteBackend, StorageBackend};
