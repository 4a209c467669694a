//! Two-tier KV-cache chunk management.
//!
//! This module contains the core cache types and algorithms:
//! - [`key`]: CacheKey (prefix hash + format)
//! - [`tensor`]: TensorBlock and element types
//! - [`codec`]: Serializer/Deserializer between tensor blocks and stored bytes
//! - [`hybrid`]: HybridBackend, the write-through/read-through orchestrator
//! - [`prefetcher`]: Warm-up of the local tier from the remote tier
//! - [`evictor`]: Pluggable eviction policies for the local tier

pub mod codec;
pub mod evictor;
pub mod hybrid;
pub mod key;
pub mod prefetcher;
pub mod tensor;
