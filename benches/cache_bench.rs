//! Benchmarks for the chunk store.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use kv_chunk_store::cache::codec::{
    Deserializer, FastDeserializer, FastSerializer, Serializer, ZstdSerializer,
};
use kv_chunk_store::storage::MemoryBackend;
use kv_chunk_store::{CacheKey, DType, HybridBackend, StorageBackend, TensorBlock};

fn bench_codec(c: &mut Criterion) {
    // 256KB chunk (typical KV block size).
    let tensor = TensorBlock::from_slice(&vec![42u8; 256 * 1024], vec![64, 4096]).unwrap();
    let transposed = tensor.transpose(0, 1).unwrap();
    let payload = FastSerializer::new().to_bytes(&tensor).unwrap();

    c.bench_function("fast_serialize_256kb", |b| {
        b.iter(|| black_box(FastSerializer::new().to_bytes(black_box(&tensor))))
    });

    c.bench_function("fast_serialize_256kb_strided", |b| {
        b.iter(|| black_box(FastSerializer::new().to_bytes(black_box(&transposed))))
    });

    c.bench_function("fast_deserialize_256kb", |b| {
        b.iter(|| black_box(FastDeserializer::new(DType::U8).from_bytes(payload.clone())))
    });

    c.bench_function("zstd_serialize_256kb", |b| {
        b.iter(|| black_box(ZstdSerializer::new(3).to_bytes(black_box(&tensor))))
    });
}

fn bench_hybrid(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let remote = MemoryBackend::new();
    let hybrid = rt
        .block_on(HybridBackend::new(MemoryBackend::new(), remote.clone()))
        .unwrap();
    let key = CacheKey::new("abc123", "f16");
    rt.block_on(hybrid.put(&key, Bytes::from(vec![0u8; 64 * 1024])))
        .unwrap();

    c.bench_function("hybrid_get_local_hit", |b| {
        b.iter(|| black_box(rt.block_on(hybrid.get(black_box(&key)))))
    });

    c.bench_function("hybrid_contains_remote_fallback", |b| {
        let missing = CacheKey::new("missing", "f16");
        b.iter(|| black_box(rt.block_on(hybrid.contains(black_box(&missing)))))
    });
}

criterion_group!(benches, bench_codec, bench_hybrid);
criterion_main!(benches);
