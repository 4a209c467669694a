//! kv-chunk-store command-line front end.
//!
//! Builds the hybrid store described by the configuration file (which warms
//! the local tier from the shared tier) and runs one command against it.

use std::sync::Arc;

use anyhow::bail;
use bytes::Bytes;
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{info, info_span};

use kv_chunk_store::cache::codec::{deserializer_for, serializer_for};
use kv_chunk_store::cache::evictor::build_policy;
use kv_chunk_store::config::{Cli, Command, Config, LocalKind};
use kv_chunk_store::storage::{DiskBackend, MemoryBackend};
use kv_chunk_store::{CacheKey, DType, HybridBackend, StorageBackend, TensorBlock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "kv_chunk_store=debug"
    } else {
        "kv_chunk_store=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("kv-chunk-store v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);

    info!(
        local = ?config.local.kind,
        remote = %config.remote.path.display(),
        eviction = ?config.local.eviction.policy,
        compression = ?config.codec.compression,
        "Configuration loaded"
    );

    // Local tier.
    let local: Box<dyn StorageBackend> = match config.local.kind {
        LocalKind::Memory => Box::new(MemoryBackend::with_policy(build_policy(
            &config.local.eviction,
        ))),
        LocalKind::Disk => Box::new(DiskBackend::new(&config.local.path).await?),
    };

    // Shared tier.
    let remote = DiskBackend::new(&config.remote.path).await?;

    // Warm-up runs here; nothing is served before it completes.
    let hybrid = HybridBackend::builder(local, remote)
        .span(info_span!("hybrid", node = %std::process::id()))
        .prefetch(config.prefetch.clone())
        .build()
        .await?;

    match cli.command {
        Command::Warm => {
            let report = hybrid.warmup_report();
            println!(
                "listed={} mirrored={} vanished={} bytes={} elapsed_ms={}",
                report.listed,
                report.mirrored,
                report.vanished,
                report.bytes,
                report.elapsed.as_millis()
            );
        }
        Command::Put {
            prefix,
            format,
            file,
            dtype,
        } => {
            let dtype: DType = dtype.parse()?;
            let raw = Bytes::from(tokio::fs::read(&file).await?);
            let tensor = TensorBlock::from_raw(dtype, raw)?;

            let key = CacheKey::new(prefix, format);
            let payload = serializer_for(&config.codec).to_bytes(&tensor)?;
            hybrid.put(&key, payload).await?;

            info!(key = %key, elements = tensor.numel(), "Stored chunk");
        }
        Command::Get {
            prefix,
            format,
            out,
            dtype,
        } => {
            let dtype: DType = dtype.parse()?;
            let key = CacheKey::new(prefix, format);

            let Some(payload) = hybrid.get(&key).await? else {
                bail!("no chunk cached for {key}");
            };
            let tensor = deserializer_for(&config.codec, dtype).from_bytes(payload)?;
            tokio::fs::write(&out, tensor.to_bytes()).await?;

            info!(key = %key, elements = tensor.numel(), out = %out.display(), "Fetched chunk");
        }
        Command::Contains { prefix, format } => {
            let key = CacheKey::new(prefix, format);
            println!("{}", hybrid.contains(&key).await?);
        }
        Command::Stats => {
            let registry = Registry::new();
            hybrid.metrics().register(&registry)?;

            let mut buf = Vec::new();
            TextEncoder::new().encode(&registry.gather(), &mut buf)?;
            print!("{}", String::from_utf8(buf)?);
        }
    }

    Ok(())
}
