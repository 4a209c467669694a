//! Runtime configuration for kv-chunk-store.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Tier locations, eviction bounds, warm-up concurrency and codec selection live here.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "kv-chunk-store", about = "Two-tier KV-cache chunk store")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mirror the remote tier into the local tier and report what was found.
    Warm,

    /// Store a raw chunk file under a key (write-through to both tiers).
    Put {
        #[arg(long)]
        prefix: String,
        #[arg(long)]
        format: String,
        /// File holding the raw element bytes of the chunk.
        #[arg(long)]
        file: PathBuf,
        /// Element type of the chunk (e.g. f16, bf16, f32).
        #[arg(long, default_value = "f16")]
        dtype: String,
    },

    /// Fetch a chunk and write its raw element bytes to a file.
    Get {
        #[arg(long)]
        prefix: String,
        #[arg(long)]
        format: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "f16")]
        dtype: String,
    },

    /// Check whether a chunk is cached in either tier.
    Contains {
        #[arg(long)]
        prefix: String,
        #[arg(long)]
        format: String,
    },

    /// Warm up, then print hybrid counters in Prometheus text format.
    Stats,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local (node-scoped) tier.
    pub local: LocalConfig,

    /// Shared remote tier.
    pub remote: RemoteConfig,

    /// Warm-up settings.
    pub prefetch: PrefetchConfig,

    /// Codec used for stored chunks.
    pub codec: CodecConfig,
}

/// Which store backs the local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalKind {
    /// In-process map.
    Memory,
    /// Directory on local SSD.
    Disk,
}

/// Local tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub kind: LocalKind,

    /// Directory for the disk store (ignored for `memory`).
    pub path: PathBuf,

    /// Eviction policy for the in-memory store.
    pub eviction: EvictionConfig,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            kind: LocalKind::Memory,
            path: PathBuf::from("/tmp/kv-chunk-store/local"),
            eviction: EvictionConfig::default(),
        }
    }
}

/// Remote tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Shared directory (NFS mount or similar) holding the remote store.
    pub path: PathBuf,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/mnt/kv-chunk-store"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicyKind {
    /// Never evict.
    Unbounded,
    /// Least-recently-used under `capacity_bytes`.
    Lru,
}

/// Eviction policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub policy: EvictionPolicyKind,

    /// Byte budget for bounded policies.
    pub capacity_bytes: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicyKind::Unbounded,
            capacity_bytes: 8 * 1024 * 1024 * 1024, // 8 GB
        }
    }
}

/// Warm-up settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Maximum number of remote fetches in flight during warm-up.
    pub concurrency: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Zstd,
}

/// Codec settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub compression: Compression,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            zstd_level: 3,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
