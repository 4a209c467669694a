//! Directory-backed storage.
//!
//! Serves as the local tier on an SSD or, pointed at a shared mount, as the
//! remote tier several nodes read from and write to.
//!
//! Layout: `<root>/<shard>/<segment>/.../<segment>.kvchunk`. A key is encoded
//! as `hex(format)_hex(prefix_hash)` and cut into segments of at most
//! [`SEGMENT_LEN`] characters; all but the last become directories. `shard` is
//! the first two hex digits of the encoded prefix. Keys of any length thus map
//! to safe, reversible paths whose components stay under file-name limits.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use crate::cache::key::CacheKey;
use crate::storage::{BackendError, RemoteBackend, StorageBackend};

const CHUNK_EXT: &str = "kvchunk";

/// Longest path component an encoded key is cut into.
pub const SEGMENT_LEN: usize = 200;

/// Separates the encoded format from the encoded prefix; never a hex digit.
const KEY_SEPARATOR: char = '_';

/// Suffix source for in-flight temp files.
static NEXT_TMP_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
pub struct DiskStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

/// Directory store for KV-cache chunks.
#[derive(Debug)]
pub struct DiskBackend {
    root: PathBuf,
    name: String,
    stats: DiskStats,
}

impl DiskBackend {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        let name = format!("disk:{}", root.display());
        fs::create_dir_all(&root)
            .await
            .map_err(|e| BackendError::unavailable(name.clone(), e))?;

        Ok(Self {
            root,
            name,
            stats: DiskStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> &DiskStats {
        &self.stats
    }

    fn unavailable(&self, err: std::io::Error) -> BackendError {
        BackendError::unavailable(self.name.clone(), err)
    }

    /// Generate the file path for a key.
    fn chunk_path(&self, key: &CacheKey) -> PathBuf {
        let prefix = hex::encode(&key.prefix_hash);
        let shard = prefix.get(..2).unwrap_or("00");
        let encoded = format!("{}{KEY_SEPARATOR}{prefix}", hex::encode(&key.format));

        let mut path = self.root.join(shard);
        let mut rest = encoded.as_str();
        // Encoded keys are ASCII, so byte offsets are char boundaries.
        while rest.len() > SEGMENT_LEN {
            let (segment, tail) = rest.split_at(SEGMENT_LEN);
            path.push(segment);
            rest = tail;
        }
        path.push(format!("{rest}.{CHUNK_EXT}"));
        path
    }

    /// Recover a key from its joined directory segments and chunk file name.
    fn key_from_path(segments: &str, file_name: &str) -> Option<CacheKey> {
        let last = file_name.strip_suffix(&format!(".{CHUNK_EXT}"))?;
        let encoded = format!("{segments}{last}");
        let (format, prefix) = encoded.split_once(KEY_SEPARATOR)?;
        Some(CacheKey::new(decode_component(prefix)?, decode_component(format)?))
    }

    async fn read_dir_names(&self, dir: &Path) -> Result<Vec<(String, PathBuf, bool)>, BackendError> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(dir).await.map_err(|e| self.unavailable(e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.unavailable(e))? {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| self.unavailable(e))?
                .is_dir();
            if let Some(name) = entry.file_name().to_str() {
                out.push((name.to_string(), entry.path(), is_dir));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageBackend for DiskBackend {
    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<(), BackendError> {
        let path = self.chunk_path(key);

        // Ensure parent directory exists.
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| self.unavailable(e))?;
        }

        // Write next to the target and rename so readers never see a torn chunk.
        let tmp = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            NEXT_TMP_ID.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, &value).await.map_err(|e| self.unavailable(e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(self.unavailable(e));
        }

        debug!(
            key = %key,
            path = %path.display(),
            size = value.len(),
            "Wrote chunk to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(value.len() as u64, Ordering::Relaxed);

        Ok(())
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool, BackendError> {
        fs::try_exists(self.chunk_path(key))
            .await
            .map_err(|e| self.unavailable(e))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, BackendError> {
        let path = self.chunk_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unavailable(e)),
        };

        debug!(
            key = %key,
            path = %path.display(),
            size = data.len(),
            "Read chunk from disk"
        );

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        Ok(Some(Bytes::from(data)))
    }
}

#[async_trait]
impl RemoteBackend for DiskBackend {
    async fn list(&self) -> Result<Vec<CacheKey>, BackendError> {
        let mut keys = Vec::new();

        // Shard directories carry no key material; segments below them do.
        let mut pending: Vec<(PathBuf, String)> = self
            .read_dir_names(&self.root)
            .await?
            .into_iter()
            .filter(|(_, _, is_dir)| *is_dir)
            .map(|(_, path, _)| (path, String::new()))
            .collect();

        while let Some((dir, segments)) = pending.pop() {
            for (name, path, is_dir) in self.read_dir_names(&dir).await? {
                if is_dir {
                    pending.push((path, format!("{segments}{name}")));
                    continue;
                }
                match Self::key_from_path(&segments, &name) {
                    Some(key) => keys.push(key),
                    // Temp files from in-flight writes and foreign files.
                    None => debug!(file = %name, "Skipping non-chunk file"),
                }
            }
        }
        Ok(keys)
    }
}

fn decode_component(hex_str: &str) -> Option<String> {
    String::from_utf8(hex::decode(hex_str).ok()?).ok()
}
