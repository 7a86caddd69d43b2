//! Backing media for chunk persistence
//!
//! The chunk store only needs a key-addressable byte store. Three media are
//! provided:
//!
//! - [`FsBackend`] - one file per chunk, `chunks/<hex(sha256(name))>/<index:08>`
//! - [`SledBackend`] - a single sled tree, keys are length-prefixed names
//! - [`MemoryBackend`] - in-process map with access counters, for tests and
//!   ephemeral nodes

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

/// Address of a single chunk: (object name, sequence index)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub name: String,
    pub index: u32,
}

impl ChunkKey {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

/// Key-addressable byte store that chunks are persisted to.
///
/// Implementations report medium failures as errors and absence as
/// `Ok(None)` / `Ok(false)`. Deleting an absent key is not an error.
#[async_trait]
pub trait ChunkBackend: Send + Sync + 'static {
    /// Short label used in logs
    fn kind(&self) -> &'static str;

    async fn put(&self, key: &ChunkKey, payload: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, StorageError>;

    async fn delete(&self, key: &ChunkKey) -> Result<(), StorageError>;

    async fn exists(&self, key: &ChunkKey) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Push buffered writes to the medium
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// One file per chunk under a root directory
pub struct FsBackend {
    root_dir: PathBuf,
}

impl FsBackend {
    /// Create a filesystem backend rooted at `root_dir`
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, StorageError> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized filesystem chunk backend");

        Ok(Self { root_dir })
    }

    /// Directory holding every chunk of `name`.
    ///
    /// Names are opaque and unbounded, so the directory is the SHA-256 of
    /// the name: fixed length, no separators or dot segments.
    fn object_dir(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        self.root_dir.join(hex::encode(digest))
    }

    fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        self.object_dir(&key.name).join(format!("{:08}", key.index))
    }
}

#[async_trait]
impl ChunkBackend for FsBackend {
    fn kind(&self) -> &'static str {
        "fs"
    }

    async fn put(&self, key: &ChunkKey, payload: &[u8]) -> Result<(), StorageError> {
        let path = self.chunk_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write aside and rename so a reader never sees a torn chunk
        let staging = path.with_extension("tmp");
        fs::write(&staging, payload).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.chunk_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &ChunkKey) -> Result<(), StorageError> {
        match fs::remove_file(self.chunk_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // Only succeeds once the object's last chunk is gone
        fs::remove_dir(self.object_dir(&key.name)).await.ok();
        Ok(())
    }

    async fn exists(&self, key: &ChunkKey) -> Result<bool, StorageError> {
        match fs::metadata(self.chunk_path(key)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Sled
// ============================================================================

/// Chunks stored in a single sled tree
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    /// Open or create a sled database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened sled chunk backend");
        Self::from_db(&db)
    }

    /// Use the `chunks` tree of an already open database
    pub fn from_db(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree("chunks")?,
        })
    }

    /// Length-prefixed so one name can never be a prefix of another's key
    fn encode_key(key: &ChunkKey) -> Vec<u8> {
        let name = key.name.as_bytes();
        let mut out = Vec::with_capacity(4 + name.len() + 4);
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&key.index.to_be_bytes());
        out
    }
}

#[async_trait]
impl ChunkBackend for SledBackend {
    fn kind(&self) -> &'static str {
        "sled"
    }

    async fn put(&self, key: &ChunkKey, payload: &[u8]) -> Result<(), StorageError> {
        self.tree.insert(Self::encode_key(key), payload)?;
        Ok(())
    }

    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(Self::encode_key(key))?.map(|v| v.to_vec()))
    }

    async fn delete(&self, key: &ChunkKey) -> Result<(), StorageError> {
        self.tree.remove(Self::encode_key(key))?;
        Ok(())
    }

    async fn exists(&self, key: &ChunkKey) -> Result<bool, StorageError> {
        Ok(self.tree.contains_key(Self::encode_key(key))?)
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let bytes = self.tree.flush_async().await?;
        debug!(bytes, "Flushed sled chunk backend");
        Ok(())
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Operation counters for a [`MemoryBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    pub exists: u64,
}

/// In-memory chunk map that counts every access
#[derive(Default)]
pub struct MemoryBackend {
    chunks: DashMap<ChunkKey, Bytes>,
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    exists: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the access counters
    pub fn counters(&self) -> BackendCounters {
        BackendCounters {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            exists: self.exists.load(Ordering::Relaxed),
        }
    }

    /// Number of chunks currently held, across all objects
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Raw chunk payload, bypassing the counters
    pub fn peek(&self, key: &ChunkKey) -> Option<Bytes> {
        self.chunks.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ChunkBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &ChunkKey, payload: &[u8]) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.chunks
            .insert(key.clone(), Bytes::copy_from_slice(payload));
        Ok(())
    }

    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.chunks.get(key).map(|entry| entry.value().to_vec()))
    }

    async fn delete(&self, key: &ChunkKey) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.chunks.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &ChunkKey) -> Result<bool, StorageError> {
        self.exists.fetch_add(1, Ordering::Relaxed);
        Ok(self.chunks.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(backend: &dyn ChunkBackend) {
        let key = ChunkKey::new("docs/readme.md", 0);

        assert!(!backend.exists(&key).await.unwrap());
        assert_eq!(backend.get(&key).await.unwrap(), None);

        backend.put(&key, b"first").await.unwrap();
        assert!(backend.exists(&key).await.unwrap());
        assert_eq!(backend.get(&key).await.unwrap().as_deref(), Some(&b"first"[..]));

        // Overwrite in place
        backend.put(&key, b"second").await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap().as_deref(), Some(&b"second"[..]));

        backend.delete(&key).await.unwrap();
        assert!(!backend.exists(&key).await.unwrap());

        // Absent delete is fine
        backend.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_backend() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path()).await.unwrap();
        exercise(&backend).await;
    }

    #[tokio::test]
    async fn test_sled_backend() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path().join("chunks.sled")).unwrap();
        exercise(&backend).await;
        backend.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_backend_counts_access() {
        let backend = MemoryBackend::new();
        exercise(&backend).await;

        let counters = backend.counters();
        assert_eq!(counters.puts, 2);
        assert_eq!(counters.gets, 3);
        assert_eq!(counters.deletes, 2);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_fs_backend_names_cannot_escape_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("chunks");
        let backend = FsBackend::new(&root).await.unwrap();

        let key = ChunkKey::new("../../etc/passwd", 0);
        backend.put(&key, b"x").await.unwrap();

        let expected = root
            .join(hex::encode(Sha256::digest(b"../../etc/passwd")))
            .join("00000000");
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn test_fs_backend_accepts_long_names() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path()).await.unwrap();

        let name = "n".repeat(300);
        for index in 0..2 {
            backend.put(&ChunkKey::new(name.clone(), index), b"chunk").await.unwrap();
        }
        let key = ChunkKey::new(name.clone(), 1);
        assert!(backend.exists(&key).await.unwrap());
        assert_eq!(backend.get(&key).await.unwrap().as_deref(), Some(&b"chunk"[..]));

        // Distinct long names sharing a prefix stay apart
        let other = ChunkKey::new(format!("{}x", name), 0);
        assert!(!backend.exists(&other).await.unwrap());
    }

    #[test]
    fn test_sled_keys_do_not_collide_on_prefix() {
        let a = SledBackend::encode_key(&ChunkKey::new("ab", 1));
        let b = SledBackend::encode_key(&ChunkKey::new("a", 1));
        assert_ne!(a, b);
        assert!(!a.starts_with(&b));
    }
}
