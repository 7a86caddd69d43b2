//! Storage service - chunked writes, cached reads, replica fan-out
//!
//! ## Write path
//!
//! 1. Take the object's exclusive lock
//! 2. Split content into `chunk_size` slices and persist them in order
//! 3. Delete any chunks left over from a longer previous version
//! 4. Cache the full content and record metadata
//! 5. Optionally fan the object out to the configured peers in the background
//!
//! ## Read path
//!
//! Cache first. On a miss the chunks are concatenated in index order until
//! the first gap, and the result is cached. An object with no chunk 0 does
//! not exist.
//!
//! ## Failure model
//!
//! A failed write is not rolled back. If chunk 0 could not be written the
//! error is returned as-is; if any later step failed the caller gets
//! [`StorageError::PartialWrite`] and the object's contents are undefined
//! until it is fully rewritten or deleted. Either way the object is dropped
//! from the cache so it cannot mask what is actually on the medium.

use crate::backend::{ChunkBackend, FsBackend, MemoryBackend, SledBackend};
use crate::cache::{BoundedCache, CacheStats};
use crate::chunk_store::{self, ChunkStore};
use crate::config::{BackendKind, Config};
use crate::error::StorageError;
use crate::locks::ObjectLocks;
use crate::metadata::{compute_hash, MetadataDb, ObjectMetadata};
use crate::replication::{
    LoggingTransport, ReplicaTarget, ReplicationCoordinator, ReplicationReport,
    ReplicationTransport,
};
use crate::sweeper::CacheSweeper;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Chunked object store with an LRU read cache
pub struct StorageService {
    chunks: ChunkStore,
    cache: Arc<BoundedCache>,
    locks: ObjectLocks,
    metadata: Option<Arc<MetadataDb>>,
    replication: ReplicationCoordinator,
    chunk_size: usize,
    replica_peers: Vec<ReplicaTarget>,
    replicate_on_write: bool,
    sweeper: Mutex<Option<CacheSweeper>>,
}

impl StorageService {
    /// Open the service described by `config`, logging replication only.
    pub async fn open(config: Config) -> Result<Self, StorageError> {
        Self::open_with_transport(config, Arc::new(LoggingTransport)).await
    }

    /// Open the service described by `config` with a custom replication transport
    pub async fn open_with_transport(
        config: Config,
        transport: Arc<dyn ReplicationTransport>,
    ) -> Result<Self, StorageError> {
        config.validate()?;

        let backend: Arc<dyn ChunkBackend> = match config.backend {
            BackendKind::Fs => Arc::new(FsBackend::new(config.chunks_dir()).await?),
            BackendKind::Sled => Arc::new(SledBackend::open(config.chunks_db_path())?),
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };

        let metadata = if config.enable_metadata {
            Some(MetadataDb::open(config.metadata_db_path())?)
        } else {
            None
        };

        Self::from_parts(&config, backend, transport, metadata)
    }

    /// Assemble a service from already constructed collaborators.
    ///
    /// Starts the cache sweeper, so this must run inside a Tokio runtime.
    pub fn from_parts(
        config: &Config,
        backend: Arc<dyn ChunkBackend>,
        transport: Arc<dyn ReplicationTransport>,
        metadata: Option<MetadataDb>,
    ) -> Result<Self, StorageError> {
        config.validate()?;

        let cache = Arc::new(BoundedCache::new(config.cache_capacity));
        let sweeper = CacheSweeper::start(Arc::clone(&cache), config.sweep_interval());

        info!(
            backend = backend.kind(),
            chunk_size = config.chunk_size,
            cache_capacity = config.cache_capacity,
            sweep_interval_secs = config.sweep_interval_secs,
            metadata = metadata.is_some(),
            "Initialized storage service"
        );

        Ok(Self {
            chunks: ChunkStore::new(backend),
            cache,
            locks: ObjectLocks::new(),
            metadata: metadata.map(Arc::new),
            replication: ReplicationCoordinator::new(transport),
            chunk_size: config.chunk_size,
            replica_peers: config
                .replica_peers
                .iter()
                .cloned()
                .map(ReplicaTarget::from)
                .collect(),
            replicate_on_write: config.replicate_on_write,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    fn validate_name(name: &str) -> Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Store `content` under `name`, replacing any previous version
    pub async fn write(&self, name: &str, content: impl Into<Bytes>) -> Result<(), StorageError> {
        Self::validate_name(name)?;
        let content: Bytes = content.into();

        let guard = self.locks.write(name).await;

        let chunk_count = chunk_store::chunk_count(content.len(), self.chunk_size);
        for (index, slice) in chunk_store::split(&content, self.chunk_size).enumerate() {
            if let Err(e) = self.chunks.put(name, index as u32, slice).await {
                self.cache.remove(name);
                warn!(name = %name, index, error = %e, "Chunk write failed");
                return Err(if index == 0 {
                    e
                } else {
                    StorageError::PartialWrite {
                        name: name.to_string(),
                        persisted: index as u32,
                        source: Box::new(e),
                    }
                });
            }
        }

        // A shorter rewrite must not leave the old tail reachable
        match self.chunks.delete_from(name, chunk_count).await {
            Ok(0) => {}
            Ok(stale) => debug!(name = %name, stale, "Removed stale trailing chunks"),
            Err(e) => {
                self.cache.remove(name);
                warn!(name = %name, error = %e, "Failed to remove stale trailing chunks");
                return Err(StorageError::PartialWrite {
                    name: name.to_string(),
                    persisted: chunk_count,
                    source: Box::new(e),
                });
            }
        }

        self.cache.put(name, content.clone());

        if let Some(metadata) = &self.metadata {
            let record = ObjectMetadata::for_content(name, &content, chunk_count, self.chunk_size);
            if let Err(e) = metadata.put(&record) {
                warn!(name = %name, error = %e, "Failed to record object metadata");
            }
        }

        drop(guard);

        info!(name = %name, size = content.len(), chunks = chunk_count, "File written");

        if self.replicate_on_write && !self.replica_peers.is_empty() {
            self.spawn_fan_out(name.to_string(), content, self.replica_peers.clone());
        }

        Ok(())
    }

    /// Fetch the full content of `name`
    pub async fn read(&self, name: &str) -> Result<Bytes, StorageError> {
        Self::validate_name(name)?;

        let _guard = self.locks.read(name).await;

        if let Some(content) = self.cache.get(name) {
            return Ok(content);
        }

        match self.chunks.assemble(name).await? {
            Some((data, chunks)) => {
                let content = Bytes::from(data);
                self.cache.put(name, content.clone());
                debug!(name = %name, size = content.len(), chunks, "File read from storage");
                Ok(content)
            }
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    /// Remove `name` and all its chunks. Deleting a missing object is a no-op.
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        Self::validate_name(name)?;

        let _guard = self.locks.write(name).await;

        let removed = self.chunks.delete_all(name).await;
        self.cache.remove(name);
        let removed = removed?;

        if let Some(metadata) = &self.metadata {
            if let Err(e) = metadata.delete(name) {
                warn!(name = %name, error = %e, "Failed to remove object metadata");
            }
        }

        if removed > 0 {
            info!(name = %name, chunks = removed, "File deleted");
        } else {
            debug!(name = %name, "Delete of missing object ignored");
        }
        Ok(())
    }

    /// Push the current content of `name` to `peers`.
    ///
    /// The object's lock is released before any peer is contacted, so slow
    /// peers never hold up local reads or writes. Peer failures are in the
    /// report; only a failed local read is an error.
    pub async fn replicate(
        &self,
        name: &str,
        peers: &[ReplicaTarget],
    ) -> Result<ReplicationReport, StorageError> {
        let content = self.read(name).await?;
        let content_hash = compute_hash(&content);
        let report = self.replication.propagate(name, content, peers).await;
        Self::record_replicas(self.metadata.as_deref(), &content_hash, &report);
        Ok(report)
    }

    /// [`replicate`](Self::replicate) on a background task
    pub fn replicate_in_background(
        self: &Arc<Self>,
        name: &str,
        peers: Vec<ReplicaTarget>,
    ) -> JoinHandle<Result<ReplicationReport, StorageError>> {
        let service = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move { service.replicate(&name, &peers).await })
    }

    fn spawn_fan_out(&self, name: String, content: Bytes, peers: Vec<ReplicaTarget>) {
        let replication = self.replication.clone();
        let metadata = self.metadata.clone();
        tokio::spawn(async move {
            let content_hash = compute_hash(&content);
            let report = replication.propagate(&name, content, &peers).await;
            Self::record_replicas(metadata.as_deref(), &content_hash, &report);
        });
    }

    /// Credit delivered peers to the version whose hash is `content_hash`
    fn record_replicas(
        metadata: Option<&MetadataDb>,
        content_hash: &str,
        report: &ReplicationReport,
    ) {
        let Some(metadata) = metadata else {
            return;
        };
        let delivered: Vec<String> = report.delivered().iter().map(|p| p.to_string()).collect();
        if delivered.is_empty() {
            return;
        }
        match metadata.add_replicas(&report.name, content_hash, &delivered) {
            Ok(true) => {}
            Ok(false) => debug!(
                name = %report.name,
                "Object changed during replication, replicas not recorded"
            ),
            Err(e) => warn!(name = %report.name, error = %e, "Failed to record replicas"),
        }
    }

    /// Cached object names, least-recently-used first
    pub fn cache_snapshot(&self) -> Vec<String> {
        self.cache.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached object now, as the periodic sweep does
    pub fn clear_cache(&self) -> usize {
        self.cache.clear_all()
    }

    /// Recorded metadata for `name`; `None` when unknown or metadata is disabled
    pub fn stat(&self, name: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        Self::validate_name(name)?;
        match &self.metadata {
            Some(metadata) => metadata.get(name),
            None => Ok(None),
        }
    }

    /// Names of all objects with recorded metadata
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        match &self.metadata {
            Some(metadata) => metadata.list(),
            None => Err(StorageError::Config("metadata tracking is disabled".into())),
        }
    }

    /// Stop the cache sweeper and flush the backend and metadata
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        if let Some(mut sweeper) = self.sweeper.lock().await.take() {
            sweeper.shutdown().await;
        }

        self.chunks.backend().flush().await?;
        if let Some(metadata) = &self.metadata {
            metadata.flush().await?;
        }

        info!("Storage service stopped");
        Ok(())
    }
}
