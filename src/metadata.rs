//! Metadata database for stored objects
//!
//! Tracks:
//! - Size, chunk count and chunk size of each object
//! - SHA-256 of the full content
//! - When the object was last written
//! - Peers a replication round delivered the object to
//!
//! Advisory only: reads always go through the chunks, never through here.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sled::Db;
use std::path::Path;
use tracing::info;

/// Compute SHA256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("sha256-{}", hex::encode(result))
}

/// Object metadata stored in local database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub name: String,
    pub size_bytes: u64,
    pub chunk_count: u32,
    pub chunk_size: u32,
    /// `sha256-<hex>` of the full content
    pub content_hash: String,
    /// Unix seconds of the last successful write
    pub stored_at: i64,
    /// Peers a replication round reported as delivered
    pub known_replicas: Vec<String>,
}

impl ObjectMetadata {
    pub fn for_content(name: &str, content: &[u8], chunk_count: u32, chunk_size: usize) -> Self {
        Self {
            name: name.to_string(),
            size_bytes: content.len() as u64,
            chunk_count,
            chunk_size: chunk_size as u32,
            content_hash: compute_hash(content),
            stored_at: chrono::Utc::now().timestamp(),
            known_replicas: Vec::new(),
        }
    }
}

/// Metadata database
pub struct MetadataDb {
    db: Db,
}

impl MetadataDb {
    /// Open or create metadata database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened metadata database");
        Ok(Self { db })
    }

    /// Throwaway database that is deleted when dropped (for tests)
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store object metadata, replacing any previous record
    pub fn put(&self, metadata: &ObjectMetadata) -> Result<(), StorageError> {
        let value = rmp_serde::to_vec(metadata)
            .map_err(|e| StorageError::Serialization(format!("Metadata encode: {}", e)))?;
        self.db.insert(metadata.name.as_bytes(), value)?;
        Ok(())
    }

    /// Get object metadata
    pub fn get(&self, name: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        if let Some(value) = self.db.get(name.as_bytes())? {
            let metadata: ObjectMetadata = rmp_serde::from_slice(&value)
                .map_err(|e| StorageError::Serialization(format!("Metadata decode: {}", e)))?;
            Ok(Some(metadata))
        } else {
            Ok(None)
        }
    }

    /// Delete object metadata
    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.db.remove(name.as_bytes())?;
        Ok(())
    }

    /// Merge `peers` into the known replica list of `name`.
    ///
    /// Only applies while the stored record still describes the content
    /// with `content_hash`; returns whether the peers were recorded.
    pub fn add_replicas(
        &self,
        name: &str,
        content_hash: &str,
        peers: &[String],
    ) -> Result<bool, StorageError> {
        loop {
            let Some(current) = self.db.get(name.as_bytes())? else {
                return Ok(false);
            };
            let mut metadata: ObjectMetadata = rmp_serde::from_slice(&current)
                .map_err(|e| StorageError::Serialization(format!("Metadata decode: {}", e)))?;
            if metadata.content_hash != content_hash {
                return Ok(false);
            }
            for peer in peers {
                if !metadata.known_replicas.contains(peer) {
                    metadata.known_replicas.push(peer.clone());
                }
            }
            let value = rmp_serde::to_vec(&metadata)
                .map_err(|e| StorageError::Serialization(format!("Metadata encode: {}", e)))?;

            // Retry if a write replaced the record since it was read
            match self
                .db
                .compare_and_swap(name.as_bytes(), Some(current), Some(value))?
            {
                Ok(()) => return Ok(true),
                Err(_) => continue,
            }
        }
    }

    /// List all object names
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for result in self.db.iter() {
            let (key, _) = result?;
            names.push(String::from_utf8_lossy(&key).to_string());
        }
        Ok(names)
    }

    /// Flush to disk
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }
}
