//! Fixed-size chunk persistence
//!
//! Objects are stored as a zero-based, contiguous run of chunks. The run
//! ends at the first missing index, so deletion and assembly never need an
//! index file: they walk forward until `exists` says stop.

use crate::backend::{ChunkBackend, ChunkKey};
use crate::error::StorageError;
use std::sync::Arc;
use tracing::debug;

/// Number of chunks `len` bytes occupy at `chunk_size`.
///
/// Empty content still occupies one (empty) chunk so it can be told apart
/// from a missing object.
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    if len == 0 {
        1
    } else {
        len.div_ceil(chunk_size) as u32
    }
}

/// Split `content` into the slices written as chunks `0..chunk_count`.
pub fn split(content: &[u8], chunk_size: usize) -> impl Iterator<Item = &[u8]> + '_ {
    let empty: Option<&[u8]> = content.is_empty().then_some(&[][..]);
    empty.into_iter().chain(content.chunks(chunk_size))
}

/// Chunk-level access to a backing medium
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkBackend>,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn ChunkBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ChunkBackend> {
        &self.backend
    }

    /// Persist `payload` as chunk `index` of `name`, replacing any previous chunk
    pub async fn put(&self, name: &str, index: u32, payload: &[u8]) -> Result<(), StorageError> {
        self.backend.put(&ChunkKey::new(name, index), payload).await?;
        debug!(name = %name, index, size = payload.len(), "Stored chunk");
        Ok(())
    }

    pub async fn get(&self, name: &str, index: u32) -> Result<Option<Vec<u8>>, StorageError> {
        self.backend.get(&ChunkKey::new(name, index)).await
    }

    pub async fn exists(&self, name: &str, index: u32) -> Result<bool, StorageError> {
        self.backend.exists(&ChunkKey::new(name, index)).await
    }

    /// Remove every chunk of `name`. Returns how many were removed.
    pub async fn delete_all(&self, name: &str) -> Result<u32, StorageError> {
        self.delete_from(name, 0).await
    }

    /// Remove chunks `start, start + 1, ...` up to the first absent index.
    pub async fn delete_from(&self, name: &str, start: u32) -> Result<u32, StorageError> {
        let mut index = start;
        loop {
            let key = ChunkKey::new(name, index);
            if !self.backend.exists(&key).await? {
                break;
            }
            self.backend.delete(&key).await?;
            debug!(name = %name, index, "Deleted chunk");
            index += 1;
        }
        Ok(index - start)
    }

    /// Length of the contiguous chunk run starting at index 0
    pub async fn chunk_count(&self, name: &str) -> Result<u32, StorageError> {
        let mut index = 0;
        while self.exists(name, index).await? {
            index += 1;
        }
        Ok(index)
    }

    /// Concatenate chunks `0, 1, ...` until the first absent index.
    ///
    /// Returns `None` when chunk 0 is absent.
    pub async fn assemble(&self, name: &str) -> Result<Option<(Vec<u8>, u32)>, StorageError> {
        let mut data = Vec::new();
        let mut index = 0u32;
        while let Some(chunk) = self.get(name, index).await? {
            data.extend_from_slice(&chunk);
            index += 1;
        }

        if index == 0 {
            return Ok(None);
        }
        Ok(Some((data, index)))
    }
}
