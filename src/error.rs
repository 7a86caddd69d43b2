//! Error types for elohim-chunkstore

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    /// A multi-chunk write stopped partway. Chunks below `persisted` are
    /// still on disk; the object's state is undefined until a full rewrite
    /// or delete succeeds.
    #[error("Partial write of {name}: {persisted} chunk(s) persisted before failure: {source}")]
    PartialWrite {
        name: String,
        persisted: u32,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Replication failed for {failed} of {attempted} peer(s)")]
    ReplicationPartial { failed: usize, attempted: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid object name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether this error came from the backing medium.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StorageError::Storage(_) | StorageError::Io(_) | StorageError::Database(_)
        )
    }
}
