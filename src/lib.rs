//! Elohim Chunkstore - chunked object storage for Elohim nodes
//!
//! Stores named payloads as fixed-size chunks on a pluggable medium, serves
//! reads through a bounded LRU cache, and fans writes out to peer nodes.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   write/read ──▶│      StorageService      │──▶ ReplicationCoordinator ──▶ peers
//!   delete        │  per-object RwLock table │
//!                 └──────┬─────────────┬─────┘
//!                        │             │
//!                 ┌──────▼─────┐ ┌─────▼────────┐
//!                 │ ChunkStore │ │ BoundedCache │◀── CacheSweeper (every 10 min)
//!                 └──────┬─────┘ └──────────────┘
//!                        │
//!                 ┌──────▼───────────────┐
//!                 │ ChunkBackend         │  fs | sled | memory
//!                 └──────────────────────┘
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/elohim-chunkstore/
//! ├── chunks/                # fs backend
//! │   └── <sha256>/          # hex(sha256(object name))
//! │       ├── 00000000       # chunk 0
//! │       └── 00000001       # chunk 1
//! ├── chunks.sled/           # sled backend
//! ├── metadata.sled/         # object metadata
//! └── config.toml            # Configuration
//! ```
//!
//! Replication is fire-and-forget: each peer is tried once, failures are
//! reported per peer and never fail the local write.

pub mod backend;
pub mod cache;
pub mod chunk_store;
pub mod config;
pub mod error;
pub mod locks;
pub mod metadata;
pub mod replication;
pub mod service;
pub mod sweeper;

// Re-exports
pub use backend::{ChunkBackend, ChunkKey, FsBackend, MemoryBackend, SledBackend};
pub use cache::{BoundedCache, CacheStats};
pub use chunk_store::ChunkStore;
pub use config::{BackendKind, Config};
pub use error::StorageError;
pub use metadata::{MetadataDb, ObjectMetadata};
pub use replication::{
    DeliveryOutcome, LoggingTransport, PeerOutcome, ReplicaTarget, ReplicationCoordinator,
    ReplicationReport, ReplicationTransport,
};
pub use service::StorageService;
pub use sweeper::CacheSweeper;
