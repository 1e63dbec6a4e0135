//! Partitioned response cache.
//!
//! This module provides the durable side of the engine:
//! - Request signatures with configurable key normalization
//! - Named, generation-versioned partitions
//! - SQLite and in-memory storage backends shared with the mutation queue

mod keys;
mod partition;
mod storage;
mod traits;

pub use keys::{KeyNormalizer, RequestSignature};
pub use partition::{CachePartition, Generation, PartitionKind, PartitionName};
pub use storage::{MemoryStorage, SqliteStorage, Storage, UnavailableStorage};
pub use traits::{CacheEntry, CacheSource, FetchOutcome, PartitionStore};
