//! Core traits and types for the partitioned response cache.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::http::ResponseSnapshot;

use super::keys::RequestSignature;

/// A stored response together with the signature it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: RequestSignature,
  pub value: ResponseSnapshot,
  pub stored_at: DateTime<Utc>,
}

/// Durable key → response mapping, partitioned by name.
///
/// Implementations must be safe to share between concurrently running event
/// handlers. `put` overwrites silently; `delete_partition` is all-or-nothing
/// from a reader's point of view.
pub trait PartitionStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  fn get(&self, partition: &str, key: &RequestSignature) -> Result<Option<ResponseSnapshot>>;

  fn put(&self, partition: &str, key: &RequestSignature, value: &ResponseSnapshot) -> Result<()>;

  /// Remove a partition with all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  fn list_partitions(&self) -> Result<Vec<String>>;

  /// All entries of a partition ordered by key URL.
  fn entries(&self, partition: &str) -> Result<Vec<CacheEntry>>;
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// From a cache partition
  Cache,
  /// Synthesized because neither network nor cache could answer
  Offline,
}

/// Result of resolving a request through the engine.
///
/// None of the variants is an error: every path has a defined answer the
/// host can render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  Served {
    response: ResponseSnapshot,
    source: CacheSource,
  },
  /// Cache-first miss with no network: render a placeholder.
  NotFound,
  /// A mutation could not reach the network and was queued for replay.
  Queued {
    id: uuid::Uuid,
    response: ResponseSnapshot,
  },
}

impl FetchOutcome {
  pub fn from_network(response: ResponseSnapshot) -> Self {
    Self::Served {
      response,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(response: ResponseSnapshot) -> Self {
    Self::Served {
      response,
      source: CacheSource::Cache,
    }
  }

  pub fn offline(response: ResponseSnapshot) -> Self {
    Self::Served {
      response,
      source: CacheSource::Offline,
    }
  }

  pub fn response(&self) -> Option<&ResponseSnapshot> {
    match self {
      Self::Served { response, .. } | Self::Queued { response, .. } => Some(response),
      Self::NotFound => None,
    }
  }

  pub fn source(&self) -> Option<CacheSource> {
    match self {
      Self::Served { source, .. } => Some(*source),
      _ => None,
    }
  }

  /// Whether the host should show "offline" / "pending sync" state.
  pub fn is_offline(&self) -> bool {
    matches!(
      self,
      Self::Served {
        source: CacheSource::Offline,
        ..
      } | Self::Queued { .. }
    )
  }
}
