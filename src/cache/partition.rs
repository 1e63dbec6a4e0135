//! Partition naming and generation bookkeeping.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// Pre-warmed manifest and cache-first static assets
  Static,
  /// Network-first responses, primed URLs and "other" resources
  Dynamic,
}

impl PartitionKind {
  fn prefix(self) -> &'static str {
    match self {
      PartitionKind::Static => "static",
      PartitionKind::Dynamic => "dynamic",
    }
  }
}

/// A partition name of the form `<kind>-v<generation>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionName {
  pub kind: PartitionKind,
  pub generation: u64,
}

impl PartitionName {
  pub fn new(kind: PartitionKind, generation: u64) -> Self {
    Self { kind, generation }
  }
}

impl fmt::Display for PartitionName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-v{}", self.kind.prefix(), self.generation)
  }
}

impl FromStr for PartitionName {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (prefix, generation) = s.rsplit_once("-v").ok_or(())?;
    let kind = match prefix {
      "static" => PartitionKind::Static,
      "dynamic" => PartitionKind::Dynamic,
      _ => return Err(()),
    };
    let generation = generation.parse().map_err(|_| ())?;
    Ok(Self { kind, generation })
  }
}

/// A partition as seen during garbage collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePartition {
  pub name: String,
  /// None for names this engine did not create
  pub generation: Option<u64>,
  /// Belongs to the current generation and must survive activation
  pub retained: bool,
}

impl CachePartition {
  pub fn classify(name: &str, current_generation: u64) -> Self {
    let generation = name.parse::<PartitionName>().ok().map(|p| p.generation);
    Self {
      name: name.to_string(),
      generation,
      retained: generation == Some(current_generation),
    }
  }
}

/// The pair of partitions owned by one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
  pub version: u64,
}

impl Generation {
  pub fn new(version: u64) -> Self {
    Self { version }
  }

  pub fn static_partition(&self) -> String {
    PartitionName::new(PartitionKind::Static, self.version).to_string()
  }

  pub fn dynamic_partition(&self) -> String {
    PartitionName::new(PartitionKind::Dynamic, self.version).to_string()
  }
}
