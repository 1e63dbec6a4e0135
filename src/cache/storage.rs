//! Storage backends for cache partitions and the mutation queue.
//!
//! Both concerns share one durable medium so a single SQLite file carries the
//! whole offline state of a client.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::http::{Method, ResponseSnapshot};
use crate::queue::{MutationStore, QueuedMutation};

use super::keys::RequestSignature;
use super::traits::{CacheEntry, PartitionStore};

/// Everything the engine needs from its durable medium.
pub trait Storage: PartitionStore + MutationStore {}

impl<T: PartitionStore + MutationStore> Storage for T {}

/// Storage that cannot be opened. Every call fails with `StorageUnavailable`,
/// which the strategies treat as a permanent cache miss.
pub struct UnavailableStorage;

impl UnavailableStorage {
  fn fail<T>() -> Result<T> {
    Err(EngineError::storage("no durable store configured"))
  }
}

impl PartitionStore for UnavailableStorage {
  fn open_partition(&self, _name: &str) -> Result<()> {
    Self::fail()
  }

  fn get(&self, _partition: &str, _key: &RequestSignature) -> Result<Option<ResponseSnapshot>> {
    Self::fail()
  }

  fn put(&self, _partition: &str, _key: &RequestSignature, _value: &ResponseSnapshot) -> Result<()> {
    Self::fail()
  }

  fn delete_partition(&self, _name: &str) -> Result<bool> {
    Self::fail()
  }

  fn list_partitions(&self) -> Result<Vec<String>> {
    Self::fail()
  }

  fn entries(&self, _partition: &str) -> Result<Vec<CacheEntry>> {
    Self::fail()
  }
}

impl MutationStore for UnavailableStorage {
  fn push_mutation(&self, _mutation: &QueuedMutation) -> Result<()> {
    Self::fail()
  }

  fn pending_mutations(&self) -> Result<Vec<QueuedMutation>> {
    Self::fail()
  }

  fn record_attempt(&self, _id: Uuid, _attempts: u32) -> Result<()> {
    Self::fail()
  }

  fn remove_mutation(&self, _id: Uuid) -> Result<bool> {
    Self::fail()
  }

  fn dead_letter(&self, _mutation: &QueuedMutation, _reason: &str) -> Result<()> {
    Self::fail()
  }

  fn dead_letters(&self) -> Result<Vec<QueuedMutation>> {
    Self::fail()
  }
}

#[derive(Default)]
struct MemoryState {
  partitions: BTreeMap<String, HashMap<String, CacheEntry>>,
  mutations: BTreeMap<u64, QueuedMutation>,
  next_seq: u64,
  dead: Vec<QueuedMutation>,
}

/// Volatile storage used by tests and when no durable file is wanted.
#[derive(Default)]
pub struct MemoryStorage {
  state: Mutex<MemoryState>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
    self
      .state
      .lock()
      .map_err(|e| EngineError::storage(format!("Lock poisoned: {}", e)))
  }
}

impl PartitionStore for MemoryStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    self.lock()?.partitions.entry(name.to_string()).or_default();
    Ok(())
  }

  fn get(&self, partition: &str, key: &RequestSignature) -> Result<Option<ResponseSnapshot>> {
    let state = self.lock()?;
    Ok(
      state
        .partitions
        .get(partition)
        .and_then(|entries| entries.get(&key.cache_hash()))
        .map(|entry| entry.value.clone()),
    )
  }

  fn put(&self, partition: &str, key: &RequestSignature, value: &ResponseSnapshot) -> Result<()> {
    let mut state = self.lock()?;
    state
      .partitions
      .entry(partition.to_string())
      .or_default()
      .insert(
        key.cache_hash(),
        CacheEntry {
          key: key.clone(),
          value: value.clone(),
          stored_at: Utc::now(),
        },
      );
    Ok(())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.partitions.remove(name).is_some())
  }

  fn list_partitions(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.partitions.keys().cloned().collect())
  }

  fn entries(&self, partition: &str) -> Result<Vec<CacheEntry>> {
    let state = self.lock()?;
    let mut entries: Vec<CacheEntry> = state
      .partitions
      .get(partition)
      .map(|e| e.values().cloned().collect())
      .unwrap_or_default();
    entries.sort_by(|a, b| a.key.url.cmp(&b.key.url));
    Ok(entries)
  }
}

impl MutationStore for MemoryStorage {
  fn push_mutation(&self, mutation: &QueuedMutation) -> Result<()> {
    let mut state = self.lock()?;
    let seq = state.next_seq;
    state.next_seq += 1;
    state.mutations.insert(seq, mutation.clone());
    Ok(())
  }

  fn pending_mutations(&self) -> Result<Vec<QueuedMutation>> {
    Ok(self.lock()?.mutations.values().cloned().collect())
  }

  fn record_attempt(&self, id: Uuid, attempts: u32) -> Result<()> {
    let mut state = self.lock()?;
    if let Some(m) = state.mutations.values_mut().find(|m| m.id == id) {
      m.attempts = attempts;
    }
    Ok(())
  }

  fn remove_mutation(&self, id: Uuid) -> Result<bool> {
    let mut state = self.lock()?;
    let seq = state
      .mutations
      .iter()
      .find(|(_, m)| m.id == id)
      .map(|(seq, _)| *seq);
    Ok(seq.and_then(|s| state.mutations.remove(&s)).is_some())
  }

  fn dead_letter(&self, mutation: &QueuedMutation, _reason: &str) -> Result<()> {
    let mut state = self.lock()?;
    state.mutations.retain(|_, m| m.id != mutation.id);
    state.dead.push(mutation.clone());
    Ok(())
  }

  fn dead_letters(&self) -> Result<Vec<QueuedMutation>> {
    Ok(self.lock()?.dead.clone())
  }
}

/// SQLite-based storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| EngineError::storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      EngineError::storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| EngineError::storage(format!("Lock poisoned: {}", e)))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(SCHEMA)
      .map_err(|e| EngineError::storage(format!("Failed to run cache migrations: {}", e)))
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, key_hash)
);

-- Insertion order is replay order
CREATE TABLE IF NOT EXISTS mutation_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS dead_letters (
    id TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    reason TEXT NOT NULL,
    dead_at TEXT NOT NULL
);
"#;

fn encode_headers(headers: &[(String, String)]) -> Result<String> {
  serde_json::to_string(headers)
    .map_err(|e| EngineError::storage(format!("Failed to serialize headers: {}", e)))
}

fn decode_headers(raw: &str) -> Result<Vec<(String, String)>> {
  serde_json::from_str(raw)
    .map_err(|e| EngineError::storage(format!("Failed to deserialize headers: {}", e)))
}

/// Parse an RFC 3339 timestamp written by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| EngineError::storage(format!("Failed to parse datetime '{}': {}", s, e)))
}

type MutationRow = (String, String, String, String, Option<Vec<u8>>, String, u32);

fn mutation_from_row(row: MutationRow) -> Result<QueuedMutation> {
  let (id, method, url, headers, body, enqueued_at, attempts) = row;
  Ok(QueuedMutation {
    id: Uuid::parse_str(&id).map_err(EngineError::storage)?,
    method: method.parse()?,
    url,
    headers: decode_headers(&headers)?,
    body,
    enqueued_at: parse_datetime(&enqueued_at)?,
    attempts,
  })
}

fn read_mutations(conn: &Connection, sql: &str) -> Result<Vec<QueuedMutation>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt
    .query_map([], |row| {
      Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
      ))
    })?
    .collect::<std::result::Result<Vec<MutationRow>, _>>()?;

  rows.into_iter().map(mutation_from_row).collect()
}

impl PartitionStore for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    self.lock()?.execute(
      "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
      params![name, Utc::now().to_rfc3339()],
    )?;
    Ok(())
  }

  fn get(&self, partition: &str, key: &RequestSignature) -> Result<Option<ResponseSnapshot>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT status, headers, body FROM cache_entries
       WHERE partition = ? AND key_hash = ?",
    )?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![partition, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .optional()?;

    match row {
      Some((status, headers, body)) => Ok(Some(ResponseSnapshot {
        status,
        headers: decode_headers(&headers)?,
        body,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &RequestSignature, value: &ResponseSnapshot) -> Result<()> {
    let mut conn = self.lock()?;
    let now = Utc::now().to_rfc3339();
    let headers = encode_headers(&value.headers)?;

    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
      params![partition, now],
    )?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition, key_hash, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        partition,
        key.cache_hash(),
        key.method.as_str(),
        key.url,
        value.status,
        headers,
        value.body,
        now
      ],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE partition = ?", params![name])?;
    let removed = tx.execute("DELETE FROM partitions WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn list_partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn entries(&self, partition: &str) -> Result<Vec<CacheEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT method, url, status, headers, body, stored_at FROM cache_entries
       WHERE partition = ?
       ORDER BY url",
    )?;

    let rows = stmt
      .query_map(params![partition], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, u16>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Vec<u8>>(4)?,
          row.get::<_, String>(5)?,
        ))
      })?
      .collect::<std::result::Result<Vec<_>, _>>()?;

    rows
      .into_iter()
      .map(|(method, url, status, headers, body, stored_at)| {
        Ok(CacheEntry {
          key: RequestSignature {
            method: method.parse::<Method>()?,
            url,
          },
          value: ResponseSnapshot {
            status,
            headers: decode_headers(&headers)?,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }
}

impl MutationStore for SqliteStorage {
  fn push_mutation(&self, mutation: &QueuedMutation) -> Result<()> {
    self.lock()?.execute(
      "INSERT INTO mutation_queue (id, method, url, headers, body, enqueued_at, attempts)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        mutation.id.to_string(),
        mutation.method.as_str(),
        mutation.url,
        encode_headers(&mutation.headers)?,
        mutation.body,
        mutation.enqueued_at.to_rfc3339(),
        mutation.attempts
      ],
    )?;
    Ok(())
  }

  fn pending_mutations(&self) -> Result<Vec<QueuedMutation>> {
    let conn = self.lock()?;
    read_mutations(
      &conn,
      "SELECT id, method, url, headers, body, enqueued_at, attempts
       FROM mutation_queue ORDER BY seq",
    )
  }

  fn record_attempt(&self, id: Uuid, attempts: u32) -> Result<()> {
    self.lock()?.execute(
      "UPDATE mutation_queue SET attempts = ? WHERE id = ?",
      params![attempts, id.to_string()],
    )?;
    Ok(())
  }

  fn remove_mutation(&self, id: Uuid) -> Result<bool> {
    let removed = self.lock()?.execute(
      "DELETE FROM mutation_queue WHERE id = ?",
      params![id.to_string()],
    )?;
    Ok(removed > 0)
  }

  fn dead_letter(&self, mutation: &QueuedMutation, reason: &str) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR REPLACE INTO dead_letters
         (id, method, url, headers, body, enqueued_at, attempts, reason, dead_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        mutation.id.to_string(),
        mutation.method.as_str(),
        mutation.url,
        encode_headers(&mutation.headers)?,
        mutation.body,
        mutation.enqueued_at.to_rfc3339(),
        mutation.attempts,
        reason,
        Utc::now().to_rfc3339()
      ],
    )?;
    tx.execute(
      "DELETE FROM mutation_queue WHERE id = ?",
      params![mutation.id.to_string()],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn dead_letters(&self) -> Result<Vec<QueuedMutation>> {
    let conn = self.lock()?;
    read_mutations(
      &conn,
      "SELECT id, method, url, headers, body, enqueued_at, attempts
       FROM dead_letters ORDER BY dead_at",
    )
  }
}
