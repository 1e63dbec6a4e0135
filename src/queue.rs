//! Offline mutation queue and replay agent.
//!
//! Mutating requests that cannot reach the network are persisted under their
//! own id and replayed strictly in enqueue order. Replay is at-least-once: a
//! mutation leaves the queue only after the server acknowledges it with 2xx,
//! so a host must tolerate duplicates (idempotent writes or dedup keys).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::connectivity::Connectivity;
use crate::error::{EngineError, NetworkError, Result};
use crate::http::{Method, Request, ResponseSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedMutation {
  pub id: Uuid,
  pub method: Method,
  /// Absolute URL the request was originally sent to
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
}

impl QueuedMutation {
  pub fn new(request: Request, url: &Url) -> Self {
    Self {
      id: Uuid::new_v4(),
      method: request.method,
      url: url.to_string(),
      headers: request.headers,
      body: request.body,
      enqueued_at: Utc::now(),
      attempts: 0,
    }
  }

  pub fn to_request(&self) -> Request {
    Request {
      method: self.method,
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      destination: Default::default(),
    }
  }
}

/// Durable FIFO of queued mutations.
pub trait MutationStore: Send + Sync {
  fn push_mutation(&self, mutation: &QueuedMutation) -> Result<()>;

  /// Pending mutations, oldest first.
  fn pending_mutations(&self) -> Result<Vec<QueuedMutation>>;

  fn record_attempt(&self, id: Uuid, attempts: u32) -> Result<()>;

  fn remove_mutation(&self, id: Uuid) -> Result<bool>;

  /// Move a mutation out of the queue into the dead-letter table.
  fn dead_letter(&self, mutation: &QueuedMutation, reason: &str) -> Result<()>;

  fn dead_letters(&self) -> Result<Vec<QueuedMutation>>;
}

/// Result of one replay attempt during a drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayOutcome {
  /// Server acknowledged; the mutation left the queue
  Replayed { id: Uuid, status: u16 },
  /// Server rejected; the mutation stays queued
  Rejected { id: Uuid, status: u16, attempts: u32 },
  /// Transport failure; the mutation stays queued
  Unreachable {
    id: Uuid,
    reason: String,
    attempts: u32,
  },
  /// Rejected too often; moved to the dead-letter table
  DeadLettered { id: Uuid, attempts: u32 },
}

impl ReplayOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, ReplayOutcome::Replayed { .. })
  }
}

pub struct MutationQueue<S: MutationStore> {
  store: Arc<S>,
  max_attempts: Option<u32>,
  draining: Arc<tokio::sync::Mutex<()>>,
}

impl<S: MutationStore> MutationQueue<S> {
  pub fn new(store: Arc<S>, max_attempts: Option<u32>) -> Self {
    Self {
      store,
      max_attempts,
      draining: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  pub fn enqueue(&self, request: Request, url: &Url) -> Result<QueuedMutation> {
    let mutation = QueuedMutation::new(request, url);
    self.store.push_mutation(&mutation)?;
    info!(
      "queued offline {} {} as {}",
      mutation.method, mutation.url, mutation.id
    );
    Ok(mutation)
  }

  pub fn pending(&self) -> Result<Vec<QueuedMutation>> {
    self.store.pending_mutations()
  }

  pub fn dead_letters(&self) -> Result<Vec<QueuedMutation>> {
    self.store.dead_letters()
  }

  /// Replay queued mutations oldest first.
  ///
  /// The pass stops at the first mutation that does not succeed, so later
  /// mutations never overtake earlier ones; the next drain resumes there. A
  /// connectivity drop stops the pass before the next mutation starts. Only
  /// one pass runs at a time; a concurrent call returns immediately with no
  /// outcomes.
  pub async fn drain<F, Fut>(
    &self,
    connectivity: &Connectivity,
    replay: F,
  ) -> Result<Vec<ReplayOutcome>>
  where
    F: Fn(Url, Request) -> Fut,
    Fut: Future<Output = std::result::Result<ResponseSnapshot, NetworkError>>,
  {
    let _guard = match self.draining.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!("drain already in progress");
        return Ok(Vec::new());
      }
    };

    let pending = self.store.pending_mutations()?;
    let mut outcomes = Vec::with_capacity(pending.len());

    for mut mutation in pending {
      if !connectivity.is_online() {
        info!("went offline, stopping drain");
        break;
      }

      mutation.attempts += 1;
      self.store.record_attempt(mutation.id, mutation.attempts)?;

      let url = match Url::parse(&mutation.url) {
        Ok(url) => url,
        Err(e) => {
          warn!("dropping unreplayable mutation {}: {}", mutation.id, e);
          self.store.dead_letter(&mutation, &format!("invalid url: {}", e))?;
          outcomes.push(ReplayOutcome::DeadLettered {
            id: mutation.id,
            attempts: mutation.attempts,
          });
          continue;
        }
      };

      let outcome = match replay(url, mutation.to_request()).await {
        Ok(response) if response.is_success() => {
          self.store.remove_mutation(mutation.id)?;
          info!("replayed {} ({})", mutation.id, response.status);
          ReplayOutcome::Replayed {
            id: mutation.id,
            status: response.status,
          }
        }
        Ok(response) => {
          let err = EngineError::ReplayFailure {
            id: mutation.id,
            status: response.status,
          };
          warn!("{} (attempt {})", err, mutation.attempts);
          self.reject(&mutation, response.status)?
        }
        Err(e) => {
          warn!("replay of {} failed: {}", mutation.id, e);
          ReplayOutcome::Unreachable {
            id: mutation.id,
            reason: e.to_string(),
            attempts: mutation.attempts,
          }
        }
      };

      let succeeded = outcome.is_success();
      outcomes.push(outcome);
      if !succeeded {
        break;
      }
    }

    Ok(outcomes)
  }

  fn reject(&self, mutation: &QueuedMutation, status: u16) -> Result<ReplayOutcome> {
    match self.max_attempts {
      Some(max) if mutation.attempts >= max => {
        self
          .store
          .dead_letter(mutation, &format!("rejected with status {}", status))?;
        warn!(
          "moved {} to dead letters after {} attempts",
          mutation.id, mutation.attempts
        );
        Ok(ReplayOutcome::DeadLettered {
          id: mutation.id,
          attempts: mutation.attempts,
        })
      }
      _ => Ok(ReplayOutcome::Rejected {
        id: mutation.id,
        status,
        attempts: mutation.attempts,
      }),
    }
  }
}

impl<S: MutationStore> Clone for MutationQueue<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      max_attempts: self.max_attempts,
      draining: Arc::clone(&self.draining),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, SqliteStorage};
  use crate::network::Network;
  use crate::testing::{ScriptedNetwork, ORIGIN};

  fn post(path: &str, body: &str) -> (Request, Url) {
    let url = Url::parse(ORIGIN).unwrap().join(path).unwrap();
    let request = Request::new(Method::Post, path)
      .with_header("content-type", "application/json")
      .with_body(body);
    (request, url)
  }

  fn queue_with_three<S: MutationStore>(store: S) -> (MutationQueue<S>, Vec<Uuid>) {
    let queue = MutationQueue::new(Arc::new(store), None);
    let ids = ["m1", "m2", "m3"]
      .iter()
      .map(|tag| {
        let (req, url) = post("/api/reports", &format!(r#"{{"tag":"{}"}}"#, tag));
        queue.enqueue(req, &url).unwrap().id
      })
      .collect();
    (queue, ids)
  }

  fn bodies(network: &ScriptedNetwork) -> Vec<String> {
    network
      .calls()
      .iter()
      .map(|r| String::from_utf8_lossy(r.body.as_deref().unwrap_or_default()).into_owned())
      .collect()
  }

  #[tokio::test]
  async fn test_drain_replays_in_order_and_empties_queue() {
    let (queue, ids) = queue_with_three(MemoryStorage::new());
    let network = ScriptedNetwork::new();
    network.respond("/api/reports", 201, "{}");

    let outcomes = queue
      .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
      .await
      .unwrap();

    let replayed: Vec<Uuid> = outcomes
      .iter()
      .map(|o| match o {
        ReplayOutcome::Replayed { id, status } => {
          assert_eq!(*status, 201);
          *id
        }
        other => panic!("unexpected outcome {:?}", other),
      })
      .collect();
    assert_eq!(replayed, ids);
    assert_eq!(
      bodies(&network),
      vec![r#"{"tag":"m1"}"#, r#"{"tag":"m2"}"#, r#"{"tag":"m3"}"#]
    );
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_partial_failure_resumes_from_failed_mutation() {
    let (queue, ids) = queue_with_three(SqliteStorage::open_in_memory().unwrap());
    let network = ScriptedNetwork::new();
    network.respond("/api/reports", 201, "{}");
    network.respond("/api/reports", 503, "busy");
    network.respond("/api/reports", 201, "{}");

    let first = queue
      .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
      .await
      .unwrap();
    assert_eq!(first.len(), 2);
    assert!(first[0].is_success());
    assert_eq!(
      first[1],
      ReplayOutcome::Rejected {
        id: ids[1],
        status: 503,
        attempts: 1
      }
    );
    // m3 was never attempted
    assert_eq!(network.calls().len(), 2);

    let pending = queue.pending().unwrap();
    assert_eq!(pending.iter().map(|m| m.id).collect::<Vec<_>>(), ids[1..].to_vec());
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[1].attempts, 0);

    let second = queue
      .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
      .await
      .unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.iter().all(ReplayOutcome::is_success));
    assert_eq!(
      bodies(&network)[1..],
      [r#"{"tag":"m2"}"#, r#"{"tag":"m2"}"#, r#"{"tag":"m3"}"#]
    );
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_failure_keeps_mutation() {
    let (queue, ids) = queue_with_three(MemoryStorage::new());
    let network = ScriptedNetwork::new();
    network.set_offline(true);

    let outcomes = queue
      .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
      .await
      .unwrap();
    assert!(matches!(
      outcomes.as_slice(),
      [ReplayOutcome::Unreachable { id, attempts: 1, .. }] if *id == ids[0]
    ));
    assert_eq!(queue.pending().unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_offline_signal_prevents_replay() {
    let (queue, _) = queue_with_three(MemoryStorage::new());
    let network = ScriptedNetwork::new();
    network.respond("/api/reports", 201, "{}");

    let outcomes = queue
      .drain(&Connectivity::new(false), |url, req| network.fetch(url, req))
      .await
      .unwrap();
    assert!(outcomes.is_empty());
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_going_offline_mid_drain_stops_before_next() {
    let (queue, _) = queue_with_three(MemoryStorage::new());
    let network = ScriptedNetwork::new();
    network.respond("/api/reports", 201, "{}");
    let connectivity = Connectivity::new(true);

    let outcomes = queue
      .drain(&connectivity, |url, req| {
        // the first replay completes, then the host reports offline
        connectivity.set(false);
        network.fetch(url, req)
      })
      .await
      .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success());
    assert_eq!(queue.pending().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_unbounded_retries_by_default() {
    let (queue, _) = queue_with_three(MemoryStorage::new());
    let network = ScriptedNetwork::new();
    network.respond("/api/reports", 422, "invalid");

    for _ in 0..5 {
      queue
        .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
        .await
        .unwrap();
    }
    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].attempts, 5);
    assert!(queue.dead_letters().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_max_attempts_moves_to_dead_letters() {
    let store = Arc::new(MemoryStorage::new());
    let queue = MutationQueue::new(Arc::clone(&store), Some(2));
    let (req, url) = post("/api/comments", r#"{"text":"hi"}"#);
    let id = queue.enqueue(req, &url).unwrap().id;

    let network = ScriptedNetwork::new();
    network.respond("/api/comments", 400, "bad");

    let first = queue
      .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
      .await
      .unwrap();
    assert!(matches!(first[0], ReplayOutcome::Rejected { attempts: 1, .. }));

    let second = queue
      .drain(&Connectivity::new(true), |url, req| network.fetch(url, req))
      .await
      .unwrap();
    assert_eq!(second, vec![ReplayOutcome::DeadLettered { id, attempts: 2 }]);
    assert!(queue.pending().unwrap().is_empty());
    assert_eq!(queue.dead_letters().unwrap()[0].id, id);
  }

  #[tokio::test]
  async fn test_concurrent_drain_is_single_flight() {
    let (queue, _) = queue_with_three(MemoryStorage::new());
    let network = ScriptedNetwork::new();
    network.respond("/api/reports", 201, "{}");
    let connectivity = Connectivity::new(true);

    let (a, b) = tokio::join!(
      queue.drain(&connectivity, |url, req| network.fetch(url, req)),
      queue.drain(&connectivity, |url, req| network.fetch(url, req)),
    );
    let total = a.unwrap().len() + b.unwrap().len();
    assert_eq!(total, 3);
    assert_eq!(network.calls().len(), 3);
  }
}
