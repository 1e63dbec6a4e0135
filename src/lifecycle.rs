//! Install/activate state machine and generation garbage collection.

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::cache::{CachePartition, Generation, KeyNormalizer, PartitionStore, RequestSignature};
use crate::error::{EngineError, Result};
use crate::http::{Method, Request, ResponseSnapshot};
use crate::network::Network;
use crate::strategy::StrategyExecutor;

/// Lifecycle of one engine generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  /// Pre-warming the static partition
  Installing,
  /// Installed, waiting for the previous generation to let go
  Waiting,
  /// Serving requests
  Active,
  /// A newer generation is waiting; keep serving in-flight work only
  Superseded,
  /// Install failed or was overtaken before activation
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LifecycleState::Installing => "installing",
      LifecycleState::Waiting => "waiting",
      LifecycleState::Active => "active",
      LifecycleState::Superseded => "superseded",
      LifecycleState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

impl LifecycleState {
  /// States in which requests go through the cache strategies.
  pub fn is_serving(self) -> bool {
    matches!(self, LifecycleState::Active | LifecycleState::Superseded)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
  pub generation: u64,
  pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrimeReport {
  pub primed: Vec<String>,
  pub failed: Vec<String>,
}

pub struct LifecycleController<S: PartitionStore, N: Network> {
  store: Arc<S>,
  executor: StrategyExecutor<S, N>,
  normalizer: Arc<KeyNormalizer>,
  generation: Generation,
  manifest: Vec<String>,
  install_attempts: u32,
  state: Arc<Mutex<LifecycleState>>,
}

impl<S: PartitionStore, N: Network> LifecycleController<S, N> {
  pub fn new(
    store: Arc<S>,
    executor: StrategyExecutor<S, N>,
    normalizer: Arc<KeyNormalizer>,
    generation: Generation,
    manifest: Vec<String>,
    install_attempts: u32,
  ) -> Self {
    Self {
      store,
      executor,
      normalizer,
      generation,
      manifest,
      install_attempts: install_attempts.max(1),
      state: Arc::new(Mutex::new(LifecycleState::Installing)),
    }
  }

  pub fn generation(&self) -> Generation {
    self.generation
  }

  pub fn state(&self) -> LifecycleState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  fn set_state(&self, next: LifecycleState) {
    let mut state = match self.state.lock() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    if *state != next {
      info!(
        "generation {}: {} -> {}",
        self.generation.version, *state, next
      );
      *state = next;
    }
  }

  /// Pick up where a previous process left off, based on the partitions that
  /// already exist for this generation.
  pub fn restore(&self) -> Result<LifecycleState> {
    if self.state() != LifecycleState::Installing {
      return Ok(self.state());
    }

    let static_name = self.generation.static_partition();
    let partitions = self.store.list_partitions()?;
    if !partitions.contains(&static_name) {
      return Ok(LifecycleState::Installing);
    }
    let missing = self.missing_prewarm(&static_name)?;
    if missing > 0 {
      warn!(
        "{} is missing {} of {} manifest paths, install has to run again",
        static_name,
        missing,
        self.manifest.len()
      );
      return Ok(LifecycleState::Installing);
    }

    let stale = partitions
      .iter()
      .any(|name| !CachePartition::classify(name, self.generation.version).retained);
    self.set_state(if stale {
      LifecycleState::Waiting
    } else {
      LifecycleState::Active
    });
    Ok(self.state())
  }

  /// Number of manifest paths absent from `partition`.
  fn missing_prewarm(&self, partition: &str) -> Result<usize> {
    let mut missing = 0;
    for path in &self.manifest {
      let key = self.normalizer.signature(Method::Get, path)?;
      if self.store.get(partition, &key)?.is_none() {
        missing += 1;
      }
    }
    Ok(missing)
  }

  /// Pre-warm the static partition with every manifest path.
  ///
  /// All paths are fetched before anything is written, so a failed attempt
  /// never leaves a partial pre-warm behind. Storage failures abort at once;
  /// network failures retry the whole manifest.
  pub async fn install(&self) -> Result<usize> {
    match self.state() {
      LifecycleState::Installing | LifecycleState::Redundant => {}
      state => {
        return Err(EngineError::InvalidState {
          operation: "install",
          state,
        })
      }
    }
    self.set_state(LifecycleState::Installing);

    let targets = self
      .manifest
      .iter()
      .map(|path| {
        let url = self.normalizer.resolve(path)?;
        let key = self.normalizer.signature(Method::Get, path)?;
        Ok::<_, EngineError>((url, key))
      })
      .collect::<Result<Vec<_>>>();
    let targets = match targets {
      Ok(targets) => targets,
      Err(e) => return Err(self.fail_install(e.to_string())),
    };

    let mut last_error = String::from("empty attempt budget");
    for attempt in 1..=self.install_attempts {
      match self.fetch_manifest(&targets).await {
        Ok(responses) => {
          let count = responses.len();
          if let Err(e) = self.write_static(&responses) {
            error!("pre-warm write failed: {}", e);
            self.set_state(LifecycleState::Redundant);
            return Err(e);
          }
          if let Err(e) = self.store.open_partition(&self.generation.dynamic_partition()) {
            warn!("could not create dynamic partition: {}", e);
          }
          info!(
            "installed generation {} with {} pre-warmed paths",
            self.generation.version, count
          );
          self.set_state(LifecycleState::Waiting);
          return Ok(count);
        }
        Err(reason) => {
          warn!(
            "install attempt {}/{} failed: {}",
            attempt, self.install_attempts, reason
          );
          last_error = reason;
        }
      }
    }

    Err(self.fail_install(last_error))
  }

  fn fail_install(&self, reason: String) -> EngineError {
    self.set_state(LifecycleState::Redundant);
    EngineError::InstallFailed {
      generation: self.generation.version,
      reason,
    }
  }

  async fn fetch_manifest(
    &self,
    targets: &[(url::Url, RequestSignature)],
  ) -> std::result::Result<Vec<(RequestSignature, ResponseSnapshot)>, String> {
    let fetches = targets.iter().map(|(url, key)| async move {
      match self
        .executor
        .fetch_network(url.clone(), Request::get(url.to_string()))
        .await
      {
        Ok(response) if response.is_success() => Ok((key.clone(), response)),
        Ok(response) => Err(format!("{}: status {}", key.url, response.status)),
        Err(e) => Err(format!("{}: {}", key.url, e)),
      }
    });

    join_all(fetches).await.into_iter().collect()
  }

  fn write_static(&self, responses: &[(RequestSignature, ResponseSnapshot)]) -> Result<()> {
    let partition = self.generation.static_partition();
    let written = self.store.open_partition(&partition).and_then(|_| {
      responses
        .iter()
        .try_for_each(|(key, response)| self.store.put(&partition, key, response))
    });

    if written.is_err() {
      // discard whatever made it in
      if let Err(e) = self.store.delete_partition(&partition) {
        warn!("could not discard partial partition {}: {}", partition, e);
      }
    }
    written
  }

  /// Delete every partition that does not belong to this generation and
  /// start serving. Safe to run repeatedly.
  pub fn activate(&self) -> Result<ActivationReport> {
    match self.state() {
      LifecycleState::Waiting | LifecycleState::Active => {}
      state => {
        return Err(EngineError::InvalidState {
          operation: "activate",
          state,
        })
      }
    }

    let mut deleted = Vec::new();
    match self.store.list_partitions() {
      Ok(names) => {
        for partition in names
          .iter()
          .map(|name| CachePartition::classify(name, self.generation.version))
          .filter(|p| !p.retained)
        {
          match self.store.delete_partition(&partition.name) {
            Ok(_) => {
              info!("deleted old cache partition {}", partition.name);
              deleted.push(partition.name);
            }
            Err(e) => warn!("failed to delete partition {}: {}", partition.name, e),
          }
        }
      }
      Err(e) => warn!("cannot enumerate partitions, skipping cleanup: {}", e),
    }

    self.set_state(LifecycleState::Active);
    info!(
      "generation {} active and ready to serve",
      self.generation.version
    );

    Ok(ActivationReport {
      generation: self.generation.version,
      deleted,
    })
  }

  /// Skip waiting for a natural handoff. No-op when already active.
  pub fn force_activate(&self) -> Result<Option<ActivationReport>> {
    match self.state() {
      LifecycleState::Active => {
        debug!("force-activate ignored, already active");
        Ok(None)
      }
      _ => self.activate().map(Some),
    }
  }

  /// React to another generation reaching `Waiting`.
  pub fn observe_newer_generation(&self, version: u64) -> LifecycleState {
    if version <= self.generation.version {
      return self.state();
    }
    match self.state() {
      LifecycleState::Active => {
        // the newer generation will garbage collect our partitions
        self.executor.stop_writes();
        self.set_state(LifecycleState::Superseded)
      }
      LifecycleState::Installing | LifecycleState::Waiting => {
        self.set_state(LifecycleState::Redundant)
      }
      LifecycleState::Superseded | LifecycleState::Redundant => {}
    }
    self.state()
  }

  /// Best-effort pre-cache of `urls` into the dynamic partition.
  pub async fn prime(&self, urls: &[String]) -> Result<PrimeReport> {
    let state = self.state();
    if !matches!(state, LifecycleState::Waiting | LifecycleState::Active) {
      return Err(EngineError::InvalidState {
        operation: "prime",
        state,
      });
    }

    let dynamic = self.generation.dynamic_partition();
    let dynamic = &dynamic;
    let fetches = urls.iter().map(|raw| async move {
      let target = self
        .normalizer
        .resolve(raw)
        .and_then(|url| Ok((url, self.normalizer.signature(Method::Get, raw)?)));
      let ok = match target {
        Ok((url, key)) => match self.executor.fetch_and_store(url, &key, dynamic).await {
          Ok(response) => response.is_success(),
          Err(e) => {
            debug!("prime of {} failed: {}", raw, e);
            false
          }
        },
        Err(e) => {
          debug!("prime of {} skipped: {}", raw, e);
          false
        }
      };
      (raw.clone(), ok)
    });

    let mut report = PrimeReport::default();
    for (url, ok) in join_all(fetches).await {
      if ok {
        report.primed.push(url);
      } else {
        report.failed.push(url);
      }
    }
    info!(
      "primed {} urls ({} failed)",
      report.primed.len(),
      report.failed.len()
    );
    Ok(report)
  }
}

impl<S: PartitionStore, N: Network> Clone for LifecycleController<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      executor: self.executor.clone(),
      normalizer: Arc::clone(&self.normalizer),
      generation: self.generation,
      manifest: self.manifest.clone(),
      install_attempts: self.install_attempts,
      state: Arc::clone(&self.state),
    }
  }
}
