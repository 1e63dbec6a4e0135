//! Strategy executor: resolves a classified GET request against the cache
//! partitions of one generation and the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{FetchOutcome, Generation, PartitionStore, RequestSignature};
use crate::classify::ResourceClass;
use crate::error::{NetworkError, Result};
use crate::http::{Request, ResponseSnapshot};
use crate::network::Network;

/// What to answer when a network-first request finds nothing in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfflineFallback {
  EmptyPayload,
  OfflineDocument,
}

/// Synthetic body returned for API requests nobody can answer.
pub fn offline_payload() -> ResponseSnapshot {
  ResponseSnapshot::json(
    200,
    &serde_json::json!({
      "data": [],
      "error": "Offline - data not available",
      "offline": true,
    }),
  )
}

/// Last-resort page when the offline document itself is not cached.
pub fn offline_document() -> ResponseSnapshot {
  ResponseSnapshot::new(503, "Offline").with_header("content-type", "text/plain")
}

/// Runs the per-class caching algorithms.
///
/// Storage errors are logged and treated as misses; network errors select the
/// fallback path. Nothing in here returns an error to the request initiator.
pub struct StrategyExecutor<S: PartitionStore, N: Network> {
  store: Arc<S>,
  network: Arc<N>,
  generation: Generation,
  timeout: Duration,
  offline_page: RequestSignature,
  /// Shared by every clone; cleared once this generation is superseded
  writable: Arc<AtomicBool>,
}

impl<S: PartitionStore, N: Network> StrategyExecutor<S, N> {
  pub fn new(
    store: Arc<S>,
    network: Arc<N>,
    generation: Generation,
    timeout: Duration,
    offline_page: RequestSignature,
  ) -> Self {
    Self {
      store,
      network,
      generation,
      timeout,
      offline_page,
      writable: Arc::new(AtomicBool::new(true)),
    }
  }

  /// Stop writing into this generation's partitions. Reads keep working.
  pub fn stop_writes(&self) {
    self.writable.store(false, Ordering::SeqCst);
  }

  pub async fn execute(
    &self,
    class: ResourceClass,
    request: Request,
    url: Url,
    key: &RequestSignature,
  ) -> FetchOutcome {
    match class {
      ResourceClass::Static => {
        let target = self.generation.static_partition();
        self.cache_first(request, url, key, &target).await
      }
      ResourceClass::Other => {
        let target = self.generation.dynamic_partition();
        self.cache_first(request, url, key, &target).await
      }
      ResourceClass::Api => {
        self
          .network_first(request, url, key, OfflineFallback::EmptyPayload)
          .await
      }
      ResourceClass::Page => {
        self
          .network_first(request, url, key, OfflineFallback::OfflineDocument)
          .await
      }
    }
  }

  /// Fetch with the configured timeout. A timed-out request is dropped.
  pub async fn fetch_network(
    &self,
    url: Url,
    request: Request,
  ) -> Result<ResponseSnapshot, NetworkError> {
    match tokio::time::timeout(self.timeout, self.network.fetch(url, request)).await {
      Ok(result) => result,
      Err(_) => Err(NetworkError::Timeout {
        millis: self.timeout.as_millis() as u64,
      }),
    }
  }

  /// Fetch `url` and store a 2xx answer in `partition`.
  pub async fn fetch_and_store(
    &self,
    url: Url,
    key: &RequestSignature,
    partition: &str,
  ) -> Result<ResponseSnapshot, NetworkError> {
    let response = self.fetch_network(url, Request::get(key.url.clone())).await?;
    if response.is_success() {
      self.store(partition, key, &response);
    }
    Ok(response)
  }

  /// Network-only resolution for a generation that is not serving yet. The
  /// partitions are neither read nor written.
  pub async fn passthrough(&self, class: ResourceClass, request: Request, url: Url) -> FetchOutcome {
    match self.fetch_network(url, request).await {
      Ok(response) => FetchOutcome::from_network(response),
      Err(e) => {
        debug!("passthrough failed: {}", e);
        match class {
          ResourceClass::Api => FetchOutcome::offline(offline_payload()),
          ResourceClass::Page => FetchOutcome::offline(offline_document()),
          ResourceClass::Static | ResourceClass::Other => FetchOutcome::NotFound,
        }
      }
    }
  }

  /// 1. Serve from the current partitions on hit
  /// 2. On miss fetch, storing 2xx answers into `target`
  /// 3. On network failure answer `NotFound`
  async fn cache_first(
    &self,
    request: Request,
    url: Url,
    key: &RequestSignature,
    target: &str,
  ) -> FetchOutcome {
    let partitions = [
      self.generation.static_partition(),
      self.generation.dynamic_partition(),
    ];
    if let Some(cached) = self.lookup(&partitions, key) {
      debug!("cache hit for {}", key);
      return FetchOutcome::from_cache(cached);
    }

    match self.fetch_network(url, request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(target, key, &response);
        }
        FetchOutcome::from_network(response)
      }
      Err(e) => {
        debug!("cache miss and network failed for {}: {}", key, e);
        FetchOutcome::NotFound
      }
    }
  }

  /// 1. Try the network; store and return 2xx answers
  /// 2. Otherwise serve the cached copy
  /// 3. Otherwise answer with the synthetic offline response
  async fn network_first(
    &self,
    request: Request,
    url: Url,
    key: &RequestSignature,
    fallback: OfflineFallback,
  ) -> FetchOutcome {
    let dynamic = self.generation.dynamic_partition();

    match self.fetch_network(url, request).await {
      Ok(response) if response.is_success() => {
        self.store(&dynamic, key, &response);
        return FetchOutcome::from_network(response);
      }
      Ok(response) => {
        debug!("{} answered {}, falling back to cache", key, response.status);
      }
      Err(e) => {
        debug!("network failed for {}: {}, falling back to cache", key, e);
      }
    }

    let partitions = [dynamic, self.generation.static_partition()];
    if let Some(cached) = self.lookup(&partitions, key) {
      return FetchOutcome::from_cache(cached);
    }

    match fallback {
      OfflineFallback::EmptyPayload => FetchOutcome::offline(offline_payload()),
      OfflineFallback::OfflineDocument => {
        let page = self
          .lookup(&partitions, &self.offline_page)
          .unwrap_or_else(offline_document);
        FetchOutcome::offline(page)
      }
    }
  }

  fn lookup(&self, partitions: &[String], key: &RequestSignature) -> Option<ResponseSnapshot> {
    for partition in partitions {
      match self.store.get(partition, key) {
        Ok(Some(response)) => return Some(response),
        Ok(None) => {}
        Err(e) => {
          warn!("cache read from {} failed, treating as miss: {}", partition, e);
          return None;
        }
      }
    }
    None
  }

  fn store(&self, partition: &str, key: &RequestSignature, response: &ResponseSnapshot) {
    if !self.writable.load(Ordering::SeqCst) {
      debug!("not caching {}, generation superseded", key);
      return;
    }
    if let Err(e) = self.store.put(partition, key, response) {
      warn!("failed to cache {} in {}: {}", key, partition, e);
    }
  }
}

impl<S: PartitionStore, N: Network> Clone for StrategyExecutor<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      network: Arc::clone(&self.network),
      generation: self.generation,
      timeout: self.timeout,
      offline_page: self.offline_page.clone(),
      writable: Arc::clone(&self.writable),
    }
  }
}
