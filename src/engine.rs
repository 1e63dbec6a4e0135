//! The engine: one explicitly constructed instance per process that owns the
//! classifier, strategies, lifecycle, mutation queue and notification
//! dispatcher, and dispatches host events to them.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{
  CacheEntry, FetchOutcome, Generation, KeyNormalizer, PartitionStore, Storage,
};
use crate::classify::Classifier;
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::error::{EngineError, Result};
use crate::http::{Method, Request, ResponseSnapshot};
use crate::lifecycle::{ActivationReport, LifecycleController, LifecycleState, PrimeReport};
use crate::network::Network;
use crate::notify::{
  DisplaySurface, Notification, NotificationDispatcher, NotificationPayload, Route,
};
use crate::queue::{MutationQueue, QueuedMutation, ReplayOutcome};
use crate::strategy::StrategyExecutor;

/// Commands the host application may send on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
  #[serde(alias = "SKIP_WAITING")]
  ForceActivate,
  #[serde(alias = "CACHE_ISSUES")]
  Prime { urls: Vec<String> },
}

/// Everything that can happen to the engine.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  Control(ControlMessage),
  /// Raw push bytes from the push transport
  Push(Vec<u8>),
  NotificationClick {
    action: Option<String>,
    payload: NotificationPayload,
  },
  Connectivity { online: bool },
  /// Periodic retry timer
  RetryTick,
  /// Another engine generation reached `Waiting`
  NewerGeneration(u64),
}

/// What handling an event produced.
#[derive(Debug, Clone)]
pub enum Effect {
  Installed { cached: usize },
  Activated(ActivationReport),
  Respond(FetchOutcome),
  Primed(PrimeReport),
  Drained(Vec<ReplayOutcome>),
  Displayed(Notification),
  /// Push payload could not be shown
  Dropped,
  Navigate(Route),
  State(LifecycleState),
  Failed(String),
}

pub struct CacheEngine<S: Storage, N: Network> {
  config: Arc<Config>,
  store: Arc<S>,
  normalizer: Arc<KeyNormalizer>,
  classifier: Arc<Classifier>,
  executor: StrategyExecutor<S, N>,
  lifecycle: LifecycleController<S, N>,
  queue: MutationQueue<S>,
  notifications: NotificationDispatcher,
  connectivity: Connectivity,
}

impl<S: Storage, N: Network> CacheEngine<S, N> {
  pub fn new(
    config: Config,
    store: S,
    network: N,
    surface: Arc<dyn DisplaySurface>,
  ) -> Result<Self> {
    let store = Arc::new(store);
    let network = Arc::new(network);
    let normalizer = Arc::new(KeyNormalizer::new(&config.origin, &config.normalization)?);
    let classifier = Arc::new(Classifier::new(&config.classifier)?);
    let generation = Generation::new(config.version);

    let executor = StrategyExecutor::new(
      Arc::clone(&store),
      network,
      generation,
      config.network_timeout(),
      normalizer.signature(Method::Get, &config.offline_page)?,
    );
    let lifecycle = LifecycleController::new(
      Arc::clone(&store),
      executor.clone(),
      Arc::clone(&normalizer),
      generation,
      config.manifest.clone(),
      config.install_attempts,
    );
    let queue = MutationQueue::new(Arc::clone(&store), config.queue.max_attempts);
    let notifications = NotificationDispatcher::new(surface, config.notifications.clone());

    Ok(Self {
      config: Arc::new(config),
      store,
      normalizer,
      classifier,
      executor,
      lifecycle,
      queue,
      notifications,
      connectivity: Connectivity::default(),
    })
  }

  /// Dispatch a single event.
  pub async fn handle(&self, event: Event) -> Effect {
    match event {
      Event::Install => match self.install().await {
        Ok(cached) => Effect::Installed { cached },
        Err(e) => Effect::Failed(e.to_string()),
      },
      Event::Activate => match self.activate() {
        Ok(report) => Effect::Activated(report),
        Err(e) => Effect::Failed(e.to_string()),
      },
      Event::Fetch(request) => Effect::Respond(self.fetch(request).await),
      Event::Control(message) => match self.control(message).await {
        Ok(effect) => effect,
        Err(e) => Effect::Failed(e.to_string()),
      },
      Event::Push(raw) => {
        let payload = NotificationPayload::decode(&raw, &self.config.notifications);
        match self.notifications.on_push(payload) {
          Some(notification) => Effect::Displayed(notification),
          None => Effect::Dropped,
        }
      }
      Event::NotificationClick { action, payload } => Effect::Navigate(
        self
          .notifications
          .on_interaction(action.as_deref(), &payload),
      ),
      Event::Connectivity { online } => match self.set_online(online).await {
        Some(outcomes) => Effect::Drained(outcomes),
        None => Effect::State(self.state()),
      },
      Event::RetryTick => {
        if !self.connectivity.is_online() {
          return Effect::Drained(Vec::new());
        }
        Effect::Drained(self.drain_logged().await)
      }
      Event::NewerGeneration(version) => {
        Effect::State(self.lifecycle.observe_newer_generation(version))
      }
    }
  }

  /// Resolve a request through the cache strategies or the mutation queue.
  /// Never fails: every path ends in a response, `NotFound` or `Queued`.
  pub async fn fetch(&self, request: Request) -> FetchOutcome {
    let url = match self.normalizer.resolve(&request.url) {
      Ok(url) => url,
      Err(e) => {
        warn!("{}", e);
        return FetchOutcome::NotFound;
      }
    };

    if request.method.is_mutating() {
      return self.send_mutation(request, url).await;
    }

    if request.method != Method::Get {
      return match self.executor.fetch_network(url, request).await {
        Ok(response) => FetchOutcome::from_network(response),
        Err(e) => {
          debug!("passthrough failed: {}", e);
          FetchOutcome::NotFound
        }
      };
    }

    let class = self.classifier.classify(&request, &url);
    if !self.state().is_serving() {
      return self.executor.passthrough(class, request, url).await;
    }

    let key = match self.normalizer.signature(request.method, &request.url) {
      Ok(key) => key,
      Err(e) => {
        warn!("{}", e);
        return FetchOutcome::NotFound;
      }
    };
    debug!("{} classified as {:?}", key, class);
    self.executor.execute(class, request, url, &key).await
  }

  /// Send a mutation live only while nothing is queued ahead of it; otherwise
  /// it joins the back of the queue so replay order is preserved.
  async fn send_mutation(&self, request: Request, url: url::Url) -> FetchOutcome {
    let backlog = match self.queue.pending() {
      Ok(pending) => pending.len(),
      Err(e) => {
        debug!("queue unreadable, sending live: {}", e);
        0
      }
    };

    if backlog > 0 {
      debug!(
        "{} {} waits behind {} queued mutations",
        request.method, url, backlog
      );
      let outcome = self.queue_mutation(request, &url);
      if self.connectivity.is_online() {
        self.drain_logged().await;
      }
      return outcome;
    }

    match self.executor.fetch_network(url.clone(), request.clone()).await {
      Ok(response) => FetchOutcome::from_network(response),
      Err(e) => {
        debug!("{} {} failed ({}), queueing", request.method, url, e);
        self.queue_mutation(request, &url)
      }
    }
  }

  fn queue_mutation(&self, request: Request, url: &url::Url) -> FetchOutcome {
    match self.queue.enqueue(request, url) {
      Ok(mutation) => FetchOutcome::Queued {
        id: mutation.id,
        response: ResponseSnapshot::json(
          202,
          &serde_json::json!({
            "queued": true,
            "offline": true,
            "id": mutation.id,
          }),
        ),
      },
      Err(e) => {
        warn!("could not queue offline mutation: {}", e);
        FetchOutcome::offline(ResponseSnapshot::json(
          503,
          &serde_json::json!({
            "queued": false,
            "offline": true,
            "error": "Offline - request could not be saved",
          }),
        ))
      }
    }
  }

  pub async fn install(&self) -> Result<usize> {
    self.lifecycle.install().await
  }

  pub fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle.activate()
  }

  /// Resume lifecycle state from what the store already holds.
  pub fn restore(&self) -> Result<LifecycleState> {
    self.lifecycle.restore()
  }

  pub async fn control(&self, message: ControlMessage) -> Result<Effect> {
    match message {
      ControlMessage::ForceActivate => Ok(match self.lifecycle.force_activate()? {
        Some(report) => Effect::Activated(report),
        None => Effect::State(self.state()),
      }),
      ControlMessage::Prime { urls } => Ok(Effect::Primed(self.lifecycle.prime(&urls).await?)),
    }
  }

  /// Run one drain pass over the mutation queue.
  pub async fn drain(&self) -> Result<Vec<ReplayOutcome>> {
    let executor = &self.executor;
    self
      .queue
      .drain(&self.connectivity, |url, request| {
        executor.fetch_network(url, request)
      })
      .await
  }

  async fn drain_logged(&self) -> Vec<ReplayOutcome> {
    match self.drain().await {
      Ok(outcomes) => outcomes,
      Err(e) => {
        warn!("drain aborted: {}", e);
        Vec::new()
      }
    }
  }

  /// Record connectivity; drains on the offline → online edge.
  pub async fn set_online(&self, online: bool) -> Option<Vec<ReplayOutcome>> {
    if self.connectivity.set(online) {
      Some(self.drain_logged().await)
    } else {
      None
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn generation(&self) -> Generation {
    self.lifecycle.generation()
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn pending_mutations(&self) -> Result<Vec<QueuedMutation>> {
    self.queue.pending()
  }

  pub fn dead_letters(&self) -> Result<Vec<QueuedMutation>> {
    self.queue.dead_letters()
  }

  pub fn partitions(&self) -> Result<Vec<String>> {
    self.store.list_partitions()
  }

  pub fn entries(&self, partition: &str) -> Result<Vec<CacheEntry>> {
    self.store.entries(partition)
  }

  /// Cache-only read from a partition, bypassing every strategy.
  pub fn cached(&self, partition: &str, url: &str) -> Result<Option<ResponseSnapshot>> {
    let key = self.normalizer.signature(Method::Get, url)?;
    self.store.get(partition, &key)
  }
}

impl<S: Storage, N: Network> Clone for CacheEngine<S, N> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      store: Arc::clone(&self.store),
      normalizer: Arc::clone(&self.normalizer),
      classifier: Arc::clone(&self.classifier),
      executor: self.executor.clone(),
      lifecycle: self.lifecycle.clone(),
      queue: self.queue.clone(),
      notifications: self.notifications.clone(),
      connectivity: self.connectivity.clone(),
    }
  }
}

impl From<EngineError> for Effect {
  fn from(err: EngineError) -> Self {
    Effect::Failed(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage, SqliteStorage, UnavailableStorage};
  use crate::testing::{test_config, RecordingSurface, ScriptedNetwork};
  use crate::http::Destination;

  fn engine_with<S: Storage>(
    store: S,
    config: Config,
  ) -> (CacheEngine<S, Arc<ScriptedNetwork>>, Arc<ScriptedNetwork>) {
    let network = Arc::new(ScriptedNetwork::new());
    let engine = CacheEngine::new(
      config,
      store,
      Arc::clone(&network),
      Arc::new(RecordingSurface::new()),
    )
    .unwrap();
    (engine, network)
  }

  async fn active_engine() -> (CacheEngine<MemoryStorage, Arc<ScriptedNetwork>>, Arc<ScriptedNetwork>) {
    let (engine, network) = engine_with(MemoryStorage::new(), test_config());
    network.respond("/", 200, "<html>home</html>");
    network.respond("/issues", 200, "<html>issues</html>");
    assert!(matches!(
      engine.handle(Event::Install).await,
      Effect::Installed { cached: 2 }
    ));
    assert!(matches!(engine.handle(Event::Activate).await, Effect::Activated(_)));
    (engine, network)
  }

  fn paths(network: &ScriptedNetwork) -> Vec<String> {
    network
      .calls()
      .iter()
      .map(|r| url::Url::parse(&r.url).unwrap().path().to_string())
      .collect()
  }

  fn queued_id(outcome: &FetchOutcome) -> uuid::Uuid {
    match outcome {
      FetchOutcome::Queued { id, .. } => *id,
      other => panic!("expected queued, got {:?}", other),
    }
  }

  fn respond(effect: Effect) -> FetchOutcome {
    match effect {
      Effect::Respond(outcome) => outcome,
      other => panic!("expected a response, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_prewarmed_page_served_without_network() {
    let (engine, network) = active_engine().await;
    let before = network.calls().len();

    let cached = engine.cached("static-v1", "/issues").unwrap().unwrap();
    assert_eq!(cached.body_text(), "<html>issues</html>");

    network.set_offline(true);
    let outcome = respond(engine.handle(Event::Fetch(Request::get("/issues"))).await);
    assert_eq!(outcome.response().unwrap().body_text(), "<html>issues</html>");
    assert_eq!(outcome.source(), Some(CacheSource::Cache));
    // only the failed network-first attempt went out
    assert_eq!(network.calls().len(), before + 1);
  }

  #[tokio::test]
  async fn test_api_fallback_returns_stored_body_unchanged() {
    let (engine, network) = active_engine().await;
    let body = r#"{"items":[{"id":1,"title":"Broken streetlight"}]}"#;
    network.respond("/api/reports", 200, body);

    let fresh = engine.fetch(Request::get("/api/reports")).await;
    assert_eq!(fresh.source(), Some(CacheSource::Network));

    network.set_offline(true);
    let fallback = engine.fetch(Request::get("/api/reports")).await;
    assert_eq!(fallback.response().unwrap().body_text(), body);
    assert_eq!(fallback.source(), Some(CacheSource::Cache));
  }

  #[tokio::test]
  async fn test_static_asset_cache_hit_skips_network() {
    let (engine, network) = active_engine().await;
    network.respond("/_next/app.js", 200, "js");

    engine.fetch(Request::get("/_next/app.js")).await;
    let outcome = engine.fetch(Request::get("/_next/app.js")).await;
    assert_eq!(outcome.source(), Some(CacheSource::Cache));
    assert_eq!(network.call_count("/_next/app.js"), 1);
  }

  #[tokio::test]
  async fn test_offline_get_never_errors() {
    let (engine, network) = active_engine().await;
    network.set_offline(true);

    let api = engine.fetch(Request::get("/api/analytics")).await;
    assert!(api.is_offline());
    let page = engine.fetch(Request::get("/map")).await;
    assert!(page.is_offline());
    let image = engine
      .fetch(Request::get("/avatar/3").with_destination(Destination::Image))
      .await;
    assert_eq!(image, FetchOutcome::NotFound);
    let other = engine.fetch(Request::get("/citizen/help")).await;
    assert_eq!(other, FetchOutcome::NotFound);
  }

  #[tokio::test]
  async fn test_offline_post_queued_and_replayed_on_reconnect() {
    let (engine, network) = active_engine().await;
    network.set_offline(true);
    engine.connectivity().set(false);

    let report = Request::new(Method::Post, "/api/reports")
      .with_header("content-type", "application/json")
      .with_body(r#"{"title":"Pothole","category":"roads"}"#);
    let outcome = engine.fetch(report).await;
    let id = match &outcome {
      FetchOutcome::Queued { id, response } => {
        assert_eq!(response.status, 202);
        *id
      }
      other => panic!("expected queued, got {:?}", other),
    };
    assert!(outcome.is_offline());
    assert_eq!(engine.pending_mutations().unwrap()[0].id, id);

    network.set_offline(false);
    network.respond("/api/reports", 201, r#"{"id":99}"#);
    let drained = engine.handle(Event::Connectivity { online: true }).await;
    match drained {
      Effect::Drained(outcomes) => {
        assert_eq!(outcomes, vec![ReplayOutcome::Replayed { id, status: 201 }])
      }
      other => panic!("expected drain, got {:?}", other),
    }
    assert!(engine.pending_mutations().unwrap().is_empty());

    let replayed = network.calls().last().cloned().unwrap();
    assert_eq!(replayed.method, Method::Post);
    assert_eq!(
      replayed.body.as_deref(),
      Some(br#"{"title":"Pothole","category":"roads"}"#.as_slice())
    );
  }

  #[tokio::test]
  async fn test_online_mutation_passes_through() {
    let (engine, network) = active_engine().await;
    network.respond("/api/comments", 422, "invalid");

    let outcome = engine
      .fetch(Request::new(Method::Post, "/api/comments").with_body("{}"))
      .await;
    assert_eq!(outcome.response().unwrap().status, 422);
    assert!(engine.pending_mutations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_repeat_online_signal_does_not_drain() {
    let (engine, _network) = active_engine().await;
    assert!(matches!(
      engine.handle(Event::Connectivity { online: true }).await,
      Effect::State(LifecycleState::Active)
    ));
  }

  #[tokio::test]
  async fn test_retry_tick_drains_when_online() {
    let (engine, network) = active_engine().await;
    network.set_offline(true);
    engine
      .fetch(Request::new(Method::Delete, "/api/comments/4"))
      .await;
    assert_eq!(engine.pending_mutations().unwrap().len(), 1);

    network.set_offline(false);
    network.respond("/api/comments/4", 204, "");
    match engine.handle(Event::RetryTick).await {
      Effect::Drained(outcomes) => assert_eq!(outcomes.len(), 1),
      other => panic!("expected drain, got {:?}", other),
    }
    assert!(engine.pending_mutations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_requests_pass_through_before_activation() {
    let (engine, network) = engine_with(MemoryStorage::new(), test_config());
    network.respond("/api/issues", 200, "[]");

    let outcome = engine.fetch(Request::get("/api/issues")).await;
    assert_eq!(outcome.source(), Some(CacheSource::Network));
    assert!(engine.partitions().unwrap().is_empty());

    network.set_offline(true);
    let offline = engine.fetch(Request::get("/api/issues")).await;
    assert!(offline.is_offline());
    assert_eq!(offline.response().unwrap().status, 200);
  }

  #[tokio::test]
  async fn test_mutation_waits_behind_queued_backlog() {
    let (engine, network) = active_engine().await;
    network.set_offline(true);
    engine.connectivity().set(false);
    let report = engine
      .fetch(Request::new(Method::Post, "/api/reports").with_body(r#"{"title":"Pothole"}"#))
      .await;
    let report_id = queued_id(&report);

    // the network is back but the host has not reported it yet
    network.set_offline(false);
    network.respond("/api/reports", 201, r#"{"id":1}"#);
    network.respond("/api/comments", 201, r#"{"id":2}"#);
    let comment = engine
      .fetch(Request::new(Method::Post, "/api/comments").with_body(r#"{"report":1}"#))
      .await;
    let comment_id = queued_id(&comment);
    assert_eq!(network.call_count("/api/comments"), 0);

    let pending: Vec<_> = engine
      .pending_mutations()
      .unwrap()
      .iter()
      .map(|m| m.id)
      .collect();
    assert_eq!(pending, vec![report_id, comment_id]);

    engine.handle(Event::Connectivity { online: true }).await;
    assert!(engine.pending_mutations().unwrap().is_empty());
    let replayed = paths(&network);
    assert_eq!(
      replayed[replayed.len() - 2..],
      ["/api/reports".to_string(), "/api/comments".to_string()]
    );
  }

  #[tokio::test]
  async fn test_backlog_replays_before_new_mutation_when_online() {
    let (engine, network) = active_engine().await;
    network.set_offline(true);
    let report = engine
      .fetch(Request::new(Method::Post, "/api/reports").with_body("{}"))
      .await;
    queued_id(&report);

    network.set_offline(false);
    network.respond("/api/reports", 201, "{}");
    network.respond("/api/comments/9", 201, "{}");
    let comment = engine
      .fetch(Request::new(Method::Put, "/api/comments/9").with_body("{}"))
      .await;
    queued_id(&comment);

    assert!(engine.pending_mutations().unwrap().is_empty());
    let sent = paths(&network);
    assert_eq!(
      sent[sent.len() - 3..],
      [
        "/api/reports".to_string(),
        "/api/reports".to_string(),
        "/api/comments/9".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn test_unavailable_storage_runs_network_only() {
    let (engine, network) = engine_with(UnavailableStorage, test_config());
    network.respond("/", 200, "home");
    network.respond("/issues", 200, "issues");
    assert!(matches!(engine.handle(Event::Install).await, Effect::Failed(_)));
    assert_eq!(engine.state(), LifecycleState::Redundant);
    assert!(engine.restore().is_ok());
    assert!(engine.pending_mutations().is_err());

    network.respond("/api/issues", 200, "live");
    let live = engine.fetch(Request::get("/api/issues")).await;
    assert_eq!(live.response().unwrap().body_text(), "live");

    network.set_offline(true);
    let get = engine.fetch(Request::get("/api/issues")).await;
    assert!(get.is_offline());
    let body: serde_json::Value = serde_json::from_slice(&get.response().unwrap().body).unwrap();
    assert_eq!(body["offline"], true);

    let post = engine
      .fetch(Request::new(Method::Post, "/api/reports").with_body("{}"))
      .await;
    assert_eq!(post.source(), Some(CacheSource::Offline));
    let response = post.response().unwrap();
    assert_eq!(response.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["queued"], false);
  }

  #[tokio::test]
  async fn test_control_messages() {
    let (engine, network) = active_engine().await;
    network.respond("/api/departments", 200, "[]");

    let prime: ControlMessage =
      serde_json::from_str(r#"{"type":"prime","urls":["/api/departments"]}"#).unwrap();
    match engine.handle(Event::Control(prime)).await {
      Effect::Primed(report) => assert_eq!(report.primed, vec!["/api/departments".to_string()]),
      other => panic!("expected prime, got {:?}", other),
    }
    assert!(engine
      .cached("dynamic-v1", "/api/departments")
      .unwrap()
      .is_some());

    let legacy: ControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(legacy, ControlMessage::ForceActivate);
    assert!(matches!(
      engine.handle(Event::Control(legacy)).await,
      Effect::State(LifecycleState::Active)
    ));
  }

  #[tokio::test]
  async fn test_generation_upgrade_cleans_old_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let mut v1 = test_config();
    v1.storage_path = Some(path.clone());
    let (old, network) = engine_with(SqliteStorage::open(&path).unwrap(), v1.clone());
    network.respond("/", 200, "v1 home");
    network.respond("/issues", 200, "v1 issues");
    old.install().await.unwrap();
    old.activate().unwrap();

    let mut v2 = v1;
    v2.version = 2;
    let (new, network) = engine_with(SqliteStorage::open(&path).unwrap(), v2);
    network.respond("/", 200, "v2 home");
    network.respond("/issues", 200, "v2 issues");
    new.install().await.unwrap();

    assert!(matches!(
      old.handle(Event::NewerGeneration(2)).await,
      Effect::State(LifecycleState::Superseded)
    ));
    // the superseded instance still serves from its own partitions
    let served = old.fetch(Request::get("/issues")).await;
    assert!(served.response().is_some());

    let report = new.activate().unwrap();
    assert_eq!(report.deleted, vec!["dynamic-v1", "static-v1"]);

    // late traffic on the old instance must not bring its partitions back
    let late = old.fetch(Request::get("/issues")).await;
    assert_eq!(late.source(), Some(CacheSource::Network));
    assert_eq!(new.partitions().unwrap(), vec!["dynamic-v2", "static-v2"]);
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let (engine, _) = active_engine().await;
    match engine
      .handle(Event::Push(br#"{"title":"Report updated","body":"Status: resolved"}"#.to_vec()))
      .await
    {
      Effect::Displayed(n) => assert_eq!(n.title, "Report updated"),
      other => panic!("expected display, got {:?}", other),
    }

    let payload = NotificationPayload::decode(b"x", &engine.config().notifications);
    assert_eq!(
      match engine
        .handle(Event::NotificationClick {
          action: Some("close".to_string()),
          payload,
        })
        .await
      {
        Effect::Navigate(route) => route,
        other => panic!("expected navigation, got {:?}", other),
      },
      Route::Dismiss
    );
  }

  #[test]
  fn test_invalid_origin_rejected() {
    let config = Config::with_origin("not a url");
    let result = CacheEngine::new(
      config,
      MemoryStorage::new(),
      ScriptedNetwork::new(),
      Arc::new(RecordingSurface::new()),
    );
    assert!(result.is_err());
  }
}
