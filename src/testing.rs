//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::NetworkError;
use crate::http::{Request, ResponseSnapshot};
use crate::network::Network;
use crate::notify::{DisplayError, DisplaySurface, Notification};

pub const ORIGIN: &str = "https://civic.example";

pub fn test_config() -> Config {
  let mut config = Config::with_origin(ORIGIN);
  config.manifest = vec!["/".to_string(), "/issues".to_string()];
  config.network_timeout_ms = 50;
  config.install_attempts = 2;
  config
}

#[derive(Debug, Clone)]
pub enum Reply {
  Respond(ResponseSnapshot),
  Fail,
  Hang(Duration),
}

/// Network whose answers are scripted per path.
///
/// Each path holds a queue of replies; the last reply is sticky. Unscripted
/// paths and any call while offline fail with a connection error.
#[derive(Default)]
pub struct ScriptedNetwork {
  replies: Mutex<HashMap<String, VecDeque<Reply>>>,
  calls: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn script(&self, path: &str, reply: Reply) {
    self
      .replies
      .lock()
      .unwrap()
      .entry(path.to_string())
      .or_default()
      .push_back(reply);
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self.script(path, Reply::Respond(ResponseSnapshot::new(status, body)));
  }

  pub fn fail(&self, path: &str) {
    self.script(path, Reply::Fail);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, path: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|r| path_of(&r.url) == path)
      .count()
  }

  fn next_reply(&self, path: &str) -> Reply {
    let mut replies = self.replies.lock().unwrap();
    match replies.get_mut(path) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Fail),
      Some(queue) => queue.front().cloned().unwrap_or(Reply::Fail),
      None => Reply::Fail,
    }
  }
}

fn path_of(url: &str) -> String {
  Url::parse(url)
    .map(|u| u.path().to_string())
    .unwrap_or_else(|_| url.to_string())
}

impl Network for ScriptedNetwork {
  async fn fetch(&self, url: Url, request: Request) -> Result<ResponseSnapshot, NetworkError> {
    self.calls.lock().unwrap().push(Request {
      url: url.to_string(),
      ..request
    });

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::Connect("offline".to_string()));
    }

    match self.next_reply(url.path()) {
      Reply::Respond(response) => Ok(response),
      Reply::Fail => Err(NetworkError::Connect("connection refused".to_string())),
      Reply::Hang(duration) => {
        tokio::time::sleep(duration).await;
        Err(NetworkError::Other("hung request finished".to_string()))
      }
    }
  }
}

/// Records displayed notifications, or refuses them when unavailable.
#[derive(Default)]
pub struct RecordingSurface {
  shown: Mutex<Vec<Notification>>,
  unavailable: AtomicBool,
}

impl RecordingSurface {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl DisplaySurface for RecordingSurface {
  fn show(&self, notification: &Notification) -> Result<(), DisplayError> {
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(DisplayError::Unavailable("no display".to_string()));
    }
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}
