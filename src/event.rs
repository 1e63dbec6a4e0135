//! Host protocol for `offsync serve`: newline-delimited JSON messages on
//! stdin, one JSON effect per line on stdout.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::cache::FetchOutcome;
use crate::engine::{ControlMessage, Effect, Event};
use crate::http::{Destination, Method, Request};
use crate::notify::NotificationPayload;

/// One line from the host.
#[derive(Debug, Deserialize)]
pub struct Envelope {
  /// Echoed back on the effect so the host can correlate answers
  #[serde(default)]
  pub id: Option<Value>,
  #[serde(flatten)]
  pub message: HostMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
  Install,
  Activate,
  Fetch {
    #[serde(default = "default_method")]
    method: Method,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    destination: Destination,
  },
  Online,
  Offline,
  Push {
    #[serde(default)]
    payload: String,
  },
  NotificationClick {
    #[serde(default)]
    action: Option<String>,
    payload: NotificationPayload,
  },
  #[serde(alias = "SKIP_WAITING")]
  ForceActivate,
  #[serde(alias = "CACHE_ISSUES")]
  Prime { urls: Vec<String> },
  NewerGeneration { version: u64 },
  Drain,
}

fn default_method() -> Method {
  Method::Get
}

impl HostMessage {
  pub fn into_event(self) -> Event {
    match self {
      HostMessage::Install => Event::Install,
      HostMessage::Activate => Event::Activate,
      HostMessage::Fetch {
        method,
        url,
        headers,
        body,
        destination,
      } => Event::Fetch(Request {
        method,
        url,
        headers: headers.into_iter().collect(),
        body: body.map(String::into_bytes),
        destination,
      }),
      HostMessage::Online => Event::Connectivity { online: true },
      HostMessage::Offline => Event::Connectivity { online: false },
      HostMessage::Push { payload } => Event::Push(payload.into_bytes()),
      HostMessage::NotificationClick { action, payload } => {
        Event::NotificationClick { action, payload }
      }
      HostMessage::ForceActivate => Event::Control(ControlMessage::ForceActivate),
      HostMessage::Prime { urls } => Event::Control(ControlMessage::Prime { urls }),
      HostMessage::NewerGeneration { version } => Event::NewerGeneration(version),
      HostMessage::Drain => Event::RetryTick,
    }
  }
}

/// Inputs to the serve loop.
#[derive(Debug)]
pub enum Input {
  Host { id: Option<Value>, event: Event },
  /// A line that did not parse
  Malformed { error: String },
  /// Periodic retry tick
  Tick,
  /// stdin reached EOF
  Closed,
}

pub fn parse_line(line: &str) -> Option<Input> {
  let line = line.trim();
  if line.is_empty() {
    return None;
  }
  Some(match serde_json::from_str::<Envelope>(line) {
    Ok(envelope) => Input::Host {
      id: envelope.id,
      event: envelope.message.into_event(),
    },
    Err(e) => Input::Malformed {
      error: e.to_string(),
    },
  })
}

/// Event handler that produces inputs from stdin and a retry timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Input>,
}

impl EventHandler {
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let stdin_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if let Some(input) = parse_line(&line) {
              if stdin_tx.send(input).is_err() {
                break;
              }
            }
          }
          Ok(None) | Err(_) => {
            let _ = stdin_tx.send(Input::Closed);
            break;
          }
        }
      }
    });

    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // the first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if tx.send(Input::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next input
  pub async fn next(&mut self) -> Option<Input> {
    self.rx.recv().await
  }
}

/// Render an effect as one protocol line.
pub fn render_effect(id: Option<&Value>, effect: &Effect) -> Value {
  let mut value = match effect {
    Effect::Installed { cached } => json!({ "type": "installed", "cached": cached }),
    Effect::Activated(report) => json!({ "type": "activated", "report": report }),
    Effect::Respond(outcome) => render_outcome(outcome),
    Effect::Primed(report) => json!({ "type": "primed", "report": report }),
    Effect::Drained(outcomes) => json!({ "type": "drained", "outcomes": outcomes }),
    Effect::Displayed(notification) => {
      json!({ "type": "displayed", "notification": notification })
    }
    Effect::Dropped => json!({ "type": "dropped" }),
    Effect::Navigate(route) => json!({ "type": "navigate", "route": route }),
    Effect::State(state) => json!({ "type": "state", "state": state }),
    Effect::Failed(message) => json!({ "type": "error", "message": message }),
  };

  if let (Some(id), Some(map)) = (id, value.as_object_mut()) {
    map.insert("id".to_string(), id.clone());
  }
  value
}

pub fn render_outcome(outcome: &FetchOutcome) -> Value {
  match outcome {
    FetchOutcome::Served { response, source } => {
      let (body, encoding) = render_body(&response.body);
      json!({
        "type": "response",
        "source": source,
        "status": response.status,
        "headers": response.headers,
        "body": body,
        "encoding": encoding,
      })
    }
    FetchOutcome::NotFound => json!({ "type": "not-found" }),
    FetchOutcome::Queued { id, response } => {
      let (body, encoding) = render_body(&response.body);
      json!({
        "type": "queued",
        "mutation": id,
        "status": response.status,
        "body": body,
        "encoding": encoding,
      })
    }
  }
}

/// Text bodies go out as strings, anything else as an array of bytes.
fn render_body(body: &[u8]) -> (Value, &'static str) {
  match std::str::from_utf8(body) {
    Ok(text) => (Value::String(text.to_string()), "utf-8"),
    Err(_) => (json!(body), "bytes"),
  }
}
