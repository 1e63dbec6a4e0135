//! Push notification rendering and interaction routing.
//!
//! Fire-and-forget: a payload that cannot be displayed is logged and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub id: String,
  pub label: String,
}

/// Push payload as delivered by the push transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  #[serde(default)]
  pub data: BTreeMap<String, String>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}

#[derive(Deserialize)]
struct WirePayload {
  title: Option<String>,
  body: Option<String>,
  #[serde(default)]
  data: BTreeMap<String, String>,
  #[serde(default)]
  actions: Vec<NotificationAction>,
}

impl NotificationPayload {
  /// Decode raw push bytes.
  ///
  /// JSON payloads may omit `title` and `body`; anything that is not JSON is
  /// shown as the body text. Empty payloads use the configured defaults.
  pub fn decode(raw: &[u8], defaults: &NotificationConfig) -> Self {
    if let Ok(wire) = serde_json::from_slice::<WirePayload>(raw) {
      return Self {
        title: wire.title.unwrap_or_else(|| defaults.default_title.clone()),
        body: wire.body.unwrap_or_else(|| defaults.default_body.clone()),
        data: wire.data,
        actions: wire.actions,
      };
    }

    let text = String::from_utf8_lossy(raw).trim().to_string();
    Self {
      title: defaults.default_title.clone(),
      body: if text.is_empty() {
        defaults.default_body.clone()
      } else {
        text
      },
      data: BTreeMap::new(),
      actions: Vec::new(),
    }
  }
}

/// A notification ready for the display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub actions: Vec<NotificationAction>,
  pub data: BTreeMap<String, String>,
  pub arrived_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DisplayError {
  #[error("display surface unavailable: {0}")]
  Unavailable(String),
}

/// Where notifications are shown.
pub trait DisplaySurface: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<(), DisplayError>;
}

/// Surface that writes notifications to the log.
pub struct LogSurface;

impl DisplaySurface for LogSurface {
  fn show(&self, notification: &Notification) -> Result<(), DisplayError> {
    info!("notification: {} - {}", notification.title, notification.body);
    Ok(())
  }
}

/// Navigation requested by a notification interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
  Open { target: String },
  Dismiss,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
  surface: Arc<dyn DisplaySurface>,
  config: NotificationConfig,
}

impl NotificationDispatcher {
  pub fn new(surface: Arc<dyn DisplaySurface>, config: NotificationConfig) -> Self {
    Self { surface, config }
  }

  pub fn render(&self, payload: NotificationPayload) -> Notification {
    let actions = if payload.actions.is_empty() {
      self
        .config
        .default_actions
        .iter()
        .map(|a| NotificationAction {
          id: a.id.clone(),
          label: a.label.clone(),
        })
        .collect()
    } else {
      payload.actions
    };

    Notification {
      title: payload.title,
      body: payload.body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      actions,
      data: payload.data,
      arrived_at: Utc::now(),
    }
  }

  /// Render and display. Returns the notification if it was shown.
  pub fn on_push(&self, payload: NotificationPayload) -> Option<Notification> {
    let notification = self.render(payload);
    match self.surface.show(&notification) {
      Ok(()) => Some(notification),
      Err(e) => {
        warn!("dropping notification '{}': {}", notification.title, e);
        None
      }
    }
  }

  /// Map a click to a route. Unknown actions behave like a bare click.
  pub fn on_interaction(&self, action_id: Option<&str>, payload: &NotificationPayload) -> Route {
    let bare_click = || Route::Open {
      target: payload
        .data
        .get("url")
        .cloned()
        .unwrap_or_else(|| self.config.default_route.clone()),
    };

    match action_id.filter(|id| !id.is_empty()) {
      None => bare_click(),
      Some(id) => match self.config.actions.get(id) {
        Some(Some(target)) => Route::Open {
          target: target.clone(),
        },
        Some(None) => Route::Dismiss,
        None => bare_click(),
      },
    }
  }
}
