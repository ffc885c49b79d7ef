//! Push notifications and routing of notification clicks to application windows.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

/// Action id that closes a notification without navigating.
pub const DISMISS_ACTION: &str = "dismiss";

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Options passed to [`Notifier::show`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOptions {
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Where a click should take the user
  pub url: String,
  pub actions: Vec<NotificationAction>,
}

/// Displays user notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, title: &str, options: &NotificationOptions);
}

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: Url,
}

/// Enumerates, focuses and opens application windows.
#[async_trait]
pub trait Clients: Send + Sync {
  async fn windows(&self) -> Vec<WindowClient>;

  /// Returns false if the window no longer exists.
  async fn focus(&self, id: &str) -> bool;

  async fn open(&self, url: &Url);

  /// Start controlling windows opened under an earlier version.
  async fn claim(&self);
}

/// Decoded push payload. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushMessage {
  pub title: Option<String>,
  #[serde(default)]
  pub body: String,
  pub url: Option<String>,
  pub actions: Option<Vec<NotificationAction>>,
}

impl PushMessage {
  /// Decode a push payload. Anything that is not a JSON object becomes the body.
  pub fn parse(data: &[u8]) -> Self {
    match serde_json::from_slice::<PushMessage>(data) {
      Ok(message) => message,
      Err(_) => Self {
        title: None,
        body: String::from_utf8_lossy(data).trim().to_string(),
        url: None,
        actions: None,
      },
    }
  }

  pub fn into_notification(
    self,
    app_name: &str,
    icon: &str,
    badge: &str,
  ) -> (String, NotificationOptions) {
    let title = self.title.unwrap_or_else(|| app_name.to_string());
    let options = NotificationOptions {
      body: self.body,
      icon: icon.to_string(),
      badge: badge.to_string(),
      url: self.url.unwrap_or_else(|| "/".to_string()),
      actions: self.actions.unwrap_or_else(default_actions),
    };
    (title, options)
  }
}

fn default_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      action: "view".to_string(),
      title: "View".to_string(),
    },
    NotificationAction {
      action: DISMISS_ACTION.to_string(),
      title: "Dismiss".to_string(),
    },
  ]
}

/// What a notification click resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Dismissed,
  Focused(String),
  Opened(Url),
}

/// Route a notification click: focus a window already showing `target`,
/// otherwise open a new one. The dismiss action does nothing.
pub async fn route_click(clients: &dyn Clients, action: Option<&str>, target: &Url) -> ClickOutcome {
  if action == Some(DISMISS_ACTION) {
    debug!("notification dismissed");
    return ClickOutcome::Dismissed;
  }

  for window in clients.windows().await {
    if window.url == *target && clients.focus(&window.id).await {
      info!(window = %window.id, url = %target, "focused existing window");
      return ClickOutcome::Focused(window.id);
    }
  }

  info!(url = %target, "opening new window");
  clients.open(target).await;
  ClickOutcome::Opened(target.clone())
}
