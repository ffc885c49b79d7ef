//! In-process fakes for the engine's collaborators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

use crate::error::NetworkError;
use crate::fetch::Fetcher;
use crate::http::{Method, Request, Response};
use crate::notify::{Clients, NotificationOptions, Notifier, WindowClient};

pub const ORIGIN: &str = "https://bets.example/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Fetcher answering from a fixed script, recording every request.
#[derive(Default)]
pub struct ScriptedFetcher {
  script: Mutex<HashMap<String, Result<Response, NetworkError>>>,
  calls: Mutex<Vec<Request>>,
  gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn key(method: Method, url: &Url) -> String {
    format!("{} {}", method, url)
  }

  pub fn respond(&self, method: Method, path: &str, response: Response) {
    self
      .script
      .lock()
      .unwrap()
      .insert(Self::key(method, &url(path)), Ok(response));
  }

  pub fn fail(&self, method: Method, path: &str) {
    self.script.lock().unwrap().insert(
      Self::key(method, &url(path)),
      Err(NetworkError::Unavailable("connection refused".to_string())),
    );
  }

  /// Hold every subsequent fetch until the returned handle is notified.
  pub fn hold(&self) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    *self.gate.lock().unwrap() = Some(notify.clone());
    notify
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.lock().unwrap().push(request.clone());
    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }
    self
      .script
      .lock()
      .unwrap()
      .get(&Self::key(request.method, &request.url))
      .cloned()
      .unwrap_or_else(|| Err(NetworkError::Unavailable(format!("no route to {}", request.url))))
  }
}

/// Notifier that remembers what it showed.
#[derive(Default)]
pub struct RecordingNotifier {
  pub shown: Mutex<Vec<(String, NotificationOptions)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn show(&self, title: &str, options: &NotificationOptions) {
    self
      .shown
      .lock()
      .unwrap()
      .push((title.to_string(), options.clone()));
  }
}

/// Window registry with a fixed set of open windows.
#[derive(Default)]
pub struct FakeClients {
  pub windows: Mutex<Vec<WindowClient>>,
  pub focused: Mutex<Vec<String>>,
  pub opened: Mutex<Vec<Url>>,
  pub claims: Mutex<usize>,
}

impl FakeClients {
  pub fn with_window(id: &str, path: &str) -> Self {
    let clients = Self::default();
    clients.windows.lock().unwrap().push(WindowClient {
      id: id.to_string(),
      url: url(path),
    });
    clients
  }
}

#[async_trait]
impl Clients for FakeClients {
  async fn windows(&self) -> Vec<WindowClient> {
    self.windows.lock().unwrap().clone()
  }

  async fn focus(&self, id: &str) -> bool {
    self.focused.lock().unwrap().push(id.to_string());
    true
  }

  async fn open(&self, url: &Url) {
    self.opened.lock().unwrap().push(url.clone());
  }

  async fn claim(&self) {
    *self.claims.lock().unwrap() += 1;
  }
}
