//! Replay pass over the operation queue.

use tracing::{debug, info, warn};
use url::Url;

use super::storage::{OperationQueue, PendingOperation};
use crate::error::{EngineError, StoreError};
use crate::fetch::Fetcher;
use crate::http::{Method, Request};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Operations present when the pass started
  pub attempted: usize,
  /// Ids confirmed by the endpoint and removed
  pub delivered: Vec<i64>,
  /// Ids left queued for the next pass
  pub failed: Vec<i64>,
}

impl ReplayReport {
  pub fn is_clean(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Attempt delivery of every operation queued when the pass starts.
///
/// Operations are tried oldest first. A failed delivery leaves its record in
/// place and the pass moves on; operations enqueued while the pass runs wait
/// for the next one. There is no retry or delay inside a pass.
pub async fn run(
  queue: &dyn OperationQueue,
  fetcher: &dyn Fetcher,
  endpoint: &Url,
) -> Result<ReplayReport, StoreError> {
  let snapshot = queue.list_all()?;
  let mut report = ReplayReport {
    attempted: snapshot.len(),
    ..ReplayReport::default()
  };

  for op in snapshot {
    match deliver(fetcher, endpoint, &op).await {
      Ok(()) => {
        // Delivered but still stored means it is sent again next pass.
        if let Err(e) = queue.remove(op.id) {
          warn!(id = op.id, error = %e, "delivered operation could not be removed");
        }
        debug!(id = op.id, "operation delivered");
        report.delivered.push(op.id);
      }
      Err(e) => {
        warn!(error = %e, "operation stays queued");
        report.failed.push(op.id);
      }
    }
  }

  info!(
    attempted = report.attempted,
    delivered = report.delivered.len(),
    failed = report.failed.len(),
    "replay pass finished"
  );
  Ok(report)
}

async fn deliver(
  fetcher: &dyn Fetcher,
  endpoint: &Url,
  op: &PendingOperation,
) -> Result<(), EngineError> {
  let request = Request::new(Method::Post, endpoint.clone())
    .with_header("content-type", "application/json")
    .with_body(op.payload.clone());

  match fetcher.fetch(&request).await {
    Ok(response) if response.is_success() => Ok(()),
    Ok(response) => Err(EngineError::DeliveryFailed {
      id: op.id,
      reason: format!("endpoint answered {}", response.status),
    }),
    Err(e) => Err(EngineError::DeliveryFailed {
      id: op.id,
      reason: e.to_string(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::error::NetworkError;
  use crate::http::Response;
  use crate::queue::SqliteQueue;
  use crate::test_support::{url, ScriptedFetcher};
  use async_trait::async_trait;

  fn queue() -> SqliteQueue {
    SqliteQueue::new(Database::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_replay_drains_queue_in_order() {
    let q = queue();
    let a = q.enqueue(br#"{"bet":"a"}"#).unwrap();
    let b = q.enqueue(br#"{"bet":"b"}"#).unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(Method::Post, "/api/bets", Response::new(201, "{}"));

    let report = run(&q, fetcher.as_ref(), &url("/api/bets")).await.unwrap();

    assert_eq!(report.delivered, vec![a, b]);
    assert!(report.is_clean());
    assert_eq!(q.len().unwrap(), 0);

    let bodies: Vec<Vec<u8>> = fetcher
      .calls()
      .into_iter()
      .map(|r| r.body.unwrap_or_default())
      .collect();
    assert_eq!(bodies, vec![br#"{"bet":"a"}"#.to_vec(), br#"{"bet":"b"}"#.to_vec()]);
    assert_eq!(
      fetcher.calls()[0].header("content-type"),
      Some("application/json")
    );
  }

  #[tokio::test]
  async fn test_second_pass_is_noop() {
    let q = queue();
    q.enqueue(b"{}").unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(Method::Post, "/api/bets", Response::new(200, "{}"));

    run(&q, fetcher.as_ref(), &url("/api/bets")).await.unwrap();
    let second = run(&q, fetcher.as_ref(), &url("/api/bets")).await.unwrap();

    assert_eq!(second, ReplayReport::default());
    assert_eq!(fetcher.call_count(), 1);
  }

  /// Rejects payloads containing "fail", accepts the rest.
  struct Selective;

  #[async_trait]
  impl Fetcher for Selective {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
      let body = String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).into_owned();
      if body.contains("fail") {
        Err(NetworkError::Unavailable("reset".to_string()))
      } else {
        Ok(Response::new(200, "{}"))
      }
    }
  }

  #[tokio::test]
  async fn test_partial_failure_keeps_only_failed() {
    let q = queue();
    let a = q.enqueue(b"fail").unwrap();
    let b = q.enqueue(b"ok").unwrap();

    let report = run(&q, &Selective, &url("/api/bets")).await.unwrap();

    assert_eq!(report.failed, vec![a]);
    assert_eq!(report.delivered, vec![b]);
    let left: Vec<i64> = q.list_all().unwrap().iter().map(|op| op.id).collect();
    assert_eq!(left, vec![a]);
  }

  #[tokio::test]
  async fn test_rejected_status_keeps_operation() {
    let q = queue();
    let a = q.enqueue(b"{}").unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.respond(Method::Post, "/api/bets", Response::new(500, "boom"));

    let report = run(&q, fetcher.as_ref(), &url("/api/bets")).await.unwrap();

    assert_eq!(report.failed, vec![a]);
    assert_eq!(q.len().unwrap(), 1);
  }

  /// Enqueues a new operation on every delivery.
  struct Enqueuing<'a> {
    queue: &'a SqliteQueue,
  }

  #[async_trait]
  impl Fetcher for Enqueuing<'_> {
    async fn fetch(&self, _request: &Request) -> Result<Response, NetworkError> {
      self.queue.enqueue(b"late").map_err(|e| NetworkError::Unavailable(e.to_string()))?;
      Ok(Response::new(200, "{}"))
    }
  }

  #[tokio::test]
  async fn test_operations_enqueued_during_pass_wait_for_next() {
    let q = queue();
    q.enqueue(b"first").unwrap();

    let report = run(&q, &Enqueuing { queue: &q }, &url("/api/bets")).await.unwrap();

    assert_eq!(report.attempted, 1);
    let left = q.list_all().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].payload, b"late".to_vec());
  }
}
