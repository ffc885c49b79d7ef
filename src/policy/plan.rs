//! Serving strategies as data: ordered attempts plus a terminal default.

/// One attempt at producing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  /// Look the fingerprint up in the runtime, then the precache namespace
  Cache,
  /// Ask the network; any response ends the plan
  Network,
}

/// What to return when every step came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
  /// Plain-text 503
  ServiceUnavailable,
  /// JSON 503 for API callers
  ServiceUnavailableJson,
  /// JSON 503 marked `"queued": false` for mutations outside the outbox
  NotQueued,
  /// The cached offline page, or a built-in one
  OfflineDocument,
  /// Persist the request body in the outbox and answer 202
  Enqueue,
  /// Hand the network error back to the caller
  Propagate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
  pub steps: &'static [Step],
  pub fallback: Fallback,
  /// Write successful network responses to the runtime namespace
  pub store: bool,
  /// On a cache hit, refresh the entry in the background
  pub revalidate: bool,
}
