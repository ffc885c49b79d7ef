//! Network capability used by the policy engine, the lifecycle controller and replay.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::error::NetworkError;
use crate::http::{Headers, Method, Request, Response};

/// Issue a request over the network.
///
/// Any response, whatever its status, is a network success; only a failure to
/// obtain one is an error.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// [`Fetcher`] backed by a reqwest client.
#[derive(Clone, Default)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Options => reqwest::Method::OPTIONS,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

/// Flatten a header map, joining repeated fields with ", ".
/// Values that are not visible ASCII are skipped.
fn collect_headers(map: &HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for name in map.keys() {
    let values: Vec<&str> = map
      .get_all(name)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .collect();
    if !values.is_empty() {
      headers.insert(name.as_str().to_string(), values.join(", "));
    }
  }
  headers
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let mut builder = self
      .client
      .request(to_reqwest(request.method), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::Unavailable(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = collect_headers(response.headers());
    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::Unavailable(format!("Failed to read body: {}", e)))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
