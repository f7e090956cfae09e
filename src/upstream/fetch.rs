//! Outbound HTTP calls with a per-attempt timeout and fixed-delay retries.

use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use url::Url;

/// Longest slice of an error body that goes into the logs.
const LOGGED_BODY_LIMIT: usize = 512;

/// Classified outcome of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
  Success,
  /// Upstream answered with a non-2xx status.
  UpstreamError(u16),
  /// Connection refused, DNS failure, broken body stream, bad URL.
  TransportError,
  Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
  pub status: FetchStatus,
  /// Parsed JSON on success (an empty object if the body was not JSON).
  /// On `UpstreamError`, the error body as JSON or as a JSON string.
  pub body: Option<Value>,
  /// Number of attempts made.
  pub attempts: u32,
}

impl FetchResult {
  pub fn is_success(&self) -> bool {
    self.status == FetchStatus::Success
  }

  /// HTTP-style status used when turning a failure into an envelope.
  /// Transport-level failures report 500.
  pub fn status_code(&self) -> u16 {
    match self.status {
      FetchStatus::Success => 200,
      FetchStatus::UpstreamError(code) => code,
      FetchStatus::TransportError | FetchStatus::Timeout => 500,
    }
  }

  /// The JSON body, or an empty object.
  pub fn into_json(self) -> Value {
    self.body.unwrap_or_else(empty_object)
  }
}

/// Timeout and retry budget for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
  /// Applied to each attempt separately.
  pub timeout: Duration,
  pub max_attempts: u32,
  /// Fixed pause between attempts.
  pub retry_delay: Duration,
}

impl FetchOptions {
  /// Single attempt, no retry.
  pub fn probe(timeout: Duration) -> Self {
    Self {
      timeout,
      max_attempts: 1,
      retry_delay: Duration::ZERO,
    }
  }
}

/// A GET request to an upstream endpoint.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
  pub url: String,
  /// Query parameters in the order they should appear.
  pub query: Vec<(String, String)>,
  pub basic_auth: Option<(String, String)>,
  pub headers: Vec<(String, String)>,
}

impl FetchRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      ..Default::default()
    }
  }

  pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.query.push((key.into(), value.to_string()));
    self
  }

  pub fn queries<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    self
      .query
      .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
    self
  }

  pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
    self.basic_auth = Some((username.into(), password.into()));
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// Failure of a single attempt that is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransientFailure {
  Transport,
  Timeout,
}

impl From<TransientFailure> for FetchStatus {
  fn from(failure: TransientFailure) -> Self {
    match failure {
      TransientFailure::Transport => FetchStatus::TransportError,
      TransientFailure::Timeout => FetchStatus::Timeout,
    }
  }
}

/// HTTP client shared by every upstream service.
///
/// Transport faults are retried; upstream application errors are not.
#[derive(Clone)]
pub struct FetchClient {
  http: reqwest::Client,
}

impl FetchClient {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("orbitcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { http })
  }

  /// Perform `request`, retrying transport faults up to the attempt budget.
  ///
  /// Never fails: every outcome is folded into a [`FetchResult`].
  pub async fn fetch(&self, request: &FetchRequest, options: &FetchOptions) -> FetchResult {
    let url = match build_url(request) {
      Ok(url) => url,
      Err(e) => {
        error!(url = %request.url, "Invalid upstream URL: {}", e);
        return FetchResult {
          status: FetchStatus::TransportError,
          body: None,
          attempts: 0,
        };
      }
    };

    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;
      let started = Instant::now();
      let outcome = self.attempt(&url, request, options.timeout).await;
      let latency_ms = started.elapsed().as_millis() as u64;

      match outcome {
        Ok((status, body)) => {
          debug!(
            url = %url,
            attempt,
            status = ?status,
            latency_ms,
            "Upstream call finished"
          );
          return FetchResult {
            status,
            body: Some(body),
            attempts: attempt,
          };
        }
        Err(failure) if attempt >= max_attempts => {
          error!(
            url = %url,
            attempts = attempt,
            latency_ms,
            "Upstream call failed after {} attempts: {:?}",
            attempt,
            failure
          );
          return FetchResult {
            status: failure.into(),
            body: None,
            attempts: attempt,
          };
        }
        Err(failure) => {
          warn!(
            url = %url,
            latency_ms,
            "Attempt {}/{} failed: {:?}, retrying in {:?}",
            attempt,
            max_attempts,
            failure,
            options.retry_delay
          );
          tokio::time::sleep(options.retry_delay).await;
        }
      }
    }
  }

  /// Single attempt. Non-2xx responses come back as `Ok`, since they are
  /// final and not retried.
  async fn attempt(
    &self,
    url: &Url,
    request: &FetchRequest,
    timeout: Duration,
  ) -> std::result::Result<(FetchStatus, Value), TransientFailure> {
    let mut builder = self.http.get(url.clone()).timeout(timeout);
    if let Some((username, password)) = &request.basic_auth {
      builder = builder.basic_auth(username, Some(password));
    }
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(classify)?;

    if !status.is_success() {
      let text = String::from_utf8_lossy(&bytes);
      warn!(
        url = %url,
        status = status.as_u16(),
        body = %truncate(&text, LOGGED_BODY_LIMIT),
        "Upstream returned an error"
      );
      let body = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::String(text.into_owned()));
      return Ok((FetchStatus::UpstreamError(status.as_u16()), body));
    }

    Ok((FetchStatus::Success, parse_lenient(&bytes)))
  }
}

fn build_url(request: &FetchRequest) -> std::result::Result<Url, url::ParseError> {
  let mut url = Url::parse(&request.url)?;
  if !request.query.is_empty() {
    url.query_pairs_mut().extend_pairs(&request.query);
  }
  Ok(url)
}

fn classify(e: reqwest::Error) -> TransientFailure {
  if e.is_timeout() {
    TransientFailure::Timeout
  } else {
    TransientFailure::Transport
  }
}

/// Successful bodies that are empty, `null` or not JSON become `{}`.
fn parse_lenient(bytes: &[u8]) -> Value {
  match serde_json::from_slice::<Value>(bytes) {
    Ok(Value::Null) => empty_object(),
    Ok(value) => value,
    Err(e) => {
      if !bytes.is_empty() {
        debug!("Upstream body is not JSON, using empty object: {}", e);
      }
      empty_object()
    }
  }
}

fn empty_object() -> Value {
  Value::Object(Map::new())
}

fn truncate(text: &str, limit: usize) -> &str {
  match text.char_indices().nth(limit) {
    Some((idx, _)) => &text[..idx],
    None => text,
  }
}
