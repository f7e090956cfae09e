//! Cached proxy in front of the ISS telemetry backend.

use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheLayer, QueryKey};
use crate::config::UpstreamConfig;
use crate::envelope::{EnvelopeBuilder, ErrorEnvelope};
use crate::upstream::{FetchClient, FetchOptions, FetchRequest};

use super::keys::UpstreamQueryKey;
use super::{failure_envelope, into_response};

const ENVELOPE: EnvelopeBuilder = EnvelopeBuilder::new("UPSTREAM_ERROR");
const API_NAME: &str = "telemetry API";

/// Live position, trend and OSDR catalog data with short-lived caching.
///
/// Every data operation returns either the upstream payload or an error
/// envelope; callers tell them apart by the `ok` field alone.
#[derive(Clone)]
pub struct ProxyService {
  config: UpstreamConfig,
  fetch: FetchClient,
  cache: CacheLayer,
}

impl ProxyService {
  pub fn new(config: UpstreamConfig, fetch: FetchClient, cache: CacheLayer) -> Self {
    info!(base_url = %config.base_url, "Telemetry proxy ready");
    Self {
      config,
      fetch,
      cache,
    }
  }

  /// Latest ISS position.
  pub async fn get_last_position(&self) -> Value {
    let key = UpstreamQueryKey::LastPosition;
    self.cached(&key, self.position_ttl(), "/last", Vec::new()).await
  }

  /// Most recent `limit` ISS trend points.
  pub async fn get_trend(&self, limit: u32) -> Value {
    let key = UpstreamQueryKey::Trend { limit };
    let query = vec![("limit".to_string(), limit.to_string())];
    self.cached(&key, self.position_ttl(), "/trend", query).await
  }

  /// OSDR dataset catalog, filtered by `params`.
  pub async fn get_catalog(&self, params: &BTreeMap<String, String>) -> Value {
    let key = UpstreamQueryKey::Catalog {
      params: params.clone(),
    };
    let query = params
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    let ttl = Duration::from_secs(self.config.catalog_ttl_secs);
    self.cached(&key, ttl, "/osdr/datasets", query).await
  }

  /// Single uncached probe of the backend's health endpoint.
  pub async fn health_check(&self) -> bool {
    let request = FetchRequest::get(self.url("/health"));
    let options = FetchOptions::probe(Duration::from_secs(self.config.health_timeout_secs));
    let result = self.fetch.fetch(&request, &options).await;
    debug!(status = ?result.status, "Health probe finished");
    result.is_success()
  }

  fn position_ttl(&self) -> Duration {
    Duration::from_secs(self.config.position_ttl_secs)
  }

  fn url(&self, endpoint: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
  }

  async fn cached(
    &self,
    key: &UpstreamQueryKey,
    ttl: Duration,
    endpoint: &str,
    query: Vec<(String, String)>,
  ) -> Value {
    debug!(query = %key.description(), "Proxy request");
    let request = FetchRequest::get(self.url(endpoint)).queries(query);
    let options = self.config.fetch_options();

    let outcome = self
      .cache
      .remember(&key.cache_key(), ttl, || async {
        let result = self.fetch.fetch(&request, &options).await;
        if result.is_success() {
          Ok(result.into_json())
        } else {
          Err::<Value, ErrorEnvelope>(failure_envelope(&ENVELOPE, API_NAME, &result))
        }
      })
      .await;

    into_response(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use serde_json::json;
  use std::sync::Arc;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn service(base_url: &str) -> ProxyService {
    let config = UpstreamConfig {
      base_url: base_url.to_string(),
      timeout_secs: 2,
      retry_delay_ms: 10,
      ..Default::default()
    };
    let cache = CacheLayer::new(Arc::new(MemoryStorage::new()));
    ProxyService::new(config, FetchClient::new().unwrap(), cache)
  }

  #[tokio::test]
  async fn test_last_position_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/last"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"latitude": 51.6})))
      .expect(1)
      .mount(&server)
      .await;

    let proxy = service(&server.uri());
    assert_eq!(proxy.get_last_position().await, json!({"latitude": 51.6}));
    assert_eq!(proxy.get_last_position().await, json!({"latitude": 51.6}));
  }

  #[tokio::test]
  async fn test_trend_limit_is_forwarded_and_keyed() {
    let server = MockServer::start().await;
    for limit in ["5", "10"] {
      Mock::given(method("GET"))
        .and(path("/trend"))
        .and(query_param("limit", limit))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"limit": limit})))
        .expect(1)
        .mount(&server)
        .await;
    }

    let proxy = service(&server.uri());
    assert_eq!(proxy.get_trend(5).await, json!({"limit": "5"}));
    assert_eq!(proxy.get_trend(10).await, json!({"limit": "10"}));
    assert_eq!(proxy.get_trend(5).await, json!({"limit": "5"}));
  }

  #[tokio::test]
  async fn test_catalog_params_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/osdr/datasets"))
      .and(query_param("search", "mouse"))
      .and(query_param("page", "2"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
      .expect(1)
      .mount(&server)
      .await;

    let params: BTreeMap<String, String> = [("search", "mouse"), ("page", "2")]
      .into_iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();

    let proxy = service(&server.uri());
    assert_eq!(proxy.get_catalog(&params).await, json!({"items": []}));
    assert_eq!(proxy.get_catalog(&params).await, json!({"items": []}));
  }

  #[tokio::test]
  async fn test_upstream_error_becomes_envelope_and_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/last"))
      .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
      .expect(2)
      .mount(&server)
      .await;

    let proxy = service(&server.uri());
    for _ in 0..2 {
      let response = proxy.get_last_position().await;
      assert_eq!(response["ok"], json!(false));
      assert_eq!(response["error"]["code"], "UPSTREAM_ERROR_503");
      assert!(response["error"]["trace_id"].is_string());
    }
  }

  #[tokio::test]
  async fn test_unreachable_upstream_reports_500() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let proxy = service(&format!("http://{}", addr));
    let response = proxy.get_trend(10).await;

    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"]["code"], "UPSTREAM_ERROR_500");
    assert!(!proxy.health_check().await);
  }

  #[tokio::test]
  async fn test_concurrent_requests_share_one_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/last"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"latitude": 1.0}))
          .set_delay(Duration::from_millis(100)),
      )
      .expect(1)
      .mount(&server)
      .await;

    let proxy = service(&server.uri());
    let calls = (0..10).map(|_| {
      let proxy = proxy.clone();
      tokio::spawn(async move { proxy.get_last_position().await })
    });

    for response in futures::future::join_all(calls).await {
      assert_eq!(response.unwrap(), json!({"latitude": 1.0}));
    }
  }

  #[tokio::test]
  async fn test_concurrent_requests_share_one_failed_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/last"))
      .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(100)))
      .expect(1)
      .mount(&server)
      .await;

    let proxy = service(&server.uri());
    let calls = (0..10).map(|_| {
      let proxy = proxy.clone();
      tokio::spawn(async move { proxy.get_last_position().await })
    });

    let responses: Vec<Value> = futures::future::join_all(calls)
      .await
      .into_iter()
      .map(|response| response.unwrap())
      .collect();
    for response in &responses {
      assert_eq!(response["error"]["code"], "UPSTREAM_ERROR_503");
      assert_eq!(response["error"]["trace_id"], responses[0]["error"]["trace_id"]);
    }
  }

  #[tokio::test]
  async fn test_health_check_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/health"))
      .respond_with(ResponseTemplate::new(200))
      .expect(2)
      .mount(&server)
      .await;

    let proxy = service(&server.uri());
    assert!(proxy.health_check().await);
    assert!(proxy.health_check().await);
  }
}
