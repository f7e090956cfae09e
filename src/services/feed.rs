//! Cached, normalized JWST image feed.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheLayer, QueryKey};
use crate::config::JwstConfig;
use crate::envelope::{EnvelopeBuilder, ErrorEnvelope};
use crate::upstream::{FetchClient, FetchRequest};

use super::keys::UpstreamQueryKey;
use super::normalize::{catalog_records, feed_path, normalize_records};
use super::types::{FeedPage, FeedQuery};
use super::{failure_envelope, into_response};

const ENVELOPE: EnvelopeBuilder = EnvelopeBuilder::new("JWST_API_ERROR");
const API_NAME: &str = "JWST API";

#[derive(Clone)]
pub struct FeedService {
  config: JwstConfig,
  fetch: FetchClient,
  cache: CacheLayer,
}

impl FeedService {
  pub fn new(config: JwstConfig, fetch: FetchClient, cache: CacheLayer) -> Self {
    info!(base_url = %config.base_url, "JWST feed service ready");
    Self {
      config,
      fetch,
      cache,
    }
  }

  /// One page of normalized feed items: `{source, count, items}`.
  ///
  /// The normalized page is what gets cached, not the raw catalog response.
  pub async fn get_feed(&self, query: &FeedQuery) -> Value {
    let key = UpstreamQueryKey::Feed {
      source: query.source,
      suffix: query.suffix.clone(),
      program: query.program.clone(),
      instrument: query.instrument.clone(),
      page: query.page,
      per_page: query.per_page,
    };
    debug!(query = %key.description(), "Feed request");

    let path = feed_path(query.source, &query.suffix, &query.program);
    let request = self.build_request(&path, query);
    let options = self.config.fetch_options();
    let ttl = Duration::from_secs(self.config.ttl_secs);

    let outcome = self
      .cache
      .remember(&key.cache_key(), ttl, || async {
        let result = self.fetch.fetch(&request, &options).await;
        if !result.is_success() {
          return Err::<FeedPage, ErrorEnvelope>(failure_envelope(&ENVELOPE, API_NAME, &result));
        }

        let body = result.into_json();
        let records = catalog_records(&body);
        let items = normalize_records(records, query.instrument.as_deref(), query.per_page);
        debug!(
          path = %path,
          received = records.len(),
          kept = items.len(),
          "Normalized feed page"
        );

        Ok(FeedPage {
          source: path.clone(),
          count: items.len(),
          items,
        })
      })
      .await;

    into_response(outcome)
  }

  fn build_request(&self, path: &str, query: &FeedQuery) -> FetchRequest {
    let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
    let mut request = FetchRequest::get(url)
      .query("page", query.page)
      .query("perPage", query.per_page);

    if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
      request = request.header("x-api-key", key);
    }
    request
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::services::FeedSource;
  use serde_json::json;
  use std::sync::Arc;
  use wiremock::matchers::{header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn service(base_url: &str, api_key: Option<&str>) -> FeedService {
    let config = JwstConfig {
      base_url: base_url.to_string(),
      timeout_secs: 2,
      retry_delay_ms: 10,
      api_key: api_key.map(String::from),
      ..Default::default()
    };
    let cache = CacheLayer::new(Arc::new(MemoryStorage::new()));
    FeedService::new(config, FetchClient::new().unwrap(), cache)
  }

  fn catalog(n: usize) -> Value {
    let records: Vec<Value> = (0..n)
      .map(|i| {
        json!({
          "location": format!("https://cdn/jw{}.jpg", i),
          "observation_id": format!("jw{}", i),
          "program": 2736,
          "details": {"instruments": [{"instrument": "nircam"}], "suffix": "_i2d"},
        })
      })
      .collect();
    json!({"statusCode": 200, "body": records})
  }

  #[tokio::test]
  async fn test_default_feed_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/all/type/jpg"))
      .and(query_param("page", "1"))
      .and(query_param("perPage", "24"))
      .and(header("x-api-key", "secret"))
      .respond_with(ResponseTemplate::new(200).set_body_json(catalog(100)))
      .expect(1)
      .mount(&server)
      .await;

    let feed = service(&server.uri(), Some("secret"));
    let response = feed.get_feed(&FeedQuery::default()).await;

    assert_eq!(response["source"], "all/type/jpg");
    assert_eq!(response["count"], json!(24));
    assert_eq!(response["items"].as_array().unwrap().len(), 24);
    assert_eq!(response["items"][0]["caption"], "jw0 · P2736 · _i2d · NIRCAM");

    // Second call is served from the normalized cache
    assert_eq!(feed.get_feed(&FeedQuery::default()).await, response);
  }

  #[tokio::test]
  async fn test_program_source_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/program/id/2736"))
      .respond_with(ResponseTemplate::new(200).set_body_json(catalog(3)))
      .expect(1)
      .mount(&server)
      .await;

    let feed = service(&server.uri(), None);
    let query = FeedQuery {
      source: FeedSource::Program,
      program: "2736".to_string(),
      instrument: Some("MIRI".to_string()),
      ..Default::default()
    };
    let response = feed.get_feed(&query).await;

    assert_eq!(response["source"], "program/id/2736");
    // All records list NIRCAM only, so a MIRI filter drops them
    assert_eq!(response["count"], json!(0));
  }

  #[tokio::test]
  async fn test_instrument_spellings_share_one_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/all/type/jpg"))
      .respond_with(ResponseTemplate::new(200).set_body_json(catalog(3)))
      .expect(1)
      .mount(&server)
      .await;

    let feed = service(&server.uri(), None);
    let query = |instrument: &str| FeedQuery {
      instrument: Some(instrument.to_string()),
      ..Default::default()
    };

    let first = feed.get_feed(&query("NIRCam")).await;
    assert_eq!(first["count"], json!(3));
    assert_eq!(feed.get_feed(&query("nircam")).await, first);
  }

  #[tokio::test]
  async fn test_malformed_catalog_yields_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
      .mount(&server)
      .await;

    let feed = service(&server.uri(), None);
    let response = feed.get_feed(&FeedQuery::default()).await;

    assert_eq!(
      response,
      json!({"source": "all/type/jpg", "count": 0, "items": []})
    );
  }

  #[tokio::test]
  async fn test_upstream_failure_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(502))
      .expect(2)
      .mount(&server)
      .await;

    let feed = service(&server.uri(), None);
    for _ in 0..2 {
      let response = feed.get_feed(&FeedQuery::default()).await;
      assert_eq!(response["ok"], json!(false));
      assert_eq!(response["error"]["code"], "JWST_API_ERROR_502");
    }
  }
}
