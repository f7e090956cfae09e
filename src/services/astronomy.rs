//! Cached client for the credentialed astronomy events API.

use chrono::{Days, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, Clock, QueryKey};
use crate::config::AstronomyConfig;
use crate::envelope::{EnvelopeBuilder, ErrorEnvelope};
use crate::upstream::document::Document;
use crate::upstream::{FetchClient, FetchRequest};

use super::keys::UpstreamQueryKey;
use super::types::{EventsPage, EventsQuery};
use super::{failure_envelope, into_response};

const ENVELOPE: EnvelopeBuilder = EnvelopeBuilder::new("ASTRONOMY_API_ERROR");
const API_NAME: &str = "Astronomy API";
const DATE_FORMAT: &str = "%Y-%m-%d";
const DEFAULT_WINDOW_DAYS: u64 = 30;

#[derive(Clone)]
pub struct AstronomyService {
  config: AstronomyConfig,
  fetch: FetchClient,
  cache: CacheLayer,
  clock: Arc<dyn Clock>,
}

impl AstronomyService {
  pub fn new(config: AstronomyConfig, fetch: FetchClient, cache: CacheLayer) -> Self {
    if config.credentials().is_none() {
      warn!("Astronomy API credentials not configured; event requests will fail with 401");
    } else {
      info!(base_url = %config.base_url, "Astronomy events service ready");
    }
    let clock = cache.clock();
    Self {
      config,
      fetch,
      cache,
      clock,
    }
  }

  /// Events between the two dates, capped at `query.limit`.
  ///
  /// Returns `{ok: true, data, count}` where `count` is the untruncated
  /// total, or an error envelope. Missing credentials short-circuit to a
  /// 401 envelope without touching the network.
  pub async fn get_events(&self, query: &EventsQuery) -> Value {
    let Some((app_id, app_secret)) = self.config.credentials() else {
      return ENVELOPE
        .build(401, "Astronomy API credentials not configured")
        .into_value();
    };

    let key = UpstreamQueryKey::Events {
      from_date: query.from_date.map(format_date),
      to_date: query.to_date.map(format_date),
      event_type: query.event_type.clone(),
      limit: query.limit,
    };
    debug!(query = %key.description(), "Astronomy request");

    let request = self.build_request(query).basic_auth(app_id, app_secret);
    let options = self.config.fetch_options();
    let ttl = Duration::from_secs(self.config.ttl_secs);
    let limit = query.limit;

    let outcome = self
      .cache
      .remember(&key.cache_key(), ttl, || async {
        let result = self.fetch.fetch(&request, &options).await;
        if !result.is_success() {
          return Err::<EventsPage, ErrorEnvelope>(failure_envelope(&ENVELOPE, API_NAME, &result));
        }
        Ok(truncate_events(&result.into_json(), limit))
      })
      .await;

    into_response(outcome)
  }

  fn build_request(&self, query: &EventsQuery) -> FetchRequest {
    let today = self.clock.now().date_naive();
    let from = query.from_date.unwrap_or(today);
    let to = query
      .to_date
      .unwrap_or_else(|| today.checked_add_days(Days::new(DEFAULT_WINDOW_DAYS)).unwrap_or(today));

    let url = format!("{}/studio/star-chart", self.config.base_url.trim_end_matches('/'));
    let mut request = FetchRequest::get(url)
      .query("from_date", format_date(from))
      .query("to_date", format_date(to));

    if let Some(event_type) = query.event_type.as_deref().filter(|t| !t.is_empty()) {
      request = request.query("type", event_type);
    }
    request
  }
}

fn format_date(date: NaiveDate) -> String {
  date.format(DATE_FORMAT).to_string()
}

/// Cap the upstream `data` list at `limit`, reporting the full count.
fn truncate_events(body: &Value, limit: usize) -> EventsPage {
  let events = body
    .field("data")
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or(&[]);

  EventsPage {
    ok: true,
    data: events.iter().take(limit).cloned().collect(),
    count: events.len(),
  }
}
