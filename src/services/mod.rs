//! Cached upstream services.
//!
//! Each service builds a deterministic cache key, asks the [`CacheLayer`]
//! for it and only on a miss goes upstream. Failures come back as an
//! [`ErrorEnvelope`] value and are never cached.
//!
//! [`CacheLayer`]: crate::cache::CacheLayer

mod astronomy;
mod feed;
mod keys;
mod normalize;
mod proxy;
mod types;

pub use astronomy::AstronomyService;
pub use feed::FeedService;
pub use proxy::ProxyService;
pub use types::{EventsQuery, FeedQuery, FeedSource};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::envelope::{EnvelopeBuilder, ErrorEnvelope};
use crate::upstream::{FetchResult, FetchStatus};

/// Turn a failed fetch into an envelope, naming the upstream in the message.
fn failure_envelope(builder: &EnvelopeBuilder, api: &str, result: &FetchResult) -> ErrorEnvelope {
  warn!(api, status = ?result.status, attempts = result.attempts, "Upstream request failed");
  match result.status {
    FetchStatus::UpstreamError(code) => builder.build(code, format!("{} returned an error", api)),
    FetchStatus::TransportError | FetchStatus::Timeout | FetchStatus::Success => {
      builder.build(result.status_code(), format!("Failed to connect to {}", api))
    }
  }
}

/// Collapse a service outcome into the single JSON shape callers receive.
fn into_response<T: Serialize>(outcome: Result<T, ErrorEnvelope>) -> Value {
  match outcome {
    Ok(value) => serde_json::to_value(value)
      .unwrap_or_else(|e| ErrorEnvelope::build("SERIALIZATION_ERROR", 500, e.to_string()).into_value()),
    Err(envelope) => envelope.into_value(),
  }
}
