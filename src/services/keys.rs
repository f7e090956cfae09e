//! Cache keys for upstream queries.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::cache::QueryKey;

use super::types::FeedSource;

/// Query key types for upstream calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamQueryKey {
  /// Latest ISS position
  LastPosition,
  /// ISS trend with a point limit
  Trend { limit: u32 },
  /// OSDR dataset catalog with arbitrary filter parameters
  Catalog { params: BTreeMap<String, String> },
  /// Astronomy events, keyed on the inputs as given (before defaulting)
  Events {
    from_date: Option<String>,
    to_date: Option<String>,
    event_type: Option<String>,
    limit: usize,
  },
  /// JWST image feed page
  Feed {
    source: FeedSource,
    suffix: String,
    program: String,
    instrument: Option<String>,
    page: u32,
    per_page: usize,
  },
}

impl QueryKey for UpstreamQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::LastPosition => "iss:last_position".to_string(),
      Self::Trend { limit } => format!("iss:trend:{}", limit),
      Self::Catalog { params } => {
        // BTreeMap serializes in key order, so insertion order is irrelevant
        let encoded = serde_json::to_string(params).unwrap_or_default();
        format!("osdr:datasets:{}", digest(&encoded))
      }
      Self::Events {
        from_date,
        to_date,
        event_type,
        limit,
      } => {
        let encoded = serde_json::json!([from_date, to_date, event_type, limit]).to_string();
        format!("astro:events:{}", digest(&encoded))
      }
      Self::Feed {
        source,
        suffix,
        program,
        instrument,
        page,
        per_page,
      } => format!(
        "jwst:feed:{}:{}:{}:{}:{}:{}",
        source.as_str(),
        digest(suffix),
        digest(program),
        instrument.as_deref().map(str::trim).unwrap_or("").to_uppercase(),
        page,
        per_page
      ),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::LastPosition => "last ISS position".to_string(),
      Self::Trend { limit } => format!("ISS trend ({} points)", limit),
      Self::Catalog { params } => {
        if params.is_empty() {
          "OSDR datasets".to_string()
        } else {
          format!("OSDR datasets filtered by {} params", params.len())
        }
      }
      Self::Events { event_type, .. } => match event_type {
        Some(t) => format!("astronomy events of type {}", t),
        None => "astronomy events".to_string(),
      },
      Self::Feed { source, page, .. } => format!("JWST {} feed page {}", source.as_str(), page),
    }
  }
}

/// SHA256 hash for stable, fixed-length key parts.
fn digest(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}
