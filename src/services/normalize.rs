//! JWST catalog normalization pipeline.
//!
//! Catalog records arrive in whatever shape the upstream felt like that day.
//! Each record goes through, in order:
//!
//! 1. skip anything that is not an object
//! 2. find an image URL (`location`, `url`, `thumbnail`, then a deep scan);
//!    no image means the record is dropped
//! 3. collect `details.instruments[].instrument`, upper-cased
//! 4. apply the instrument filter, unless the record lists no instruments
//! 5. build the [`NormalizedFeedItem`]
//!
//! Processing stops as soon as `per_page` items are collected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::upstream::document::{coerce_string, is_truthy, text_or_empty, Document};

use super::types::{FeedSource, NormalizedFeedItem};

/// Image file extension, optionally followed by a query string.
static IMAGE_URL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png)(\?.*)?$").expect("image pattern is valid"));

/// Fields checked for an image URL, in priority order.
const IMAGE_FIELDS: [&str; 3] = ["location", "url", "thumbnail"];

/// How deep the fallback scan descends into nested values.
const FALLBACK_SCAN_DEPTH: usize = 4;

const DEFAULT_PATH: &str = "all/type/jpg";

/// Resolve the catalog path for a feed request.
pub fn feed_path(source: FeedSource, suffix: &str, program: &str) -> String {
  match source {
    FeedSource::Suffix if !suffix.is_empty() => {
      format!("all/suffix/{}", suffix.trim_start_matches('/'))
    }
    FeedSource::Program if !program.is_empty() => {
      format!("program/id/{}", encode_path_segment(program))
    }
    _ => DEFAULT_PATH.to_string(),
  }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_path_segment(segment: &str) -> String {
  urlencoding::encode(segment).into_owned()
}

/// The record list inside a catalog response: `body`, else `data`, else the
/// response itself when it is an array.
pub fn catalog_records(response: &Value) -> &[Value] {
  ["body", "data"]
    .iter()
    .find_map(|name| response.field(name).and_then(Value::as_array))
    .or_else(|| response.as_array())
    .map(Vec::as_slice)
    .unwrap_or(&[])
}

/// Run the pipeline over `records`, collecting at most `per_page` items.
pub fn normalize_records(
  records: &[Value],
  instrument_filter: Option<&str>,
  per_page: usize,
) -> Vec<NormalizedFeedItem> {
  let filter = instrument_filter
    .map(str::trim)
    .filter(|f| !f.is_empty())
    .map(str::to_uppercase);

  let mut items = Vec::new();

  for record in records {
    if items.len() >= per_page {
      break;
    }
    if !record.is_object() {
      continue;
    }

    let Some(url) = extract_image_url(record) else {
      continue;
    };

    let instruments = extract_instruments(record);

    // No instrument metadata is not a mismatch
    if let Some(filter) = &filter {
      if !instruments.is_empty() && !instruments.contains(filter) {
        continue;
      }
    }

    items.push(build_item(record, url, instruments));
  }

  items
}

fn is_image_url(candidate: &str) -> bool {
  IMAGE_URL.is_match(candidate)
}

fn extract_image_url(record: &Value) -> Option<String> {
  IMAGE_FIELDS
    .iter()
    .filter_map(|name| record.str_field(name))
    .find(|candidate| is_image_url(candidate))
    .map(str::to_string)
    .or_else(|| pick_image_url(record, FALLBACK_SCAN_DEPTH))
}

/// Depth-first scan for the first string anywhere in `value` that looks like
/// an image URL.
fn pick_image_url(value: &Value, depth: usize) -> Option<String> {
  match value {
    Value::String(s) if is_image_url(s) => Some(s.clone()),
    Value::Object(map) if depth > 0 => map.values().find_map(|v| pick_image_url(v, depth - 1)),
    Value::Array(items) if depth > 0 => items.iter().find_map(|v| pick_image_url(v, depth - 1)),
    _ => None,
  }
}

fn extract_instruments(record: &Value) -> Vec<String> {
  record
    .at(&["details", "instruments"])
    .and_then(Value::as_array)
    .map(|entries| {
      entries
        .iter()
        .filter_map(|entry| entry.field("instrument"))
        .filter(|name| is_truthy(name))
        .map(|name| coerce_string(name).to_uppercase())
        .filter(|name| !name.is_empty())
        .collect()
    })
    .unwrap_or_default()
}

fn build_item(record: &Value, url: String, instruments: Vec<String>) -> NormalizedFeedItem {
  let link = record
    .first_field(&["location", "url"])
    .filter(|loc| is_truthy(loc))
    .map(coerce_string)
    .filter(|loc| !loc.is_empty())
    .unwrap_or_else(|| url.clone());

  let suffix = record
    .at(&["details", "suffix"])
    .or_else(|| record.field("suffix"));

  NormalizedFeedItem {
    observation_id: text_or_empty(record.first_field(&["observation_id", "observationId"])),
    program: text_or_empty(record.field("program")),
    suffix: text_or_empty(suffix),
    caption: build_caption(record, &instruments),
    url,
    instruments,
    link,
  }
}

/// `<obs> · P<program> · <suffix> · <INST/INST>`, optional parts omitted.
fn build_caption(record: &Value, instruments: &[String]) -> String {
  let observation = record
    .field("observation_id")
    .filter(|obs| is_truthy(obs))
    .or_else(|| record.field("id"));

  let program = record
    .field("program")
    .map(coerce_string)
    .unwrap_or_else(|| "-".to_string());

  let mut caption = format!("{} · P{}", text_or_empty(observation), program);

  if let Some(suffix) = record.at(&["details", "suffix"]).filter(|s| is_truthy(s)) {
    caption.push_str(" · ");
    caption.push_str(&coerce_string(suffix));
  }
  if !instruments.is_empty() {
    caption.push_str(" · ");
    caption.push_str(&instruments.join("/"));
  }

  caption.trim().to_string()
}
