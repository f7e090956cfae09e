//! Shapes produced by the services.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which JWST catalog listing a feed request reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum FeedSource {
  /// Every JPEG in the catalog
  #[default]
  Jpg,
  /// Products with a given file suffix
  Suffix,
  /// Products of one observing program
  Program,
}

impl FeedSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      FeedSource::Jpg => "jpg",
      FeedSource::Suffix => "suffix",
      FeedSource::Program => "program",
    }
  }
}

/// Parameters of one feed page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
  pub source: FeedSource,
  pub suffix: String,
  pub program: String,
  /// Keep only items carrying this instrument (compared upper-cased)
  pub instrument: Option<String>,
  pub page: u32,
  pub per_page: usize,
}

impl Default for FeedQuery {
  fn default() -> Self {
    Self {
      source: FeedSource::Jpg,
      suffix: String::new(),
      program: String::new(),
      instrument: None,
      page: 1,
      per_page: 24,
    }
  }
}

/// One catalog record reduced to the fields the dashboard shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedFeedItem {
  pub url: String,
  pub observation_id: String,
  pub program: String,
  pub suffix: String,
  /// Upper-cased, in encounter order, duplicates kept
  pub instruments: Vec<String>,
  pub caption: String,
  pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
  /// Catalog path the items were read from
  pub source: String,
  pub count: usize,
  pub items: Vec<NormalizedFeedItem>,
}

/// Parameters of an astronomy events request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsQuery {
  /// Defaults to today
  pub from_date: Option<NaiveDate>,
  /// Defaults to today + 30 days
  pub to_date: Option<NaiveDate>,
  pub event_type: Option<String>,
  pub limit: usize,
}

impl Default for EventsQuery {
  fn default() -> Self {
    Self {
      from_date: None,
      to_date: None,
      event_type: None,
      limit: 10,
    }
  }
}

/// Successful events response.
///
/// `count` is the number of events upstream returned; `data` is capped at the
/// requested limit, so `count > data.len()` signals truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsPage {
  pub ok: bool,
  pub data: Vec<Value>,
  pub count: usize,
}
