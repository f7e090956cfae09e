//! Command line surface over the services.

use chrono::NaiveDate;
use clap::{Args, Subcommand};
use std::collections::BTreeMap;

use crate::services::{EventsQuery, FeedQuery, FeedSource};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Latest ISS position
  Last,
  /// Recent ISS trend points
  Trend {
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=1000))]
    limit: u32,
  },
  /// OSDR dataset catalog
  Osdr {
    /// Catalog filter as key=value, repeatable
    #[arg(long = "param", value_parser = parse_key_val)]
    params: Vec<(String, String)>,
  },
  /// Upcoming astronomy events
  Events(EventsArgs),
  /// Normalized JWST image feed
  Feed(FeedArgs),
  /// Probe the telemetry backend (uncached)
  Health,
  /// Position, trend, events and feed in one document
  Dashboard,
  /// Cache maintenance
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
  /// Delete expired entries
  Purge,
  /// Delete one entry by its cache key
  Forget { key: String },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct EventsArgs {
  /// First day, YYYY-MM-DD (default: today)
  #[arg(long = "from")]
  pub from_date: Option<NaiveDate>,
  /// Last day, YYYY-MM-DD (default: today + 30 days)
  #[arg(long = "to")]
  pub to_date: Option<NaiveDate>,
  #[arg(long = "type")]
  pub event_type: Option<String>,
  #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=100))]
  pub limit: u32,
}

impl From<EventsArgs> for EventsQuery {
  fn from(args: EventsArgs) -> Self {
    Self {
      from_date: args.from_date,
      to_date: args.to_date,
      event_type: args.event_type,
      limit: args.limit as usize,
    }
  }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FeedArgs {
  #[arg(long, value_enum, default_value_t = FeedSource::Jpg)]
  pub source: FeedSource,
  /// File suffix, used with --source suffix
  #[arg(long, default_value = "")]
  pub suffix: String,
  /// Program id, used with --source program
  #[arg(long, default_value = "")]
  pub program: String,
  /// NIRCam, MIRI, NIRISS, NIRSpec or FGS
  #[arg(long)]
  pub instrument: Option<String>,
  #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=1000))]
  pub page: u32,
  #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u32).range(1..=60))]
  pub per_page: u32,
}

impl From<FeedArgs> for FeedQuery {
  fn from(args: FeedArgs) -> Self {
    Self {
      source: args.source,
      suffix: args.suffix,
      program: args.program,
      instrument: args.instrument.filter(|i| !i.is_empty()),
      page: args.page,
      per_page: args.per_page as usize,
    }
  }
}

/// Collect `--param` pairs; a repeated key keeps its last value.
pub fn catalog_params(pairs: &[(String, String)]) -> BTreeMap<String, String> {
  pairs.iter().cloned().collect()
}

fn parse_key_val(input: &str) -> Result<(String, String), String> {
  let (key, value) = input
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", input))?;
  if key.is_empty() {
    return Err(format!("empty key in '{}'", input));
  }
  Ok((key.to_string(), value.to_string()))
}
