//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A cached value together with the moment it stops being servable.
///
/// Entries are replaced wholesale on recomputation, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(key: impl Into<String>, value: Value, expires_at: DateTime<Utc>) -> Self {
    Self {
      key: key.into(),
      value,
      expires_at,
    }
  }

  /// An entry is live strictly before `expires_at`.
  pub fn is_live(&self, now: DateTime<Utc>) -> bool {
    now < self.expires_at
  }
}

/// Trait for request shapes that map onto a cache slot.
///
/// Two requests that should share an upstream result must produce the same
/// `cache_key`; any difference in a parameter that changes the upstream
/// response must produce a different one.
pub trait QueryKey {
  /// Stable storage key.
  fn cache_key(&self) -> String;

  /// Human readable description for logs.
  fn description(&self) -> String;
}
