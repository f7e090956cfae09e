//! Cache storage trait and its backends.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CacheEntry;

/// Trait for cache storage backends.
///
/// Backends only store and return entries; expiry decisions and the
/// single-flight guard live in [`super::CacheLayer`].
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under `key`, live or not.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Delete an entry. Returns whether something was removed.
  fn remove(&self, key: &str) -> Result<bool>;

  /// Delete every entry whose expiry is at or before `now`.
  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }
}

/// In-process storage backed by a sharded concurrent map.
///
/// Reads of distinct keys do not contend with each other.
#[derive(Default)]
pub struct MemoryStorage {
  entries: DashMap<String, CacheEntry>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    Ok(self.entries.get(key).map(|entry| entry.value().clone()))
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    self.entries.insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool> {
    Ok(self.entries.remove(key).is_some())
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let before = self.entries.len();
    self.entries.retain(|_, entry| entry.is_live(now));
    Ok(before.saturating_sub(self.entries.len()))
  }
}

/// SQLite-based cache storage implementation.
///
/// Entries survive restarts; expiry is stored as epoch milliseconds.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`, or at the default
  /// location when `path` is `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("orbitcache").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
    ON cache_entries(expires_at);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, i64)> = conn
      .query_row(
        "SELECT value, expires_at FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    let Some((data, expires_ms)) = row else {
      return Ok(None);
    };

    let value = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize cache entry {}: {}", key, e))?;
    let expires_at = Utc
      .timestamp_millis_opt(expires_ms)
      .single()
      .ok_or_else(|| eyre!("Invalid expiry timestamp {} for {}", expires_ms, key))?;

    Ok(Some(CacheEntry::new(key, value, expires_at)))
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, value, expires_at) VALUES (?, ?, ?)",
        params![entry.key, data, entry.expires_at.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", entry.key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;
    Ok(removed > 0)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE expires_at <= ?",
        params![now.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to purge expired cache entries: {}", e))?;
    Ok(removed)
  }
}
