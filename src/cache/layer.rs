//! Cache layer that orchestrates caching logic with upstream computation.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::storage::CacheStorage;
use super::traits::CacheEntry;

/// Result of the last computation run under a slot, type-erased so one
/// table serves every value type.
type Outcome = Box<dyn Any + Send + Sync>;
type Slot = Arc<Mutex<Option<Outcome>>>;

/// Cache layer with TTL expiry and a per-key single-flight guard.
///
/// Values are stored as JSON documents so that any storage backend can hold
/// them. Concurrent `remember` calls for the same key share one computation;
/// calls for different keys never wait on each other.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
  in_flight: Arc<DashMap<String, Slot>>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self::with_clock(storage, Arc::new(SystemClock))
  }

  pub fn with_clock(storage: Arc<dyn CacheStorage>, clock: Arc<dyn Clock>) -> Self {
    Self {
      storage,
      clock,
      in_flight: Arc::new(DashMap::new()),
    }
  }

  /// The clock this layer measures expiry against.
  pub fn clock(&self) -> Arc<dyn Clock> {
    Arc::clone(&self.clock)
  }

  /// Return the live value under `key`, or run `compute` and cache its result.
  ///
  /// 1. Live entry in storage - return it without calling `compute`
  /// 2. Otherwise take the key's guard; whoever holds it computes and
  ///    leaves the outcome in the slot
  /// 3. Callers queued on the same slot get that outcome, success or
  ///    failure, without computing again
  /// 4. A failed computation stores nothing, so the next caller that
  ///    arrives after the slot is released retries
  pub async fn remember<V, E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, E>
  where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
  {
    if let Some(value) = self.lookup(key) {
      debug!(key, "cache hit");
      return Ok(value);
    }

    let slot = InFlight::enter(&self.in_flight, key);
    let mut shared = slot.lock().await;

    // We waited behind a computation of the same key
    if let Some(outcome) = shared
      .as_ref()
      .and_then(|outcome| outcome.downcast_ref::<Result<V, E>>())
    {
      debug!(key, ok = outcome.is_ok(), "sharing in-flight result");
      return outcome.clone();
    }

    if let Some(value) = self.lookup(key) {
      debug!(key, "cache hit after wait");
      return Ok(value);
    }

    debug!(key, ttl_secs = ttl.as_secs(), "cache miss, computing");
    let result = compute().await;
    if let Ok(value) = &result {
      self.store(key, ttl, value);
    }
    *shared = Some(Box::new(result.clone()));
    result
  }

  /// Delete the entry under `key`.
  ///
  /// Waits for an in-flight computation of the same key to finish first, so
  /// a concurrent `remember` can never resurrect the deleted value.
  pub async fn forget(&self, key: &str) -> Result<bool> {
    let slot = InFlight::enter(&self.in_flight, key);
    let mut shared = slot.lock().await;
    // Callers queued behind us must not be handed the forgotten value
    *shared = None;
    self.storage.remove(key)
  }

  /// Drop every expired entry from storage.
  pub fn purge_expired(&self) -> Result<usize> {
    self.storage.purge_expired(self.clock.now())
  }

  fn lookup<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
    let entry = match self.storage.get(key) {
      Ok(Some(entry)) => entry,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, "Cache read failed, treating as miss: {}", e);
        return None;
      }
    };

    if !entry.is_live(self.clock.now()) {
      return None;
    }

    match serde_json::from_value(entry.value) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, "Cached value has unexpected shape, recomputing: {}", e);
        None
      }
    }
  }

  fn store<V: Serialize>(&self, key: &str, ttl: Duration, value: &V) {
    let value = match serde_json::to_value(value) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, "Failed to serialize value for cache: {}", e);
        return;
      }
    };

    let entry = CacheEntry::new(key, value, expiry(self.clock.now(), ttl));
    if let Err(e) = self.storage.put(&entry) {
      warn!(key, "Failed to store cache entry: {}", e);
    }
  }

  #[cfg(test)]
  fn in_flight_len(&self) -> usize {
    self.in_flight.len()
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(ttl)
    .ok()
    .and_then(|ttl| now.checked_add_signed(ttl))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Membership in the per-key guard table.
///
/// The table entry is dropped once the last interested caller leaves.
struct InFlight<'a> {
  table: &'a DashMap<String, Slot>,
  key: &'a str,
  slot: Slot,
}

impl<'a> InFlight<'a> {
  fn enter(table: &'a DashMap<String, Slot>, key: &'a str) -> Self {
    let slot = table
      .entry(key.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(None)))
      .clone();
    Self { table, key, slot }
  }

  async fn lock(&self) -> tokio::sync::MutexGuard<'_, Option<Outcome>> {
    self.slot.lock().await
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    // Clones only happen under the shard lock that remove_if holds, so a
    // count of two (table + us) means nobody else is waiting.
    self.table.remove_if(self.key, |_, slot| {
      Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::storage::{MemoryStorage, NoopStorage};
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicU32, Ordering};
  use tokio::sync::Notify;

  fn layer_with_clock() -> (CacheLayer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let layer = CacheLayer::with_clock(Arc::new(MemoryStorage::new()), clock.clone());
    (layer, clock)
  }

  async fn counted(layer: &CacheLayer, key: &str, counter: &AtomicU32) -> Result<u32, String> {
    layer
      .remember(key, Duration::from_secs(60), || async {
        Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) + 1)
      })
      .await
  }

  #[tokio::test]
  async fn test_second_call_within_ttl_is_cached() {
    let (layer, clock) = layer_with_clock();
    let counter = AtomicU32::new(0);

    assert_eq!(counted(&layer, "k", &counter).await, Ok(1));
    clock.advance(chrono::Duration::seconds(59));
    assert_eq!(counted(&layer, "k", &counter).await, Ok(1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_expired_entry_is_recomputed() {
    let (layer, clock) = layer_with_clock();
    let counter = AtomicU32::new(0);

    assert_eq!(counted(&layer, "k", &counter).await, Ok(1));
    clock.advance(chrono::Duration::seconds(60));
    assert_eq!(counted(&layer, "k", &counter).await, Ok(2));
  }

  #[tokio::test]
  async fn test_failed_compute_is_not_stored() {
    let (layer, _clock) = layer_with_clock();
    let counter = AtomicU32::new(0);

    let first: Result<u32, String> = layer
      .remember("k", Duration::from_secs(60), || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Err("upstream down".to_string())
      })
      .await;
    assert_eq!(first, Err("upstream down".to_string()));

    assert_eq!(counted(&layer, "k", &counter).await, Ok(2));
  }

  #[tokio::test]
  async fn test_concurrent_callers_share_one_computation() {
    let (layer, _clock) = layer_with_clock();
    let counter = Arc::new(AtomicU32::new(0));

    let calls = (0..16).map(|_| {
      let layer = layer.clone();
      let counter = counter.clone();
      tokio::spawn(async move {
        layer
          .remember("shared", Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) + 100)
          })
          .await
      })
    });

    let results = futures::future::join_all(calls).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap(), Ok(100));
    }
    assert_eq!(layer.in_flight_len(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_callers_share_one_failure() {
    let (layer, _clock) = layer_with_clock();
    let counter = Arc::new(AtomicU32::new(0));

    let calls = (0..10).map(|_| {
      let layer = layer.clone();
      let counter = counter.clone();
      tokio::spawn(async move {
        layer
          .remember("down", Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<u32, String>(format!("upstream down ({})", attempt))
          })
          .await
      })
    });

    let results = futures::future::join_all(calls).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap(), Err("upstream down (1)".to_string()));
    }
    assert_eq!(layer.in_flight_len(), 0);

    // Nothing was stored, so the next caller computes again
    assert_eq!(counted(&layer, "down", &counter).await, Ok(2));
  }

  #[tokio::test]
  async fn test_concurrent_callers_share_result_without_storage() {
    let layer = CacheLayer::new(Arc::new(NoopStorage));
    let counter = Arc::new(AtomicU32::new(0));

    let calls = (0..8).map(|_| {
      let layer = layer.clone();
      let counter = counter.clone();
      tokio::spawn(async move {
        layer
          .remember("k", Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) + 1)
          })
          .await
      })
    });

    for result in futures::future::join_all(calls).await {
      assert_eq!(result.unwrap(), Ok(1));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_slow_key_does_not_block_other_keys() {
    let (layer, _clock) = layer_with_clock();
    let release = Arc::new(Notify::new());

    let slow = {
      let layer = layer.clone();
      let release = release.clone();
      tokio::spawn(async move {
        layer
          .remember("slow", Duration::from_secs(60), || async move {
            release.notified().await;
            Ok::<_, String>("slow".to_string())
          })
          .await
      })
    };

    let fast = tokio::time::timeout(
      Duration::from_secs(1),
      layer.remember("fast", Duration::from_secs(60), || async {
        Ok::<_, String>("fast".to_string())
      }),
    )
    .await
    .expect("fast key must not wait on the slow one");
    assert_eq!(fast, Ok("fast".to_string()));

    release.notify_one();
    assert_eq!(slow.await.unwrap(), Ok("slow".to_string()));
  }

  #[tokio::test]
  async fn test_forget_forces_recompute() {
    let (layer, _clock) = layer_with_clock();
    let counter = AtomicU32::new(0);

    assert_eq!(counted(&layer, "k", &counter).await, Ok(1));
    assert!(layer.forget("k").await.unwrap());
    assert_eq!(counted(&layer, "k", &counter).await, Ok(2));
  }

  #[tokio::test]
  async fn test_purge_expired_drops_stale_entries() {
    let (layer, clock) = layer_with_clock();
    let counter = AtomicU32::new(0);

    counted(&layer, "a", &counter).await.unwrap();
    layer
      .remember("b", Duration::from_secs(3600), || async { Ok::<_, String>(0) })
      .await
      .unwrap();

    clock.advance(chrono::Duration::seconds(120));
    assert_eq!(layer.purge_expired().unwrap(), 1);
  }
}
