//! Generic caching layer for upstream responses.
//!
//! This module provides an upstream-agnostic memoization mechanism that:
//! - Stores opaque JSON values with a per-entry expiry
//! - Computes on miss and serves the stored value until it expires
//! - Runs at most one computation per key at a time, sharing its result
//! - Swaps storage backends (memory, SQLite, disabled) behind one trait

mod clock;
mod layer;
mod storage;
mod traits;

pub use clock::Clock;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use traits::QueryKey;

#[cfg(test)]
pub use clock::ManualClock;
#[cfg(test)]
pub use traits::CacheEntry;
