//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::{RequestKey, Response};

/// Trait for cache registry backends.
///
/// A registry holds any number of named caches (generations). Each cache is an
/// independent mapping from [`RequestKey`] to a stored [`Response`]. Single
/// entry writes are atomic; nothing else is shared between entries.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named cache if it does not exist yet.
  #[allow(dead_code)]
  fn open_cache(&self, cache_name: &str) -> Result<()>;

  /// Names of all existing caches, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a cache and all of its entries. Returns false if it did not exist.
  fn delete(&self, cache_name: &str) -> Result<bool>;

  /// Store a response, replacing any previous entry for the key.
  /// The cache is created on demand.
  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store a batch of responses in one transaction: either all entries land
  /// or none do.
  fn put_all(&self, cache_name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up a key in one cache.
  #[allow(dead_code)]
  fn match_in(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up a key across all caches, oldest cache first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Keys stored in one cache.
  fn entry_keys(&self, cache_name: &str) -> Result<Vec<RequestKey>>;
}

/// Session-scoped key/value storage (the page's `sessionStorage`).
pub trait SessionStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;
}

/// A response read back from a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// Generation the entry was found in
  pub cache_name: String,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from cache without waiting on the network
  Cache,
  /// Network unavailable, serving cached data
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
    };
    f.write_str(s)
  }
}
