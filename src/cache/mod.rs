//! Generational response cache for offline support.
//!
//! This module provides the cache registry and the two caching strategies:
//! - Named caches (generations) mapping request keys to response snapshots
//! - Network-first: live data preferred, cache as a resilience fallback
//! - Cache-first: instant answers from cache, refreshed in the background

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, SessionStore};
