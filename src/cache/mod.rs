//! Cache module for serving query results through a key-value store
//!
//! This module provides a read-through cache manager over a pluggable
//! [`CacheStore`]. Entries expire after a fixed TTL; there is no eviction policy
//! and no invalidation beyond that. Stores are available in memory, on disk, and
//! (with the `redis` feature) on a Redis server.

mod clock;
mod file;
mod key;
mod manager;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file::{default_cache_dir, FileCacheStore};
pub use key::{CacheKey, Ttl};
pub use manager::{CacheManager, CacheStats, DEFAULT_ID_FIELD};
pub use memory::MemoryCacheStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisCacheStore, DEFAULT_CONNECT_TIMEOUT};
pub use store::{CacheConnection, CacheError, CacheStore};
