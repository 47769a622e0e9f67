//! Key-value store interface the cache manager talks to
//!
//! A [`CacheStore`] hands out short-lived [`CacheConnection`]s. The manager opens
//! one per operation and drops it before returning, on every path.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use super::key::Ttl;

/// Errors reported by cache stores
///
/// None of these reach callers of the manager: read and decode failures are
/// treated as misses, write failures are logged.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Could not open a connection to the store
    #[error("cache connection failed: {0}")]
    Connection(String),

    /// Transport or protocol failure while reading
    #[error("cache read failed for '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Stored bytes are not in the expected shape
    #[error("cache entry '{key}' could not be decoded: {reason}")]
    Decode { key: String, reason: String },

    /// Populating the store failed
    #[error("cache write failed for '{key}': {reason}")]
    Write { key: String, reason: String },

    /// The key holds a different kind of value than the operation expects
    #[error("cache key '{0}' holds a value of the wrong type")]
    WrongType(String),
}

/// A store that can open connections
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Opens a connection; it is released when dropped
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError>;
}

/// One open connection to a key-value store
///
/// Plain values, lists and hashes live in one key space. Lists and hashes carry no
/// expiry of their own; only [`CacheConnection::set`] writes an expiring key.
#[async_trait]
pub trait CacheConnection: Send {
    /// Reads a plain value
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Writes a plain value that expires after `ttl`, replacing whatever the key held
    async fn set(&mut self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError>;

    /// Removes `key` whatever it holds; a missing key is not an error
    async fn delete(&mut self, key: &str) -> Result<(), CacheError>;

    /// Appends to the list at `key`, creating it if needed
    async fn list_append(&mut self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removes every occurrence of `value` from the list at `key`
    async fn list_remove(&mut self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Returns list elements from `start` to `stop` inclusive
    ///
    /// Negative indices count from the end, so `(0, -1)` is the whole list. A
    /// missing key reads as an empty list.
    async fn list_range(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError>;

    /// Sets every given field of the hash at `key`
    async fn hash_set_all(
        &mut self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), CacheError>;

    /// Returns all fields of the hash at `key`; a missing key reads as empty
    async fn hash_get_all(&mut self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Whether `key` currently holds a live value of any kind
    async fn exists(&mut self, key: &str) -> Result<bool, CacheError>;
}

/// Resolves Redis-style inclusive range bounds against a list of length `len`
///
/// Returns `None` when the range selects nothing.
pub(crate) fn list_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
