//! In-process cache store
//!
//! Behaves like a single Redis instance: one key space holding plain values,
//! lists and hashes, with expiry evaluated against an injectable [`Clock`].
//! Expired keys are dropped lazily when next touched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::clock::{Clock, SystemClock};
use super::key::Ttl;
use super::store::{list_bounds, CacheConnection, CacheError, CacheStore};

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Stored {
    slot: Slot,
    expires_at: Option<DateTime<Utc>>,
}

impl Stored {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug)]
struct Shared {
    entries: RwLock<HashMap<String, Stored>>,
    clock: Arc<dyn Clock>,
    open_connections: AtomicUsize,
}

impl Shared {
    /// Removes `key` if it has expired, then returns a mutable view of the map
    async fn live_entries(&self, key: &str) -> tokio::sync::RwLockWriteGuard<'_, HashMap<String, Stored>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries
    }
}

/// In-memory cache store
///
/// Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryCacheStore {
    shared: Arc<Shared>,
}

impl MemoryCacheStore {
    /// Creates an empty store on wall-clock time
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store whose expiry follows `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                clock,
                open_connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of connections handed out and not yet dropped
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = self.shared.clock.now();
        self.shared
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError> {
        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Connection handle; dropping it releases the connection
struct MemoryConnection {
    shared: Arc<Shared>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheConnection for MemoryConnection {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.shared.live_entries(key).await;
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(None),
            Some(Slot::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&mut self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let expires_at = self.shared.clock.now() + ttl.as_chrono();
        let mut entries = self.shared.entries.write().await;
        entries.insert(
            key.to_string(),
            Stored {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), CacheError> {
        self.shared.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_append(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.shared.live_entries(key).await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Stored {
            slot: Slot::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(items) => {
                items.push(value.to_string());
                Ok(())
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn list_remove(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.shared.live_entries(key).await;
        let items = match entries.get_mut(key).map(|e| &mut e.slot) {
            None => return Ok(()),
            Some(Slot::List(items)) => items,
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        items.retain(|item| item != value);
        // Like Redis, an emptied list stops existing
        if items.is_empty() {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_range(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let entries = self.shared.live_entries(key).await;
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(Vec::new()),
            Some(Slot::List(items)) => Ok(list_bounds(items.len(), start, stop)
                .map(|(from, to)| items[from..=to].to_vec())
                .unwrap_or_default()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hash_set_all(
        &mut self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), CacheError> {
        if fields.is_empty() {
            return Err(CacheError::Write {
                key: key.to_string(),
                reason: "no fields to set".to_string(),
            });
        }
        let mut entries = self.shared.live_entries(key).await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Stored {
            slot: Slot::Hash(BTreeMap::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Hash(hash) => {
                hash.extend(fields.iter().cloned());
                Ok(())
            }
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hash_get_all(&mut self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let entries = self.shared.live_entries(key).await;
        match entries.get(key).map(|e| &e.slot) {
            None => Ok(HashMap::new()),
            Some(Slot::Hash(hash)) => Ok(hash.clone().into_iter().collect()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn exists(&mut self, key: &str) -> Result<bool, CacheError> {
        let entries = self.shared.live_entries(key).await;
        Ok(entries.contains_key(key))
    }
}
