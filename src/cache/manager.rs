//! Read-through cache manager
//!
//! Provides a `CacheManager` that looks a key up in a [`CacheStore`], and on a
//! miss calls the supplied fetch function, stores the result with a TTL, and
//! returns it. Cache failures never fail a request: unreadable or undecodable
//! entries count as misses, and failed writes are logged while the freshly
//! fetched value is still returned.
//!
//! Two storage layouts are supported:
//!
//! - **single entry**: the whole value serialized as one JSON blob under its key
//!   ([`CacheManager::get_or_compute`])
//! - **fan-out**: one hash per record, a list indexing the member keys in order,
//!   and a `{key}:cached` marker carrying the TTL ([`CacheManager::get_or_compute_fan_out`])
//!
//! Every fan-out write is a new generation: its members live under
//! `{key}:{generation}:{id}` and the marker names the generation it completes
//! along with its member count. A hit reads only that generation's members, so
//! records, fields and ordering from earlier writes never leak into it.
//! Superseded generations are pruned by the writer that replaced them.
//!
//! There is no invalidation: entries go stale for at most their TTL. Concurrent
//! misses on the same key each fetch and write; the last write wins.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::key::{CacheKey, Ttl};
use super::store::{CacheConnection, CacheError, CacheStore};
use crate::data::{FetchError, Record, ResultSet, Scalar};
use crate::error::Result;

/// Field identifying a record when deriving its member key
pub const DEFAULT_ID_FIELD: &str = "_id";

/// Suffix of the key whose presence marks a fan-out set as live
///
/// Members always carry a generation segment first, so no record id can
/// produce this key.
const MARKER_SUFFIX: &str = "cached";

/// Value stored under the marker key: the generation it makes live
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Marker {
    generation: String,
    members: usize,
}

/// Counters describing how lookups were served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Calls made to the fetch function
    pub fetches: u64,
    pub fetch_failures: u64,
    /// Misses whose result could not be stored
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    write_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serves values from a cache store, fetching and populating on miss
///
/// Cheap to clone; clones share the store and the statistics.
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    id_field: String,
    counters: Arc<Counters>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            id_field: DEFAULT_ID_FIELD.to_string(),
            counters: Arc::default(),
        }
    }

    /// Sets the record field used to derive fan-out member keys
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Snapshot of the lookup counters
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns the cached value for `key`, or fetches, stores and returns it
    ///
    /// # Arguments
    /// * `key` - The cache key to look up and populate
    /// * `ttl` - How long a freshly stored entry stays live
    /// * `fetch` - Produces the authoritative value; only called on a miss
    ///
    /// # Returns
    /// * `Ok(T)` from the cache on a hit, or from `fetch` on a miss
    /// * `Err(Error::Fetch)` if `fetch` fails; nothing is cached in that case
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, ttl: Ttl, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>>,
    {
        let mut conn = self.connect(key).await;

        if let Some(conn) = conn.as_deref_mut() {
            if let Some(value) = read_entry(conn, key).await {
                debug!(key = %key, "cache hit");
                Counters::bump(&self.counters.hits);
                return Ok(value);
            }
        }

        debug!(key = %key, "cache miss");
        Counters::bump(&self.counters.misses);
        let value = self.fetch(key, fetch).await?;

        let written = match conn.as_deref_mut() {
            Some(conn) => write_entry(conn, key, &value, ttl).await,
            None => Err(CacheError::Connection("no connection".to_string())),
        };
        if let Err(e) = written {
            warn!(key = %key, error = %e, "failed to populate cache; returning fetched value");
            Counters::bump(&self.counters.write_failures);
        }

        Ok(value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), storing each record separately
    ///
    /// The set counts as cached only while the `{key}:cached` marker exists. On a
    /// hit the index list at `key` is read and the members of the marker's
    /// generation are loaded in index order; repeated index entries are read
    /// once. If any member is missing or undecodable, or the index does not
    /// hold as many members as the marker records, the whole lookup is a miss.
    ///
    /// On a miss each record is written to `{key}:{generation}:{id}` (its id
    /// field, or its position when it has none) and appended to the index, then
    /// the marker is set with `ttl`. The marker is skipped if any earlier write
    /// failed, or if two records map to the same member key, so a partial or
    /// merged set is never served.
    pub async fn get_or_compute_fan_out<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        fetch: F,
    ) -> Result<ResultSet>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ResultSet, FetchError>>,
    {
        let mut conn = self.connect(key).await;

        if let Some(conn) = conn.as_deref_mut() {
            match read_fan_out(conn, key).await {
                Ok(Some(records)) => {
                    debug!(key = %key, records = records.len(), "cache hit");
                    Counters::bump(&self.counters.hits);
                    return Ok(records);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "unreadable cached set; treating as miss"),
            }
        }

        debug!(key = %key, "cache miss");
        Counters::bump(&self.counters.misses);
        let records = self.fetch(key, fetch).await?;

        let written = match conn.as_deref_mut() {
            Some(conn) => write_fan_out(conn, key, &records, ttl, &self.id_field).await,
            None => Err(CacheError::Connection("no connection".to_string())),
        };
        if let Err(e) = written {
            warn!(key = %key, error = %e, "failed to populate cache; returning fetched records");
            Counters::bump(&self.counters.write_failures);
        }

        Ok(records)
    }

    /// Opens a store connection, logging and swallowing failure
    async fn connect(&self, key: &CacheKey) -> Option<Box<dyn CacheConnection>> {
        match self.store.connect().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(key = %key, error = %e, "cache unavailable; bypassing");
                None
            }
        }
    }

    async fn fetch<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>>,
    {
        Counters::bump(&self.counters.fetches);
        fetch().await.map_err(|e| {
            error!(key = %key, error = %e, "fetch failed");
            Counters::bump(&self.counters.fetch_failures);
            e.into()
        })
    }
}

/// Reads and decodes a single-entry value; any failure reads as a miss
async fn read_entry<T: DeserializeOwned>(conn: &mut dyn CacheConnection, key: &CacheKey) -> Option<T> {
    let bytes = match conn.get(key.as_str()).await {
        Ok(bytes) => bytes?,
        Err(e) => {
            warn!(key = %key, error = %e, "cache read failed; treating as miss");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "undecodable cache entry; treating as miss");
            None
        }
    }
}

async fn write_entry<T: Serialize>(
    conn: &mut dyn CacheConnection,
    key: &CacheKey,
    value: &T,
    ttl: Ttl,
) -> std::result::Result<(), CacheError> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Write {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    conn.set(key.as_str(), &bytes, ttl).await
}

fn marker_key(key: &CacheKey) -> CacheKey {
    key.child(MARKER_SUFFIX)
}

/// Prefix shared by every member key of one generation
fn generation_prefix(key: &CacheKey, generation: &str) -> String {
    format!("{}:", key.child(generation))
}

async fn read_marker(
    conn: &mut dyn CacheConnection,
    key: &CacheKey,
) -> std::result::Result<Option<Marker>, CacheError> {
    let marker = marker_key(key);
    let Some(raw) = conn.get(marker.as_str()).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| CacheError::Decode {
            key: marker.to_string(),
            reason: e.to_string(),
        })
}

/// Returns `Ok(None)` when the marker is absent, whatever the index holds
async fn read_fan_out(
    conn: &mut dyn CacheConnection,
    key: &CacheKey,
) -> std::result::Result<Option<ResultSet>, CacheError> {
    let Some(marker) = read_marker(conn, key).await? else {
        return Ok(None);
    };

    let prefix = generation_prefix(key, &marker.generation);
    let mut seen = HashSet::new();
    let members: Vec<String> = conn
        .list_range(key.as_str(), 0, -1)
        .await?
        .into_iter()
        .filter(|member| member.starts_with(&prefix) && seen.insert(member.clone()))
        .collect();
    if members.len() != marker.members {
        return Err(CacheError::Decode {
            key: key.to_string(),
            reason: format!(
                "index holds {} of {} members of generation {}",
                members.len(),
                marker.members,
                marker.generation
            ),
        });
    }

    let mut records = Vec::with_capacity(members.len());
    for member in members {
        let fields = conn.hash_get_all(&member).await?;
        if fields.is_empty() {
            return Err(CacheError::Decode {
                key: member,
                reason: "member entry is missing".to_string(),
            });
        }
        records.push(decode_record(&member, fields)?);
    }
    Ok(Some(records))
}

async fn write_fan_out(
    conn: &mut dyn CacheConnection,
    key: &CacheKey,
    records: &[Record],
    ttl: Ttl,
    id_field: &str,
) -> std::result::Result<(), CacheError> {
    let generation = Uuid::new_v4().simple().to_string();
    let scope = key.child(&generation);

    // Derive every member key up front so a clash writes nothing
    let members: Vec<CacheKey> = records
        .iter()
        .enumerate()
        .map(|(position, record)| match record.get(id_field) {
            Some(id) if !id.is_null() => scope.child(id),
            _ => scope.child(position),
        })
        .collect();
    let mut distinct = HashSet::with_capacity(members.len());
    if let Some(clash) = members.iter().find(|member| !distinct.insert(member.as_str())) {
        return Err(CacheError::Write {
            key: clash.to_string(),
            reason: "more than one record maps to this member key".to_string(),
        });
    }

    for (member, record) in members.iter().zip(records) {
        conn.hash_set_all(member.as_str(), &encode_record(member, record)?)
            .await?;
        conn.list_append(key.as_str(), member.as_str()).await?;
    }

    let marker = Marker {
        generation,
        members: records.len(),
    };
    let encoded = serde_json::to_vec(&marker).map_err(|e| CacheError::Write {
        key: marker_key(key).to_string(),
        reason: e.to_string(),
    })?;
    conn.set(marker_key(key).as_str(), &encoded, ttl).await?;

    if let Err(e) = prune_superseded(conn, key, &marker.generation).await {
        warn!(key = %key, error = %e, "failed to prune superseded cache entries");
    }
    Ok(())
}

/// Drops index entries and member hashes outside `generation`
///
/// Only runs while the marker still names `generation`; a newer writer prunes
/// after itself. Pruning a generation that is still being written makes its
/// member count fall short, so its eventual marker reads as a miss.
async fn prune_superseded(
    conn: &mut dyn CacheConnection,
    key: &CacheKey,
    generation: &str,
) -> std::result::Result<(), CacheError> {
    match read_marker(conn, key).await? {
        Some(marker) if marker.generation == generation => {}
        _ => return Ok(()),
    }

    let keep = generation_prefix(key, generation);
    let stale: HashSet<String> = conn
        .list_range(key.as_str(), 0, -1)
        .await?
        .into_iter()
        .filter(|member| !member.starts_with(&keep))
        .collect();
    for member in stale {
        conn.list_remove(key.as_str(), &member).await?;
        conn.delete(&member).await?;
    }
    Ok(())
}

/// Encodes each field value as JSON so scalar types survive the hash
fn encode_record(
    member: &CacheKey,
    record: &Record,
) -> std::result::Result<Vec<(String, String)>, CacheError> {
    record
        .iter()
        .map(|(field, value)| {
            serde_json::to_string(value)
                .map(|encoded| (field.clone(), encoded))
                .map_err(|e| CacheError::Write {
                    key: member.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn decode_record(
    member: &str,
    fields: HashMap<String, String>,
) -> std::result::Result<Record, CacheError> {
    fields
        .into_iter()
        .map(|(field, raw)| {
            serde_json::from_str::<Scalar>(&raw)
                .map(|value| (field, value))
                .map_err(|e| CacheError::Decode {
                    key: member.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
