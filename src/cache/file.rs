//! Cache store persisting entries to disk
//!
//! Each key is stored as one JSON file with its expiry timestamp, in an
//! XDG-compliant cache directory (`~/.cache/readthru/` on Linux). Expired files
//! read as absent and are removed when next touched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::key::Ttl;
use super::store::{list_bounds, CacheConnection, CacheError, CacheStore};

/// Wrapper struct for a value stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// The stored value
    value: StoredValue,
    /// When the value was written
    cached_at: DateTime<Utc>,
    /// When the entry expires; lists and hashes never do
    expires_at: Option<DateTime<Utc>>,
}

/// The kinds of value a key can hold
///
/// UTF-8 payloads are kept as text so entries stay readable on disk.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
enum StoredValue {
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
}

/// Stores cache entries as JSON files in a directory
///
/// Clones share one write lock, so read-modify-write updates made through
/// the same store never lose each other's changes. Processes sharing a
/// directory are not coordinated.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Arc<Mutex<()>>,
}

impl FileCacheStore {
    /// Creates a store using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        Some(Self::with_dir(default_cache_dir()?))
    }

    /// Creates a store rooted at a custom directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            clock: Arc::new(SystemClock),
            write_lock: Arc::default(),
        }
    }

    /// Replaces the clock used to stamp and check expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// The XDG cache directory for this program, if one can be determined
pub fn default_cache_dir() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "readthru")?;
    Some(project_dirs.cache_dir().to_path_buf())
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError> {
        Ok(Box::new(FileConnection {
            cache_dir: self.cache_dir.clone(),
            clock: Arc::clone(&self.clock),
            write_lock: Arc::clone(&self.write_lock),
        }))
    }
}

struct FileConnection {
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Arc<Mutex<()>>,
}

impl FileConnection {
    /// Returns the path to the cache file for the given key
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are percent-escaped, so distinct keys
    /// always map to distinct files.
    fn cache_path(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        name.push_str(".json");
        self.cache_dir.join(name)
    }

    fn is_live(&self, entry: &CacheEntry) -> bool {
        entry.expires_at.map_or(true, |at| self.clock.now() < at)
    }

    /// Reads the entry for `key`, live or not
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let content = match tokio::fs::read_to_string(self.cache_path(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Read {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CacheError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Reads the live entry for `key`, removing it if it has expired
    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        match self.load(key).await? {
            Some(entry) if self.is_live(&entry) => Ok(Some(entry)),
            Some(_) => {
                self.purge_expired(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Removes `key` if it is still expired once the write lock is held
    async fn purge_expired(&self, key: &str) {
        let _guard = self.write_lock.lock().await;
        if let Ok(Some(entry)) = self.load(key).await {
            if !self.is_live(&entry) {
                // Another process may have removed it already
                let _ = tokio::fs::remove_file(self.cache_path(key)).await;
            }
        }
    }

    /// The live value for `key`; callers hold the write lock
    async fn load_live(&self, key: &str) -> Result<Option<StoredValue>, CacheError> {
        Ok(self
            .load(key)
            .await?
            .filter(|entry| self.is_live(entry))
            .map(|entry| entry.value))
    }

    /// Writes an entry, creating the cache directory if needed
    ///
    /// The file is written beside its final path and renamed into place, so
    /// readers see either the old entry or the new one.
    async fn write_entry(
        &self,
        key: &str,
        value: StoredValue,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let write_error = |reason: String| CacheError::Write {
            key: key.to_string(),
            reason,
        };

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| write_error(e.to_string()))?;

        let entry = CacheEntry {
            value,
            cached_at: self.clock.now(),
            expires_at,
        };
        let json = serde_json::to_string_pretty(&entry).map_err(|e| write_error(e.to_string()))?;

        let path = self.cache_path(key);
        let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| write_error(e.to_string()))?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(write_error(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheConnection for FileConnection {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.read_entry(key).await?.map(|e| e.value) {
            None => Ok(None),
            Some(StoredValue::Text(text)) => Ok(Some(text.into_bytes())),
            Some(StoredValue::Bytes(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&mut self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let stored = match std::str::from_utf8(value) {
            Ok(text) => StoredValue::Text(text.to_string()),
            Err(_) => StoredValue::Bytes(value.to_vec()),
        };
        let expires_at = self.clock.now() + ttl.as_chrono();
        let _guard = self.write_lock.lock().await;
        self.write_entry(key, stored, Some(expires_at)).await
    }

    async fn delete(&mut self, key: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.cache_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list_append(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut items = match self.load_live(key).await? {
            None => Vec::new(),
            Some(StoredValue::List(items)) => items,
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        items.push(value.to_string());
        self.write_entry(key, StoredValue::List(items), None).await
    }

    async fn list_remove(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut items = match self.load_live(key).await? {
            None => return Ok(()),
            Some(StoredValue::List(items)) => items,
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        let before = items.len();
        items.retain(|item| item != value);
        if items.len() == before {
            return Ok(());
        }
        if items.is_empty() {
            return tokio::fs::remove_file(self.cache_path(key))
                .await
                .map_err(|e| CacheError::Write {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
        }
        self.write_entry(key, StoredValue::List(items), None).await
    }

    async fn list_range(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        match self.read_entry(key).await?.map(|e| e.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(items)) => Ok(list_bounds(items.len(), start, stop)
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
        let _guard = self.write_lock.lock().await;
        let mut hash = match self.load_live(key).await? {
            None => BTreeMap::new(),
            Some(StoredValue::Hash(hash)) => hash,
            Some(_) => return Err(CacheError::WrongType(key.to_string())),
        };
        hash.extend(fields.iter().cloned());
        self.write_entry(key, StoredValue::Hash(hash), None).await
    }

    async fn hash_get_all(&mut self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        match self.read_entry(key).await?.map(|e| e.value) {
            None => Ok(HashMap::new()),
            Some(StoredValue::Hash(hash)) => Ok(hash.into_iter().collect()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn exists(&mut self, key: &str) -> Result<bool, CacheError> {
        Ok(self.read_entry(key).await?.is_some())
    }
}
