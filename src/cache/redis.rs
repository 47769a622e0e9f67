//! Redis-backed cache store
//!
//! Requires the `redis` feature. Every [`CacheStore::connect`] opens a fresh
//! multiplexed connection which is closed when the returned handle is dropped.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use std::collections::HashMap;
use std::time::Duration;

use super::key::Ttl;
use super::store::{CacheConnection, CacheError, CacheStore};

/// Default time allowed for opening a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache store talking to a Redis server
#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    client: Client,
    connect_timeout: Duration,
}

impl RedisCacheStore {
    /// Creates a store for `url` (e.g. `redis://localhost:6379`)
    ///
    /// Only the URL is validated here; no connection is made until first use.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Connection("timed out".to_string()))?
        .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Box::new(RedisConnection { conn }))
    }
}

struct RedisConnection {
    conn: MultiplexedConnection,
}

fn read_error(key: &str, e: RedisError) -> CacheError {
    if e.kind() == ErrorKind::TypeError || e.code() == Some("WRONGTYPE") {
        return CacheError::WrongType(key.to_string());
    }
    CacheError::Read {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn write_error(key: &str, e: RedisError) -> CacheError {
    CacheError::Write {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl CacheConnection for RedisConnection {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.conn.get(key).await.map_err(|e| read_error(key, e))
    }

    async fn set(&mut self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        self.conn
            .set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| write_error(key, e))
    }

    async fn delete(&mut self, key: &str) -> Result<(), CacheError> {
        self.conn
            .del::<_, ()>(key)
            .await
            .map_err(|e| write_error(key, e))
    }

    async fn list_append(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        self.conn
            .rpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| write_error(key, e))
    }

    async fn list_remove(&mut self, key: &str, value: &str) -> Result<(), CacheError> {
        self.conn
            .lrem::<_, _, ()>(key, 0, value)
            .await
            .map_err(|e| write_error(key, e))
    }

    async fn list_range(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        self.conn
            .lrange(key, start, stop)
            .await
            .map_err(|e| read_error(key, e))
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
        self.conn
            .hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|e| write_error(key, e))
    }

    async fn hash_get_all(&mut self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.conn.hgetall(key).await.map_err(|e| read_error(key, e))
    }

    async fn exists(&mut self, key: &str) -> Result<bool, CacheError> {
        self.conn.exists(key).await.map_err(|e| read_error(key, e))
    }
}
