//! Cached health queries
//!
//! Binds the document store's two queries to their cache keys and lifetimes:
//!
//! | Query | Cache key | TTL | Layout |
//! |-------|-----------|-----|--------|
//! | Average weight by gender | `averageWeightByGender` | 1 hour | single entry |
//! | Health records of a user | `health_records:{userId}` | 60s | fan-out |

use std::sync::Arc;

use crate::cache::{CacheKey, CacheManager, Ttl};
use crate::data::{DocumentSource, ResultSet};
use crate::error::Result;

/// Cache key of the weight aggregation
pub const AVERAGE_WEIGHT_KEY: &str = "averageWeightByGender";

/// Prefix of per-user health record keys
pub const HEALTH_RECORDS_PREFIX: &str = "health_records";

/// Lifetime of cached aggregation results
pub const AGGREGATE_TTL: Ttl = Ttl::from_secs_const(3600);

/// Lifetime of cached per-user health record sets
pub const HEALTH_RECORDS_TTL: Ttl = Ttl::from_secs_const(60);

/// Key for the aggregation result
pub fn average_weight_key() -> CacheKey {
    CacheKey::from_static(AVERAGE_WEIGHT_KEY)
}

/// Key for one user's health records, `health_records:{user_id}`
pub fn health_records_key(user_id: &str) -> Result<CacheKey> {
    let user = CacheKey::new(user_id)?;
    Ok(CacheKey::from_static(HEALTH_RECORDS_PREFIX).child(user))
}

/// Health queries served through the cache
#[derive(Clone)]
pub struct HealthQueries {
    cache: CacheManager,
    source: Arc<dyn DocumentSource>,
    aggregate_ttl: Ttl,
    records_ttl: Ttl,
}

impl HealthQueries {
    pub fn new(cache: CacheManager, source: Arc<dyn DocumentSource>) -> Self {
        Self {
            cache,
            source,
            aggregate_ttl: AGGREGATE_TTL,
            records_ttl: HEALTH_RECORDS_TTL,
        }
    }

    /// Overrides the lifetime of cached aggregation results
    pub fn with_aggregate_ttl(mut self, ttl: Ttl) -> Self {
        self.aggregate_ttl = ttl;
        self
    }

    /// Overrides the lifetime of cached health record sets
    pub fn with_records_ttl(mut self, ttl: Ttl) -> Self {
        self.records_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Average weight per gender across all users' health records
    pub async fn average_weight_by_gender(&self) -> Result<ResultSet> {
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_compute(&average_weight_key(), self.aggregate_ttl, || async move {
                source.average_weight_by_gender().await
            })
            .await
    }

    /// All health records of `user_id`, in store order
    pub async fn health_records(&self, user_id: &str) -> Result<ResultSet> {
        let key = health_records_key(user_id)?;
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_compute_fan_out(&key, self.records_ttl, || async move {
                source.health_records_for_user(user_id).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCacheStore};
    use crate::data::{Collections, FetchError, MemoryDocumentStore, Record, Scalar};
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a store and counts queries
    struct CountingSource {
        inner: MemoryDocumentStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentSource for CountingSource {
        async fn average_weight_by_gender(&self) -> std::result::Result<ResultSet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.average_weight_by_gender().await
        }

        async fn health_records_for_user(
            &self,
            user_id: &str,
        ) -> std::result::Result<ResultSet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.health_records_for_user(user_id).await
        }
    }

    fn setup() -> (HealthQueries, Arc<CountingSource>, MemoryCacheStore) {
        let collections = Collections {
            users: vec![
                Record::from([("_id", "u1"), ("gender", "F")]),
                Record::from([("_id", "u2"), ("gender", "M")]),
            ],
            health_records: vec![
                Record::from([
                    ("_id", Scalar::from("h1")),
                    ("user_id", Scalar::from("u1")),
                    ("weight", Scalar::from(65.0)),
                ]),
                Record::from([
                    ("_id", Scalar::from("h2")),
                    ("user_id", Scalar::from("u2")),
                    ("weight", Scalar::from(79.0)),
                ]),
                Record::from([
                    ("_id", Scalar::from("h3")),
                    ("user_id", Scalar::from("u1")),
                    ("weight", Scalar::from(66.0)),
                ]),
            ],
        };
        let source = Arc::new(CountingSource {
            inner: MemoryDocumentStore::new(collections),
            calls: AtomicUsize::new(0),
        });
        let store = MemoryCacheStore::new();
        let queries = HealthQueries::new(CacheManager::new(Arc::new(store.clone())), source.clone());
        (queries, source, store)
    }

    #[test]
    fn test_keys() {
        assert_eq!(average_weight_key().as_str(), "averageWeightByGender");
        assert_eq!(
            health_records_key("u1").unwrap().as_str(),
            "health_records:u1"
        );
        assert!(matches!(health_records_key(""), Err(Error::InvalidKey(_))));
        assert!(matches!(health_records_key(" \t"), Err(Error::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_average_weight_is_cached() {
        let (queries, source, store) = setup();

        let first = queries.average_weight_by_gender().await.unwrap();
        let second = queries.average_weight_by_gender().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let mut conn = store.connect().await.unwrap();
        assert!(conn.get(AVERAGE_WEIGHT_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_health_records_fan_out_per_user() {
        let (queries, source, store) = setup();

        let u1 = queries.health_records("u1").await.unwrap();
        let u1_again = queries.health_records("u1").await.unwrap();
        let u2 = queries.health_records("u2").await.unwrap();

        assert_eq!(u1, u1_again);
        assert_eq!(u1.len(), 2);
        assert_eq!(u2.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let mut conn = store.connect().await.unwrap();
        let index = conn.list_range("health_records:u1", 0, -1).await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index[0].starts_with("health_records:u1:") && index[0].ends_with(":h1"));
        assert!(index[1].ends_with(":h3"));
    }

    #[tokio::test]
    async fn test_blank_user_id_is_rejected_without_fetching() {
        let (queries, source, _store) = setup();

        let result = queries.health_records(" ").await;

        assert!(matches!(result, Err(Error::InvalidKey(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_ttls() {
        assert_eq!(AGGREGATE_TTL.as_secs(), 3600);
        assert_eq!(HEALTH_RECORDS_TTL.as_secs(), 60);
    }
}
