//! The authoritative document store, as seen by the cache

use async_trait::async_trait;
use thiserror::Error;

use super::ResultSet;

/// Errors that can occur when querying the document store
///
/// These are always fatal to the current request: the cache never retries a
/// failed fetch and never stores anything for it.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The store could not be reached
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    /// Reading the store's backing file failed
    #[error("failed to read document store: {0}")]
    Io(#[from] std::io::Error),

    /// The store's contents could not be parsed
    #[error("failed to parse document store contents: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Query capability of the document store
///
/// Implementations open whatever session they need inside each call and release
/// it before returning.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Joins every user with their health records and averages `weight` per `gender`
    ///
    /// Users without health records still form a group. Each row of the result is
    /// `{gender, avgWeight}`; `avgWeight` is null when a group has no numeric weight.
    async fn average_weight_by_gender(&self) -> Result<ResultSet, FetchError>;

    /// Returns every health record owned by `user_id`, in store order
    async fn health_records_for_user(&self, user_id: &str) -> Result<ResultSet, FetchError>;
}
