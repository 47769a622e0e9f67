//! Document store backed by a JSON fixture file
//!
//! The file is opened and parsed on every query, so each call holds its "session"
//! only for as long as it runs and always sees the file's current contents.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::memory::Collections;
use super::source::{DocumentSource, FetchError};
use super::ResultSet;

/// Reads `{"users": [...], "health_records": [...]}` from disk per query
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    /// Path of the fixture file
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the collections from the fixture file
    async fn load(&self) -> Result<Collections, FetchError> {
        debug!(path = %self.path.display(), "opening document store");
        let content = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&content)?)
    }
}

#[async_trait]
impl DocumentSource for JsonFileSource {
    async fn average_weight_by_gender(&self) -> Result<ResultSet, FetchError> {
        Ok(self.load().await?.average_weight_by_gender())
    }

    async fn health_records_for_user(&self, user_id: &str) -> Result<ResultSet, FetchError> {
        Ok(self.load().await?.health_records_for_user(user_id))
    }
}
