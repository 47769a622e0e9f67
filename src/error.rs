//! Errors surfaced to callers of the read-through cache
//!
//! Cache-side failures never appear here: reads that fail count as misses and
//! writes that fail are logged. Callers see either a complete result or one of
//! these.

use thiserror::Error;

use crate::data::FetchError;

#[derive(Debug, Error)]
pub enum Error {
    /// Cache keys must contain at least one non-whitespace character
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),

    /// TTLs must be at least one second
    #[error("invalid ttl: must be a positive number of seconds")]
    InvalidTtl,

    /// The document store failed; nothing was cached
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
