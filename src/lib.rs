//! readthru library
//!
//! A read-through cache in front of a document store. The [`cache`] module holds
//! the cache manager and its stores, [`data`] the record model and document
//! sources, and [`queries`] the two cached health queries built from them.

pub mod cache;
pub mod cli;
pub mod data;
pub mod error;
pub mod logging;
pub mod queries;

pub use error::{Error, Result};
