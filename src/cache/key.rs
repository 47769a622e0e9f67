//! Cache keys and entry lifetimes

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identifies one cacheable unit
///
/// Keys are derived deterministically from request parameters, so identical
/// requests land on the same entry. Segments are joined with `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key, rejecting empty or whitespace-only strings
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(Error::InvalidKey(key));
        }
        Ok(Self(key))
    }

    /// Creates a key from a crate constant
    ///
    /// # Panics
    /// If `key` is blank.
    pub(crate) fn from_static(key: &'static str) -> Self {
        assert!(!key.trim().is_empty(), "blank cache key constant");
        Self(key.to_string())
    }

    /// Derives `{self}:{segment}`
    pub fn child(&self, segment: impl fmt::Display) -> CacheKey {
        CacheKey(format!("{}:{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How long an entry stays live, in whole seconds (never zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ttl(NonZeroU64);

impl Ttl {
    /// Creates a TTL, rejecting zero
    pub fn from_secs(secs: u64) -> Result<Self> {
        NonZeroU64::new(secs).map(Ttl).ok_or(Error::InvalidTtl)
    }

    /// Compile-time constructor for known-positive constants
    pub const fn from_secs_const(secs: u64) -> Self {
        match NonZeroU64::new(secs) {
            Some(secs) => Ttl(secs),
            None => panic!("ttl must be positive"),
        }
    }

    pub fn as_secs(&self) -> u64 {
        self.0.get()
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0.get())
    }

    /// The TTL as a chrono duration, for computing expiry instants
    pub fn as_chrono(&self) -> chrono::Duration {
        // chrono panics past i64::MAX milliseconds
        let secs = i64::try_from(self.0.get()).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rejects_blank() {
        assert!(matches!(CacheKey::new(""), Err(Error::InvalidKey(_))));
        assert!(matches!(CacheKey::new("  \t"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_static_keys() {
        assert_eq!(CacheKey::from_static("averageWeightByGender").as_str(), "averageWeightByGender");
    }

    #[test]
    #[should_panic(expected = "blank cache key constant")]
    fn test_blank_static_key_panics() {
        CacheKey::from_static(" ");
    }

    #[test]
    fn test_child_keys_are_deterministic() {
        let parent = CacheKey::new("health_records:u1").unwrap();

        assert_eq!(parent.child("h7").as_str(), "health_records:u1:h7");
        assert_eq!(parent.child("h7"), parent.child("h7"));
        assert_eq!(parent.child(3).to_string(), "health_records:u1:3");
    }

    #[test]
    fn test_ttl_rejects_zero() {
        assert!(matches!(Ttl::from_secs(0), Err(Error::InvalidTtl)));
        assert_eq!(Ttl::from_secs(60).unwrap().as_secs(), 60);
    }

    #[test]
    fn test_ttl_conversions() {
        let ttl = Ttl::from_secs_const(3600);

        assert_eq!(ttl.as_duration(), Duration::from_secs(3600));
        assert_eq!(ttl.as_chrono(), chrono::Duration::hours(1));
        assert_eq!(ttl.to_string(), "3600s");
    }
}
