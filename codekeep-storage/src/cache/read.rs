//! Lookup results carrying freshness metadata.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of a cache lookup.
///
/// Records whether the value was served from the local map after a matching
/// hash check, or rebuilt from a full fetch, and when it entered the map.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When this value was stored in the local map.
    cached_at: DateTime<Utc>,
    /// Remote hash the value was validated against.
    hash: String,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A fresh hit: the local entry matched the remote hash.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>, hash: impl Into<String>) -> Self {
        Self {
            value,
            cached_at,
            hash: hash.into(),
            was_cache_hit: true,
        }
    }

    /// A population: the value was rebuilt from a full fetch.
    pub fn from_store(value: T, cached_at: DateTime<Utc>, hash: impl Into<String>) -> Self {
        Self {
            value,
            cached_at,
            hash: hash.into(),
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Time since the value entered the local map.
    ///
    /// Informational only: a hit is always validated against the remote
    /// hash, whatever its age.
    pub fn staleness(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }
}
