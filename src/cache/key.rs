//! Lookup keys
//!
//! A lookup is whatever the caller hands to `get`; it is passed to the
//! fetcher untouched, while the cache indexes on its normalized string key.

use serde::{Deserialize, Serialize};

/// Extracts the string a lookup is indexed under.
pub trait CacheKey {
    fn cache_key(&self) -> &str;
}

impl CacheKey for String {
    fn cache_key(&self) -> &str {
        self
    }
}

impl CacheKey for &str {
    fn cache_key(&self) -> &str {
        self
    }
}

// == Lookup ==
/// A composite lookup: a stable key plus context for the fetcher.
///
/// Two lookups with the same `key` share one cache entry regardless of
/// their context; only the lookup that triggers the fetch is seen by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookup<C> {
    pub key: String,
    pub context: C,
}

impl<C> Lookup<C> {
    pub fn new(key: impl Into<String>, context: C) -> Self {
        Self {
            key: key.into(),
            context,
        }
    }
}

impl<C> CacheKey for Lookup<C> {
    fn cache_key(&self) -> &str {
        &self.key
    }
}
