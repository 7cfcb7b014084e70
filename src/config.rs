//! Configuration Module
//!
//! Handles loading cache and demo settings from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Cache and demo driver configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of resolved entries the cache can hold
    pub capacity: usize,
    /// Entry lifetime in milliseconds, 0 = never expire
    pub ttl_ms: u64,
    /// Simulated fetch latency of the demo fetcher in milliseconds
    pub fetch_delay_ms: u64,
    /// Number of distinct keys the demo requests
    pub demo_keys: usize,
    /// Concurrent requests the demo issues per key
    pub demo_requests_per_key: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum resolved entries (default: 1000)
    /// - `CACHE_TTL_MS` - Entry lifetime in milliseconds (default: 0, never expire)
    /// - `FETCH_DELAY_MS` - Demo fetch latency (default: 1000)
    /// - `DEMO_KEYS` - Distinct keys requested by the demo (default: 20)
    /// - `DEMO_REQUESTS_PER_KEY` - Requests per key (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: env_or("CACHE_CAPACITY", defaults.capacity),
            ttl_ms: env_or("CACHE_TTL_MS", defaults.ttl_ms),
            fetch_delay_ms: env_or("FETCH_DELAY_MS", defaults.fetch_delay_ms),
            demo_keys: env_or("DEMO_KEYS", defaults.demo_keys),
            demo_requests_per_key: env_or("DEMO_REQUESTS_PER_KEY", defaults.demo_requests_per_key),
        }
    }

    /// Rejects settings the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "CACHE_CAPACITY must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Entry lifetime, or None when entries never expire.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_ms: 0,
            fetch_delay_ms: 1000,
            demo_keys: 20,
            demo_requests_per_key: 2,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
