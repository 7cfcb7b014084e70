//! Coalescing Cache - a bounded in-memory cache
//!
//! Provides LRU eviction, lazy TTL expiry and single-flight fetching: any
//! number of concurrent lookups for a missing key share one fetch.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheStore, FetchCompletion, Fetcher, Lookup};
pub use config::Config;
pub use error::{CacheError, ListError};
pub use tasks::{LocalScheduler, Scheduler, TaskQueue};
