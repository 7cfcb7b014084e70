//! Cache Module
//!
//! Provides an in-memory cache with LRU eviction, lazy TTL expiry and
//! single-flight fetching on misses.

mod entry;
mod fetch;
mod key;
mod list;
mod store;


// Re-export public types
pub use entry::{CacheEntry, Completion, EntryState};
pub use fetch::{FetchCompletion, Fetcher};
pub use key::{CacheKey, Lookup};
pub use list::{IntrusiveList, Iter, ListId, NodeArena, NodeKey};
pub use store::CacheStore;
