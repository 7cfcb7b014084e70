//! Cache Entry Module
//!
//! Defines the record kept for one key, either waiting on a fetch or
//! holding a resolved value.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CacheError;

/// Continuation invoked with the outcome of a lookup.
pub type Completion<V> = Box<dyn FnOnce(Result<V, CacheError>) + 'static>;

// == Entry State ==
/// Lifecycle of a cache entry.
pub enum EntryState<V> {
    /// A fetch is in flight; waiters are kept in join order
    Pending { waiters: Vec<Completion<V>> },
    /// The fetch succeeded
    Resolved { value: V, inserted_at: Instant },
}

impl<V> fmt::Debug for EntryState<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Pending { waiters } => f
                .debug_struct("Pending")
                .field("waiters", &waiters.len())
                .finish(),
            EntryState::Resolved { inserted_at, .. } => f
                .debug_struct("Resolved")
                .field("inserted_at", inserted_at)
                .finish_non_exhaustive(),
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry keyed by its normalized key.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The normalized key the entry is indexed under
    pub key: String,
    pub state: EntryState<V>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a pending entry whose first waiter is `completion`.
    pub fn pending(key: String, completion: Completion<V>) -> Self {
        Self {
            key,
            state: EntryState::Pending {
                waiters: vec![completion],
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending { .. })
    }

    /// Returns the resolved value, if any.
    pub fn value(&self) -> Option<&V> {
        match &self.state {
            EntryState::Resolved { value, .. } => Some(value),
            EntryState::Pending { .. } => None,
        }
    }

    // == Join ==
    /// Queues another waiter behind the in-flight fetch.
    ///
    /// Returns the completion back if the entry is no longer pending.
    pub fn join(&mut self, completion: Completion<V>) -> Result<usize, Completion<V>> {
        match &mut self.state {
            EntryState::Pending { waiters } => {
                waiters.push(completion);
                Ok(waiters.len())
            }
            EntryState::Resolved { .. } => Err(completion),
        }
    }

    // == Resolve ==
    /// Stores the fetched value and returns the waiters to notify.
    ///
    /// Resolving an already resolved entry replaces its value and returns
    /// no waiters.
    pub fn resolve(&mut self, value: V, now: Instant) -> Vec<Completion<V>> {
        let previous = std::mem::replace(
            &mut self.state,
            EntryState::Resolved {
                value,
                inserted_at: now,
            },
        );
        match previous {
            EntryState::Pending { waiters } => waiters,
            EntryState::Resolved { .. } => Vec::new(),
        }
    }

    /// Takes the waiters of a pending entry, leaving none behind.
    pub fn take_waiters(&mut self) -> Vec<Completion<V>> {
        match &mut self.state {
            EntryState::Pending { waiters } => std::mem::take(waiters),
            EntryState::Resolved { .. } => Vec::new(),
        }
    }

    // == Age ==
    /// Time since the value was stored, or None while pending.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        match self.state {
            EntryState::Resolved { inserted_at, .. } => {
                Some(now.saturating_duration_since(inserted_at))
            }
            EntryState::Pending { .. } => None,
        }
    }

    // == Is Expired ==
    /// Checks whether the resolved value has outlived `ttl`.
    ///
    /// An entry is expired once its age reaches the TTL. Pending entries and
    /// caches without a TTL never expire.
    pub fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        match (ttl, self.age(now)) {
            (Some(ttl), Some(age)) => age >= ttl,
            _ => false,
        }
    }
}
