//! Fetch collaborator contract
//!
//! The cache owner supplies a [`Fetcher`]. The cache calls it once per miss
//! with the caller's original lookup and a [`FetchCompletion`] handle that
//! reports the outcome back to every waiter for that key.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error, warn};

use crate::cache::list::NodeKey;
use crate::cache::store::StoreState;
use crate::error::{CacheError, Result};

// == Fetcher ==
/// Produces values on cache misses.
///
/// `fetch` must eventually report through `done`, typically from an
/// asynchronous task. Returning `Err` instead counts as an immediate fetch
/// failure.
pub trait Fetcher<L, V: Clone + 'static> {
    fn fetch(&self, lookup: L, done: FetchCompletion<V>) -> anyhow::Result<()>;
}

impl<L, V, F> Fetcher<L, V> for F
where
    V: Clone + 'static,
    F: Fn(L, FetchCompletion<V>) -> anyhow::Result<()>,
{
    fn fetch(&self, lookup: L, done: FetchCompletion<V>) -> anyhow::Result<()> {
        self(lookup, done)
    }
}

/// Whether the cache is still inside the synchronous `fetch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallState {
    InCall,
    DroppedInCall,
    Returned,
}

// == Fetch Completion ==
/// One-shot handle through which a fetch reports its result.
///
/// Consuming `self` in [`complete`](Self::complete) makes a second report
/// impossible. Dropping the handle without completing resolves the entry
/// with [`CacheError::Abandoned`], unless the drop happens inside the
/// `fetch` call and `fetch` then returns an error, which wins.
pub struct FetchCompletion<V: Clone + 'static> {
    state: Weak<RefCell<StoreState<V>>>,
    key: String,
    node: NodeKey,
    call: Rc<Cell<CallState>>,
    finished: bool,
}

impl<V: Clone + 'static> FetchCompletion<V> {
    pub(crate) fn new(
        state: Weak<RefCell<StoreState<V>>>,
        key: String,
        node: NodeKey,
        call: Rc<Cell<CallState>>,
    ) -> Self {
        Self {
            state,
            key,
            node,
            call,
            finished: false,
        }
    }

    /// The normalized key being fetched.
    pub fn key(&self) -> &str {
        &self.key
    }

    // == Complete ==
    /// Reports the fetch outcome to the cache.
    ///
    /// Waiters are notified through the cache's scheduler, never from
    /// within this call. The `Err` side is only structural list misuse.
    pub fn complete(mut self, result: anyhow::Result<V>) -> Result<()> {
        self.finished = true;
        let outcome = result.map_err(|err| CacheError::fetch(&self.key, err));
        self.deliver(outcome)
    }

    fn deliver(&self, outcome: Result<V>) -> Result<()> {
        let Some(state) = self.state.upgrade() else {
            debug!(key = %self.key, "cache dropped before fetch completed");
            return Ok(());
        };
        let mut state = state.borrow_mut();
        state.resolve(&self.key, self.node, outcome)
    }
}

impl<V: Clone + 'static> Drop for FetchCompletion<V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.call.get() == CallState::InCall {
            // Settled by the cache once `fetch` returns.
            self.call.set(CallState::DroppedInCall);
            return;
        }

        warn!(key = %self.key, "fetch completion dropped without a result");
        let abandoned = CacheError::Abandoned {
            key: self.key.clone(),
        };
        if let Err(err) = self.deliver(Err(abandoned)) {
            error!(key = %self.key, error = %err, "failed to resolve abandoned fetch");
        }
    }
}

impl<V: Clone + 'static> fmt::Debug for FetchCompletion<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCompletion")
            .field("key", &self.key)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}
