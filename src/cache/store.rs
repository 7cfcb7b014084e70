//! Cache Store Module
//!
//! Main cache engine combining a key index with an intrusive LRU list, lazy
//! TTL expiry and single-flight fetching.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::cache::entry::{CacheEntry, Completion};
use crate::cache::fetch::{CallState, FetchCompletion, Fetcher};
use crate::cache::key::CacheKey;
use crate::cache::list::{IntrusiveList, NodeArena, NodeKey};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{panic_message, Scheduler};

// == Store State ==
/// Mutable state shared between the store and its fetch completions.
///
/// The index owns every entry, pending or resolved; the list only orders
/// the resolved ones.
pub(crate) struct StoreState<V> {
    index: HashMap<String, NodeKey>,
    arena: NodeArena<CacheEntry<V>>,
    lru: IntrusiveList,
    capacity: usize,
    ttl: Option<Duration>,
    scheduler: Rc<dyn Scheduler>,
}

impl<V: Clone + 'static> StoreState<V> {
    /// Answers `completion` from the cache when possible.
    ///
    /// Hits are scheduled and joins are queued; on a miss (including an
    /// expired entry) the completion is handed back so a fetch can start.
    fn serve(&mut self, key: &str, completion: Completion<V>) -> Result<Option<Completion<V>>> {
        let Some(&node) = self.index.get(key) else {
            return Ok(Some(completion));
        };
        let Some(entry) = self.arena.get_mut(node) else {
            self.index.remove(key);
            return Ok(Some(completion));
        };

        let expired = entry.is_expired(self.ttl, Instant::now());
        let completion = match entry.join(completion) {
            Ok(waiters) => {
                trace!(key, waiters, "joined in-flight fetch");
                return Ok(None);
            }
            Err(completion) => completion,
        };
        let value = if expired { None } else { entry.value().cloned() };

        let Some(value) = value else {
            debug!(key, "entry expired");
            self.discard(key, node)?;
            return Ok(Some(completion));
        };

        // Recency moves before delivery; freshness is left alone.
        self.lru.remove(&mut self.arena, node)?;
        self.lru.insert_last(&mut self.arena, node)?;
        trace!(key, "cache hit");
        self.scheduler
            .schedule(Box::new(move || completion(Ok(value))));
        Ok(None)
    }

    /// Registers a pending entry so later lookups can join it.
    fn insert_pending(&mut self, key: &str, completion: Completion<V>) -> NodeKey {
        let node = self
            .arena
            .insert(CacheEntry::pending(key.to_string(), completion));
        self.index.insert(key.to_string(), node);
        node
    }

    // == Resolve ==
    /// Settles the pending entry at `node` and notifies its waiters.
    ///
    /// Results for entries that are no longer pending are ignored.
    pub(crate) fn resolve(&mut self, key: &str, node: NodeKey, outcome: Result<V>) -> Result<()> {
        let still_pending = self
            .arena
            .get(node)
            .is_some_and(CacheEntry::is_pending);
        if !still_pending {
            warn!(key, "ignoring result for a fetch that is no longer pending");
            return Ok(());
        }

        match outcome {
            Ok(value) => {
                self.make_room()?;
                let waiters = match self.arena.get_mut(node) {
                    Some(entry) => entry.resolve(value.clone(), Instant::now()),
                    None => Vec::new(),
                };
                self.lru.insert_last(&mut self.arena, node)?;
                debug!(key, waiters = waiters.len(), "fetch resolved");

                for waiter in waiters {
                    let value = value.clone();
                    self.scheduler.schedule(Box::new(move || waiter(Ok(value))));
                }
            }
            Err(err) => {
                // Failures are not cached; the next lookup fetches again.
                self.index.remove(key);
                let mut entry = self.arena.remove(node)?;
                let waiters = entry.take_waiters();
                warn!(key, error = %err, waiters = waiters.len(), "fetch failed");

                for waiter in waiters {
                    let err = err.clone();
                    self.scheduler.schedule(Box::new(move || waiter(Err(err))));
                }
            }
        }
        Ok(())
    }

    // == Make Room ==
    /// Evicts least recently used entries until one more fits.
    fn make_room(&mut self) -> Result<()> {
        while self.lru.len() >= self.capacity {
            let Some(oldest) = self.lru.remove_first(&mut self.arena) else {
                break;
            };
            let entry = self.arena.remove(oldest)?;
            self.index.remove(&entry.key);
            debug!(key = %entry.key, "evicted least recently used entry");
        }
        Ok(())
    }

    /// Drops a resolved entry from both the list and the index.
    fn discard(&mut self, key: &str, node: NodeKey) -> Result<()> {
        self.lru.remove(&mut self.arena, node)?;
        self.index.remove(key);
        self.arena.remove(node)?;
        Ok(())
    }
}

// == Cache Store ==
/// Bounded LRU cache with optional TTL and single-flight fetching.
///
/// `L` is the lookup handed to the fetcher; the cache indexes on its
/// [`CacheKey`]. Clones share the same underlying cache.
pub struct CacheStore<L, V: Clone + 'static> {
    state: Rc<RefCell<StoreState<V>>>,
    fetcher: Rc<dyn Fetcher<L, V>>,
}

impl<L, V: Clone + 'static> Clone for CacheStore<L, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<L, V> CacheStore<L, V>
where
    L: CacheKey + 'static,
    V: Clone + 'static,
{
    // == Constructor ==
    /// Creates a new CacheStore.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of resolved entries, must be non-zero
    /// * `ttl` - Entry lifetime; `None` or zero means entries never expire
    /// * `fetcher` - Invoked once per miss to produce the value
    /// * `scheduler` - Delivers every completion on a later turn
    pub fn new<F, S>(
        capacity: usize,
        ttl: Option<Duration>,
        fetcher: F,
        scheduler: S,
    ) -> Result<Self>
    where
        F: Fetcher<L, V> + 'static,
        S: Scheduler + 'static,
    {
        if capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity must be greater than zero".to_string(),
            ));
        }

        let state = StoreState {
            index: HashMap::new(),
            arena: NodeArena::with_capacity(capacity),
            lru: IntrusiveList::new(),
            capacity,
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
            scheduler: Rc::new(scheduler),
        };
        Ok(Self {
            state: Rc::new(RefCell::new(state)),
            fetcher: Rc::new(fetcher),
        })
    }

    /// Creates a CacheStore sized and timed from `config`.
    pub fn from_config<F, S>(config: &Config, fetcher: F, scheduler: S) -> Result<Self>
    where
        F: Fetcher<L, V> + 'static,
        S: Scheduler + 'static,
    {
        config.validate()?;
        Self::new(config.capacity, config.cache_ttl(), fetcher, scheduler)
    }

    // == Get ==
    /// Looks up `lookup`, fetching it on a miss.
    ///
    /// `completion` receives the value or the fetch error. It is always
    /// delivered through the scheduler, never before `get` returns.
    /// Concurrent lookups for a key that is being fetched join that fetch.
    ///
    /// The returned `Err` reports structural list misuse only.
    pub fn get<C>(&self, lookup: L, completion: C) -> Result<()>
    where
        C: FnOnce(Result<V>) + 'static,
    {
        let key = lookup.cache_key().to_string();
        let node = {
            let mut state = self.state.borrow_mut();
            let Some(completion) = state.serve(&key, Box::new(completion))? else {
                return Ok(());
            };
            debug!(key = %key, "cache miss, fetching");
            state.insert_pending(&key, completion)
        };

        // The borrow is released so the fetcher may complete synchronously
        // or call back into the cache.
        self.start_fetch(lookup, key, node)
    }

    // == Load ==
    /// Async form of [`get`](Self::get).
    ///
    /// Resolves to [`CacheError::Closed`] if the cache is dropped first.
    pub fn load(&self, lookup: L) -> impl Future<Output = Result<V>> {
        let key = lookup.cache_key().to_string();
        let (tx, rx) = oneshot::channel();
        let started = self.get(lookup, move |result| {
            let _ = tx.send(result);
        });

        async move {
            started?;
            rx.await.unwrap_or_else(|_| Err(CacheError::Closed { key }))
        }
    }

    fn start_fetch(&self, lookup: L, key: String, node: NodeKey) -> Result<()> {
        let call = Rc::new(Cell::new(CallState::InCall));
        let state = Rc::downgrade(&self.state);
        let done = FetchCompletion::new(state, key.clone(), node, call.clone());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.fetcher.fetch(lookup, done)));
        let dropped = call.replace(CallState::Returned) == CallState::DroppedInCall;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                // Settle the entry so the key is not stuck, then keep unwinding.
                let reason = anyhow::anyhow!("fetch panicked: {}", panic_message(&*payload));
                let failure = Err(CacheError::fetch(&key, reason));
                if let Err(err) = self.state.borrow_mut().resolve(&key, node, failure) {
                    error!(key = %key, error = %err, "failed to settle panicked fetch");
                }
                panic::resume_unwind(payload);
            }
        };

        let failure = match outcome {
            Err(err) => Some(CacheError::fetch(&key, err)),
            Ok(()) if dropped => Some(CacheError::Abandoned { key: key.clone() }),
            Ok(()) => None,
        };
        match failure {
            Some(err) => self.state.borrow_mut().resolve(&key, node, Err(err)),
            None => Ok(()),
        }
    }

    // == Remove ==
    /// Removes a resolved entry. Returns whether anything was removed.
    ///
    /// Pending entries are left alone so their waiters still get an answer.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        let Some(&node) = state.index.get(key) else {
            return Ok(false);
        };
        if state.arena.get(node).map_or(true, CacheEntry::is_pending) {
            trace!(key, "remove ignored for pending entry");
            return Ok(false);
        }

        state.discard(key, node)?;
        debug!(key, "entry removed");
        Ok(true)
    }
}

impl<L, V: Clone + 'static> CacheStore<L, V> {
    // == Size ==
    /// Number of resolved entries. Pending fetches are not counted.
    pub fn size(&self) -> usize {
        self.state.borrow().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of keys with a fetch in flight.
    pub fn pending(&self) -> usize {
        let state = self.state.borrow();
        state.index.len() - state.lru.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.state.borrow().ttl
    }

    /// Resolved keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.borrow();
        state
            .lru
            .iter(&state.arena)
            .map(|(_, entry)| entry.key.clone())
            .collect()
    }
}

impl<L, V: Clone + 'static> fmt::Debug for CacheStore<L, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("CacheStore");
        if let Ok(state) = self.state.try_borrow() {
            out.field("size", &state.lru.len())
                .field("pending", &(state.index.len() - state.lru.len()))
                .field("capacity", &state.capacity)
                .field("ttl", &state.ttl);
        }
        out.finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Lookup;
    use crate::tasks::TaskQueue;
    use std::collections::VecDeque;

    type Log = Rc<RefCell<Vec<(String, std::result::Result<String, String>)>>>;
    type Parked = Rc<RefCell<VecDeque<(String, FetchCompletion<String>)>>>;

    fn record(log: &Log, tag: &str) -> impl FnOnce(Result<String>) + 'static {
        let log = log.clone();
        let tag = tag.to_string();
        move |result| {
            log.borrow_mut()
                .push((tag, result.map_err(|err| err.to_string())));
        }
    }

    /// Cache whose fetcher answers synchronously with `<key>_value`.
    fn immediate_cache(
        capacity: usize,
        ttl: Option<Duration>,
    ) -> (CacheStore<String, String>, Rc<TaskQueue>, Rc<Cell<usize>>) {
        let queue = Rc::new(TaskQueue::new());
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let fetcher = move |key: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
            counter.set(counter.get() + 1);
            done.complete(Ok(format!("{key}_value")))?;
            Ok(())
        };
        let cache = CacheStore::new(capacity, ttl, fetcher, queue.clone()).unwrap();
        (cache, queue, calls)
    }

    /// Cache whose fetches wait until the test completes them.
    fn parked_cache(capacity: usize) -> (CacheStore<String, String>, Rc<TaskQueue>, Parked) {
        let queue = Rc::new(TaskQueue::new());
        let parked: Parked = Rc::new(RefCell::new(VecDeque::new()));
        let sink = parked.clone();
        let fetcher = move |key: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
            sink.borrow_mut().push_back((key, done));
            Ok(())
        };
        let cache = CacheStore::new(capacity, None, fetcher, queue.clone()).unwrap();
        (cache, queue, parked)
    }

    fn fill(cache: &CacheStore<String, String>, queue: &TaskQueue, keys: &[&str]) {
        for key in keys {
            cache.get(key.to_string(), |_| {}).unwrap();
        }
        queue.run_until_idle();
    }

    #[test]
    fn test_store_rejects_zero_capacity() {
        let queue = TaskQueue::new();
        let fetcher = |_: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
            done.complete(Ok(String::new()))?;
            Ok(())
        };
        let result = CacheStore::new(0, None, fetcher, queue);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_store_zero_ttl_never_expires() {
        let (cache, _, _) = immediate_cache(10, Some(Duration::ZERO));
        assert_eq!(cache.ttl(), None);
        assert_eq!(cache.capacity(), 10);
    }

    #[test]
    fn test_miss_fetches_and_delivers_later() {
        let (cache, queue, calls) = immediate_cache(10, None);
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();

        // The fetch answered synchronously, but delivery is still deferred.
        assert_eq!(calls.get(), 1);
        assert!(log.borrow().is_empty());
        assert_eq!(cache.size(), 1);

        queue.run_until_idle();
        assert_eq!(
            *log.borrow(),
            vec![("a".to_string(), Ok("foo_value".to_string()))]
        );
    }

    #[test]
    fn test_hit_is_served_without_fetch_and_deferred() {
        let (cache, queue, calls) = immediate_cache(10, None);
        let log = Log::default();
        fill(&cache, &queue, &["foo"]);

        cache.get("foo".to_string(), record(&log, "hit")).unwrap();
        assert!(log.borrow().is_empty(), "hit must not complete inside get");
        assert_eq!(queue.len(), 1);

        queue.run_until_idle();
        assert_eq!(calls.get(), 1);
        assert_eq!(log.borrow()[0].1, Ok("foo_value".to_string()));
    }

    #[test]
    fn test_concurrent_gets_share_one_fetch() {
        let (cache, queue, parked) = parked_cache(10);
        let log = Log::default();

        for tag in ["a", "b", "c", "d", "e"] {
            cache.get("foo".to_string(), record(&log, tag)).unwrap();
        }
        assert_eq!(parked.borrow().len(), 1);
        assert_eq!(cache.pending(), 1);
        assert_eq!(cache.size(), 0, "pending entries are not counted");

        let (key, done) = parked.borrow_mut().pop_front().unwrap();
        assert_eq!(key, "foo");
        done.complete(Ok("shared".to_string())).unwrap();
        assert!(log.borrow().is_empty());

        queue.run_until_idle();
        let tags: Vec<_> = log.borrow().iter().map(|(tag, _)| tag.clone()).collect();
        assert_eq!(tags, vec!["a", "b", "c", "d", "e"]);
        assert!(log
            .borrow()
            .iter()
            .all(|(_, result)| result == &Ok("shared".to_string())));
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn test_fetch_failure_reaches_every_waiter_and_is_not_cached() {
        let (cache, queue, parked) = parked_cache(10);
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();
        cache.get("foo".to_string(), record(&log, "b")).unwrap();

        let (_, done) = parked.borrow_mut().pop_front().unwrap();
        done.complete(Err(anyhow::anyhow!("backend down"))).unwrap();
        queue.run_until_idle();

        assert_eq!(log.borrow().len(), 2);
        for (_, result) in log.borrow().iter() {
            assert_eq!(
                result,
                &Err("fetch failed for `foo`: backend down".to_string())
            );
        }
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.pending(), 0);

        // The very next lookup starts a fresh fetch.
        cache.get("foo".to_string(), record(&log, "c")).unwrap();
        assert_eq!(parked.borrow().len(), 1);
    }

    #[test]
    fn test_synchronous_fetch_error_is_a_failure() {
        let queue = Rc::new(TaskQueue::new());
        let fetcher = |key: String, _done: FetchCompletion<String>| -> anyhow::Result<()> {
            anyhow::bail!("cannot fetch {key}")
        };
        let cache = CacheStore::new(4, None, fetcher, queue.clone()).unwrap();
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();
        assert!(log.borrow().is_empty());
        queue.run_until_idle();

        assert_eq!(
            log.borrow()[0].1,
            Err("fetch failed for `foo`: cannot fetch foo".to_string())
        );
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn test_dropped_completion_resolves_as_abandoned() {
        let (cache, queue, parked) = parked_cache(10);
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();
        let (_, done) = parked.borrow_mut().pop_front().unwrap();
        assert_eq!(done.key(), "foo");
        drop(done);
        queue.run_until_idle();

        assert_eq!(
            log.borrow()[0].1,
            Err("fetch for `foo` finished without a result".to_string())
        );
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn test_synchronous_error_wins_over_dropped_completion() {
        let queue = Rc::new(TaskQueue::new());
        let fetcher = |_: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
            drop(done);
            anyhow::bail!("bad lookup")
        };
        let cache = CacheStore::new(4, None, fetcher, queue.clone()).unwrap();
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();
        queue.run_until_idle();

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(
            log.borrow()[0].1,
            Err("fetch failed for `foo`: bad lookup".to_string())
        );
    }

    #[test]
    fn test_panicking_fetch_fails_waiters_and_allows_refetch() {
        let queue = Rc::new(TaskQueue::new());
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let fetcher = move |key: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                panic!("backend exploded");
            }
            done.complete(Ok(format!("{key}_value")))?;
            Ok(())
        };
        let cache = CacheStore::new(4, None, fetcher, queue.clone()).unwrap();
        let log = Log::default();

        let first = cache.clone();
        let waiter = record(&log, "first");
        let unwound = panic::catch_unwind(AssertUnwindSafe(move || {
            first.get("k".to_string(), waiter)
        }));
        assert!(unwound.is_err());
        assert_eq!(cache.pending(), 0);

        cache.get("k".to_string(), record(&log, "second")).unwrap();
        queue.run_until_idle();

        assert_eq!(calls.get(), 2);
        assert_eq!(
            *log.borrow(),
            vec![
                (
                    "first".to_string(),
                    Err("fetch failed for `k`: fetch panicked: backend exploded".to_string())
                ),
                ("second".to_string(), Ok("k_value".to_string())),
            ]
        );
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_late_completion_after_failure_is_ignored() {
        let queue = Rc::new(TaskQueue::new());
        let parked: Parked = Rc::new(RefCell::new(VecDeque::new()));
        let sink = parked.clone();
        let fetcher = move |key: String, done: FetchCompletion<String>| -> anyhow::Result<()> {
            sink.borrow_mut().push_back((key, done));
            anyhow::bail!("gave up early")
        };
        let cache = CacheStore::new(4, None, fetcher, queue.clone()).unwrap();
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();
        let (_, done) = parked.borrow_mut().pop_front().unwrap();
        done.complete(Ok("late".to_string())).unwrap();
        queue.run_until_idle();

        assert_eq!(log.borrow().len(), 1);
        assert!(log.borrow()[0].1.is_err());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_lru_eviction_drops_oldest() {
        let (cache, queue, calls) = immediate_cache(3, None);
        fill(&cache, &queue, &["k1", "k2", "k3", "k4"]);

        assert_eq!(cache.size(), 3);
        assert_eq!(cache.keys(), vec!["k2", "k3", "k4"]);

        // k1 was evicted, so it is fetched again.
        fill(&cache, &queue, &["k1"]);
        assert_eq!(calls.get(), 5);
        assert_eq!(cache.keys(), vec!["k3", "k4", "k1"]);
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let (cache, queue, calls) = immediate_cache(3, None);
        fill(&cache, &queue, &["k1", "k2", "k3"]);

        fill(&cache, &queue, &["k1"]);
        fill(&cache, &queue, &["k4"]);

        assert_eq!(calls.get(), 4);
        assert_eq!(cache.keys(), vec!["k3", "k1", "k4"]);
    }

    #[test]
    fn test_recency_updates_before_delivery() {
        let (cache, queue, _) = immediate_cache(2, None);
        fill(&cache, &queue, &["a", "b"]);

        cache.get("a".to_string(), |_| {}).unwrap();
        assert_eq!(cache.keys(), vec!["b", "a"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_resolved_entry() {
        let (cache, queue, calls) = immediate_cache(10, None);
        fill(&cache, &queue, &["foo", "bar"]);

        assert!(cache.remove("foo").unwrap());
        assert_eq!(cache.size(), 1);
        assert!(!cache.remove("foo").unwrap());
        assert!(!cache.remove("missing").unwrap());

        fill(&cache, &queue, &["foo"]);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_remove_pending_entry_is_noop() {
        let (cache, queue, parked) = parked_cache(10);
        let log = Log::default();

        cache.get("foo".to_string(), record(&log, "a")).unwrap();
        assert!(!cache.remove("foo").unwrap());
        assert_eq!(cache.pending(), 1);

        let (_, done) = parked.borrow_mut().pop_front().unwrap();
        done.complete(Ok("v".to_string())).unwrap();
        queue.run_until_idle();

        assert_eq!(log.borrow()[0].1, Ok("v".to_string()));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_panicking_waiter_does_not_block_others() {
        let (cache, queue, parked) = parked_cache(10);
        let log = Log::default();

        cache.get("foo".to_string(), |_| panic!("waiter exploded")).unwrap();
        cache.get("foo".to_string(), record(&log, "b")).unwrap();

        let (_, done) = parked.borrow_mut().pop_front().unwrap();
        done.complete(Ok("v".to_string())).unwrap();
        assert_eq!(queue.run_until_idle(), 2);

        assert_eq!(*log.borrow(), vec![("b".to_string(), Ok("v".to_string()))]);
    }

    #[test]
    fn test_failure_leaves_other_entries_untouched() {
        let (cache, queue, parked) = parked_cache(2);

        cache.get("a".to_string(), |_| {}).unwrap();
        cache.get("b".to_string(), |_| {}).unwrap();
        let (_, a) = parked.borrow_mut().pop_front().unwrap();
        let (_, b) = parked.borrow_mut().pop_front().unwrap();
        a.complete(Ok("a".to_string())).unwrap();
        b.complete(Err(anyhow::anyhow!("nope"))).unwrap();
        queue.run_until_idle();

        assert_eq!(cache.keys(), vec!["a"]);
        assert_eq!(cache.pending(), 0);
    }

    #[test]
    fn test_composite_lookup_indexes_on_key() {
        let queue = Rc::new(TaskQueue::new());
        let fetcher =
            |lookup: Lookup<String>, done: FetchCompletion<String>| -> anyhow::Result<()> {
                done.complete(Ok(format!("{}_value", lookup.context)))?;
                Ok(())
            };
        let cache = CacheStore::new(10, None, fetcher, queue.clone()).unwrap();
        let log = Log::default();

        cache
            .get(Lookup::new("foo", "bar".to_string()), record(&log, "first"))
            .unwrap();
        queue.run_until_idle();
        cache
            .get(Lookup::new("foo", "baz".to_string()), record(&log, "cached"))
            .unwrap();
        queue.run_until_idle();

        assert!(cache.remove("foo").unwrap());
        cache
            .get(Lookup::new("foo", "baz".to_string()), record(&log, "refetched"))
            .unwrap();
        queue.run_until_idle();

        let values: Vec<_> = log
            .borrow()
            .iter()
            .map(|(_, result)| result.clone().unwrap())
            .collect();
        assert_eq!(values, vec!["bar_value", "bar_value", "baz_value"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_triggers_refetch() {
        let (cache, queue, calls) = immediate_cache(10, Some(Duration::from_millis(3000)));
        fill(&cache, &queue, &["foo"]);

        tokio::time::advance(Duration::from_millis(2999)).await;
        fill(&cache, &queue, &["foo"]);
        assert_eq!(calls.get(), 1, "fresh entry is a hit");

        // The hit above refreshed recency, not age.
        tokio::time::advance(Duration::from_millis(1)).await;
        fill(&cache, &queue, &["foo"]);
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ttl_never_expires() {
        let (cache, queue, calls) = immediate_cache(10, None);
        fill(&cache, &queue, &["foo"]);

        tokio::time::advance(Duration::from_secs(86_400)).await;
        fill(&cache, &queue, &["foo"]);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_load_resolves_value() {
        let (cache, queue, _) = immediate_cache(10, None);

        let pending = cache.load("foo".to_string());
        queue.run_until_idle();
        assert_eq!(pending.await.unwrap(), "foo_value");
    }

    #[tokio::test]
    async fn test_load_reports_closed_when_cache_dropped() {
        let (cache, _queue, parked) = parked_cache(10);

        let pending = cache.load("foo".to_string());
        drop(cache);

        assert!(matches!(pending.await, Err(CacheError::Closed { key }) if key == "foo"));
        // The parked completion outlives the cache harmlessly.
        let (_, done) = parked.borrow_mut().pop_front().unwrap();
        assert!(done.complete(Ok("late".to_string())).is_ok());
    }
}
