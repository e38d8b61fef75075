//! Response cache with per-entry TTL and request coalescing.
//!
//! Two maps, each behind a `std::sync::Mutex` that is only held for map
//! operations, never across an `.await`:
//!
//! - `entries`: completed answers with their creation time and TTL. An entry
//!   is servable iff `now < created_at + ttl`; expired entries are removed
//!   when a lookup finds them and by [`ResponseCache::purge_expired`]. An
//!   insertion-order index makes capacity eviction O(log n).
//! - `in_flight`: one `watch` channel per key currently being computed. The
//!   first caller for a key becomes the leader and runs `compute`; later
//!   callers subscribe and receive the leader's result, success or failure.
//!
//! If the leader's future is dropped (client disconnected, timeout upstream
//! of us), its slot is released and waiting callers race to become the new
//! leader. Failed computations are never stored.

use chrono::{DateTime, Utc};
use simguide_core::ProviderError;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::key::CacheKey;

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a live entry.
    Hit,
    /// This caller ran the computation.
    Computed,
    /// Another caller's in-flight computation supplied the value.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: String,
    pub outcome: CacheOutcome,
}

impl Lookup {
    /// True when this caller did not trigger the computation.
    pub fn is_cached(&self) -> bool {
        self.outcome != CacheOutcome::Computed
    }
}

/// Counters exposed on the stats endpoint.
///
/// Every lookup counts once: `hits` for answers read from storage, `misses`
/// for everything else. `coalesced` is the share of misses answered by
/// another caller's computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

struct CacheEntry {
    value: String,
    created_at: DateTime<Utc>,
    ttl: Duration,
    /// Position in [`EntryStore::order`]
    seq: u64,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return true;
        };
        match self.created_at.checked_add_signed(ttl) {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// Entries plus their insertion order, oldest first.
#[derive(Default)]
struct EntryStore {
    map: HashMap<CacheKey, CacheEntry>,
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
}

impl EntryStore {
    /// Insert or replace. A replaced entry moves to the back of the order.
    fn insert(&mut self, key: CacheKey, value: String, created_at: DateTime<Utc>, ttl: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        let entry = CacheEntry {
            value,
            created_at,
            ttl,
            seq,
        };
        if let Some(old) = self.map.insert(key, entry) {
            self.order.remove(&old.seq);
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(old) = self.map.remove(key) {
            self.order.remove(&old.seq);
        }
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        self.map.remove(&key);
        Some(key)
    }

    /// Drop expired entries; returns how many went.
    fn retain_live(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.map.len();
        let order = &mut self.order;
        self.map.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                order.remove(&entry.seq);
            }
            live
        });
        before - self.map.len()
    }
}

type FlightResult<E> = Option<Result<String, E>>;

struct Flight<E> {
    id: u64,
    rx: watch::Receiver<FlightResult<E>>,
}

enum Role<E> {
    Ready(String),
    Leader(FlightGuard<E>),
    Waiter(watch::Receiver<FlightResult<E>>),
}

/// Owns one in-flight slot. Dropping it without [`FlightGuard::finish`]
/// releases the slot and wakes waiters with no result.
struct FlightGuard<E> {
    in_flight: Arc<Mutex<HashMap<CacheKey, Flight<E>>>>,
    key: CacheKey,
    id: u64,
    tx: watch::Sender<FlightResult<E>>,
}

impl<E> FlightGuard<E> {
    fn finish(self, result: Result<String, E>) {
        self.tx.send_replace(Some(result));
    }
}

impl<E> Drop for FlightGuard<E> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(&self.key).is_some_and(|f| f.id == self.id) {
            in_flight.remove(&self.key);
        }
    }
}

/// Key → answer store with TTL expiry and at most one computation per key.
pub struct ResponseCache<E = ProviderError> {
    entries: Mutex<EntryStore>,
    in_flight: Arc<Mutex<HashMap<CacheKey, Flight<E>>>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    next_flight_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl<E> ResponseCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(EntryStore::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            clock,
            max_entries: max_entries.max(1),
            next_flight_id: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn with_system_clock(max_entries: usize) -> Self {
        Self::new(Arc::new(SystemClock), max_entries)
    }

    /// Live value for `key`. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let found = self.lookup(key);
        self.record(found.is_some());
        found
    }

    /// Store `value`, replacing any entry and restarting its TTL.
    pub fn set(&self, key: &CacheKey, value: impl Into<String>, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if !entries.map.contains_key(key) {
            while entries.map.len() >= self.max_entries {
                match entries.evict_oldest() {
                    Some(evicted) => trace!(key = %evicted.short(), "Evicted oldest entry"),
                    None => break,
                }
            }
        }

        entries.insert(key.clone(), value.into(), now, ttl);
        trace!(key = %key.short(), ttl_secs = ttl.as_secs(), "Cache SET");
    }

    /// Return the cached value or run `compute` once for all concurrent
    /// callers of the same key.
    ///
    /// A successful result is stored with `ttl`. A failure is handed to every
    /// caller waiting on this computation and nothing is stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Lookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let guard = loop {
            if let Some(value) = self.lookup(key) {
                debug!(key = %key.short(), "Cache HIT");
                return Ok(self.answered(value, CacheOutcome::Hit));
            }

            match self.join_or_lead(key) {
                // Stored between our lookup and taking the in-flight lock.
                Role::Ready(value) => return Ok(self.answered(value, CacheOutcome::Hit)),
                Role::Leader(guard) => break guard,
                Role::Waiter(rx) => {
                    debug!(key = %key.short(), "Cache MISS, joining in-flight computation");
                    match wait_for_leader(rx).await {
                        Some(Ok(value)) => {
                            return Ok(self.answered(value, CacheOutcome::Coalesced));
                        }
                        Some(Err(e)) => {
                            self.record(false);
                            return Err(e);
                        }
                        None => {
                            debug!(key = %key.short(), "In-flight computation abandoned, retrying");
                        }
                    }
                }
            }
        };

        debug!(key = %key.short(), "Cache MISS, computing");
        let result = compute().await;

        if let Ok(value) = &result {
            self.set(key, value.clone(), ttl);
        }
        guard.finish(result.clone());

        match result {
            Ok(value) => Ok(self.answered(value, CacheOutcome::Computed)),
            Err(e) => {
                self.record(false);
                Err(e)
            }
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain_live(now)
    }

    /// Stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            in_flight: self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Purge expired entries every `interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                }
            }
        })
    }

    fn lookup(&self, key: &CacheKey) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.map.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                trace!(key = %key.short(), "Evicted expired entry on read");
                None
            }
            None => None,
        }
    }

    /// Count a `get_or_compute` call by how it was answered.
    fn answered(&self, value: String, outcome: CacheOutcome) -> Lookup {
        self.record(outcome == CacheOutcome::Hit);
        if outcome == CacheOutcome::Coalesced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        Lookup { value, outcome }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Decide this caller's role under the in-flight lock.
    ///
    /// The entry map is re-checked while holding that lock: a leader stores
    /// its value before releasing its slot, so a caller that finds no slot
    /// here either sees the stored value or really is first.
    fn join_or_lead(&self, key: &CacheKey) -> Role<E> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(flight) = in_flight.get(key) {
            return Role::Waiter(flight.rx.clone());
        }

        if let Some(value) = self.lookup(key) {
            return Role::Ready(value);
        }

        let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), Flight { id, rx });

        Role::Leader(FlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            id,
            tx,
        })
    }
}

/// Wait for the leader's result. `None` means the leader went away.
async fn wait_for_leader<E: Clone>(
    mut rx: watch::Receiver<FlightResult<E>>,
) -> Option<Result<String, E>> {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return Some(result);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::key::KeyDeriver;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;

    type TestCache = ResponseCache<String>;

    fn key(text: &str) -> CacheKey {
        KeyDeriver::derive(text, None, None)
    }

    fn cache_with_clock() -> (TestCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (ResponseCache::new(clock.clone(), 100), clock)
    }

    #[test]
    fn set_then_get() {
        let (cache, _) = cache_with_clock();
        let k = key("mesh");
        assert_eq!(cache.get(&k), None);
        cache.set(&k, "answer", Duration::from_secs(60));
        assert_eq!(cache.get(&k).as_deref(), Some("answer"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn entry_expires_exactly_at_ttl() {
        let (cache, clock) = cache_with_clock();
        let k = key("mesh");
        let ttl = Duration::from_secs(600);
        cache.set(&k, "answer", ttl);

        clock.advance(ttl - Duration::from_millis(1));
        assert_eq!(cache.get(&k).as_deref(), Some("answer"));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get(&k), None);
        assert!(cache.is_empty(), "expired entry should be evicted on read");
    }

    #[test]
    fn set_overwrites_and_resets_ttl() {
        let (cache, clock) = cache_with_clock();
        let k = key("mesh");
        cache.set(&k, "old", Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        cache.set(&k, "new", Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get(&k).as_deref(), Some("new"));
    }

    #[test]
    fn purge_removes_only_expired() {
        let (cache, clock) = cache_with_clock();
        cache.set(&key("short"), "a", Duration::from_secs(5));
        cache.set(&key("long"), "b", Duration::from_secs(500));
        clock.advance(Duration::from_secs(6));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("long")).as_deref(), Some("b"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let clock = Arc::new(ManualClock::default());
        let cache: TestCache = ResponseCache::new(clock.clone(), 2);
        cache.set(&key("a"), "a", Duration::from_secs(60));
        clock.advance(Duration::from_secs(1));
        cache.set(&key("b"), "b", Duration::from_secs(60));
        clock.advance(Duration::from_secs(1));
        cache.set(&key("c"), "c", Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a")), None);
        assert!(cache.get(&key("c")).is_some());
    }

    #[test]
    fn overwrite_moves_entry_to_back_of_eviction_order() {
        let cache: TestCache = ResponseCache::new(Arc::new(ManualClock::default()), 2);
        cache.set(&key("a"), "a1", Duration::from_secs(60));
        cache.set(&key("b"), "b", Duration::from_secs(60));
        cache.set(&key("a"), "a2", Duration::from_secs(60));
        cache.set(&key("c"), "c", Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")).as_deref(), Some("a2"));
    }

    #[test]
    fn eviction_index_tracks_purges_and_expired_reads() {
        let clock = Arc::new(ManualClock::default());
        let cache: TestCache = ResponseCache::new(clock.clone(), 2);
        cache.set(&key("old"), "x", Duration::from_secs(1));
        cache.set(&key("keep"), "y", Duration::from_secs(60));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.get(&key("old")), None);
        cache.set(&key("new"), "z", Duration::from_secs(60));
        // A free slot was left by the expired read, so nothing live was evicted.
        assert_eq!(cache.get(&key("keep")).as_deref(), Some("y"));
        assert_eq!(cache.get(&key("new")).as_deref(), Some("z"));
    }

    #[tokio::test]
    async fn get_or_compute_caches_success() {
        let (cache, _) = cache_with_clock();
        let k = key("plan");
        let calls = AtomicUsize::new(0);

        for expected in [CacheOutcome::Computed, CacheOutcome::Hit] {
            let lookup = cache
                .get_or_compute(&k, Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("plan text".to_string())
                })
                .await
                .unwrap();
            assert_eq!(lookup.value, "plan text");
            assert_eq!(lookup.outcome, expected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_computation() {
        let (cache, _) = cache_with_clock();
        let k = key("slow");
        let calls = AtomicUsize::new(0);

        let callers = (0..8).map(|_| {
            cache.get_or_compute(&k, Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("shared".to_string())
            })
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().value == "shared"));
        let computed = results
            .iter()
            .filter(|r| r.as_ref().unwrap().outcome == CacheOutcome::Computed)
            .count();
        assert_eq!(computed, 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.coalesced), (0, 8, 7));
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn value_stored_before_in_flight_check_counts_as_hit() {
        let (cache, _) = cache_with_clock();
        let k = key("raced");
        cache.set(&k, "stored by another caller", Duration::from_secs(60));

        let Role::Ready(value) = cache.join_or_lead(&k) else {
            panic!("stored value must be picked up under the in-flight lock");
        };
        let lookup = cache.answered(value, CacheOutcome::Hit);

        assert!(lookup.is_cached());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 0));
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let (cache, _) = cache_with_clock();
        let k = key("doomed");
        let calls = AtomicUsize::new(0);

        let callers = (0..4).map(|_| {
            cache.get_or_compute(&k, Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<String, _>("upstream down".to_string())
            })
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap_err() == "upstream down"));
        assert!(cache.is_empty());

        // The next caller computes afresh.
        let retry = cache
            .get_or_compute(&k, Duration::from_secs(60), || async { Ok("back".to_string()) })
            .await
            .unwrap();
        assert_eq!(retry.outcome, CacheOutcome::Computed);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let cache: Arc<TestCache> = Arc::new(ResponseCache::with_system_clock(10));

        let stuck = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key("stuck"), Duration::from_secs(60), || {
                        std::future::pending::<Result<String, String>>()
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_compute(&key("free"), Duration::from_secs(60), || async {
                Ok("free".to_string())
            }),
        )
        .await
        .expect("unrelated key must not wait")
        .unwrap();
        assert_eq!(other.value, "free");

        stuck.abort();
    }

    #[tokio::test]
    async fn abandoned_leader_releases_key() {
        let cache: Arc<TestCache> = Arc::new(ResponseCache::with_system_clock(10));
        let k = key("abandon");

        let leader = {
            let (cache, k) = (cache.clone(), k.clone());
            tokio::spawn(async move {
                cache
                    .get_or_compute(&k, Duration::from_secs(60), || {
                        std::future::pending::<Result<String, String>>()
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(cache.stats().in_flight, 1);

        let waiter = {
            let (cache, k) = (cache.clone(), k.clone());
            tokio::spawn(async move {
                cache
                    .get_or_compute(&k, Duration::from_secs(60), || async {
                        Ok("second leader".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        leader.abort();
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.value, "second leader");
        assert_eq!(result.outcome, CacheOutcome::Computed);
        assert_eq!(cache.get(&k).as_deref(), Some("second leader"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_in_background() {
        let clock = Arc::new(ManualClock::default());
        let cache: Arc<TestCache> = Arc::new(ResponseCache::new(clock.clone(), 10));
        cache.set(&key("a"), "a", Duration::from_secs(1));
        let handle = cache.spawn_sweeper(Duration::from_secs(30));

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(cache.is_empty());
        handle.abort();
    }
}
