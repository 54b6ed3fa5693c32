//! Response cache shared across view instances.
//!
//! Entries are keyed by `(prefix, serialized QueryState)` and served while
//! younger than the stale time. Concurrent misses for the same key share one
//! network call. Invalidation is broadcast so mounted views can refetch.
//!
//! ## Thread Safety
//!
//! Uses `parking_lot` locks (never poison) that are only held for map
//! operations, never across an await. Readers get `Arc` snapshots.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vitrine_core::{FetchError, FetchResult, QueryState};

// =============================================================================
// Keys and Entries
// =============================================================================

/// Cache key: a view family prefix plus the canonical query serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub prefix: String,
    pub query: String,
}

impl CacheKey {
    pub fn new(prefix: impl Into<String>, query: &QueryState) -> Self {
        Self {
            prefix: prefix.into(),
            query: query.cache_key(),
        }
    }
}

/// What an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheTarget {
    /// Every entry under a prefix.
    Prefix(String),
    /// One exact entry.
    Key(CacheKey),
}

impl CacheTarget {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            CacheTarget::Prefix(prefix) => key.prefix == *prefix,
            CacheTarget::Key(target) => target == key,
        }
    }

    /// Whether views under `prefix` are affected.
    pub fn touches_prefix(&self, prefix: &str) -> bool {
        match self {
            CacheTarget::Prefix(p) => p == prefix,
            CacheTarget::Key(key) => key.prefix == prefix,
        }
    }
}

impl From<&str> for CacheTarget {
    fn from(prefix: &str) -> Self {
        CacheTarget::Prefix(prefix.to_string())
    }
}

impl From<String> for CacheTarget {
    fn from(prefix: String) -> Self {
        CacheTarget::Prefix(prefix)
    }
}

impl From<CacheKey> for CacheTarget {
    fn from(key: CacheKey) -> Self {
        CacheTarget::Key(key)
    }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Arc<FetchResult>,
    pub fetched_at: Instant,
    pub stale_time: Duration,
    invalidated: bool,
}

impl CacheEntry {
    /// Fresh entries are served without a network call.
    pub fn is_fresh(&self) -> bool {
        !self.invalidated && self.fetched_at.elapsed() < self.stale_time
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}

// =============================================================================
// In-flight Fetches
// =============================================================================

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<FetchResult>, FetchError>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
    /// Signal handed to the underlying fetch.
    signal: CancellationToken,
    /// Set by invalidation so a pre-mutation response is not stored.
    discarded: Arc<AtomicBool>,
    waiters: usize,
}

/// Keeps a shared fetch alive. The last waiter to leave cancels it.
struct Waiter {
    cache: Arc<ResponseCache>,
    key: CacheKey,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut inflight = self.cache.inflight.lock();
        let Some(entry) = inflight.get_mut(&self.key) else {
            return;
        };
        if entry.id != self.id {
            return;
        }
        entry.waiters -= 1;
        if entry.waiters == 0 {
            if let Some(entry) = inflight.remove(&self.key) {
                tracing::debug!("Abandoned shared fetch for {:?}", self.key.prefix);
                entry.signal.cancel();
            }
        }
    }
}

// =============================================================================
// ResponseCache
// =============================================================================

/// Keyed, stale-time based cache of fetch results.
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    inflight: Mutex<HashMap<CacheKey, InFlight>>,
    stale_time: Duration,
    next_id: AtomicU64,
    invalidations: broadcast::Sender<CacheTarget>,
}

impl ResponseCache {
    /// Create an empty cache. Tests construct their own isolated instances.
    pub fn new(stale_time: Duration) -> Self {
        let (invalidations, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            stale_time,
            next_id: AtomicU64::new(1),
            invalidations,
        }
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    /// Get a fresh result, or `None` if missing, stale or invalidated.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<FetchResult>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.data.clone())
    }

    /// Get the stored entry regardless of freshness.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.read().get(key).cloned()
    }

    /// Store a fresh result.
    pub fn set(&self, key: CacheKey, data: FetchResult) -> Arc<FetchResult> {
        let data = Arc::new(data);
        let entry = Arc::new(CacheEntry {
            data: data.clone(),
            fetched_at: Instant::now(),
            stale_time: self.stale_time,
            invalidated: false,
        });
        self.entries.write().insert(key, entry);
        data
    }

    /// Mark matching entries for refetch and notify mounted views.
    ///
    /// Matching in-flight fetches still resolve for their waiters but are
    /// not stored. Returns the number of entries marked.
    pub fn invalidate(&self, target: impl Into<CacheTarget>) -> usize {
        let target = target.into();

        let marked = {
            let mut entries = self.entries.write();
            let mut marked = 0;
            for (key, entry) in entries.iter_mut() {
                if target.matches(key) && !entry.invalidated {
                    let mut updated = (**entry).clone();
                    updated.invalidated = true;
                    *entry = Arc::new(updated);
                    marked += 1;
                }
            }
            marked
        };

        {
            let inflight = self.inflight.lock();
            for (key, entry) in inflight.iter() {
                if target.matches(key) {
                    entry.discarded.store(true, Ordering::Release);
                }
            }
        }

        tracing::debug!("Invalidated {} cache entries for {:?}", marked, target);
        let _ = self.invalidations.send(target);
        marked
    }

    /// Subscribe to invalidation broadcasts.
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<CacheTarget> {
        self.invalidations.subscribe()
    }

    /// Drop entries fetched more than `age` ago. Returns how many were removed.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.fetched_at.elapsed() < age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of distinct fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Run `start` for `key`, or join the fetch already running for it.
    ///
    /// `start` receives the signal for the underlying call; it is cancelled
    /// once every waiter has gone away. Successful results are stored unless
    /// the fetch was cancelled or invalidated meanwhile. Failures are never
    /// stored.
    pub async fn fetch_shared<F>(
        self: &Arc<Self>,
        key: CacheKey,
        start: F,
    ) -> Result<Arc<FetchResult>, FetchError>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<FetchResult, FetchError>>,
    {
        let (fetch, _waiter) = self.join_or_start(key, start);
        fetch.await
    }

    fn join_or_start<F>(self: &Arc<Self>, key: CacheKey, start: F) -> (SharedFetch, Waiter)
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<FetchResult, FetchError>>,
    {
        let mut inflight = self.inflight.lock();

        // A fetch started before an invalidation is not joined.
        if let Some(entry) = inflight
            .get_mut(&key)
            .filter(|entry| !entry.discarded.load(Ordering::Acquire))
        {
            entry.waiters += 1;
            tracing::debug!("Joining in-flight fetch ({} waiters)", entry.waiters);
            let waiter = Waiter {
                cache: self.clone(),
                key,
                id: entry.id,
            };
            return (entry.fetch.clone(), waiter);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let signal = CancellationToken::new();
        let discarded = Arc::new(AtomicBool::new(false));
        let request = start(signal.clone());

        let fetch = {
            let cache = self.clone();
            let key = key.clone();
            let signal = signal.clone();
            let discarded = discarded.clone();
            async move {
                let result = match AssertUnwindSafe(request).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Shared fetch for '{}' panicked", key.prefix);
                        Err(FetchError::network("fetch task aborted"))
                    }
                };
                cache.finish(&key, id);
                let data = result?;
                if signal.is_cancelled() || discarded.load(Ordering::Acquire) {
                    Ok(Arc::new(data))
                } else {
                    Ok(cache.set(key, data))
                }
            }
            .boxed()
            .shared()
        };

        inflight.insert(
            key.clone(),
            InFlight {
                id,
                fetch: fetch.clone(),
                signal,
                discarded,
                waiters: 1,
            },
        );
        (
            fetch,
            Waiter {
                cache: self.clone(),
                key,
                id,
            },
        )
    }

    fn finish(&self, key: &CacheKey, id: u64) {
        let mut inflight = self.inflight.lock();
        if inflight.get(key).is_some_and(|entry| entry.id == id) {
            inflight.remove(key);
        }
    }
}
