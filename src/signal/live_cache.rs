//! TTL-bounded cache in front of the live price lookup.
//!
//! Only successful lookups with a usable price are stored. Timeouts and
//! upstream failures return a `None` signal tagged [`FetchTag::Fallback`] and
//! leave the cache untouched, so the next call goes upstream again.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{LIVE_CACHE_TTL, LIVE_FETCH_TIMEOUT_MS, LIVE_FRESH_WINDOW};
use crate::error::ProviderError;
use crate::provider::{LivePriceLookup, ProviderLatency, ProviderOp};
use crate::types::{now_secs, FetchTag, PriceSignal, Territory};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    title: String,
    author: String,
    market: Territory,
}

impl CacheKey {
    /// Title and author are trimmed and lowercased so trivial spelling
    /// differences share an entry.
    pub fn new(title: &str, author: &str, market: Territory) -> Self {
        Self {
            title: title.trim().to_lowercase(),
            author: author.trim().to_lowercase(),
            market,
        }
    }

    pub fn market(&self) -> Territory {
        self.market
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub signal: PriceSignal,
    pub inserted_at: Instant,
}

/// Storage behind [`LiveFetchCache`]. Implementations must tolerate concurrent
/// readers and writers; concurrent writes to one key are last-writer-wins.
pub trait PriceCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    fn insert(&self, key: CacheKey, entry: CacheEntry);
    fn remove(&self, key: &CacheKey);
    /// Remove the entry only if it was inserted at or before `inserted_at`,
    /// checked and removed atomically. A newer entry written by a concurrent
    /// fetch survives.
    fn remove_if_older(&self, key: &CacheKey, inserted_at: Instant);
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local cache on a sharded concurrent map. Unbounded by count;
/// stale entries are dropped when next read.
#[derive(Default)]
pub struct InMemoryPriceCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl InMemoryPriceCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl PriceCache for InMemoryPriceCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    fn remove(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    fn remove_if_older(&self, key: &CacheKey, inserted_at: Instant) {
        self.entries.remove_if(key, |_, entry| entry.inserted_at <= inserted_at);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Stores nothing. Every fetch goes upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl PriceCache for NoopCache {
    fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
        None
    }

    fn insert(&self, _key: CacheKey, _entry: CacheEntry) {}

    fn remove(&self, _key: &CacheKey) {}

    fn remove_if_older(&self, _key: &CacheKey, _inserted_at: Instant) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveFetch {
    pub signal: PriceSignal,
    pub tag: FetchTag,
    /// True for fresh upstream results and cache hits younger than the fresh window.
    /// Display-only; correctness never depends on it.
    pub is_fresh: bool,
    /// Age of the cached entry, when served from cache.
    pub age_secs: Option<u64>,
}

pub struct LiveFetchCache {
    lookup: Arc<dyn LivePriceLookup>,
    cache: Arc<dyn PriceCache>,
    ttl: Duration,
    fresh_window: Duration,
    timeout: Duration,
    latency: Option<Arc<ProviderLatency>>,
}

impl LiveFetchCache {
    pub fn new(lookup: Arc<dyn LivePriceLookup>, cache: Arc<dyn PriceCache>) -> Self {
        Self {
            lookup,
            cache,
            ttl: LIVE_CACHE_TTL,
            fresh_window: LIVE_FRESH_WINDOW,
            timeout: Duration::from_millis(LIVE_FETCH_TIMEOUT_MS),
            latency: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration, fresh_window: Duration) -> Self {
        self.ttl = ttl;
        self.fresh_window = fresh_window.min(ttl);
        self
    }

    pub fn with_latency_stats(mut self, latency: Arc<ProviderLatency>) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn fetch(&self, title: &str, author: &str, market: Territory) -> LiveFetch {
        self.fetch_with_timeout(title, author, market, self.timeout).await
    }

    pub async fn fetch_with_timeout(
        &self,
        title: &str,
        author: &str,
        market: Territory,
        timeout: Duration,
    ) -> LiveFetch {
        let key = CacheKey::new(title, author, market);

        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.lookup.live_quote(title, author, market)).await {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
        };
        if let Some(latency) = &self.latency {
            latency.record(ProviderOp::Live, started.elapsed());
        }

        match result {
            Ok(quote) => {
                let signal = quote.to_signal(market, now_secs());
                if signal.is_none() {
                    debug!(%market, title, "live lookup returned no usable price");
                    return fallback(market);
                }
                self.cache.insert(
                    key,
                    CacheEntry {
                        signal: signal.clone(),
                        inserted_at: Instant::now(),
                    },
                );
                LiveFetch {
                    signal,
                    tag: FetchTag::Live,
                    is_fresh: true,
                    age_secs: None,
                }
            }
            Err(e) => {
                warn!(%market, title, author, "live lookup failed: {e}");
                fallback(market)
            }
        }
    }

    /// Drop one entry, e.g. after a price write-back for that title.
    pub fn invalidate(&self, key: &CacheKey) {
        self.cache.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn cached(&self, key: &CacheKey) -> Option<LiveFetch> {
        let entry = self.cache.get(key)?;
        let age = entry.inserted_at.elapsed();
        if age >= self.ttl {
            self.cache.remove_if_older(key, entry.inserted_at);
            return None;
        }
        Some(LiveFetch {
            signal: entry.signal.as_cached(),
            tag: FetchTag::Cached,
            is_fresh: age < self.fresh_window,
            age_secs: Some(age.as_secs()),
        })
    }
}

fn fallback(market: Territory) -> LiveFetch {
    LiveFetch {
        signal: PriceSignal::none(market.currency()),
        tag: FetchTag::Fallback,
        is_fresh: false,
        age_secs: None,
    }
}
