pub mod live_cache;
pub mod selector;

pub use live_cache::{
    CacheEntry, CacheKey, InMemoryPriceCache, LiveFetch, LiveFetchCache, NoopCache, PriceCache,
};
pub use selector::select_signal;
