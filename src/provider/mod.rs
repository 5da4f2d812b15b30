//! Marketplace pricing providers.
//!
//! Two capabilities are consumed by the engine: identifier/search lookups for
//! batch discovery ([`MarketplaceProvider`]) and a single live quote call for
//! the read path ([`LivePriceLookup`]).

pub mod extract;
pub mod http;
pub mod latency;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::signal::select_signal;
use crate::types::{PriceSignal, SignalSource, Territory};

pub use http::HttpMarketplaceProvider;
pub use latency::{LatencyStats, LatencySnapshot, Percentiles, ProviderLatency, ProviderOp};

/// Result of a title + author search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub identifier: String,
    /// Present when the search response also carried a current price.
    pub price: Option<f64>,
}

/// Live offer summary for one title in one market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveQuote {
    pub buy_box: Option<f64>,
    pub lowest_new: Option<f64>,
}

impl LiveQuote {
    /// Best live signal in this quote: featured offer first, then lowest new.
    pub fn to_signal(&self, territory: Territory, observed_at: i64) -> PriceSignal {
        let currency = territory.currency();
        let candidates = [
            PriceSignal::new(
                self.buy_box.unwrap_or(0.0),
                currency,
                SignalSource::LiveBuyBox,
                Some(observed_at),
            ),
            PriceSignal::new(
                self.lowest_new.unwrap_or(0.0),
                currency,
                SignalSource::LiveLowestNew,
                Some(observed_at),
            ),
        ];
        select_signal(territory, &candidates)
    }
}

#[async_trait]
pub trait MarketplaceProvider: Send + Sync {
    /// Short name used in logs and discovery reports.
    fn name(&self) -> &str;

    /// Raw product payload for a marketplace identifier. Price may appear in
    /// any of several shapes; see [`extract`].
    async fn lookup_by_identifier(
        &self,
        identifier: &str,
        territory: Territory,
    ) -> Result<serde_json::Value, ProviderError>;

    /// `Ok(None)` when nothing matched.
    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
        territory: Territory,
    ) -> Result<Option<SearchHit>, ProviderError>;
}

#[async_trait]
pub trait LivePriceLookup: Send + Sync {
    async fn live_quote(
        &self,
        title: &str,
        author: &str,
        territory: Territory,
    ) -> Result<LiveQuote, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_prefers_buy_box() {
        let q = LiveQuote {
            buy_box: Some(12.0),
            lowest_new: Some(10.5),
        };
        let s = q.to_signal(Territory::Us, 42);
        assert_eq!(s.source(), SignalSource::LiveBuyBox);
        assert_eq!(s.observed_at(), Some(42));
    }

    #[test]
    fn quote_falls_back_to_lowest_new() {
        let q = LiveQuote {
            buy_box: Some(0.0),
            lowest_new: Some(10.5),
        };
        let s = q.to_signal(Territory::Uk, 42);
        assert_eq!(s.source(), SignalSource::LiveLowestNew);
        assert_eq!(s.value(), 10.5);
    }

    #[test]
    fn empty_quote_is_none() {
        assert!(LiveQuote::default().to_signal(Territory::Us, 1).is_none());
    }
}
