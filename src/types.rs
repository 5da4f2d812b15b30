use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Territory {
    Us,
    Uk,
}

impl Territory {
    pub fn currency(self) -> Currency {
        match self {
            Territory::Us => Currency::Usd,
            Territory::Uk => Currency::Gbp,
        }
    }
}

impl std::fmt::Display for Territory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Territory::Us => "us",
            Territory::Uk => "uk",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Territory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "us" | "usa" | "com" => Ok(Territory::Us),
            "uk" | "gb" | "co.uk" => Ok(Territory::Uk),
            other => Err(format!("unknown territory: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Gbp,
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Currency::Usd => write!(f, "USD"),
            Currency::Gbp => write!(f, "GBP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentMethod {
    /// Marketplace-fulfilled: referral fee plus a fixed per-unit fee.
    Fba,
    /// Merchant-fulfilled: referral fee only.
    Fbm,
}

impl std::fmt::Display for FulfillmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FulfillmentMethod::Fba => write!(f, "fba"),
            FulfillmentMethod::Fbm => write!(f, "fbm"),
        }
    }
}

impl FromStr for FulfillmentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fba" => Ok(FulfillmentMethod::Fba),
            "fbm" => Ok(FulfillmentMethod::Fbm),
            other => Err(format!("unknown fulfillment method: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    /// Market this item is listed on. Determines currency and which identifier is used.
    pub territory: Territory,
    /// Wholesale acquisition cost. Never negative.
    pub wholesale_cost: f64,
    /// Publisher's list price, informational only.
    pub publisher_price: Option<f64>,
    pub identifier_us: Option<String>,
    pub identifier_uk: Option<String>,
    /// Last accepted marketplace price from batch discovery.
    pub stored_price: Option<f64>,
    /// Unix seconds of the last accepted price.
    pub checked_at: Option<i64>,
}

impl CatalogItem {
    pub fn currency(&self) -> Currency {
        self.territory.currency()
    }

    pub fn identifier_for(&self, territory: Territory) -> Option<&str> {
        let id = match territory {
            Territory::Us => self.identifier_us.as_deref(),
            Territory::Uk => self.identifier_uk.as_deref(),
        };
        id.map(str::trim).filter(|s| !s.is_empty())
    }

    /// Stored reference signal for `market`. Only the item's own territory carries one.
    pub fn stored_signal(&self, market: Territory) -> PriceSignal {
        if market != self.territory {
            return PriceSignal::none(market.currency());
        }
        match self.stored_price {
            Some(price) => PriceSignal::new(
                price,
                self.currency(),
                SignalSource::StoredReference,
                self.checked_at,
            ),
            None => PriceSignal::none(self.currency()),
        }
    }
}

// ---------------------------------------------------------------------------
// Price signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Current featured-offer price from a live lookup.
    LiveBuyBox,
    /// Lowest new offer from a live lookup, used when no featured offer exists.
    LiveLowestNew,
    /// A live signal served from the process-local cache.
    CachedLive,
    /// Price persisted on the catalog item by batch discovery.
    StoredReference,
    None,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalSource::LiveBuyBox => "live_buy_box",
            SignalSource::LiveLowestNew => "live_lowest_new",
            SignalSource::CachedLive => "cached_live",
            SignalSource::StoredReference => "stored_reference",
            SignalSource::None => "none",
        };
        write!(f, "{s}")
    }
}

/// A price annotated with its provenance. `value == 0` exactly when `source == None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSignal {
    value: f64,
    currency: Currency,
    source: SignalSource,
    observed_at: Option<i64>,
}

impl PriceSignal {
    /// Builds a signal, collapsing anything without a usable positive value to `none`.
    pub fn new(
        value: f64,
        currency: Currency,
        source: SignalSource,
        observed_at: Option<i64>,
    ) -> Self {
        if source == SignalSource::None || !value.is_finite() || value <= 0.0 {
            return Self::none(currency);
        }
        Self {
            value,
            currency,
            source,
            observed_at,
        }
    }

    pub fn none(currency: Currency) -> Self {
        Self {
            value: 0.0,
            currency,
            source: SignalSource::None,
            observed_at: None,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn source(&self) -> SignalSource {
        self.source
    }

    pub fn observed_at(&self) -> Option<i64> {
        self.observed_at
    }

    pub fn is_none(&self) -> bool {
        self.source == SignalSource::None
    }

    /// Same observation, re-labelled as served from cache.
    pub fn as_cached(&self) -> Self {
        Self::new(self.value, self.currency, SignalSource::CachedLive, self.observed_at)
    }
}

/// How a live fetch was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTag {
    Live,
    Cached,
    /// Upstream timed out or failed; the signal is `None`.
    Fallback,
}

impl std::fmt::Display for FetchTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchTag::Live => write!(f, "live"),
            FetchTag::Cached => write!(f, "cached"),
            FetchTag::Fallback => write!(f, "fallback"),
        }
    }
}

// ---------------------------------------------------------------------------
// Profitability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Competitiveness {
    /// target <= 95% of reference
    HighlyCompetitive,
    /// target <= 100% of reference
    Competitive,
    /// target <= 110% of reference
    SlightlyAbove,
    /// target > 110% of reference
    AboveMarket,
    /// No reference price to compare against.
    Unknown,
}

impl Competitiveness {
    pub fn from_ratio(ratio: f64) -> Self {
        use crate::config::competitiveness_thresholds::*;
        if !ratio.is_finite() {
            Competitiveness::Unknown
        } else if ratio <= HIGHLY_COMPETITIVE_MAX {
            Competitiveness::HighlyCompetitive
        } else if ratio <= COMPETITIVE_MAX {
            Competitiveness::Competitive
        } else if ratio <= SLIGHTLY_ABOVE_MAX {
            Competitiveness::SlightlyAbove
        } else {
            Competitiveness::AboveMarket
        }
    }
}

impl std::fmt::Display for Competitiveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Competitiveness::HighlyCompetitive => "highly_competitive",
            Competitiveness::Competitive => "competitive",
            Competitiveness::SlightlyAbove => "slightly_above",
            Competitiveness::AboveMarket => "above_market",
            Competitiveness::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Derived profitability snapshot. Recomputed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiResult {
    pub acquisition_cost: f64,
    pub target_price: f64,
    /// 0 when no reference price is available.
    pub reference_price: f64,
    pub fee: f64,
    pub net_profit: f64,
    /// None when acquisition cost is zero.
    pub roi_percent: Option<f64>,
    pub competitiveness: Competitiveness,
    pub territory: Territory,
    pub method: FulfillmentMethod,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Layer {
    /// Direct lookup by stored identifier.
    Direct = 1,
    /// Alternate endpoint with multi-shape payload parsing.
    Alternate = 2,
    /// Title + author search.
    Search = 3,
}

impl Layer {
    pub fn number(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    Priced,
    IdentifierFoundNoPrice,
    Skipped,
    /// Run was cancelled before this item finished.
    Cancelled,
}

impl std::fmt::Display for DiscoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscoveryOutcome::Priced => "priced",
            DiscoveryOutcome::IdentifierFoundNoPrice => "identifier_found_no_price",
            DiscoveryOutcome::Skipped => "skipped",
            DiscoveryOutcome::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-item record of one discovery run. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryAttempt {
    pub item_id: String,
    /// Deepest layer tried, None if no layer ran.
    pub layer_reached: Option<Layer>,
    pub outcome: DiscoveryOutcome,
    /// Provider that produced the accepted price or identifier.
    pub provider: Option<String>,
    pub price: Option<f64>,
    pub discovered_identifier: Option<String>,
    pub provider_errors: u32,
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
