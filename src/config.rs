use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::FulfillmentMethod;

pub const PROVIDER_BASE_URL: &str = "https://api.bookprices.example.com/v1";

/// Live lookups are served from cache while younger than this.
pub const LIVE_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Cached live signals younger than this are labelled fresh in the UI.
pub const LIVE_FRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default budget for a single live lookup.
pub const LIVE_FETCH_TIMEOUT_MS: u64 = 3_000;

/// Stored prices older than this are due for batch reconciliation.
pub const PRICE_REFRESH_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Absolute distance (in currency units) at which the sensitivity slider snaps.
pub const SNAP_THRESHOLD: f64 = 0.50;

/// Channel capacity for the on-demand sync trigger.
pub const CHANNEL_CAPACITY: usize = 16;

/// Volume discount tiers: (minimum quantity, fraction off acquisition cost).
/// Quantities below the first threshold get the first tier's rate.
pub const VOLUME_DISCOUNT_TIERS: &[(u32, f64)] = &[
    (10, 0.05),
    (50, 0.10),
    (100, 0.15),
    (250, 0.20),
    (500, 0.25),
];

/// Ratio of target price to reference price.
pub mod competitiveness_thresholds {
    pub const HIGHLY_COMPETITIVE_MAX: f64 = 0.95;
    pub const COMPETITIVE_MAX: f64 = 1.00;
    pub const SLIGHTLY_ABOVE_MAX: f64 = 1.10;
}

/// Sensitivity slider bounds, as multipliers.
pub mod sensitivity_bounds {
    /// Lower bound is `cost * COST_FLOOR`.
    pub const COST_FLOOR: f64 = 1.1;
    /// Upper bound when a reference price exists.
    pub const REFERENCE_CEILING: f64 = 1.3;
    /// Upper bound when no reference price exists.
    pub const TARGET_CEILING: f64 = 1.5;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub provider_base_url: String,
    /// Endpoint used by layer 2 of discovery (ALT_PROVIDER_BASE_URL).
    /// Falls back to the primary provider URL when unset.
    pub alt_provider_base_url: String,
    pub provider_api_key: Option<String>,
    /// Minimum ROI used for every derived target price (MIN_ROI, fraction).
    pub min_roi: f64,
    pub default_fulfillment: FulfillmentMethod,
    /// Items per discovery run (SYNC_BATCH_SIZE)
    pub sync_batch_size: usize,
    /// Concurrent items per discovery run (SYNC_CONCURRENCY)
    pub sync_concurrency: usize,
    /// Seconds between scheduled discovery runs (SYNC_INTERVAL_SECS)
    pub sync_interval_secs: u64,
    /// Outbound provider calls per second across all workers (PROVIDER_RATE_PER_SEC)
    pub provider_rate_per_sec: u32,
    /// Budget for one provider call during discovery (PROVIDER_TIMEOUT_MS)
    pub provider_timeout: Duration,
    /// Budget for one live lookup on the read path (LIVE_FETCH_TIMEOUT_MS)
    pub live_fetch_timeout: Duration,
    /// JSON array of catalog items upserted at startup (CATALOG_SEED_PATH)
    pub catalog_seed_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let provider_base_url =
            std::env::var("PROVIDER_BASE_URL").unwrap_or_else(|_| PROVIDER_BASE_URL.to_string());

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "catalog.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            alt_provider_base_url: std::env::var("ALT_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| provider_base_url.clone()),
            provider_base_url,
            provider_api_key: std::env::var("PROVIDER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            min_roi: std::env::var("MIN_ROI")
                .unwrap_or_else(|_| "0.20".to_string())
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite() && *r >= 0.0)
                .unwrap_or(0.20),
            default_fulfillment: std::env::var("DEFAULT_FULFILLMENT")
                .ok()
                .and_then(|s| s.parse::<FulfillmentMethod>().ok())
                .unwrap_or(FulfillmentMethod::Fba),
            sync_batch_size: std::env::var("SYNC_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse::<usize>()
                .unwrap_or(50)
                .max(1),
            sync_concurrency: std::env::var("SYNC_CONCURRENCY")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<usize>()
                .unwrap_or(5)
                .clamp(1, 10),
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse::<u64>()
                .unwrap_or(3600)
                .max(60),
            provider_rate_per_sec: std::env::var("PROVIDER_RATE_PER_SEC")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u32>()
                .unwrap_or(2)
                .max(1),
            provider_timeout: Duration::from_millis(
                std::env::var("PROVIDER_TIMEOUT_MS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse::<u64>()
                    .unwrap_or(10_000),
            ),
            live_fetch_timeout: Duration::from_millis(
                std::env::var("LIVE_FETCH_TIMEOUT_MS")
                    .unwrap_or_else(|_| LIVE_FETCH_TIMEOUT_MS.to_string())
                    .parse::<u64>()
                    .unwrap_or(LIVE_FETCH_TIMEOUT_MS),
            ),
            catalog_seed_path: std::env::var("CATALOG_SEED_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty()),
        })
    }
}
