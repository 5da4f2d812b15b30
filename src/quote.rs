//! Read path: resolve one price signal for an item and turn it into a
//! profitability snapshot. Never writes to the catalog.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::db::CatalogStore;
use crate::error::{AppError, PricingError, Result};
use crate::pricing::{ProfitabilityEngine, SensitivityModel, SensitivityPoint};
use crate::signal::{select_signal, LiveFetchCache};
use crate::types::{CatalogItem, FetchTag, FulfillmentMethod, PriceSignal, RoiResult, SignalSource};

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub item_id: String,
    pub quantity: u32,
    /// Signal the snapshot was priced against. `None` means no price is
    /// available; nothing is estimated in its place.
    pub signal: PriceSignal,
    /// How the live lookup went, whichever signal won.
    pub live_fetch: FetchTag,
    /// True only when the winning signal is a live or recently cached observation.
    pub is_fresh: bool,
    pub roi: RoiResult,
}

pub struct PriceResolver {
    store: Arc<dyn CatalogStore>,
    live: Arc<LiveFetchCache>,
    engine: ProfitabilityEngine,
    default_method: FulfillmentMethod,
}

impl PriceResolver {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        live: Arc<LiveFetchCache>,
        engine: ProfitabilityEngine,
        default_method: FulfillmentMethod,
    ) -> Self {
        Self {
            store,
            live,
            engine,
            default_method,
        }
    }

    pub fn engine(&self) -> &ProfitabilityEngine {
        &self.engine
    }

    pub fn live_cache(&self) -> &LiveFetchCache {
        &self.live
    }

    async fn load(&self, item_id: &str) -> Result<CatalogItem> {
        self.store
            .get_item(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("catalog item {item_id}")))
    }

    pub async fn quote(
        &self,
        item_id: &str,
        quantity: u32,
        method: Option<FulfillmentMethod>,
    ) -> Result<Quote> {
        let item = self.load(item_id).await?;
        self.quote_item(&item, quantity, method).await
    }

    pub async fn quote_item(
        &self,
        item: &CatalogItem,
        quantity: u32,
        method: Option<FulfillmentMethod>,
    ) -> Result<Quote> {
        if quantity == 0 {
            return Err(PricingError::InvalidArgument("quantity must be at least 1".to_string()).into());
        }
        let method = method.unwrap_or(self.default_method);
        let market = item.territory;

        let live = self.live.fetch(&item.title, &item.author, market).await;
        let stored = item.stored_signal(market);
        let signal = select_signal(market, [&live.signal, &stored]);

        let is_fresh = match signal.source() {
            SignalSource::LiveBuyBox | SignalSource::LiveLowestNew => true,
            SignalSource::CachedLive => live.is_fresh,
            SignalSource::StoredReference | SignalSource::None => false,
        };
        debug!(
            item_id = %item.id,
            source = %signal.source(),
            live_fetch = %live.tag,
            value = signal.value(),
            "price signal resolved"
        );

        let roi = self.engine.analyze(item, quantity, &signal, method)?;
        Ok(Quote {
            item_id: item.id.clone(),
            quantity,
            signal,
            live_fetch: live.tag,
            is_fresh,
            roi,
        })
    }

    /// What-if evaluation at `price`, starting the slider from `previous`
    /// (or the target price when absent).
    pub async fn sensitivity(
        &self,
        item_id: &str,
        quantity: u32,
        method: Option<FulfillmentMethod>,
        price: f64,
        previous: Option<f64>,
    ) -> Result<SensitivityPoint> {
        let item = self.load(item_id).await?;
        let quote = self.quote_item(&item, quantity, method).await?;
        let schedule = self.engine.schedule_for(&item, quote.roi.method)?;
        let mut model = SensitivityModel::new(&quote.roi, schedule)?;
        if let Some(previous) = previous {
            model = model.starting_at(previous);
        }
        Ok(model.recompute(price)?)
    }
}
