use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::health::HealthState;
use crate::db::CatalogStore;
use crate::error::{AppError, PricingError};
use crate::pricing::SensitivityPoint;
use crate::provider::{LatencySnapshot, ProviderLatency};
use crate::quote::{PriceResolver, Quote};
use crate::signal::CacheKey;
use crate::sync::{SyncHandle, SyncReport};
use crate::types::{CatalogItem, FulfillmentMethod, Territory};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn CatalogStore>,
    pub resolver: Arc<PriceResolver>,
    pub sync: SyncHandle,
    pub health: Arc<HealthState>,
    /// Upstream call latency, shared with the live cache and the discovery job.
    pub latency: Arc<ProviderLatency>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/items", get(get_items))
        .route("/items/:id/quote", get(get_item_quote))
        .route("/items/:id/sensitivity", get(get_item_sensitivity))
        .route("/items/:id/cost", put(put_item_cost))
        .route("/sync", post(post_sync))
        .route("/sync/cancel", post(post_sync_cancel))
        .route("/cache/invalidate", post(post_cache_invalidate))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ItemsQuery {
    pub territory: Option<Territory>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct QuoteQuery {
    pub quantity: Option<u32>,
    pub method: Option<FulfillmentMethod>,
}

#[derive(Deserialize)]
pub struct SensitivityQuery {
    pub price: f64,
    pub previous: Option<f64>,
    pub quantity: Option<u32>,
    pub method: Option<FulfillmentMethod>,
}

/// All three present invalidates one entry; otherwise the whole cache.
#[derive(Deserialize)]
pub struct InvalidateQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub territory: Option<Territory>,
}

#[derive(Deserialize)]
pub struct CostUpdate {
    pub wholesale_cost: f64,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sync_running: bool,
    pub last_sync_at: Option<i64>,
    pub last_sync_processed: u64,
    pub last_sync_provider_errors: u64,
    pub sync_runs: u64,
    pub live_cache_entries: usize,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub scope: &'static str,
    pub remaining_entries: usize,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

const DEFAULT_ITEMS_LIMIT: usize = 100;
const DEFAULT_QUANTITY: u32 = 1;

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let last = state.health.last_sync_at();
    Json(HealthResponse {
        status: "ok",
        sync_running: state.health.sync_running(),
        last_sync_at: (last > 0).then_some(last),
        last_sync_processed: state.health.last_sync_processed(),
        last_sync_provider_errors: state.health.last_sync_provider_errors(),
        sync_runs: state.health.sync_runs(),
        live_cache_entries: state.resolver.live_cache().len(),
    })
}

async fn get_items(
    State(state): State<ApiState>,
    Query(params): Query<ItemsQuery>,
) -> Result<Json<Vec<CatalogItem>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_ITEMS_LIMIT).min(1_000);
    let items = state
        .store
        .list_items(limit)
        .await?
        .into_iter()
        .filter(|i| params.territory.map_or(true, |t| i.territory == t))
        .collect();
    Ok(Json(items))
}

async fn get_item_quote(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
    Query(params): Query<QuoteQuery>,
) -> Result<Json<Quote>, AppError> {
    let quote = state
        .resolver
        .quote(&item_id, params.quantity.unwrap_or(DEFAULT_QUANTITY), params.method)
        .await?;
    Ok(Json(quote))
}

async fn get_item_sensitivity(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
    Query(params): Query<SensitivityQuery>,
) -> Result<Json<SensitivityPoint>, AppError> {
    let point = state
        .resolver
        .sensitivity(
            &item_id,
            params.quantity.unwrap_or(DEFAULT_QUANTITY),
            params.method,
            params.price,
            params.previous,
        )
        .await?;
    Ok(Json(point))
}

async fn put_item_cost(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
    Json(body): Json<CostUpdate>,
) -> Result<Json<CatalogItem>, AppError> {
    state.store.update_cost(&item_id, body.wholesale_cost).await?;
    info!(item_id = %item_id, cost = body.wholesale_cost, "wholesale cost overridden");
    state
        .store
        .get_item(&item_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("catalog item {item_id}")))
}

async fn post_sync(State(state): State<ApiState>) -> Result<Json<SyncReport>, AppError> {
    Ok(Json(state.sync.run_now().await?))
}

async fn post_sync_cancel(State(state): State<ApiState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.sync.cancel_current(),
    })
}

async fn post_cache_invalidate(
    State(state): State<ApiState>,
    Query(params): Query<InvalidateQuery>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let cache = state.resolver.live_cache();
    let scope = match (params.title, params.author, params.territory) {
        (Some(title), Some(author), Some(territory)) => {
            cache.invalidate(&CacheKey::new(&title, &author, territory));
            "entry"
        }
        (None, None, None) => {
            cache.invalidate_all();
            "all"
        }
        _ => {
            return Err(PricingError::InvalidArgument(
                "title, author and territory must be given together".to_string(),
            )
            .into())
        }
    };
    Ok(Json(InvalidateResponse {
        scope,
        remaining_entries: cache.len(),
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::tests::{book, memory_store};
    use crate::pricing::{FeeTable, ProfitabilityEngine};
    use crate::provider::{LivePriceLookup, LiveQuote};
    use crate::signal::{InMemoryPriceCache, LiveFetchCache};
    use crate::sync::discovery::tests::{fast_config, MockProvider};
    use crate::sync::{SyncRunner, TieredDiscoveryJob};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct StaticLookup;

    #[async_trait]
    impl LivePriceLookup for StaticLookup {
        async fn live_quote(
            &self,
            _title: &str,
            _author: &str,
            _territory: Territory,
        ) -> Result<LiveQuote, crate::error::ProviderError> {
            Ok(LiveQuote {
                buy_box: Some(18.0),
                lowest_new: None,
            })
        }
    }

    async fn state() -> (ApiState, CancellationToken) {
        let store = memory_store().await;
        store.upsert_item(&book("b1", "Dune", "Frank Herbert", Territory::Us)).await.unwrap();
        store.upsert_item(&book("b2", "Emma", "Jane Austen", Territory::Uk)).await.unwrap();
        let store: Arc<dyn CatalogStore> = Arc::new(store);

        let latency = Arc::new(ProviderLatency::new());
        let cache = LiveFetchCache::new(Arc::new(StaticLookup), InMemoryPriceCache::new())
            .with_latency_stats(Arc::clone(&latency));
        let engine = ProfitabilityEngine::new(FeeTable::default(), 0.20).unwrap();
        let resolver = Arc::new(PriceResolver::new(
            Arc::clone(&store),
            Arc::new(cache),
            engine,
            FulfillmentMethod::Fba,
        ));

        let job = TieredDiscoveryJob::new(
            Arc::clone(&store),
            Arc::new(MockProvider::named("primary")),
            Arc::new(MockProvider::named("alt")),
            fast_config(),
        )
        .with_latency_stats(Arc::clone(&latency));
        let shutdown = CancellationToken::new();
        let health = Arc::new(HealthState::new());
        let (runner, sync) = SyncRunner::new(Arc::new(job), Duration::from_secs(3600), shutdown.clone(), Arc::clone(&health));
        tokio::spawn(runner.run());

        let state = ApiState {
            store,
            resolver,
            sync,
            health,
            latency,
        };
        (state, shutdown)
    }

    #[tokio::test]
    async fn items_can_be_filtered_by_territory() {
        let (state, shutdown) = state().await;
        let Json(all) = get_items(State(state.clone()), Query(ItemsQuery { territory: None, limit: None }))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let Json(uk) = get_items(
            State(state),
            Query(ItemsQuery {
                territory: Some(Territory::Uk),
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(uk.len(), 1);
        assert_eq!(uk[0].id, "b2");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn quote_then_invalidate_all() {
        let (state, shutdown) = state().await;
        let Json(quote) = get_item_quote(
            State(state.clone()),
            Path("b1".to_string()),
            Query(QuoteQuery {
                quantity: None,
                method: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(quote.signal.value(), 18.0);

        let Json(health) = get_health(State(state.clone())).await;
        assert_eq!(health.live_cache_entries, 1);

        let Json(latency) = get_stats_latency(State(state.clone())).await;
        assert_eq!(latency.live.samples, 1);
        assert_eq!(latency.lookup.samples, 0);

        let Json(resp) = post_cache_invalidate(
            State(state.clone()),
            Query(InvalidateQuery {
                title: None,
                author: None,
                territory: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.scope, "all");
        assert_eq!(resp.remaining_entries, 0);

        let partial = post_cache_invalidate(
            State(state),
            Query(InvalidateQuery {
                title: Some("Dune".to_string()),
                author: None,
                territory: None,
            }),
        )
        .await;
        assert!(partial.is_err());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn cost_override_and_missing_item() {
        let (state, shutdown) = state().await;
        let Json(item) = put_item_cost(
            State(state.clone()),
            Path("b1".to_string()),
            Json(CostUpdate { wholesale_cost: 7.5 }),
        )
        .await
        .unwrap();
        assert_eq!(item.wholesale_cost, 7.5);

        let missing = get_item_quote(
            State(state),
            Path("nope".to_string()),
            Query(QuoteQuery {
                quantity: None,
                method: None,
            }),
        )
        .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn sync_endpoint_returns_report() {
        let (state, shutdown) = state().await;
        let Json(report) = post_sync(State(state)).await.unwrap();
        assert!(!report.cancelled);
        shutdown.cancel();
    }
}
