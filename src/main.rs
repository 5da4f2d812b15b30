use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqliteConnectOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shelf_pricer::api::{router, ApiState, HealthState};
use shelf_pricer::config::Config;
use shelf_pricer::db::{CatalogStore, SqliteCatalogStore};
use shelf_pricer::error::Result;
use shelf_pricer::pricing::{FeeTable, ProfitabilityEngine};
use shelf_pricer::provider::{HttpMarketplaceProvider, ProviderLatency};
use shelf_pricer::quote::PriceResolver;
use shelf_pricer::signal::{InMemoryPriceCache, LiveFetchCache};
use shelf_pricer::sync::{DiscoveryConfig, SyncRunner, TieredDiscoveryJob};
use shelf_pricer::types::CatalogItem;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let sqlite_store = SqliteCatalogStore::new(pool);
    if let Some(path) = &cfg.catalog_seed_path {
        let seeded = seed_catalog(&sqlite_store, path).await?;
        info!("Seeded {seeded} catalog items from {path}");
    }
    let store: Arc<dyn CatalogStore> = Arc::new(sqlite_store);

    // --- Providers ---
    if cfg.provider_api_key.is_none() {
        warn!("PROVIDER_API_KEY not set: provider calls are unauthenticated");
    }
    let primary = Arc::new(HttpMarketplaceProvider::new(
        "primary",
        &cfg.provider_base_url,
        cfg.provider_api_key.clone(),
    )?);
    let alternate = Arc::new(HttpMarketplaceProvider::new(
        "alternate",
        &cfg.alt_provider_base_url,
        cfg.provider_api_key.clone(),
    )?);

    // --- Read path ---
    let latency = Arc::new(ProviderLatency::new());
    let live_cache = LiveFetchCache::new(primary.clone(), InMemoryPriceCache::new())
        .with_timeout(cfg.live_fetch_timeout)
        .with_latency_stats(Arc::clone(&latency));
    let engine = ProfitabilityEngine::new(FeeTable::default(), cfg.min_roi)?;
    let resolver = Arc::new(PriceResolver::new(
        Arc::clone(&store),
        Arc::new(live_cache),
        engine,
        cfg.default_fulfillment,
    ));
    info!(
        min_roi = cfg.min_roi,
        method = %cfg.default_fulfillment,
        "Pricing engine ready: min ROI {:.0}%, default fulfillment {}",
        cfg.min_roi * 100.0,
        cfg.default_fulfillment,
    );

    // --- Discovery ---
    let job = TieredDiscoveryJob::new(
        Arc::clone(&store),
        primary,
        alternate,
        DiscoveryConfig::from(&cfg),
    )
    .with_latency_stats(Arc::clone(&latency));

    let shutdown = CancellationToken::new();
    let health = Arc::new(HealthState::new());
    let (runner, sync) = SyncRunner::new(
        Arc::new(job),
        Duration::from_secs(cfg.sync_interval_secs),
        shutdown.clone(),
        Arc::clone(&health),
    );
    let runner_task = tokio::spawn(runner.run());
    info!(
        "Discovery scheduled every {}s: batch {} items, {} workers, {} calls/s",
        cfg.sync_interval_secs, cfg.sync_batch_size, cfg.sync_concurrency, cfg.provider_rate_per_sec,
    );

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        resolver,
        sync,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
                _ = server_shutdown.cancelled() => {}
            }
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = runner_task.await {
        warn!("Sync runner task ended abnormally: {e}");
    }
    info!("Shutdown complete");
    Ok(())
}

async fn seed_catalog(store: &SqliteCatalogStore, path: &str) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path).await?;
    let items: Vec<CatalogItem> = serde_json::from_str(&raw)?;
    for item in &items {
        store.upsert_item(item).await?;
    }
    Ok(items.len())
}
