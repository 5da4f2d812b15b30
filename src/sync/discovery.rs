use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, PRICE_REFRESH_WINDOW_SECS};
use crate::db::CatalogStore;
use crate::error::{ProviderError, Result};
use crate::provider::extract::{first_price, Extractor, ALTERNATE_CHAIN, DIRECT_CHAIN};
use crate::provider::{MarketplaceProvider, ProviderLatency, ProviderOp};
use crate::types::{now_secs, CatalogItem, DiscoveryAttempt, DiscoveryOutcome, Layer};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Items selected per run.
    pub batch_size: usize,
    /// Items in flight at once.
    pub concurrency: usize,
    /// Budget for a single provider call, measured after the rate limiter admits it.
    pub provider_timeout: Duration,
    /// Items last attempted longer ago than this are due again.
    pub refresh_window_secs: i64,
    /// Outbound calls per second across all workers.
    pub rate_per_sec: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 5,
            provider_timeout: Duration::from_secs(10),
            refresh_window_secs: PRICE_REFRESH_WINDOW_SECS,
            rate_per_sec: 2,
        }
    }
}

impl From<&Config> for DiscoveryConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.sync_batch_size,
            concurrency: cfg.sync_concurrency,
            provider_timeout: cfg.provider_timeout,
            refresh_window_secs: PRICE_REFRESH_WINDOW_SECS,
            rate_per_sec: cfg.provider_rate_per_sec,
        }
    }
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Items that ended with an accepted price.
    pub processed: usize,
    /// Items that gained a new or changed identifier, priced or not.
    pub discovered_identifiers: usize,
    /// Items where no layer produced a price or a new identifier.
    pub skipped: usize,
    /// Failed or timed-out provider calls across all items.
    pub provider_errors: u32,
    /// Items not finished because the run was cancelled.
    pub not_attempted: usize,
    pub cancelled: bool,
    pub started_at: i64,
    pub finished_at: i64,
    pub attempts: Vec<DiscoveryAttempt>,
}

impl SyncReport {
    fn from_attempts(attempts: Vec<DiscoveryAttempt>, cancelled: bool, started_at: i64) -> Self {
        let count = |outcome: DiscoveryOutcome| attempts.iter().filter(|a| a.outcome == outcome).count();
        Self {
            processed: count(DiscoveryOutcome::Priced),
            discovered_identifiers: attempts
                .iter()
                .filter(|a| a.discovered_identifier.is_some())
                .count(),
            skipped: count(DiscoveryOutcome::Skipped),
            provider_errors: attempts.iter().map(|a| a.provider_errors).sum(),
            not_attempted: count(DiscoveryOutcome::Cancelled),
            cancelled,
            started_at,
            finished_at: now_secs(),
            attempts,
        }
    }

    pub fn total(&self) -> usize {
        self.attempts.len()
    }
}

/// Batch reconciliation of stored marketplace prices.
///
/// Per item the layers run in order and stop at the first accepted price:
/// direct lookup by identifier on the primary provider, the same identifier on
/// the alternate provider through [`ALTERNATE_CHAIN`], then a title + author
/// search that may also discover a new identifier. Items are independent; a
/// provider failure on one item is counted and logged, never propagated.
pub struct TieredDiscoveryJob {
    store: Arc<dyn CatalogStore>,
    primary: Arc<dyn MarketplaceProvider>,
    alternate: Arc<dyn MarketplaceProvider>,
    limiter: Arc<DefaultDirectRateLimiter>,
    config: DiscoveryConfig,
    latency: Option<Arc<ProviderLatency>>,
}

impl TieredDiscoveryJob {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        primary: Arc<dyn MarketplaceProvider>,
        alternate: Arc<dyn MarketplaceProvider>,
        config: DiscoveryConfig,
    ) -> Self {
        let rate = NonZeroU32::new(config.rate_per_sec).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));
        Self {
            store,
            primary,
            alternate,
            limiter,
            config,
            latency: None,
        }
    }

    pub fn with_latency_stats(mut self, latency: Arc<ProviderLatency>) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// One batch over the items currently due. Only a failure to read the
    /// catalog is returned as an error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let started_at = now_secs();
        let stale_before = started_at - self.config.refresh_window_secs;
        let items = self
            .store
            .items_due_for_refresh(stale_before, self.config.batch_size)
            .await?;

        info!(
            due = items.len(),
            concurrency = self.config.concurrency,
            "Discovery run starting: {} items due",
            items.len()
        );

        let attempts: Vec<DiscoveryAttempt> = stream::iter(items)
            .map(|item| self.discover_item(item, cancel))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = SyncReport::from_attempts(attempts, cancel.is_cancelled(), started_at);
        info!(
            processed = report.processed,
            discovered = report.discovered_identifiers,
            skipped = report.skipped,
            provider_errors = report.provider_errors,
            not_attempted = report.not_attempted,
            cancelled = report.cancelled,
            "Discovery run complete: {} priced, {} identifiers, {} skipped",
            report.processed,
            report.discovered_identifiers,
            report.skipped,
        );
        Ok(report)
    }

    async fn discover_item(&self, item: CatalogItem, cancel: &CancellationToken) -> DiscoveryAttempt {
        let attempt = self.run_layers(&item, cancel).await;
        // Priced items are stamped by `record_price`; cancelled ones stay due.
        if matches!(
            attempt.outcome,
            DiscoveryOutcome::Skipped | DiscoveryOutcome::IdentifierFoundNoPrice
        ) {
            if let Err(e) = self.store.record_attempt(&item.id, now_secs()).await {
                warn!(item_id = %item.id, "failed to record attempt: {e}");
            }
        }
        attempt
    }

    async fn run_layers(&self, item: &CatalogItem, cancel: &CancellationToken) -> DiscoveryAttempt {
        let mut attempt = DiscoveryAttempt {
            item_id: item.id.clone(),
            layer_reached: None,
            outcome: DiscoveryOutcome::Skipped,
            provider: None,
            price: None,
            discovered_identifier: None,
            provider_errors: 0,
        };
        if cancel.is_cancelled() {
            attempt.outcome = DiscoveryOutcome::Cancelled;
            return attempt;
        }

        let market = item.territory;
        let known_identifier = item.identifier_for(market).map(str::to_string);

        if let Some(identifier) = &known_identifier {
            let layers: [(Layer, &Arc<dyn MarketplaceProvider>, &[(&'static str, Extractor)]); 2] = [
                (Layer::Direct, &self.primary, DIRECT_CHAIN),
                (Layer::Alternate, &self.alternate, ALTERNATE_CHAIN),
            ];
            for (layer, provider, chain) in layers {
                attempt.layer_reached = Some(layer);
                let payload = match self
                    .call(cancel, ProviderOp::Lookup, provider.lookup_by_identifier(identifier, market))
                    .await
                {
                    Ok(payload) => payload,
                    Err(ProviderError::Cancelled) => {
                        attempt.outcome = DiscoveryOutcome::Cancelled;
                        return attempt;
                    }
                    Err(e) => {
                        attempt.provider_errors += 1;
                        warn!(item_id = %item.id, layer = layer.number(), provider = provider.name(), "lookup failed: {e}");
                        continue;
                    }
                };
                if let Some((extractor, price)) = first_price(&payload, chain) {
                    debug!(item_id = %item.id, layer = layer.number(), extractor, price, "price found");
                    self.accept_price(item, price, provider.name(), &mut attempt).await;
                    return attempt;
                }
            }
        }

        if item.title.trim().is_empty() {
            debug!(item_id = %item.id, "no title to search by, skipping");
            return attempt;
        }

        attempt.layer_reached = Some(Layer::Search);
        let hit = match self
            .call(
                cancel,
                ProviderOp::Search,
                self.primary.search_by_title_author(&item.title, &item.author, market),
            )
            .await
        {
            Ok(hit) => hit,
            Err(ProviderError::Cancelled) => {
                attempt.outcome = DiscoveryOutcome::Cancelled;
                return attempt;
            }
            Err(e) => {
                attempt.provider_errors += 1;
                warn!(item_id = %item.id, layer = Layer::Search.number(), provider = self.primary.name(), "search failed: {e}");
                return attempt;
            }
        };
        let Some(hit) = hit else {
            debug!(item_id = %item.id, "search found nothing, skipping");
            return attempt;
        };

        let identifier = hit.identifier.trim();
        if !identifier.is_empty() && known_identifier.as_deref() != Some(identifier) {
            match self.store.record_identifier(&item.id, market, identifier).await {
                Ok(()) => {
                    info!(item_id = %item.id, %market, identifier, "identifier discovered");
                    attempt.discovered_identifier = Some(identifier.to_string());
                    attempt.provider = Some(self.primary.name().to_string());
                    attempt.outcome = DiscoveryOutcome::IdentifierFoundNoPrice;
                }
                Err(e) => warn!(item_id = %item.id, "failed to persist identifier: {e}"),
            }
        }

        if let Some(price) = hit.price.filter(|p| p.is_finite() && *p > 0.0) {
            self.accept_price(item, price, self.primary.name(), &mut attempt).await;
        }
        attempt
    }

    async fn accept_price(&self, item: &CatalogItem, price: f64, provider: &str, attempt: &mut DiscoveryAttempt) {
        match self.store.record_price(&item.id, price, now_secs()).await {
            Ok(()) => {
                attempt.outcome = DiscoveryOutcome::Priced;
                attempt.provider = Some(provider.to_string());
                attempt.price = Some((price * 100.0).round() / 100.0);
            }
            Err(e) => warn!(item_id = %item.id, price, "failed to persist price: {e}"),
        }
    }

    /// Rate limit, time-bound and make cancellable a single provider call.
    async fn call<T, F>(
        &self,
        cancel: &CancellationToken,
        op: ProviderOp,
        fut: F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let budget = self.config.provider_timeout;
        let guarded = async {
            self.limiter.until_ready().await;
            let started = Instant::now();
            let result = match tokio::time::timeout(budget, fut).await {
                Ok(r) => r,
                Err(_) => Err(ProviderError::Timeout(budget.as_millis() as u64)),
            };
            if let Some(latency) = &self.latency {
                latency.record(op, started.elapsed());
            }
            result
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            r = guarded => r,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::catalog::tests::{book, memory_store};
    use crate::db::SqliteCatalogStore;
    use crate::provider::SearchHit;
    use crate::types::Territory;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MockProvider {
        name: &'static str,
        payloads: HashMap<String, Value>,
        search: Option<SearchHit>,
        fail: bool,
        hang: bool,
        delay: Option<Duration>,
        lookups: AtomicUsize,
        searches: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started: Mutex<Vec<Instant>>,
    }

    impl MockProvider {
        pub(crate) fn named(name: &'static str) -> Self {
            Self {
                name,
                ..Default::default()
            }
        }

        pub(crate) fn with_payload(mut self, identifier: &str, payload: Value) -> Self {
            self.payloads.insert(identifier.to_string(), payload);
            self
        }

        pub(crate) fn with_search(mut self, identifier: &str, price: Option<f64>) -> Self {
            self.search = Some(SearchHit {
                identifier: identifier.to_string(),
                price,
            });
            self
        }

        pub(crate) fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        pub(crate) fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        pub(crate) fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }

        pub(crate) fn searches(&self) -> usize {
            self.searches.load(Ordering::SeqCst)
        }

        /// Highest number of lookups observed running at the same time.
        fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        /// Wall-clock start of every lookup, in call order.
        fn lookup_starts(&self) -> Vec<Instant> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketplaceProvider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn lookup_by_identifier(&self, identifier: &str, _territory: Territory) -> std::result::Result<Value, ProviderError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.started.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Upstream("500 internal".to_string()));
            }
            self.payloads.get(identifier).cloned().ok_or(ProviderError::NotFound)
        }

        async fn search_by_title_author(
            &self,
            _title: &str,
            _author: &str,
            _territory: Territory,
        ) -> std::result::Result<Option<SearchHit>, ProviderError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(self.search.clone())
        }
    }

    pub(crate) fn fast_config() -> DiscoveryConfig {
        DiscoveryConfig {
            provider_timeout: Duration::from_millis(200),
            rate_per_sec: 1_000,
            ..Default::default()
        }
    }

    pub(crate) fn job(
        store: &SqliteCatalogStore,
        primary: Arc<MockProvider>,
        alternate: Arc<MockProvider>,
        config: DiscoveryConfig,
    ) -> TieredDiscoveryJob {
        TieredDiscoveryJob::new(Arc::new(store.clone()), primary, alternate, config)
    }

    pub(crate) async fn seed(store: &SqliteCatalogStore, id: &str, identifier: Option<&str>) {
        let mut item = book(id, "Dune", "Frank Herbert", Territory::Us);
        item.identifier_us = identifier.map(str::to_string);
        store.upsert_item(&item).await.unwrap();
    }

    #[tokio::test]
    async fn layer_one_direct_price_is_accepted() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"buy_box_price": "12.499"})));
        let alternate = Arc::new(MockProvider::named("alt"));

        let report = job(&store, primary.clone(), alternate.clone(), fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 0);
        let attempt = &report.attempts[0];
        assert_eq!(attempt.layer_reached, Some(Layer::Direct));
        assert_eq!(attempt.provider.as_deref(), Some("primary"));
        assert_eq!(alternate.lookups(), 0);
        assert_eq!(primary.searches(), 0);

        let item = store.get_item("b1").await.unwrap().unwrap();
        assert_eq!(item.stored_price, Some(12.5));
        assert!(item.checked_at.is_some());
    }

    #[tokio::test]
    async fn layer_two_uses_alternate_extractor_chain() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"price": 0})));
        let alternate = Arc::new(
            MockProvider::named("alt").with_payload("A1", json!({"price_history": [[1, -1]], "stats": {"current": 9.0}})),
        );

        let report = job(&store, primary.clone(), alternate, fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.attempts[0].layer_reached, Some(Layer::Alternate));
        assert_eq!(report.attempts[0].provider.as_deref(), Some("alt"));
        assert_eq!(primary.searches(), 0);
        assert_eq!(store.get_item("b1").await.unwrap().unwrap().stored_price, Some(9.0));
    }

    #[tokio::test]
    async fn search_identifier_without_price_is_persisted_but_not_priced() {
        let store = memory_store().await;
        seed(&store, "b1", None).await;
        let primary = Arc::new(MockProvider::named("primary").failing().with_search("X123", None));
        let alternate = Arc::new(MockProvider::named("alt").failing());

        let report = job(&store, primary.clone(), alternate.clone(), fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.discovered_identifiers, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.attempts[0].outcome, DiscoveryOutcome::IdentifierFoundNoPrice);
        assert_eq!(report.attempts[0].layer_reached, Some(Layer::Search));
        assert_eq!(primary.lookups(), 0);
        assert_eq!(alternate.lookups(), 0);

        let item = store.get_item("b1").await.unwrap().unwrap();
        assert_eq!(item.identifier_us.as_deref(), Some("X123"));
        assert_eq!(item.stored_price, None);
        assert_eq!(item.checked_at, None);

        // The attempt still counts: the item is not due again this window.
        let stale_before = now_secs() - PRICE_REFRESH_WINDOW_SECS;
        assert!(store.items_due_for_refresh(stale_before, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpriceable_item_does_not_starve_stale_items() {
        let store = memory_store().await;
        seed(&store, "a", None).await;
        seed(&store, "b", Some("A1")).await;
        store.record_price("b", 3.0, 1).await.unwrap();
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"price": 7.0})));
        let alternate = Arc::new(MockProvider::named("alt"));
        let config = DiscoveryConfig {
            batch_size: 1,
            ..fast_config()
        };
        let job = job(&store, primary.clone(), alternate, config);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let report = job.run(&CancellationToken::new()).await.unwrap();
            seen.extend(report.attempts.into_iter().map(|a| (a.item_id, a.outcome)));
        }

        assert_eq!(
            seen,
            vec![
                ("a".to_string(), DiscoveryOutcome::Skipped),
                ("b".to_string(), DiscoveryOutcome::Priced),
            ]
        );
        let b = store.get_item("b").await.unwrap().unwrap();
        assert_eq!(b.stored_price, Some(7.0));
        assert!(b.checked_at.unwrap() > 1);

        let a = store.get_item("a").await.unwrap().unwrap();
        assert_eq!(a.stored_price, None);
        assert_eq!(a.checked_at, None);
        assert_eq!(primary.searches(), 1);
    }

    #[tokio::test]
    async fn failing_lookups_fall_through_to_search_and_replace_identifier() {
        let store = memory_store().await;
        seed(&store, "b1", Some("OLD")).await;
        let primary = Arc::new(MockProvider::named("primary").failing().with_search("X123", Some(14.2)));
        let alternate = Arc::new(MockProvider::named("alt").failing());

        let report = job(&store, primary, alternate, fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.discovered_identifiers, 1);
        assert_eq!(report.provider_errors, 2);

        let item = store.get_item("b1").await.unwrap().unwrap();
        assert_eq!(item.identifier_us.as_deref(), Some("X123"));
        assert_eq!(item.stored_price, Some(14.2));
    }

    #[tokio::test]
    async fn same_identifier_without_price_is_skipped() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").with_search("A1", None));
        let alternate = Arc::new(MockProvider::named("alt"));

        let report = job(&store, primary, alternate, fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.discovered_identifiers, 0);
        assert_eq!(report.provider_errors, 2);
        assert_eq!(report.attempts[0].outcome, DiscoveryOutcome::Skipped);
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_batch() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        seed(&store, "b2", Some("MISSING")).await;
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"price": 7.5})));
        let alternate = Arc::new(MockProvider::named("alt").failing());

        let report = job(&store, primary, alternate, fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.provider_errors >= 2);
        assert!(store.get_item("b2").await.unwrap().unwrap().stored_price.is_none());
    }

    #[tokio::test]
    async fn slow_provider_calls_are_timed_out_and_counted() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").hanging());
        let alternate = Arc::new(MockProvider::named("alt").hanging());
        let config = DiscoveryConfig {
            provider_timeout: Duration::from_millis(20),
            ..fast_config()
        };

        let report = job(&store, primary, alternate, config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.provider_errors, 3);
        assert_eq!(report.skipped, 1);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn workers_never_exceed_concurrency() {
        let store = memory_store().await;
        for i in 0..6 {
            seed(&store, &format!("b{i}"), Some("A1")).await;
        }
        let primary = Arc::new(
            MockProvider::named("primary")
                .with_payload("A1", json!({"price": 9.0}))
                .slow(Duration::from_millis(30)),
        );
        let alternate = Arc::new(MockProvider::named("alt"));
        let config = DiscoveryConfig {
            concurrency: 2,
            ..fast_config()
        };

        let report = job(&store, primary.clone(), alternate, config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, 6);
        assert_eq!(primary.lookups(), 6);
        let peak = primary.max_in_flight();
        assert!((1..=2).contains(&peak), "peak in flight = {peak}");
    }

    #[tokio::test]
    async fn provider_calls_respect_rate_limit_across_workers() {
        let store = memory_store().await;
        for i in 0..5 {
            seed(&store, &format!("b{i}"), Some("A1")).await;
        }
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"price": 9.0})));
        let alternate = Arc::new(MockProvider::named("alt"));
        // 2/s allows a burst of 2, then one call every 500 ms.
        let config = DiscoveryConfig {
            concurrency: 5,
            rate_per_sec: 2,
            ..fast_config()
        };

        let started = Instant::now();
        let report = job(&store, primary.clone(), alternate, config)
            .run(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.processed, 5);

        let starts = primary.lookup_starts();
        assert_eq!(starts.len(), 5);
        let first = starts[0];
        for (i, at) in starts.iter().enumerate().skip(2) {
            let gap = at.duration_since(first);
            let floor = Duration::from_millis(450 * (i as u64 - 1));
            assert!(gap >= floor, "call {i} admitted after {gap:?}, expected at least {floor:?}");
        }
        assert!(started.elapsed() >= Duration::from_millis(1_400));
    }

    #[tokio::test]
    async fn lookups_and_searches_are_timed_separately() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        seed(&store, "b2", None).await;
        let primary = Arc::new(
            MockProvider::named("primary")
                .with_payload("A1", json!({"price": 9.0}))
                .with_search("X9", Some(11.0)),
        );
        let alternate = Arc::new(MockProvider::named("alt"));
        let latency = Arc::new(ProviderLatency::new());

        job(&store, primary, alternate, fast_config())
            .with_latency_stats(Arc::clone(&latency))
            .run(&CancellationToken::new())
            .await
            .unwrap();

        let snap = latency.snapshot();
        assert_eq!(snap.lookup.samples, 1);
        assert_eq!(snap.search.samples, 1);
        assert_eq!(snap.live.samples, 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        seed(&store, "b2", None).await;
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"price": 7.5})));
        let alternate = Arc::new(MockProvider::named("alt"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = job(&store, primary.clone(), alternate, fast_config())
            .run(&cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.not_attempted, 2);
        assert_eq!(report.processed, 0);
        assert_eq!(primary.lookups(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_calls() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").hanging());
        let alternate = Arc::new(MockProvider::named("alt"));
        let config = DiscoveryConfig {
            provider_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let job = job(&store, primary, alternate, config);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = job.run(&cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.cancelled);
        assert_eq!(report.attempts[0].outcome, DiscoveryOutcome::Cancelled);
        assert_eq!(report.provider_errors, 0);
    }

    #[tokio::test]
    async fn recently_checked_items_are_not_due() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        store.record_price("b1", 10.0, now_secs()).await.unwrap();
        let primary = Arc::new(MockProvider::named("primary"));
        let alternate = Arc::new(MockProvider::named("alt"));

        let report = job(&store, primary.clone(), alternate, fast_config())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(primary.lookups(), 0);
    }
}
