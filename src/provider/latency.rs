//! Upstream call latency, split by provider operation.
//!
//! The live fetch cache records [`ProviderOp::Live`]; the discovery job records
//! identifier lookups and title searches. `/stats/latency` serves
//! [`ProviderLatency::snapshot`].

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Highest trackable value: 100 s in microseconds.
const MAX_TRACKED_US: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOp {
    /// `lookup_by_identifier` on either discovery provider.
    Lookup,
    /// `search_by_title_author` during discovery.
    Search,
    /// `live_quote` on the read path.
    Live,
}

impl fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderOp::Lookup => "lookup",
            ProviderOp::Search => "search",
            ProviderOp::Live => "live",
        };
        f.write_str(s)
    }
}

/// One histogram, microsecond resolution, 3 significant figures.
pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKED_US, 3).expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if let Ok(mut h) = self.inner.lock() {
            // Calls slower than the tracked range land in the top bucket.
            let _ = h.saturating_record(us.clamp(1, MAX_TRACKED_US));
        }
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Percentiles {
        let Ok(h) = self.inner.lock() else {
            return Percentiles::default();
        };
        if h.is_empty() {
            return Percentiles::default();
        }
        let ms = |q: f64| Some(h.value_at_quantile(q) as f64 / 1_000.0);
        Percentiles {
            samples: h.len(),
            p50_ms: ms(0.5),
            p95_ms: ms(0.95),
            p99_ms: ms(0.99),
            max_ms: Some(h.max() as f64 / 1_000.0),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized view of one histogram. Percentiles are `None` until the first
/// sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Percentiles {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Per-operation latency for every upstream provider call the service makes.
#[derive(Default)]
pub struct ProviderLatency {
    lookup: LatencyStats,
    search: LatencyStats,
    live: LatencyStats,
}

impl ProviderLatency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, op: ProviderOp) -> &LatencyStats {
        match op {
            ProviderOp::Lookup => &self.lookup,
            ProviderOp::Search => &self.search,
            ProviderOp::Live => &self.live,
        }
    }

    pub fn record(&self, op: ProviderOp, elapsed: Duration) {
        self.stats(op).record(elapsed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            lookup: self.lookup.snapshot(),
            search: self.search.snapshot(),
            live: self.live.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub lookup: Percentiles,
    pub search: Percentiles,
    pub live: Percentiles,
}
