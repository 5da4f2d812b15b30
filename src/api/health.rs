//! Shared health state for the /health endpoint.
//! Updated by the sync runner, read by the API.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::sync::SyncReport;

/// Shared health metrics. Written by background components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while a discovery batch is in flight.
    pub sync_running: AtomicBool,
    /// Unix seconds the last discovery batch finished (0 = never).
    pub last_sync_at: AtomicI64,
    /// Items priced by the last batch.
    pub last_sync_processed: AtomicU64,
    /// Provider errors in the last batch.
    pub last_sync_provider_errors: AtomicU64,
    /// Completed batches since startup.
    pub sync_runs: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sync_running(&self, v: bool) {
        self.sync_running.store(v, Ordering::Relaxed);
    }

    pub fn record_sync(&self, report: &SyncReport) {
        self.last_sync_at.store(report.finished_at, Ordering::Relaxed);
        self.last_sync_processed
            .store(report.processed as u64, Ordering::Relaxed);
        self.last_sync_provider_errors
            .store(u64::from(report.provider_errors), Ordering::Relaxed);
        self.sync_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sync_running(&self) -> bool {
        self.sync_running.load(Ordering::Relaxed)
    }

    pub fn last_sync_at(&self) -> i64 {
        self.last_sync_at.load(Ordering::Relaxed)
    }

    pub fn last_sync_processed(&self) -> u64 {
        self.last_sync_processed.load(Ordering::Relaxed)
    }

    pub fn last_sync_provider_errors(&self) -> u64 {
        self.last_sync_provider_errors.load(Ordering::Relaxed)
    }

    pub fn sync_runs(&self) -> u64 {
        self.sync_runs.load(Ordering::Relaxed)
    }
}
