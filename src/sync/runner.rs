use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::CHANNEL_CAPACITY;
use crate::error::{AppError, Result};
use crate::sync::{SyncReport, TieredDiscoveryJob};

/// On-demand sync request. `reply` receives the report when the batch ends.
pub struct SyncRequest {
    pub reply: Option<oneshot::Sender<SyncReport>>,
}

/// Cloneable control surface for a running [`SyncRunner`].
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncRequest>,
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl SyncHandle {
    /// Queue a batch and wait for its report.
    pub async fn run_now(&self) -> Result<SyncReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(SyncRequest { reply: Some(reply) })
            .map_err(|e| AppError::ChannelSend(format!("sync trigger: {e}")))?;
        rx.await
            .map_err(|_| AppError::ChannelSend("sync runner stopped before replying".to_string()))
    }

    /// Queue a batch without waiting.
    pub fn trigger(&self) -> Result<()> {
        self.tx
            .try_send(SyncRequest { reply: None })
            .map_err(|e| AppError::ChannelSend(format!("sync trigger: {e}")))
    }

    /// Abort the batch in flight, if any. Returns whether one was running.
    pub fn cancel_current(&self) -> bool {
        let Ok(current) = self.current.lock() else {
            return false;
        };
        match current.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Runs [`TieredDiscoveryJob`] on a fixed interval and whenever a
/// [`SyncHandle`] asks. Batches never overlap. Cancelling `shutdown` aborts
/// the batch in flight and ends the loop.
pub struct SyncRunner {
    job: Arc<TieredDiscoveryJob>,
    every: Duration,
    rx: mpsc::Receiver<SyncRequest>,
    current: Arc<Mutex<Option<CancellationToken>>>,
    shutdown: CancellationToken,
    health: Arc<HealthState>,
}

impl SyncRunner {
    pub fn new(
        job: Arc<TieredDiscoveryJob>,
        every: Duration,
        shutdown: CancellationToken,
        health: Arc<HealthState>,
    ) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let current = Arc::new(Mutex::new(None));
        let handle = SyncHandle {
            tx,
            current: Arc::clone(&current),
        };
        let runner = Self {
            job,
            every,
            rx,
            current,
            shutdown,
            health,
        };
        (runner, handle)
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reply = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Sync runner: shutdown requested");
                    break;
                }
                _ = ticker.tick() => None,
                req = self.rx.recv() => match req {
                    Some(req) => req.reply,
                    None => {
                        info!("Sync runner: all handles dropped");
                        break;
                    }
                },
            };

            let report = self.run_batch().await;
            match (reply, report) {
                (Some(reply), Some(report)) => {
                    if reply.send(report).is_err() {
                        warn!("Sync requester went away before the report was ready");
                    }
                }
                (Some(_), None) => warn!("Sync request dropped: batch failed"),
                _ => {}
            }
        }
        info!("Sync runner stopped");
    }

    async fn run_batch(&self) -> Option<SyncReport> {
        let token = self.shutdown.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }
        self.health.set_sync_running(true);

        let result = self.job.run(&token).await;

        self.health.set_sync_running(false);
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }

        match result {
            Ok(report) => {
                self.health.record_sync(&report);
                Some(report)
            }
            Err(e) => {
                error!("Discovery run failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::tests::memory_store;
    use crate::sync::discovery::tests::{fast_config, job, seed, MockProvider};
    use serde_json::json;

    #[tokio::test]
    async fn run_now_returns_report_and_updates_health() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").with_payload("A1", json!({"price": 11.0})));
        let alternate = Arc::new(MockProvider::named("alt"));
        let job = Arc::new(job(&store, primary, alternate, fast_config()));

        let shutdown = CancellationToken::new();
        let health = Arc::new(HealthState::new());
        let (runner, handle) = SyncRunner::new(job, Duration::from_secs(3600), shutdown.clone(), Arc::clone(&health));
        let task = tokio::spawn(runner.run());

        // The first interval tick fires immediately; this request queues behind it.
        let report = handle.run_now().await.unwrap();
        assert!(!report.cancelled);
        assert!(health.sync_runs() >= 1);
        assert!(!health.sync_running());
        assert!(!handle.cancel_current());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_batch() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").hanging());
        let alternate = Arc::new(MockProvider::named("alt"));
        let config = crate::sync::DiscoveryConfig {
            provider_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let job = Arc::new(job(&store, primary, alternate, config));

        let shutdown = CancellationToken::new();
        let health = Arc::new(HealthState::new());
        let (runner, _handle) = SyncRunner::new(job, Duration::from_secs(3600), shutdown.clone(), Arc::clone(&health));
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(health.sync_running());
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should stop promptly")
            .unwrap();
        assert!(!health.sync_running());
    }

    #[tokio::test]
    async fn cancel_current_stops_only_the_batch() {
        let store = memory_store().await;
        seed(&store, "b1", Some("A1")).await;
        let primary = Arc::new(MockProvider::named("primary").hanging());
        let alternate = Arc::new(MockProvider::named("alt"));
        let config = crate::sync::DiscoveryConfig {
            provider_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let job = Arc::new(job(&store, primary, alternate, config));

        let shutdown = CancellationToken::new();
        let health = Arc::new(HealthState::new());
        let (runner, handle) = SyncRunner::new(job, Duration::from_secs(3600), shutdown.clone(), Arc::clone(&health));
        let task = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.cancel_current());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(health.sync_runs(), 1);
        assert!(!task.is_finished());

        shutdown.cancel();
        task.await.unwrap();
    }
}
