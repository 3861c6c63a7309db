//! Background removal of stale sessions

use crate::metrics::EngineMetrics;
use crate::session::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
    /// Sessions left unvisited because a stop was requested mid-sweep
    pub abandoned: usize,
}

/// Visit every session once and remove those past the inactivity threshold
///
/// Expiry is re-checked under each session's lock, so a spin that lands
/// between listing and removal keeps its session alive. When `stop` is given
/// and flips to `true`, the remaining sessions are left for the next sweep.
pub async fn sweep_once(
    store: &Arc<SessionStore>,
    metrics: &EngineMetrics,
    stop: Option<&watch::Receiver<bool>>,
) -> SweepReport {
    let ids = store.session_ids();
    let mut report = SweepReport::default();

    for (visited, id) in ids.iter().enumerate() {
        if stop.map_or(false, |rx| *rx.borrow()) {
            report.abandoned = ids.len() - visited;
            break;
        }
        report.scanned += 1;
        match store.expire_if_stale(id).await {
            Ok(true) => report.removed += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to remove expired session");
                report.failed += 1;
            }
        }
    }

    metrics.record_sessions_reaped(report.removed as u64);
    report
}

/// Periodic sweeper; the first sweep runs one interval after spawning
pub struct ExpiryReaper {
    store: Arc<SessionStore>,
    metrics: Arc<EngineMetrics>,
    stop: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryReaper {
    pub fn spawn(
        store: Arc<SessionStore>,
        metrics: Arc<EngineMetrics>,
        interval: Duration,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let interval = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(Self::run(store.clone(), metrics.clone(), interval, stop_rx));
        info!(interval_secs = interval.as_secs_f64(), "Expiry reaper started");

        Self {
            store,
            metrics,
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    async fn run(
        store: Arc<SessionStore>,
        metrics: Arc<EngineMetrics>,
        interval: Duration,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval_at(Instant::now() + interval, interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    let report = sweep_once(&store, &metrics, Some(&stop_rx)).await;
                    if report.removed > 0 || report.failed > 0 {
                        info!(
                            scanned = report.scanned,
                            removed = report.removed,
                            failed = report.failed,
                            abandoned = report.abandoned,
                            "Expiry sweep finished"
                        );
                    } else {
                        debug!(scanned = report.scanned, "Expiry sweep found nothing to remove");
                    }
                }
            }
        }
        debug!("Expiry reaper stopped");
    }

    /// Sweep now, outside the schedule
    pub async fn sweep_once(&self) -> SweepReport {
        let stop_rx = self.stop.subscribe();
        sweep_once(&self.store, &self.metrics, Some(&stop_rx)).await
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// Signal the task to stop and wait for it to finish
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiry reaper task ended abnormally");
            }
            info!("Expiry reaper shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::store::StoreSettings;
    use crate::storage::MemorySnapshotStore;

    async fn store_with_clock() -> (Arc<SessionStore>, Arc<ManualClock>, Arc<EngineMetrics>) {
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(EngineMetrics::new());
        let store = SessionStore::open(
            Arc::new(MemorySnapshotStore::new()),
            clock.clone(),
            metrics.clone(),
            StoreSettings::default(),
        )
        .await
        .unwrap();
        (store, clock, metrics)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_sessions() {
        let (store, clock, metrics) = store_with_clock().await;
        let old = store.create(100).await.unwrap();
        clock.advance(chrono::Duration::hours(20));
        let fresh = store.create(100).await.unwrap();
        clock.advance(chrono::Duration::hours(5));

        let report = sweep_once(&store, &metrics, None).await;
        assert_eq!(report, SweepReport { scanned: 2, removed: 1, failed: 0, abandoned: 0 });
        assert!(store.get(&old.id).await.is_err());
        assert!(store.get(&fresh.id).await.is_ok());
        assert_eq!(metrics.snapshot().sessions_reaped, 1);
    }

    #[tokio::test]
    async fn test_stopped_sweep_abandons_remaining() {
        let (store, clock, metrics) = store_with_clock().await;
        for _ in 0..3 {
            store.create(100).await.unwrap();
        }
        clock.advance(chrono::Duration::hours(30));

        let (_tx, rx) = watch::channel(true);
        let report = sweep_once(&store, &metrics, Some(&rx)).await;
        assert_eq!(report.scanned, 0);
        assert_eq!(report.abandoned, 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_reaper_runs_and_shuts_down() {
        let (store, clock, metrics) = store_with_clock().await;
        store.create(100).await.unwrap();
        clock.advance(chrono::Duration::hours(25));

        let reaper = ExpiryReaper::spawn(store.clone(), metrics, Duration::from_millis(20));
        assert!(reaper.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.is_empty());

        tokio::time::timeout(Duration::from_secs(1), reaper.shutdown()).await.unwrap();
        assert!(!reaper.is_running());
    }
}
