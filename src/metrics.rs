//! Engine counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct EngineMetrics {
    start_time: Instant,
    spins: AtomicU64,
    wins: AtomicU64,
    wagered: AtomicU64,
    paid_out: AtomicU64,
    sessions_created: AtomicU64,
    sessions_deleted: AtomicU64,
    sessions_reaped: AtomicU64,
    config_updates: AtomicU64,
    persistence_retries: AtomicU64,
    persistence_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub spins: u64,
    pub wins: u64,
    pub wagered: u64,
    pub paid_out: u64,
    /// Realized return across all sessions, as a percentage
    pub observed_rtp: f64,
    pub sessions_created: u64,
    pub sessions_deleted: u64,
    pub sessions_reaped: u64,
    pub config_updates: u64,
    pub persistence_retries: u64,
    pub persistence_failures: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            spins: AtomicU64::new(0),
            wins: AtomicU64::new(0),
            wagered: AtomicU64::new(0),
            paid_out: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_deleted: AtomicU64::new(0),
            sessions_reaped: AtomicU64::new(0),
            config_updates: AtomicU64::new(0),
            persistence_retries: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
        }
    }

    pub fn record_spin(&self, wager: u64, payout: u64) {
        self.spins.fetch_add(1, Ordering::Relaxed);
        self.wagered.fetch_add(wager, Ordering::Relaxed);
        if payout > 0 {
            self.wins.fetch_add(1, Ordering::Relaxed);
            self.paid_out.fetch_add(payout, Ordering::Relaxed);
        }
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_deleted(&self) {
        self.sessions_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_reaped(&self, count: u64) {
        self.sessions_reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_config_update(&self) {
        self.config_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_retry(&self) {
        self.persistence_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_runtime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let wagered = self.wagered.load(Ordering::Relaxed);
        let paid_out = self.paid_out.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.total_runtime().as_secs(),
            spins: self.spins.load(Ordering::Relaxed),
            wins: self.wins.load(Ordering::Relaxed),
            wagered,
            paid_out,
            observed_rtp: if wagered > 0 {
                paid_out as f64 / wagered as f64 * 100.0
            } else {
                0.0
            },
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_deleted: self.sessions_deleted.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            config_updates: self.config_updates.load(Ordering::Relaxed),
            persistence_retries: self.persistence_retries.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
