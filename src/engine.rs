//! `SlotEngine`: the public face of the crate
//!
//! Wires the probability configuration, session store, snapshot storage and
//! expiry reaper together and exposes the game operations.

use crate::clock::{Clock, SystemClock};
use crate::config::{self, EngineConfig, StorageBackend};
use crate::errors::{EngineError, EngineResult, StorageError};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::probability::{
    EntropySource, PayoutRule, ProbabilityConfig, ReelOutcome, RtpCalculator, RtpReport,
    SimulationReport, TableSnapshot, TableSpec, ThreadRngSource,
};
use crate::session::{
    sweep_once, ExpiryReaper, Session, SessionStatistics, SessionStore, StoreSettings, SweepReport,
};
use crate::storage::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Result of one settled spin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinOutcome {
    pub outcome: ReelOutcome,
    pub payout: u64,
    pub session: Session,
    /// Table version the spin was drawn and paid under
    pub config_version: u64,
    pub is_winner: bool,
}

/// Read-only view of the active table and its exact statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilitySnapshot {
    pub version: u64,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
    pub reel_count: usize,
    pub symbols: Vec<String>,
    pub weights: Vec<u32>,
    pub multipliers: BTreeMap<String, u32>,
    pub probabilities: Vec<f64>,
    pub theoretical_rtp: f64,
    pub win_probability: f64,
    pub combinations: u64,
}

impl From<&TableSnapshot> for ProbabilitySnapshot {
    fn from(snapshot: &TableSnapshot) -> Self {
        let table = &snapshot.table;
        Self {
            version: snapshot.version,
            fingerprint: snapshot.fingerprint.clone(),
            updated_at: snapshot.updated_at,
            reel_count: table.reel_count(),
            symbols: table.symbols().to_vec(),
            weights: table.weights().to_vec(),
            multipliers: table.multipliers(),
            probabilities: table.probabilities(),
            theoretical_rtp: snapshot.rtp.theoretical_rtp,
            win_probability: snapshot.rtp.win_probability,
            combinations: snapshot.rtp.combinations,
        }
    }
}

/// Builder with optional overrides for storage, clock and entropy
pub struct EngineBuilder {
    config: EngineConfig,
    storage: Option<Arc<dyn SnapshotStore>>,
    clock: Option<Arc<dyn Clock>>,
    entropy: Option<Arc<dyn EntropySource>>,
    reaper: bool,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            storage: None,
            clock: None,
            entropy: None,
            reaper: true,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn SnapshotStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = Some(entropy);
        self
    }

    /// Skip the background reaper; sweeps then only happen via `sweep_expired`
    pub fn without_reaper(mut self) -> Self {
        self.reaper = false;
        self
    }

    pub async fn build(self) -> EngineResult<SlotEngine> {
        config::validate(&self.config)?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => open_storage(&self.config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let entropy = self.entropy.unwrap_or_else(|| Arc::new(ThreadRngSource));
        let metrics = Arc::new(EngineMetrics::new());

        let probability = ProbabilityConfig::new(
            &self.config.probability.table,
            self.config.game.reel_count,
            self.config.probability.limits.clone(),
            self.config.probability.payout_rule()?,
        )?;

        let sessions = SessionStore::open(
            storage,
            clock,
            metrics.clone(),
            StoreSettings::from_config(&self.config),
        )
        .await?;

        let reaper = self.reaper.then(|| {
            ExpiryReaper::spawn(
                sessions.clone(),
                metrics.clone(),
                self.config.session.reap_interval(),
            )
        });

        info!(
            reels = self.config.game.reel_count,
            backend = %self.config.storage.backend,
            sessions = sessions.len(),
            "Slot engine ready"
        );

        Ok(SlotEngine {
            config: self.config,
            probability,
            sessions,
            reaper,
            entropy,
            metrics,
        })
    }
}

fn open_storage(config: &EngineConfig) -> Result<Arc<dyn SnapshotStore>, StorageError> {
    match config.storage.backend {
        StorageBackend::File => Ok(Arc::new(FileSnapshotStore::open(&config.storage.data_dir)?)),
        StorageBackend::Memory => Ok(Arc::new(MemorySnapshotStore::new())),
        #[cfg(feature = "rocksdb")]
        StorageBackend::Rocksdb => Ok(Arc::new(crate::storage::RocksSnapshotStore::open(
            &config.storage.data_dir,
        )?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::Rocksdb => Err(StorageError::Backend(
            "built without the rocksdb feature".to_string(),
        )),
    }
}

pub struct SlotEngine {
    config: EngineConfig,
    probability: ProbabilityConfig,
    sessions: Arc<SessionStore>,
    reaper: Option<ExpiryReaper>,
    entropy: Arc<dyn EntropySource>,
    metrics: Arc<EngineMetrics>,
}

impl SlotEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn create_session(&self, initial_credits: u64) -> EngineResult<Session> {
        self.sessions.create(initial_credits).await
    }

    /// Create a session funded with the configured `game.initial_credits`
    pub async fn create_default_session(&self) -> EngineResult<Session> {
        self.create_session(self.config.game.initial_credits).await
    }

    pub async fn create_session_for(
        &self,
        owner: &str,
        initial_credits: u64,
    ) -> EngineResult<Session> {
        self.sessions.create_for_owner(owner, initial_credits).await
    }

    pub async fn create_default_session_for(&self, owner: &str) -> EngineResult<Session> {
        self.create_session_for(owner, self.config.game.initial_credits)
            .await
    }

    pub async fn get_session(&self, id: &str) -> EngineResult<Session> {
        self.sessions.get(id).await
    }

    fn validate_wager(&self, wager: u64) -> EngineResult<()> {
        let game = &self.config.game;
        if wager == 0 {
            return Err(EngineError::InvalidWager {
                wager,
                reason: "wager must be positive".to_string(),
            });
        }
        if wager < game.min_bet || wager > game.max_bet {
            return Err(EngineError::InvalidWager {
                wager,
                reason: format!("wager must be between {} and {}", game.min_bet, game.max_bet),
            });
        }
        Ok(())
    }

    /// Draw, pay and persist one spin for a session
    pub async fn apply_spin(&self, id: &str, wager: u64) -> EngineResult<SpinOutcome> {
        self.validate_wager(wager)?;

        let snapshot = self.probability.snapshot();
        let rule = self.probability.rule().clone();
        let entropy = self.entropy.clone();

        let ((outcome, payout, config_version), session) = self
            .sessions
            .apply_spin(id, wager, move |session| {
                let outcome = entropy.draw(&snapshot.sampler);
                let payout = rule.payout(&snapshot.table, &outcome, wager).map_err(|e| {
                    error!(
                        session_id = %session.id,
                        version = snapshot.version,
                        error = %e,
                        "Drawn outcome does not match the active table"
                    );
                    e
                })?;
                Ok(((outcome, payout, snapshot.version), payout))
            })
            .await?;

        Ok(SpinOutcome {
            outcome,
            payout,
            session,
            config_version,
            is_winner: payout > 0,
        })
    }

    pub fn probability_snapshot(&self) -> ProbabilitySnapshot {
        ProbabilitySnapshot::from(self.probability.snapshot().as_ref())
    }

    /// Validate and install a new table; the old one stays active on error
    pub fn update_probability_config(&self, spec: &TableSpec) -> EngineResult<ProbabilitySnapshot> {
        let snapshot = self.probability.update(spec)?;
        self.metrics.record_config_update();
        Ok(ProbabilitySnapshot::from(snapshot.as_ref()))
    }

    /// Install a new table only if the active version is still `expected_version`
    pub fn compare_and_update_probability_config(
        &self,
        expected_version: u64,
        spec: &TableSpec,
    ) -> EngineResult<ProbabilitySnapshot> {
        let snapshot = self.probability.compare_and_update(expected_version, spec)?;
        self.metrics.record_config_update();
        Ok(ProbabilitySnapshot::from(snapshot.as_ref()))
    }

    pub fn subscribe_probability(&self) -> watch::Receiver<Arc<TableSnapshot>> {
        self.probability.subscribe()
    }

    pub fn payout_rule(&self) -> &PayoutRule {
        self.probability.rule()
    }

    pub async fn recent_sessions(&self, since: DateTime<Utc>, limit: usize) -> Vec<Session> {
        self.sessions.recent_sessions(since, limit).await
    }

    pub async fn delete_session(&self, id: &str) -> EngineResult<()> {
        self.sessions.delete(id).await
    }

    pub async fn session_statistics(&self) -> SessionStatistics {
        self.sessions.statistics().await
    }

    pub async fn active_sessions(&self) -> Vec<Session> {
        self.sessions.active_sessions().await
    }

    pub async fn sessions_for_owner(&self, owner: &str) -> Vec<Session> {
        self.sessions.sessions_for_owner(owner).await
    }

    /// Monte Carlo run against the active table, for comparison with `rtp_report`
    pub async fn simulate(&self, spins: u64, wager: u64) -> EngineResult<SimulationReport> {
        let sim = &self.config.simulation;
        if spins < sim.min_spins || spins > sim.max_spins {
            return Err(EngineError::InvalidSimulation(format!(
                "spin count {} outside {}..={}",
                spins, sim.min_spins, sim.max_spins
            )));
        }
        if wager == 0 {
            return Err(EngineError::InvalidSimulation("wager must be positive".to_string()));
        }

        let snapshot = self.probability.snapshot();
        let mut rng = StdRng::from_entropy();
        let report = RtpCalculator::new(&snapshot.table, self.probability.rule())
            .simulate(&snapshot.sampler, &mut rng, spins, wager, sim.batch_size)
            .await?;
        info!(
            spins,
            actual_rtp = report.actual_rtp,
            theoretical_rtp = report.theoretical_rtp,
            "Simulation finished"
        );
        Ok(report)
    }

    /// Exact statistics of the active table
    pub fn rtp_report(&self) -> RtpReport {
        self.probability.snapshot().rtp.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn sweep_expired(&self) -> SweepReport {
        match &self.reaper {
            Some(reaper) => reaper.sweep_once().await,
            None => sweep_once(&self.sessions, &self.metrics, None).await,
        }
    }

    /// Stop the reaper and wait for in-flight session mutations to finish
    pub async fn shutdown(&self) {
        if let Some(reaper) = &self.reaper {
            reaper.shutdown().await;
        }
        self.sessions.drain().await;
        info!("Slot engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    async fn engine() -> SlotEngine {
        engine_with(ConfigBuilder::new().build()).await
    }

    async fn engine_with(mut config: EngineConfig) -> SlotEngine {
        config.storage.backend = StorageBackend::Memory;
        SlotEngine::builder(config).without_reaper().build().await.unwrap()
    }

    #[tokio::test]
    async fn test_default_session_uses_configured_credits() {
        let mut config = ConfigBuilder::new().build();
        config.game.initial_credits = 250;
        let engine = engine_with(config).await;

        let session = engine.create_default_session().await.unwrap();
        assert_eq!(session.credits, 250);
        assert_eq!(session.owner, None);

        let owned = engine.create_default_session_for("erin").await.unwrap();
        assert_eq!(owned.credits, 250);
        assert_eq!(owned.owner.as_deref(), Some("erin"));
    }

    #[tokio::test]
    async fn test_wager_bounds() {
        let engine = engine().await;
        let session = engine.create_session(100).await.unwrap();
        assert!(matches!(
            engine.apply_spin(&session.id, 0).await,
            Err(EngineError::InvalidWager { .. })
        ));
        assert!(matches!(
            engine.apply_spin(&session.id, 101).await,
            Err(EngineError::InvalidWager { .. })
        ));
        assert!(engine.apply_spin(&session.id, 100).await.is_ok());
    }

    #[tokio::test]
    async fn test_spin_reports_config_version() {
        let engine = engine().await;
        let session = engine.create_session(100).await.unwrap();
        let spin = engine.apply_spin(&session.id, 1).await.unwrap();
        assert_eq!(spin.config_version, 1);
        assert_eq!(spin.outcome.len(), 3);
        assert_eq!(spin.session.credits, 99 + spin.payout);
        assert_eq!(spin.is_winner, spin.payout > 0);
    }

    #[tokio::test]
    async fn test_probability_snapshot_classic() {
        let engine = engine().await;
        let snap = engine.probability_snapshot();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.combinations, 343);
        assert_eq!(snap.fingerprint.len(), 64);
        assert!((snap.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((snap.theoretical_rtp - 195.706).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_simulation_bounds() {
        let engine = engine().await;
        assert!(matches!(
            engine.simulate(10, 1).await,
            Err(EngineError::InvalidSimulation(_))
        ));
        assert!(matches!(
            engine.simulate(100_001, 1).await,
            Err(EngineError::InvalidSimulation(_))
        ));
        let report = engine.simulate(1000, 2).await.unwrap();
        assert_eq!(report.spins, 1000);
        assert_eq!(report.total_bet, 2000);
    }

    #[tokio::test]
    async fn test_rejected_update_keeps_table() {
        let engine = engine().await;
        let bad = TableSpec::new(vec!["A", "A"], vec![30, 30], vec![("A", 2)]);
        assert!(matches!(
            engine.update_probability_config(&bad),
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(engine.probability_snapshot().version, 1);
        assert_eq!(engine.metrics().config_updates, 0);
    }
}
