//! Versioned copy-on-write probability configuration
//!
//! Readers take an `Arc<TableSnapshot>` and keep it for as long as they need
//! it; updates build a complete new snapshot off to the side and swap it in
//! with one store. A spin that started on version N finishes on version N.

use crate::errors::ConfigError;
use crate::probability::payout::PayoutRule;
use crate::probability::rtp::{RtpCalculator, RtpReport};
use crate::probability::sampler::WeightedSampler;
use crate::probability::table::{SymbolTable, TableLimits, TableSpec};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// One immutable configuration version with its derived statistics
#[derive(Debug)]
pub struct TableSnapshot {
    pub version: u64,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
    pub table: SymbolTable,
    pub sampler: WeightedSampler,
    pub rtp: RtpReport,
}

impl TableSnapshot {
    fn build(version: u64, table: SymbolTable, rule: &PayoutRule) -> Result<Self, ConfigError> {
        let sampler = WeightedSampler::new(&table)?;
        let rtp = RtpCalculator::new(&table, rule).report();
        Ok(Self {
            version,
            fingerprint: table.fingerprint(),
            updated_at: Utc::now(),
            table,
            sampler,
            rtp,
        })
    }
}

/// Shared owner of the active symbol table
pub struct ProbabilityConfig {
    current: watch::Sender<Arc<TableSnapshot>>,
    rule: PayoutRule,
    limits: TableLimits,
    reel_count: usize,
}

impl ProbabilityConfig {
    pub fn new(
        spec: &TableSpec,
        reel_count: usize,
        limits: TableLimits,
        rule: PayoutRule,
    ) -> Result<Self, ConfigError> {
        let table = SymbolTable::validate(spec, reel_count, &limits)?;
        let snapshot = TableSnapshot::build(1, table, &rule)?;
        info!(
            symbols = snapshot.table.len(),
            reels = reel_count,
            rtp = snapshot.rtp.theoretical_rtp,
            "Probability configuration initialized"
        );
        let (current, _) = watch::channel(Arc::new(snapshot));
        Ok(Self {
            current,
            rule,
            limits,
            reel_count,
        })
    }

    /// Current snapshot; cheap to clone and safe to hold across awaits
    pub fn snapshot(&self) -> Arc<TableSnapshot> {
        self.current.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.borrow().version
    }

    pub fn rule(&self) -> &PayoutRule {
        &self.rule
    }

    pub fn limits(&self) -> &TableLimits {
        &self.limits
    }

    pub fn reel_count(&self) -> usize {
        self.reel_count
    }

    /// Receive every snapshot published after this call
    pub fn subscribe(&self) -> watch::Receiver<Arc<TableSnapshot>> {
        self.current.subscribe()
    }

    pub fn validate(&self, spec: &TableSpec) -> Result<SymbolTable, ConfigError> {
        SymbolTable::validate(spec, self.reel_count, &self.limits)
    }

    /// Replace the active table; on error the previous table stays in place
    pub fn update(&self, spec: &TableSpec) -> Result<Arc<TableSnapshot>, ConfigError> {
        self.swap(spec, None)
    }

    /// Replace the active table only if it is still at `expected_version`
    pub fn compare_and_update(
        &self,
        expected_version: u64,
        spec: &TableSpec,
    ) -> Result<Arc<TableSnapshot>, ConfigError> {
        self.swap(spec, Some(expected_version))
    }

    fn swap(
        &self,
        spec: &TableSpec,
        expected_version: Option<u64>,
    ) -> Result<Arc<TableSnapshot>, ConfigError> {
        let table = self.validate(spec).map_err(|e| {
            warn!(error = %e, "Rejected probability configuration");
            e
        })?;
        // Version is provisional until the swap below assigns the real one
        let mut next = TableSnapshot::build(0, table, &self.rule)?;

        let mut outcome: Result<Arc<TableSnapshot>, ConfigError> =
            Err(ConfigError::VersionConflict {
                expected: expected_version.unwrap_or_default(),
                actual: 0,
            });
        self.current.send_if_modified(|current| {
            let actual = current.version;
            if let Some(expected) = expected_version {
                if expected != actual {
                    outcome = Err(ConfigError::VersionConflict { expected, actual });
                    return false;
                }
            }
            next.version = actual + 1;
            let next = Arc::new(next);
            *current = next.clone();
            outcome = Ok(next);
            true
        });

        if let Ok(snapshot) = &outcome {
            info!(
                version = snapshot.version,
                fingerprint = %snapshot.fingerprint,
                rtp = snapshot.rtp.theoretical_rtp,
                "Probability configuration updated"
            );
        }
        outcome
    }
}
