//! Match-count payout rule
//!
//! The most frequent symbol in an outcome wins when it appears at least
//! twice. Ties on count go to the higher multiplier, then to the symbol
//! listed first in the table. Payout is
//! `wager * multiplier(winner) * bonus(count)`; every factor is an integer,
//! so the result is exact and floor rounding never has to discard anything.

use crate::errors::{ConfigError, EngineError, EngineResult};
use crate::probability::sampler::ReelOutcome;
use crate::probability::table::SymbolTable;
use serde::{Deserialize, Serialize};

/// Minimum number of matching symbols for any payout
pub const MIN_MATCH: usize = 2;

/// Winning symbol and its match count for one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub symbol_index: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPayoutRule")]
pub struct PayoutRule {
    /// Bonus for 2, 3, 4, ... matches; larger counts keep the last tier
    bonus_tiers: Vec<u32>,
}

/// Wire shape of `PayoutRule` before tier validation
#[derive(Deserialize)]
struct RawPayoutRule {
    bonus_tiers: Vec<u32>,
}

impl TryFrom<RawPayoutRule> for PayoutRule {
    type Error = ConfigError;

    fn try_from(raw: RawPayoutRule) -> Result<Self, Self::Error> {
        Self::with_tiers(raw.bonus_tiers)
    }
}

impl Default for PayoutRule {
    fn default() -> Self {
        Self {
            bonus_tiers: vec![1, 2, 4, 8],
        }
    }
}

impl PayoutRule {
    pub fn with_tiers(bonus_tiers: Vec<u32>) -> Result<Self, ConfigError> {
        let non_decreasing = bonus_tiers.windows(2).all(|w| w[0] <= w[1]);
        if bonus_tiers.is_empty() || bonus_tiers[0] == 0 || !non_decreasing {
            return Err(ConfigError::InvalidBonusTiers);
        }
        Ok(Self { bonus_tiers })
    }

    pub fn bonus_tiers(&self) -> &[u32] {
        &self.bonus_tiers
    }

    /// Bonus factor for a match count; zero below `MIN_MATCH`
    pub fn bonus(&self, count: usize) -> u32 {
        if count < MIN_MATCH {
            return 0;
        }
        self.bonus_tiers
            .get(count - MIN_MATCH)
            .or_else(|| self.bonus_tiers.last())
            .copied()
            .unwrap_or(0)
    }

    /// Resolve an outcome to table indices, rejecting any mismatch
    pub fn resolve(&self, table: &SymbolTable, outcome: &ReelOutcome) -> EngineResult<Vec<usize>> {
        if outcome.len() != table.reel_count() {
            return Err(EngineError::InvalidOutcome(format!(
                "expected {} symbols, got {}",
                table.reel_count(),
                outcome.len()
            )));
        }
        outcome
            .symbols
            .iter()
            .map(|s| {
                table
                    .index_of(s)
                    .ok_or_else(|| EngineError::InvalidOutcome(format!("unknown symbol '{}'", s)))
            })
            .collect()
    }

    pub fn payout(
        &self,
        table: &SymbolTable,
        outcome: &ReelOutcome,
        wager: u64,
    ) -> EngineResult<u64> {
        let indices = self.resolve(table, outcome)?;
        Ok(self.payout_indices(table, &indices, wager))
    }

    /// Payout for already-resolved indices; used by enumeration
    pub fn payout_indices(&self, table: &SymbolTable, indices: &[usize], wager: u64) -> u64 {
        match self.winning_match(table, indices) {
            Some(m) => wager
                .saturating_mul(u64::from(table.multiplier_at(m.symbol_index)))
                .saturating_mul(u64::from(self.bonus(m.count))),
            None => 0,
        }
    }

    pub fn winning_match(&self, table: &SymbolTable, indices: &[usize]) -> Option<Match> {
        let mut counts = vec![0usize; table.len()];
        for &i in indices {
            counts[i] += 1;
        }

        let mut best: Option<Match> = None;
        for (symbol_index, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let richer =
                        table.multiplier_at(symbol_index) > table.multiplier_at(b.symbol_index);
                    count > b.count || (count == b.count && richer)
                }
            };
            if better {
                best = Some(Match { symbol_index, count });
            }
        }

        best.filter(|m| m.count >= MIN_MATCH)
    }
}
