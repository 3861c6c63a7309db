//! Exact RTP by exhaustive enumeration, plus Monte Carlo comparison
//!
//! Enumeration visits all |symbols|^reels outcomes. The table validator caps
//! that product, so the cost here is bounded by `TableLimits::max_combinations`.

use crate::errors::{EngineError, EngineResult};
use crate::probability::payout::PayoutRule;
use crate::probability::sampler::WeightedSampler;
use crate::probability::table::SymbolTable;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-symbol breakdown of the configured distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub weight: u32,
    pub probability: f64,
    pub payout_multiplier: u32,
    pub expected_contribution: f64,
    /// 1 = most frequent
    pub frequency_rank: usize,
}

/// Result of one full enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpReport {
    /// Expected payout per unit wager, as a percentage
    pub theoretical_rtp: f64,
    /// Probability that a spin pays anything, as a percentage
    pub win_probability: f64,
    /// Total probability mass visited; 1.0 up to rounding
    pub probability_mass: f64,
    pub combinations: u64,
    /// Probability (percentage) of each winning match count
    pub match_probabilities: BTreeMap<usize, f64>,
    pub symbols: Vec<SymbolAnalysis>,
}

/// Outcome of a bounded Monte Carlo run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub spins: u64,
    pub wager: u64,
    pub total_bet: u64,
    pub total_payout: u64,
    pub net_result: i128,
    pub wins: u64,
    pub win_rate: f64,
    pub actual_rtp: f64,
    pub biggest_win: u64,
    pub average_win: f64,
    /// Count of winning spins keyed by payout / wager
    pub tier_histogram: BTreeMap<u64, u64>,
    pub theoretical_rtp: f64,
    pub rtp_difference: f64,
}

/// Pure calculator over an explicit table and rule
#[derive(Debug, Clone, Copy)]
pub struct RtpCalculator<'a> {
    table: &'a SymbolTable,
    rule: &'a PayoutRule,
}

impl<'a> RtpCalculator<'a> {
    pub fn new(table: &'a SymbolTable, rule: &'a PayoutRule) -> Self {
        Self { table, rule }
    }

    pub fn theoretical_rtp(&self) -> f64 {
        self.report().theoretical_rtp
    }

    pub fn win_probability(&self) -> f64 {
        self.report().win_probability
    }

    pub fn report(&self) -> RtpReport {
        let probabilities = self.table.probabilities();
        let reels = self.table.reel_count();
        let n = self.table.len();

        let mut expected_payout = 0.0;
        let mut win_mass = 0.0;
        let mut mass = 0.0;
        let mut combinations = 0u64;
        let mut match_mass: BTreeMap<usize, f64> = BTreeMap::new();

        // Odometer over symbol indices, last reel fastest
        let mut indices = vec![0usize; reels];
        loop {
            let p: f64 = indices.iter().map(|&i| probabilities[i]).product();
            mass += p;
            combinations += 1;

            if let Some(m) = self.rule.winning_match(self.table, &indices) {
                let payout = self.rule.payout_indices(self.table, &indices, 1);
                expected_payout += p * payout as f64;
                win_mass += p;
                *match_mass.entry(m.count).or_insert(0.0) += p * 100.0;
            }

            let mut reel = reels;
            loop {
                if reel == 0 {
                    return self.finish(expected_payout, win_mass, mass, combinations, match_mass);
                }
                reel -= 1;
                indices[reel] += 1;
                if indices[reel] < n {
                    break;
                }
                indices[reel] = 0;
            }
        }
    }

    fn finish(
        &self,
        expected_payout: f64,
        win_mass: f64,
        mass: f64,
        combinations: u64,
        match_probabilities: BTreeMap<usize, f64>,
    ) -> RtpReport {
        let report = RtpReport {
            theoretical_rtp: expected_payout * 100.0,
            win_probability: win_mass * 100.0,
            probability_mass: mass,
            combinations,
            match_probabilities,
            symbols: self.symbol_analysis(),
        };
        tracing::debug!(
            rtp = report.theoretical_rtp,
            win_probability = report.win_probability,
            combinations,
            "Theoretical RTP calculated"
        );
        report
    }

    pub fn symbol_analysis(&self) -> Vec<SymbolAnalysis> {
        let probabilities = self.table.probabilities();
        let mut ranked = probabilities.clone();
        ranked.sort_by(|a, b| b.total_cmp(a));

        probabilities
            .iter()
            .enumerate()
            .map(|(i, &probability)| {
                let multiplier = self.table.multiplier_at(i);
                SymbolAnalysis {
                    symbol: self.table.symbol(i).to_string(),
                    weight: self.table.weights()[i],
                    probability,
                    payout_multiplier: multiplier,
                    expected_contribution: probability * f64::from(multiplier),
                    frequency_rank: ranked.iter().position(|p| *p == probability).unwrap_or(0) + 1,
                }
            })
            .collect()
    }

    /// Monte Carlo run in batches, yielding to the scheduler between batches
    pub async fn simulate<R: Rng + Send>(
        &self,
        sampler: &WeightedSampler,
        rng: &mut R,
        spins: u64,
        wager: u64,
        batch_size: u64,
    ) -> EngineResult<SimulationReport> {
        if spins == 0 {
            return Err(EngineError::InvalidSimulation("spin count must be positive".to_string()));
        }
        if wager == 0 {
            return Err(EngineError::InvalidSimulation("wager must be positive".to_string()));
        }
        let batch_size = batch_size.max(1);

        let mut tally = Tally::default();
        let mut remaining = spins;
        while remaining > 0 {
            let batch = remaining.min(batch_size);
            self.run_batch(sampler, rng, batch, wager, &mut tally);
            remaining -= batch;
            if remaining > 0 {
                tokio::task::yield_now().await;
            }
        }

        Ok(tally.into_report(spins, wager, self.theoretical_rtp()))
    }

    /// Same as `simulate` without yielding; for benchmarks and offline tools
    pub fn simulate_blocking<R: Rng>(
        &self,
        sampler: &WeightedSampler,
        rng: &mut R,
        spins: u64,
        wager: u64,
    ) -> EngineResult<SimulationReport> {
        if spins == 0 || wager == 0 {
            return Err(EngineError::InvalidSimulation(
                "spin count and wager must be positive".to_string(),
            ));
        }
        let mut tally = Tally::default();
        self.run_batch(sampler, rng, spins, wager, &mut tally);
        Ok(tally.into_report(spins, wager, self.theoretical_rtp()))
    }

    fn run_batch<R: Rng>(
        &self,
        sampler: &WeightedSampler,
        rng: &mut R,
        spins: u64,
        wager: u64,
        tally: &mut Tally,
    ) {
        for _ in 0..spins {
            let indices = sampler.draw_indices(rng);
            let payout = self.rule.payout_indices(self.table, &indices, wager);
            tally.record(payout, wager);
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    total_payout: u64,
    wins: u64,
    biggest_win: u64,
    histogram: BTreeMap<u64, u64>,
}

impl Tally {
    fn record(&mut self, payout: u64, wager: u64) {
        if payout == 0 {
            return;
        }
        self.total_payout = self.total_payout.saturating_add(payout);
        self.wins += 1;
        self.biggest_win = self.biggest_win.max(payout);
        *self.histogram.entry(payout / wager).or_insert(0) += 1;
    }

    fn into_report(self, spins: u64, wager: u64, theoretical_rtp: f64) -> SimulationReport {
        let total_bet = spins.saturating_mul(wager);
        let actual_rtp = self.total_payout as f64 / total_bet as f64 * 100.0;
        SimulationReport {
            spins,
            wager,
            total_bet,
            total_payout: self.total_payout,
            net_result: i128::from(self.total_payout) - i128::from(total_bet),
            wins: self.wins,
            win_rate: self.wins as f64 / spins as f64 * 100.0,
            actual_rtp,
            biggest_win: self.biggest_win,
            average_win: if self.wins > 0 {
                self.total_payout as f64 / self.wins as f64
            } else {
                0.0
            },
            tier_histogram: self.histogram,
            theoretical_rtp,
            rtp_difference: (theoretical_rtp - actual_rtp).abs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probability::table::{TableLimits, TableSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_symbol_table() -> SymbolTable {
        // Weight sum bounds are relaxed so [1, 1] is accepted
        let limits = TableLimits {
            min_weight_sum: 1,
            ..TableLimits::default()
        };
        let spec = TableSpec::new(vec!["A", "B"], vec![1, 1], vec![("A", 10), ("B", 5)]);
        SymbolTable::validate(&spec, 2, &limits).unwrap()
    }

    #[test]
    fn test_two_symbol_exact_rtp() {
        let table = two_symbol_table();
        let rule = PayoutRule::default();
        let report = RtpCalculator::new(&table, &rule).report();
        assert_eq!(report.combinations, 4);
        assert!((report.theoretical_rtp - 375.0).abs() < 1e-9);
        assert!((report.win_probability - 50.0).abs() < 1e-9);
        assert!((report.probability_mass - 1.0).abs() < 1e-12);
        assert!((report.match_probabilities[&2] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_classic_table_rtp() {
        let table =
            SymbolTable::validate(&TableSpec::classic(), 3, &TableLimits::default()).unwrap();
        let rule = PayoutRule::default();
        let calc = RtpCalculator::new(&table, &rule);
        assert!((calc.theoretical_rtp() - 195.706).abs() < 1e-6);
        assert!((calc.win_probability() - 54.808).abs() < 1e-6);
    }

    #[test]
    fn test_single_reel_never_pays() {
        let table =
            SymbolTable::validate(&TableSpec::classic(), 1, &TableLimits::default()).unwrap();
        let rule = PayoutRule::default();
        let report = RtpCalculator::new(&table, &rule).report();
        assert_eq!(report.combinations, 7);
        assert_eq!(report.theoretical_rtp, 0.0);
        assert!(report.match_probabilities.is_empty());
    }

    #[test]
    fn test_symbol_analysis_ranks() {
        let table =
            SymbolTable::validate(&TableSpec::classic(), 3, &TableLimits::default()).unwrap();
        let rule = PayoutRule::default();
        let analysis = RtpCalculator::new(&table, &rule).symbol_analysis();
        assert_eq!(analysis[0].frequency_rank, 1);
        assert_eq!(analysis[6].frequency_rank, 7);
        assert!((analysis[6].expected_contribution - 0.02 * 50.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_simulation_tracks_theory() {
        let table =
            SymbolTable::validate(&TableSpec::classic(), 3, &TableLimits::default()).unwrap();
        let rule = PayoutRule::default();
        let sampler = WeightedSampler::new(&table).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);
        let report = RtpCalculator::new(&table, &rule)
            .simulate(&sampler, &mut rng, 50_000, 2, 1_000)
            .await
            .unwrap();

        assert_eq!(report.total_bet, 100_000);
        assert_eq!(report.tier_histogram.values().sum::<u64>(), report.wins);
        assert!(report.biggest_win <= 2 * 50 * 2);
        assert!(report.rtp_difference < 10.0, "difference {}", report.rtp_difference);
    }

    #[tokio::test]
    async fn test_simulation_rejects_zero_spins() {
        let table = two_symbol_table();
        let rule = PayoutRule::default();
        let sampler = WeightedSampler::new(&table).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let result = RtpCalculator::new(&table, &rule)
            .simulate(&sampler, &mut rng, 0, 1, 100)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidSimulation(_))));
    }
}
