//! Validated symbol table
//!
//! `TableSpec` is the raw shape callers and config files provide.
//! `SymbolTable` can only be built from a spec through validation, so a
//! table in hand always satisfies every invariant below.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Unvalidated symbol/weight/multiplier input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub symbols: Vec<String>,
    pub weights: Vec<u32>,
    pub multipliers: BTreeMap<String, u32>,
}

impl TableSpec {
    pub fn new<S: Into<String>>(
        symbols: Vec<S>,
        weights: Vec<u32>,
        multipliers: impl IntoIterator<Item = (S, u32)>,
    ) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            weights,
            multipliers: multipliers.into_iter().map(|(s, m)| (s.into(), m)).collect(),
        }
    }

    /// Classic seven-symbol fruit table
    pub fn classic() -> Self {
        Self::new(
            vec!["🍒", "🍋", "🍊", "🍇", "🔔", "⭐", "💎"],
            vec![30, 25, 20, 15, 5, 3, 2],
            vec![
                ("🍒", 2),
                ("🍋", 3),
                ("🍊", 4),
                ("🍇", 5),
                ("🔔", 10),
                ("⭐", 20),
                ("💎", 50),
            ],
        )
    }
}

impl Default for TableSpec {
    fn default() -> Self {
        Self::classic()
    }
}

/// Administrative bounds applied on every validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLimits {
    pub min_weight_sum: u64,
    pub max_weight_sum: u64,
    pub max_multiplier: u32,
    /// Upper bound on |symbols|^reels, the cost of exact RTP enumeration
    pub max_combinations: u64,
}

impl Default for TableLimits {
    fn default() -> Self {
        Self {
            min_weight_sum: 50,
            max_weight_sum: 200,
            max_multiplier: 100,
            max_combinations: 1_000_000,
        }
    }
}

/// Validated symbol table for a fixed reel count
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<String>,
    weights: Vec<u32>,
    multipliers: Vec<u32>,
    reel_count: usize,
    total_weight: u64,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    /// Validate a spec against the limits and build the table
    pub fn validate(
        spec: &TableSpec,
        reel_count: usize,
        limits: &TableLimits,
    ) -> Result<Self, ConfigError> {
        if spec.symbols.is_empty() {
            return Err(ConfigError::EmptySymbols);
        }
        if reel_count == 0 {
            return Err(ConfigError::InvalidReelCount);
        }

        let mut seen = HashSet::with_capacity(spec.symbols.len());
        for symbol in &spec.symbols {
            if symbol.trim().is_empty() {
                return Err(ConfigError::EmptySymbolName);
            }
            if !seen.insert(symbol.as_str()) {
                return Err(ConfigError::DuplicateSymbol(symbol.clone()));
            }
        }

        if spec.weights.len() != spec.symbols.len() {
            return Err(ConfigError::LengthMismatch {
                symbols: spec.symbols.len(),
                weights: spec.weights.len(),
            });
        }
        for (symbol, weight) in spec.symbols.iter().zip(&spec.weights) {
            if *weight == 0 {
                return Err(ConfigError::NonPositiveWeight(symbol.clone()));
            }
        }

        let total_weight: u64 = spec.weights.iter().map(|w| u64::from(*w)).sum();
        if total_weight < limits.min_weight_sum || total_weight > limits.max_weight_sum {
            return Err(ConfigError::WeightSumOutOfRange {
                sum: total_weight,
                min: limits.min_weight_sum,
                max: limits.max_weight_sum,
            });
        }

        let mut multipliers = Vec::with_capacity(spec.symbols.len());
        for symbol in &spec.symbols {
            let value = *spec
                .multipliers
                .get(symbol)
                .ok_or_else(|| ConfigError::MissingMultiplier(symbol.clone()))?;
            if value == 0 || value > limits.max_multiplier {
                return Err(ConfigError::MultiplierOutOfRange {
                    symbol: symbol.clone(),
                    value,
                    max: limits.max_multiplier,
                });
            }
            multipliers.push(value);
        }
        if let Some(extra) = spec.multipliers.keys().find(|s| !seen.contains(s.as_str())) {
            return Err(ConfigError::UnknownMultiplier(extra.clone()));
        }

        let combinations = (spec.symbols.len() as u128).checked_pow(reel_count as u32);
        match combinations {
            Some(c) if c <= u128::from(limits.max_combinations) => {}
            _ => {
                return Err(ConfigError::Intractable {
                    symbols: spec.symbols.len(),
                    reels: reel_count,
                    combinations: combinations.unwrap_or(u128::MAX),
                    max: limits.max_combinations,
                })
            }
        }

        let index = spec
            .symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        Ok(Self {
            symbols: spec.symbols.clone(),
            weights: spec.weights.clone(),
            multipliers,
            reel_count,
            total_weight,
            index,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    pub fn reel_count(&self) -> usize {
        self.reel_count
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    pub fn symbol(&self, index: usize) -> &str {
        &self.symbols[index]
    }

    pub fn multiplier_at(&self, index: usize) -> u32 {
        self.multipliers[index]
    }

    pub fn multiplier(&self, symbol: &str) -> Option<u32> {
        self.index_of(symbol).map(|i| self.multipliers[i])
    }

    pub fn multipliers(&self) -> BTreeMap<String, u32> {
        self.symbols
            .iter()
            .cloned()
            .zip(self.multipliers.iter().copied())
            .collect()
    }

    /// Single-reel probability of the symbol at `index`
    pub fn probability_at(&self, index: usize) -> f64 {
        f64::from(self.weights[index]) / self.total_weight as f64
    }

    pub fn probabilities(&self) -> Vec<f64> {
        (0..self.symbols.len()).map(|i| self.probability_at(i)).collect()
    }

    /// Number of distinct reel outcomes, |symbols|^reels
    pub fn combinations(&self) -> u64 {
        // Bounded by max_combinations at validation time
        (self.symbols.len() as u64).pow(self.reel_count as u32)
    }

    pub fn to_spec(&self) -> TableSpec {
        TableSpec {
            symbols: self.symbols.clone(),
            weights: self.weights.clone(),
            multipliers: self.multipliers(),
        }
    }

    /// SHA-256 over the canonical table contents, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.reel_count as u64).to_be_bytes());
        let rows = self.symbols.iter().zip(&self.weights).zip(&self.multipliers);
        for ((symbol, weight), multiplier) in rows {
            hasher.update((symbol.len() as u64).to_be_bytes());
            hasher.update(symbol.as_bytes());
            hasher.update(weight.to_be_bytes());
            hasher.update(multiplier.to_be_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for SymbolTable {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
            && self.weights == other.weights
            && self.multipliers == other.multipliers
            && self.reel_count == other.reel_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(symbols: Vec<&str>, weights: Vec<u32>, multipliers: Vec<(&str, u32)>) -> TableSpec {
        TableSpec::new(symbols, weights, multipliers)
    }

    #[test]
    fn test_classic_table_is_valid() {
        let table =
            SymbolTable::validate(&TableSpec::classic(), 3, &TableLimits::default()).unwrap();
        assert_eq!(table.len(), 7);
        assert_eq!(table.total_weight(), 100);
        assert_eq!(table.multiplier("💎"), Some(50));
        assert_eq!(table.combinations(), 343);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let table =
            SymbolTable::validate(&TableSpec::classic(), 3, &TableLimits::default()).unwrap();
        let sum: f64 = table.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let limits = TableLimits::default();
        let empty = spec(vec![], vec![], vec![]);
        assert_eq!(SymbolTable::validate(&empty, 3, &limits), Err(ConfigError::EmptySymbols));

        let dup = spec(vec!["A", "A"], vec![30, 30], vec![("A", 2)]);
        assert_eq!(
            SymbolTable::validate(&dup, 3, &limits),
            Err(ConfigError::DuplicateSymbol("A".to_string()))
        );
    }

    #[test]
    fn test_rejects_bad_weights() {
        let limits = TableLimits::default();
        let mismatch = spec(vec!["A", "B"], vec![50], vec![("A", 2), ("B", 3)]);
        assert!(matches!(
            SymbolTable::validate(&mismatch, 3, &limits),
            Err(ConfigError::LengthMismatch { symbols: 2, weights: 1 })
        ));

        let zero = spec(vec!["A", "B"], vec![60, 0], vec![("A", 2), ("B", 3)]);
        assert_eq!(
            SymbolTable::validate(&zero, 3, &limits),
            Err(ConfigError::NonPositiveWeight("B".to_string()))
        );

        let light = spec(vec!["A", "B"], vec![1, 1], vec![("A", 2), ("B", 3)]);
        assert!(matches!(
            SymbolTable::validate(&light, 3, &limits),
            Err(ConfigError::WeightSumOutOfRange { sum: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_multipliers() {
        let limits = TableLimits::default();
        let missing = spec(vec!["A", "B"], vec![30, 30], vec![("A", 2)]);
        assert_eq!(
            SymbolTable::validate(&missing, 3, &limits),
            Err(ConfigError::MissingMultiplier("B".to_string()))
        );

        let huge = spec(vec!["A", "B"], vec![30, 30], vec![("A", 2), ("B", 101)]);
        assert!(matches!(
            SymbolTable::validate(&huge, 3, &limits),
            Err(ConfigError::MultiplierOutOfRange { value: 101, .. })
        ));

        let extra = spec(vec!["A", "B"], vec![30, 30], vec![("A", 2), ("B", 3), ("C", 4)]);
        assert_eq!(
            SymbolTable::validate(&extra, 3, &limits),
            Err(ConfigError::UnknownMultiplier("C".to_string()))
        );
    }

    #[test]
    fn test_rejects_intractable_enumeration() {
        let limits = TableLimits {
            max_combinations: 1_000,
            ..TableLimits::default()
        };
        let result = SymbolTable::validate(&TableSpec::classic(), 4, &limits);
        assert!(matches!(result, Err(ConfigError::Intractable { combinations: 2401, .. })));
        assert!(SymbolTable::validate(&TableSpec::classic(), 3, &limits).is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let limits = TableLimits::default();
        let a = SymbolTable::validate(&TableSpec::classic(), 3, &limits).unwrap();
        let b = SymbolTable::validate(&TableSpec::classic(), 3, &limits).unwrap();
        let c = SymbolTable::validate(&TableSpec::classic(), 2, &limits).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.to_spec(), TableSpec::classic());
    }
}
