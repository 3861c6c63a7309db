use crate::errors::ConfigError;
use crate::probability::table::SymbolTable;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Ordered symbols drawn across all reels in one spin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelOutcome {
    pub symbols: Vec<String>,
}

impl ReelOutcome {
    pub fn new<S: Into<String>>(symbols: Vec<S>) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Independent weighted draw per reel, with replacement
#[derive(Debug, Clone)]
pub struct WeightedSampler {
    symbols: Vec<String>,
    reel_count: usize,
    distribution: WeightedIndex<u32>,
}

impl WeightedSampler {
    pub fn new(table: &SymbolTable) -> Result<Self, ConfigError> {
        let distribution = WeightedIndex::new(table.weights().iter().copied()).map_err(|_| {
            ConfigError::NonPositiveWeight(table.symbols().first().cloned().unwrap_or_default())
        })?;

        Ok(Self {
            symbols: table.symbols().to_vec(),
            reel_count: table.reel_count(),
            distribution,
        })
    }

    pub fn reel_count(&self) -> usize {
        self.reel_count
    }

    /// Draw symbol indices, one per reel
    pub fn draw_indices<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        (0..self.reel_count).map(|_| self.distribution.sample(rng)).collect()
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> ReelOutcome {
        ReelOutcome {
            symbols: self
                .draw_indices(rng)
                .into_iter()
                .map(|i| self.symbols[i].clone())
                .collect(),
        }
    }
}

/// Randomness consumed by the spin path
pub trait EntropySource: Send + Sync {
    fn draw(&self, sampler: &WeightedSampler) -> ReelOutcome;
}

/// Thread-local `rand` generator, reseeded from the OS
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl EntropySource for ThreadRngSource {
    fn draw(&self, sampler: &WeightedSampler) -> ReelOutcome {
        sampler.draw(&mut rand::thread_rng())
    }
}

/// Reproducible generator for replays and simulations
#[derive(Debug)]
pub struct SeededSource {
    rng: Mutex<StdRng>,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SeededSource {
    fn draw(&self, sampler: &WeightedSampler) -> ReelOutcome {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        sampler.draw(&mut *rng)
    }
}
