#![allow(dead_code)]

use spinwise::{
    ConfigBuilder, EngineConfig, EntropySource, ReelOutcome, StorageBackend, TableLimits, TableSpec,
    WeightedSampler,
};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Entropy that replays queued outcomes, then falls back to real draws
#[derive(Default)]
pub struct ScriptedSource {
    queue: Mutex<VecDeque<ReelOutcome>>,
}

impl ScriptedSource {
    pub fn new(outcomes: &[&[&str]]) -> Self {
        let source = Self::default();
        for outcome in outcomes {
            source.push(outcome);
        }
        source
    }

    pub fn push(&self, symbols: &[&str]) {
        self.queue.lock().unwrap().push_back(ReelOutcome::new(symbols.to_vec()));
    }
}

impl EntropySource for ScriptedSource {
    fn draw(&self, sampler: &WeightedSampler) -> ReelOutcome {
        match self.queue.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => sampler.draw(&mut rand::thread_rng()),
        }
    }
}

/// Two symbols, equal weights, A pays 10 and B pays 5
pub fn two_symbol_spec() -> TableSpec {
    TableSpec::new(vec!["A", "B"], vec![1, 1], vec![("A", 10), ("B", 5)])
}

pub fn relaxed_limits() -> TableLimits {
    TableLimits {
        min_weight_sum: 1,
        ..TableLimits::default()
    }
}

/// Two-reel A/B game over in-memory storage
pub fn two_reel_config() -> EngineConfig {
    let mut config = ConfigBuilder::new()
        .reel_count(2)
        .table(two_symbol_spec())
        .limits(relaxed_limits())
        .build();
    config.storage.backend = StorageBackend::Memory;
    config.storage.write_retry_backoff_ms = 1;
    config
}
