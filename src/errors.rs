//! Error types for the spinwise engine
//!
//! Validation errors are returned to the immediate caller and never retried.
//! Storage errors are retried once by the session store before surfacing.

use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Symbols, weights or multipliers violate table invariants
    #[error("Invalid probability configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Invalid wager {wager}: {reason}")]
    InvalidWager { wager: u64, reason: String },

    #[error("Insufficient credits: wager {wager} exceeds balance {credits}")]
    InsufficientCredits { wager: u64, credits: u64 },

    #[error("Invalid initial credits {amount}: must be between {min} and {max}")]
    InvalidCredits { amount: u64, min: u64, max: u64 },

    /// Internal consistency fault between a drawn outcome and the active table
    #[error("Invalid reel outcome: {0}")]
    InvalidOutcome(String),

    #[error("Session {0} not found")]
    NotFound(String),

    /// Snapshot write/read failed; the mutation was not committed
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),

    #[error("Invalid simulation request: {0}")]
    InvalidSimulation(String),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Symbol table validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("symbol list is empty")]
    EmptySymbols,

    #[error("symbol names must not be empty")]
    EmptySymbolName,

    #[error("duplicate symbol '{0}'")]
    DuplicateSymbol(String),

    #[error("{symbols} symbols but {weights} weights")]
    LengthMismatch { symbols: usize, weights: usize },

    #[error("weight for symbol '{0}' must be positive")]
    NonPositiveWeight(String),

    #[error("total weight {sum} outside allowed range {min}..={max}")]
    WeightSumOutOfRange { sum: u64, min: u64, max: u64 },

    #[error("symbol '{0}' has no payout multiplier")]
    MissingMultiplier(String),

    #[error("payout multiplier given for unknown symbol '{0}'")]
    UnknownMultiplier(String),

    #[error("multiplier {value} for symbol '{symbol}' outside allowed range 1..={max}")]
    MultiplierOutOfRange { symbol: String, value: u32, max: u32 },

    #[error("reel count must be at least 1")]
    InvalidReelCount,

    #[error("{symbols} symbols over {reels} reels gives {combinations} outcomes (limit {max})")]
    Intractable {
        symbols: usize,
        reels: usize,
        combinations: u128,
        max: u64,
    },

    #[error("bonus tiers must be non-empty and non-decreasing")]
    InvalidBonusTiers,

    #[error("configuration version {actual} does not match expected {expected}")]
    VersionConflict { expected: u64, actual: u64 },
}

/// Snapshot storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupted snapshot '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Storage backend failed: {0}")]
    Backend(String),
}

/// Engine configuration loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Backend(format!("storage task failed: {}", e))
    }
}

/// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;
