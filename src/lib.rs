//! Spinwise - weighted slot game engine
//!
//! Draws weighted reel outcomes, pays them under a match-count rule, states
//! the exact return-to-player of any table by full enumeration, and keeps
//! player sessions consistent under concurrency, expiry and restarts.

pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod probability;
pub mod session;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigBuilder, ConfigLoader, EngineConfig, StorageBackend};
pub use engine::{EngineBuilder, ProbabilitySnapshot, SlotEngine, SpinOutcome};
pub use errors::{ConfigError, EngineError, EngineResult, SettingsError, StorageError};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use probability::{
    EntropySource, PayoutRule, ProbabilityConfig, ReelOutcome, RtpCalculator, RtpReport,
    SeededSource, SimulationReport, SymbolTable, TableLimits, TableSpec, ThreadRngSource,
    WeightedSampler,
};
pub use session::{
    ExpiryReaper, Session, SessionStatistics, SessionStatus, SessionStore, SweepReport,
};
pub use storage::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
