//! Probability and payout engine
//!
//! Weighted sampling, the match-count payout rule, and exact RTP by
//! exhaustive enumeration over a validated, versioned symbol table.

pub mod handle;
pub mod payout;
pub mod rtp;
pub mod sampler;
pub mod table;

pub use handle::{ProbabilityConfig, TableSnapshot};
pub use payout::PayoutRule;
pub use rtp::{RtpCalculator, RtpReport, SimulationReport, SymbolAnalysis};
pub use sampler::{EntropySource, ReelOutcome, SeededSource, ThreadRngSource, WeightedSampler};
pub use table::{SymbolTable, TableLimits, TableSpec};
