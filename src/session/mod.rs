//! Player sessions: ownership, durable snapshots, expiry

pub mod reaper;
pub mod store;
pub mod types;

pub use reaper::{sweep_once, ExpiryReaper, SweepReport};
pub use store::{SessionStore, StoreSettings};
pub use types::{Session, SessionRecord, SessionStatistics, SessionStatus, SNAPSHOT_FORMAT_VERSION};
