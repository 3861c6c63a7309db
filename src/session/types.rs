use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Snapshot layout version written with every persisted session
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Depleted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Depleted => write!(f, "depleted"),
        }
    }
}

/// One player's credit balance and running totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub credits: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub total_spins: u64,
    pub total_winnings: u64,
    #[serde(default)]
    pub total_wagered: u64,
    pub active: bool,
}

impl Session {
    pub fn new(owner: Option<String>, credits: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            credits,
            created_at: now,
            last_activity: now,
            total_spins: 0,
            total_winnings: 0,
            total_wagered: 0,
            active: credits > 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.active {
            SessionStatus::Active
        } else {
            SessionStatus::Depleted
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity > timeout
    }

    /// Apply one settled spin; the caller has already checked the wager
    pub fn settle_spin(&mut self, wager: u64, payout: u64, now: DateTime<Utc>) {
        self.credits = self.credits.saturating_sub(wager).saturating_add(payout);
        self.total_spins += 1;
        self.total_wagered = self.total_wagered.saturating_add(wager);
        self.total_winnings = self.total_winnings.saturating_add(payout);
        self.last_activity = now;
        if self.credits == 0 {
            self.active = false;
        }
    }

    /// Realized return for this session as a percentage
    pub fn rtp(&self) -> f64 {
        if self.total_wagered == 0 {
            0.0
        } else {
            self.total_winnings as f64 / self.total_wagered as f64 * 100.0
        }
    }
}

/// On-disk envelope around a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub format_version: u32,
    pub session: Session,
}

impl SessionRecord {
    pub fn new(session: Session) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            session,
        }
    }
}

/// Aggregates across all live sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionStatistics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_spins: u64,
    pub total_winnings: u64,
    pub total_wagered: u64,
    pub average_spins: f64,
    pub average_winnings: f64,
    /// Total winnings over total wagered, as a percentage
    pub aggregate_rtp: f64,
    pub oldest_session: Option<DateTime<Utc>>,
    pub newest_session: Option<DateTime<Utc>>,
}

impl SessionStatistics {
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        let mut stats = SessionStatistics::default();
        for s in sessions {
            stats.total_sessions += 1;
            if s.active {
                stats.active_sessions += 1;
            }
            stats.total_spins += s.total_spins;
            stats.total_winnings = stats.total_winnings.saturating_add(s.total_winnings);
            stats.total_wagered = stats.total_wagered.saturating_add(s.total_wagered);
            let created = s.created_at;
            stats.oldest_session = Some(stats.oldest_session.map_or(created, |t| t.min(created)));
            stats.newest_session = Some(stats.newest_session.map_or(created, |t| t.max(created)));
        }
        if stats.total_sessions > 0 {
            let n = stats.total_sessions as f64;
            stats.average_spins = stats.total_spins as f64 / n;
            stats.average_winnings = stats.total_winnings as f64 / n;
        }
        if stats.total_wagered > 0 {
            stats.aggregate_rtp = stats.total_winnings as f64 / stats.total_wagered as f64 * 100.0;
        }
        stats
    }
}
