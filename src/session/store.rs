//! Live session ownership
//!
//! Each session lives in its own `tokio::sync::Mutex` slot so mutations on
//! one id are serialized while different ids proceed in parallel. A slot
//! holding `None` has been deleted; anyone who was queued on its lock sees
//! that and reports `NotFound`.
//!
//! Every mutation writes the new state through the `SnapshotStore` first and
//! only then commits it in memory. That section runs in a spawned task which
//! owns the slot guard, so dropping the caller's future cannot stop it half
//! way.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult, StorageError};
use crate::metrics::EngineMetrics;
use crate::session::types::{Session, SessionRecord, SessionStatistics, SNAPSHOT_FORMAT_VERSION};
use crate::storage::SnapshotStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

type Slot = Arc<Mutex<Option<Session>>>;

/// Tunables for a `SessionStore`
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub session_timeout: Duration,
    pub write_retry_backoff: Duration,
    pub max_sessions_per_owner: usize,
    pub max_initial_credits: u64,
}

impl StoreSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            session_timeout: config.session.timeout(),
            write_retry_backoff: config.storage.write_retry_backoff(),
            max_sessions_per_owner: config.session.max_sessions_per_owner,
            max_initial_credits: config.game.max_initial_credits,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

pub struct SessionStore {
    slots: DashMap<String, Slot>,
    storage: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    settings: StoreSettings,
    timeout: chrono::Duration,
    /// Serializes owner cap checks against concurrent creates
    owner_lock: Mutex<()>,
    /// Readers are in-flight mutations; the writer drains them. `true` once closed.
    gate: Arc<RwLock<bool>>,
}

impl SessionStore {
    /// Reload persisted sessions, dropping expired and unreadable snapshots
    pub async fn open(
        storage: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        settings: StoreSettings,
    ) -> EngineResult<Arc<Self>> {
        let timeout = chrono::Duration::from_std(settings.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let store = Self {
            slots: DashMap::new(),
            storage,
            clock,
            metrics,
            settings,
            timeout,
            owner_lock: Mutex::new(()),
            gate: Arc::new(RwLock::new(false)),
        };

        let now = store.clock.now();
        let (mut loaded, mut expired, mut corrupt, mut skipped) = (0usize, 0usize, 0usize, 0usize);
        for key in store.storage.keys().await? {
            let session = match store.load_snapshot(&key).await {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e @ StorageError::Corrupted { .. }) => {
                    warn!(key = %key, error = %e, "Discarding unreadable session snapshot");
                    corrupt += 1;
                    store.discard_snapshot(&key).await;
                    continue;
                }
                Err(e) => {
                    // The record may be fine; leave it on disk for the next start
                    error!(key = %key, error = %e, "Skipping session snapshot after read failure");
                    skipped += 1;
                    continue;
                }
            };
            if session.is_expired(now, store.timeout) {
                debug!(session_id = %key, "Discarding expired session snapshot");
                expired += 1;
                store.discard_snapshot(&key).await;
                continue;
            }
            store.slots.insert(key, Arc::new(Mutex::new(Some(session))));
            loaded += 1;
        }

        info!(loaded, expired, corrupt, skipped, "Session store opened");
        Ok(Arc::new(store))
    }

    /// Read one snapshot, retrying a failed read once
    async fn load_snapshot(&self, key: &str) -> Result<Option<Session>, StorageError> {
        match self.read_snapshot(key).await {
            Err(e) if !matches!(e, StorageError::Corrupted { .. }) => {
                warn!(key = %key, error = %e, "Snapshot read failed, retrying");
                self.metrics.record_persistence_retry();
                tokio::time::sleep(self.settings.write_retry_backoff).await;
                self.read_snapshot(key).await
            }
            result => result,
        }
    }

    async fn read_snapshot(&self, key: &str) -> Result<Option<Session>, StorageError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        let record: SessionRecord =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupted {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if record.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::Corrupted {
                key: key.to_string(),
                reason: format!("unsupported format version {}", record.format_version),
            });
        }
        if record.session.id != key {
            return Err(StorageError::Corrupted {
                key: key.to_string(),
                reason: format!("record holds session {}", record.session.id),
            });
        }
        Ok(Some(record.session))
    }

    async fn discard_snapshot(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete discarded snapshot");
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    fn slot(&self, id: &str) -> Option<Slot> {
        self.slots.get(id).map(|entry| entry.value().clone())
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.is_expired(now, self.timeout)
    }

    /// Run a mutation to completion on its own task, counted by the drain gate
    async fn run_detached<T, F>(&self, work: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: Future<Output = EngineResult<T>> + Send + 'static,
    {
        let permit = self.gate.clone().read_owned().await;
        if *permit {
            return Err(StorageError::Backend("session store is shut down".to_string()).into());
        }
        tokio::spawn(async move {
            let _permit = permit;
            work.await
        })
        .await
        .map_err(|e| EngineError::PersistenceFailure(e.into()))?
    }

    async fn persist(&self, session: &Session) -> EngineResult<()> {
        let bytes = serde_json::to_vec(&SessionRecord::new(session.clone()))
            .map_err(StorageError::from)?;
        let mut retried = false;
        loop {
            match self.storage.put(&session.id, &bytes).await {
                Ok(()) => return Ok(()),
                Err(e) if !retried => {
                    warn!(session_id = %session.id, error = %e, "Snapshot write failed, retrying");
                    self.metrics.record_persistence_retry();
                    retried = true;
                    tokio::time::sleep(self.settings.write_retry_backoff).await;
                }
                Err(e) => {
                    error!(
                        session_id = %session.id,
                        error = %e,
                        "Snapshot write failed after retry"
                    );
                    self.metrics.record_persistence_failure();
                    return Err(e.into());
                }
            }
        }
    }

    async fn unpersist(&self, id: &str) -> EngineResult<()> {
        let mut retried = false;
        loop {
            match self.storage.delete(id).await {
                Ok(_) => return Ok(()),
                Err(e) if !retried => {
                    warn!(session_id = %id, error = %e, "Snapshot delete failed, retrying");
                    self.metrics.record_persistence_retry();
                    retried = true;
                    tokio::time::sleep(self.settings.write_retry_backoff).await;
                }
                Err(e) => {
                    error!(session_id = %id, error = %e, "Snapshot delete failed after retry");
                    self.metrics.record_persistence_failure();
                    return Err(e.into());
                }
            }
        }
    }

    /// Remove a session whose slot lock is held by the caller
    async fn remove_locked(
        &self,
        id: &str,
        slot: &Slot,
        state: &mut Option<Session>,
    ) -> EngineResult<()> {
        self.unpersist(id).await?;
        *state = None;
        self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, slot));
        Ok(())
    }

    /// Create an anonymous session
    pub async fn create(self: &Arc<Self>, initial_credits: u64) -> EngineResult<Session> {
        self.create_with_owner(None, initial_credits).await
    }

    /// Create a session for `owner`, evicting the owner's oldest session at the cap
    ///
    /// Eviction only happens once the new session is durable, so a failed
    /// write leaves the owner's existing sessions untouched.
    pub async fn create_for_owner(
        self: &Arc<Self>,
        owner: &str,
        initial_credits: u64,
    ) -> EngineResult<Session> {
        self.create_with_owner(Some(owner.to_string()), initial_credits)
            .await
    }

    async fn create_with_owner(
        self: &Arc<Self>,
        owner: Option<String>,
        initial_credits: u64,
    ) -> EngineResult<Session> {
        let max = self.settings.max_initial_credits;
        if initial_credits == 0 || initial_credits > max {
            return Err(EngineError::InvalidCredits {
                amount: initial_credits,
                min: 1,
                max,
            });
        }

        let this = self.clone();
        self.run_detached(async move {
            let session = Session::new(owner, initial_credits, this.clock.now());

            // Held until eviction finishes so concurrent creates see a settled count
            let (_owner_guard, owned) = match &session.owner {
                Some(owner) => {
                    let guard = this.owner_lock.lock().await;
                    (Some(guard), this.sessions_for_owner(owner).await)
                }
                None => (None, Vec::new()),
            };

            this.persist(&session).await?;
            this.slots.insert(
                session.id.clone(),
                Arc::new(Mutex::new(Some(session.clone()))),
            );
            this.metrics.record_session_created();
            info!(
                session_id = %session.id,
                owner = session.owner.as_deref().unwrap_or("-"),
                credits = session.credits,
                "Session created"
            );

            if let Some(owner) = &session.owner {
                this.evict_over_cap(owner, owned).await;
            }
            Ok(session)
        })
        .await
    }

    /// Evict the oldest of `owned` until the owner, counting the session just
    /// created, is back within the cap
    async fn evict_over_cap(&self, owner: &str, owned: Vec<Session>) {
        let excess = (owned.len() + 1).saturating_sub(self.settings.max_sessions_per_owner.max(1));
        for oldest in owned.into_iter().take(excess) {
            let Some(slot) = self.slot(&oldest.id) else {
                continue;
            };
            let mut state = slot.lock().await;
            if state.is_none() {
                continue;
            }
            match self.remove_locked(&oldest.id, &slot, &mut state).await {
                Ok(()) => {
                    self.metrics.record_session_deleted();
                    info!(session_id = %oldest.id, owner, "Evicted oldest session at owner cap");
                }
                // The next create for this owner retries the eviction
                Err(e) => {
                    warn!(session_id = %oldest.id, owner, error = %e, "Owner cap eviction failed");
                }
            }
        }
    }

    /// Current state of a session; reading does not refresh its activity time
    pub async fn get(&self, id: &str) -> EngineResult<Session> {
        let slot = self.slot(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let state = slot.lock().await;
        match state.as_ref() {
            Some(session) if !self.is_expired(session, self.clock.now()) => Ok(session.clone()),
            _ => Err(EngineError::NotFound(id.to_string())),
        }
    }

    /// Apply one spin atomically
    ///
    /// `play` runs under the session lock with the pre-spin state and returns
    /// the drawn outcome and its payout. The new balance is persisted before
    /// it becomes visible.
    pub async fn apply_spin<O, F>(
        self: &Arc<Self>,
        id: &str,
        wager: u64,
        play: F,
    ) -> EngineResult<(O, Session)>
    where
        O: Send + 'static,
        F: FnOnce(&Session) -> EngineResult<(O, u64)> + Send + 'static,
    {
        let slot = self.slot(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let id = id.to_string();
        let this = self.clone();

        self.run_detached(async move {
            let mut state = slot.lock_owned().await;
            let now = this.clock.now();
            let current = match state.as_ref() {
                Some(session) if !this.is_expired(session, now) => session,
                _ => return Err(EngineError::NotFound(id)),
            };
            if wager > current.credits {
                return Err(EngineError::InsufficientCredits {
                    wager,
                    credits: current.credits,
                });
            }

            let (outcome, payout) = play(current)?;
            let mut next = current.clone();
            next.settle_spin(wager, payout, now);

            this.persist(&next).await?;
            *state = Some(next.clone());
            this.metrics.record_spin(wager, payout);
            debug!(
                session_id = %id,
                wager,
                payout,
                credits = next.credits,
                "Spin settled"
            );
            Ok((outcome, next))
        })
        .await
    }

    /// Delete a session; a second delete reports `NotFound`
    pub async fn delete(self: &Arc<Self>, id: &str) -> EngineResult<()> {
        let slot = self.slot(id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let id = id.to_string();
        let this = self.clone();

        self.run_detached(async move {
            let mut state = slot.lock().await;
            if state.is_none() {
                return Err(EngineError::NotFound(id));
            }
            this.remove_locked(&id, &slot, &mut state).await?;
            this.metrics.record_session_deleted();
            info!(session_id = %id, "Session deleted");
            Ok(())
        })
        .await
    }

    /// Remove the session if it is still stale once its lock is held
    pub async fn expire_if_stale(self: &Arc<Self>, id: &str) -> EngineResult<bool> {
        let Some(slot) = self.slot(id) else {
            return Ok(false);
        };
        let id = id.to_string();
        let this = self.clone();

        self.run_detached(async move {
            let mut state = slot.lock().await;
            let stale = match state.as_ref() {
                Some(session) => this.is_expired(session, this.clock.now()),
                None => false,
            };
            if !stale {
                return Ok(false);
            }
            this.remove_locked(&id, &slot, &mut state).await?;
            debug!(session_id = %id, "Expired session removed");
            Ok(true)
        })
        .await
    }

    /// Consistent copies of every live, unexpired session
    async fn live_sessions(&self) -> Vec<Session> {
        let slots: Vec<Slot> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        let now = self.clock.now();
        let mut sessions = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.lock().await;
            if let Some(session) = state.as_ref() {
                if !self.is_expired(session, now) {
                    sessions.push(session.clone());
                }
            }
        }
        sessions
    }

    /// Sessions created at or after `since`, newest first
    pub async fn recent_sessions(&self, since: DateTime<Utc>, limit: usize) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .live_sessions()
            .await
            .into_iter()
            .filter(|s| s.created_at >= since)
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions.truncate(limit);
        sessions
    }

    pub async fn active_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .live_sessions()
            .await
            .into_iter()
            .filter(|s| s.active)
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions
    }

    /// Owner's sessions, oldest first
    pub async fn sessions_for_owner(&self, owner: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .live_sessions()
            .await
            .into_iter()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub async fn statistics(&self) -> SessionStatistics {
        SessionStatistics::from_sessions(&self.live_sessions().await)
    }

    /// Wait for in-flight mutations and refuse new ones
    pub async fn drain(&self) {
        let mut closed = self.gate.write().await;
        *closed = true;
        debug!("Session store drained");
    }
}
