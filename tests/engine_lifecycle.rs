mod common;

use common::{two_reel_config, ScriptedSource};
use futures::future::join_all;
use spinwise::{
    Clock, EngineError, FileSnapshotStore, ManualClock, MemorySnapshotStore, SessionStatus,
    SlotEngine,
};
use std::sync::Arc;
use tempfile::TempDir;

async fn engine_with(source: Arc<ScriptedSource>, clock: Arc<ManualClock>) -> SlotEngine {
    SlotEngine::builder(two_reel_config())
        .with_entropy(source)
        .with_clock(clock)
        .without_reaper()
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_forced_pair_pays_multiplier_times_wager() {
    let source = Arc::new(ScriptedSource::new(&[&["A", "A"]]));
    let engine = engine_with(source, Arc::new(ManualClock::default())).await;

    let session = engine.create_session(100).await.unwrap();
    let spin = engine.apply_spin(&session.id, 10).await.unwrap();

    assert_eq!(spin.outcome.symbols, vec!["A", "A"]);
    assert_eq!(spin.payout, 100);
    assert!(spin.is_winner);
    assert_eq!(spin.session.credits, 190);
    assert_eq!(spin.session.total_spins, 1);
    assert_eq!(spin.session.total_winnings, 100);
    assert_eq!(spin.session.status(), SessionStatus::Active);
    assert_eq!(engine.get_session(&session.id).await.unwrap(), spin.session);
}

#[tokio::test]
async fn test_no_match_pays_nothing() {
    let source = Arc::new(ScriptedSource::new(&[&["B", "A"]]));
    let engine = engine_with(source, Arc::new(ManualClock::default())).await;
    let session = engine.create_session(100).await.unwrap();

    let spin = engine.apply_spin(&session.id, 10).await.unwrap();
    assert_eq!(spin.payout, 0);
    assert_eq!(spin.session.credits, 90);
}

#[tokio::test]
async fn test_depleted_session_stays_readable() {
    let source = Arc::new(ScriptedSource::new(&[&["A", "B"], &["B", "A"]]));
    let engine = engine_with(source, Arc::new(ManualClock::default())).await;
    let session = engine.create_session(20).await.unwrap();

    engine.apply_spin(&session.id, 10).await.unwrap();
    let last = engine.apply_spin(&session.id, 10).await.unwrap();
    assert_eq!(last.session.credits, 0);
    assert!(!last.session.active);

    let read = engine.get_session(&session.id).await.unwrap();
    assert_eq!(read.status(), SessionStatus::Depleted);

    let err = engine.apply_spin(&session.id, 1).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientCredits { wager: 1, credits: 0 }));
}

#[tokio::test]
async fn test_delete_twice() {
    let engine = engine_with(
        Arc::new(ScriptedSource::default()),
        Arc::new(ManualClock::default()),
    )
    .await;
    let session = engine.create_session(100).await.unwrap();

    engine.delete_session(&session.id).await.unwrap();
    let err = engine.delete_session(&session.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(matches!(engine.get_session(&session.id).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.apply_spin(&session.id, 1).await, Err(EngineError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spins_are_serialized() {
    // File writes yield to the runtime, so spins really interleave across workers
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FileSnapshotStore::open(dir.path()).unwrap());
    let engine = Arc::new(
        SlotEngine::builder(two_reel_config())
            .with_storage(storage)
            .without_reaper()
            .build()
            .await
            .unwrap(),
    );
    let session = engine.create_session(1000).await.unwrap();
    let n = 64;
    let wager = 2;

    let handles = (0..n).map(|_| {
        let engine = engine.clone();
        let id = session.id.clone();
        tokio::spawn(async move { engine.apply_spin(&id, wager).await })
    });
    let spins = join_all(handles).await;
    let payouts: u64 = spins
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().payout)
        .sum();

    let after = engine.get_session(&session.id).await.unwrap();
    assert_eq!(after.total_spins, n);
    assert_eq!(after.total_wagered, n * wager);
    assert_eq!(after.total_winnings, payouts);
    assert_eq!(after.credits, 1000 - n * wager + payouts);
    assert_eq!(engine.metrics().spins, n);
}

#[tokio::test]
async fn test_expired_session_is_swept() {
    let clock = Arc::new(ManualClock::default());
    let engine = engine_with(Arc::new(ScriptedSource::default()), clock.clone()).await;
    let stale = engine.create_session(100).await.unwrap();
    clock.advance(chrono::Duration::hours(12));
    let fresh = engine.create_session(100).await.unwrap();
    clock.advance(chrono::Duration::hours(13));

    assert!(matches!(engine.get_session(&stale.id).await, Err(EngineError::NotFound(_))));
    let report = engine.sweep_expired().await;
    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, 0);
    assert!(engine.get_session(&fresh.id).await.is_ok());
    assert_eq!(engine.session_statistics().await.total_sessions, 1);
}

#[tokio::test]
async fn test_spin_refreshes_activity() {
    let clock = Arc::new(ManualClock::default());
    let engine = engine_with(Arc::new(ScriptedSource::default()), clock.clone()).await;
    let session = engine.create_session(100).await.unwrap();

    clock.advance(chrono::Duration::hours(20));
    engine.apply_spin(&session.id, 1).await.unwrap();
    clock.advance(chrono::Duration::hours(20));

    assert_eq!(engine.sweep_expired().await.removed, 0);
    assert!(engine.get_session(&session.id).await.is_ok());
}

#[tokio::test]
async fn test_recent_sessions_newest_first() {
    let clock = Arc::new(ManualClock::default());
    let engine = engine_with(Arc::new(ScriptedSource::default()), clock.clone()).await;
    let start = clock.now();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(engine.create_session(100).await.unwrap().id);
        clock.advance(chrono::Duration::minutes(1));
    }

    let recent = engine.recent_sessions(start + chrono::Duration::minutes(1), 2).await;
    let got: Vec<&str> = recent.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(got, vec![ids[3].as_str(), ids[2].as_str()]);
}

#[tokio::test]
async fn test_owner_sessions_are_capped() {
    let clock = Arc::new(ManualClock::default());
    let engine = engine_with(Arc::new(ScriptedSource::default()), clock.clone()).await;
    for _ in 0..7 {
        engine.create_session_for("bob", 50).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
    }
    engine.create_session_for("carol", 50).await.unwrap();

    assert_eq!(engine.sessions_for_owner("bob").await.len(), 5);
    assert_eq!(engine.sessions_for_owner("carol").await.len(), 1);
    assert_eq!(engine.session_statistics().await.total_sessions, 6);
}

#[tokio::test]
async fn test_write_failure_leaves_session_unchanged() {
    let storage = Arc::new(MemorySnapshotStore::new());
    let engine = SlotEngine::builder(two_reel_config())
        .with_storage(storage.clone())
        .without_reaper()
        .build()
        .await
        .unwrap();
    let session = engine.create_session(100).await.unwrap();

    storage.fail_next_puts(2);
    let err = engine.apply_spin(&session.id, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::PersistenceFailure(_)));
    assert_eq!(engine.get_session(&session.id).await.unwrap(), session);
    assert_eq!(engine.metrics().persistence_failures, 1);

    storage.fail_next_puts(1);
    let spin = engine.apply_spin(&session.id, 10).await.unwrap();
    assert_eq!(spin.session.total_spins, 1);
    assert_eq!(engine.metrics().persistence_retries, 2);
}

#[tokio::test]
async fn test_config_update_applies_to_next_spin() {
    let source = Arc::new(ScriptedSource::new(&[&["A", "A"], &["A", "A"]]));
    let engine = engine_with(source, Arc::new(ManualClock::default())).await;
    let session = engine.create_session(100).await.unwrap();

    let first = engine.apply_spin(&session.id, 1).await.unwrap();
    assert_eq!(first.config_version, 1);
    assert_eq!(first.payout, 10);

    let spec = spinwise::TableSpec::new(vec!["A", "B"], vec![1, 1], vec![("A", 20), ("B", 5)]);
    let updated = engine.update_probability_config(&spec).unwrap();
    assert_eq!(updated.version, 2);

    let second = engine.apply_spin(&session.id, 1).await.unwrap();
    assert_eq!(second.config_version, 2);
    assert_eq!(second.payout, 20);

    let stale = engine.compare_and_update_probability_config(1, &spec);
    assert!(matches!(stale, Err(EngineError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_shutdown_stops_reaper_and_refuses_writes() {
    let engine = SlotEngine::builder(two_reel_config()).build().await.unwrap();
    let session = engine.create_session(100).await.unwrap();
    engine.shutdown().await;
    assert!(engine.apply_spin(&session.id, 1).await.is_err());
}
