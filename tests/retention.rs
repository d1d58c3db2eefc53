mod common;

use common::{engine_at_zero, single_route, FailingStore, LogCapture};
use std::sync::Arc;
use std::time::Duration;
use tollgate::telemetry::MemorySink;
use tollgate::{InMemoryCounterStore, LimiterConfig, LimiterEvent, ManualClock, RetentionSweeper};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::test]
async fn purge_deletes_rows_past_horizon_regardless_of_cache() {
    let store = InMemoryCounterStore::new();
    let (engine, clock) = engine_at_zero(store.clone(), single_route("analyze", 60, 5));
    engine.check("old", "analyze").await;

    clock.set_secs(2 * 24 * 60 * 60);
    engine.check("new", "analyze").await;
    assert_eq!(store.len(), 2);

    let sweeper = RetentionSweeper::new(Arc::new(store.clone())).with_clock(clock.clone());
    assert_eq!(sweeper.purge_expired(DAY).await.unwrap(), 1);
    assert!(store.get("old:analyze").is_none());
    assert!(store.get("new:analyze").is_some());

    // A purged key simply starts a new window.
    assert_eq!(engine.check("old", "analyze").await.retry_after_secs(), None);
}

#[tokio::test]
async fn purge_failure_is_logged_emitted_and_returned() {
    let logs = LogCapture::start();
    let sink = MemorySink::new();
    let sweeper = RetentionSweeper::new(Arc::new(FailingStore::default()))
        .with_clock(ManualClock::at_secs(100_000))
        .with_sink(sink.clone());

    let err = sweeper.purge_expired(DAY).await.unwrap_err();
    assert!(err.to_string().contains("delete_older_than"));

    let captured = logs.contents();
    assert!(captured.contains("tollgate::retention"), "{captured}");
    assert!(captured.contains("retention purge failed"), "{captured}");
    assert!(matches!(sink.events().as_slice(), [LimiterEvent::RetentionFailed { .. }]));
}

#[tokio::test]
async fn purge_on_empty_store_reports_zero() {
    let sink = MemorySink::new();
    let sweeper = RetentionSweeper::new(Arc::new(InMemoryCounterStore::new()))
        .with_clock(ManualClock::at_secs(10))
        .with_sink(sink.clone());

    assert_eq!(sweeper.purge_expired(DAY).await.unwrap(), 0);
    assert_eq!(sink.events(), vec![LimiterEvent::RetentionPurged { deleted: 0, cutoff: 0 }]);
}

#[tokio::test(start_paused = true)]
async fn scheduled_sweep_keeps_running_after_failures() {
    let store = Arc::new(FailingStore::default());
    let sweeper = RetentionSweeper::new(store.clone()).with_clock(ManualClock::at_secs(100_000));

    let config = LimiterConfig { retention_interval_secs: 60, ..LimiterConfig::default() };
    sweeper.start_with_config(&config);
    tokio::time::sleep(Duration::from_secs(60 * 3 + 1)).await;

    assert!(sweeper.is_running());
    assert_eq!(store.calls(), 3);
    sweeper.stop().await;
    assert!(!sweeper.is_running());
}
