mod common;

use common::single_route;
use futures::future::join_all;
use std::sync::Arc;
use tollgate::{AdmissionEngine, AdmissionPath, InMemoryCounterStore, ManualClock};

fn cold_engines(store: &InMemoryCounterStore, n: usize, max: u32) -> Vec<AdmissionEngine<InMemoryCounterStore>> {
    let clock = ManualClock::at_secs(1_000);
    (0..n)
        .map(|_| {
            AdmissionEngine::builder(store.clone())
                .config(single_route("import-job", 60, max))
                .clock(clock.clone())
                .build()
                .unwrap()
        })
        .collect()
}

/// N processes with cold caches race on a fresh key; the store admits exactly one.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_requests_admit_exactly_one() {
    for _round in 0..20 {
        let store = InMemoryCounterStore::new();
        let engines = cold_engines(&store, 16, 1);

        let handles = engines.into_iter().map(|engine| {
            tokio::spawn(async move { engine.check("u1", "import-job").await })
        });
        let decisions: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

        let allowed = decisions.iter().filter(|d| d.is_allowed()).count();
        assert_eq!(allowed, 1, "decisions: {decisions:?}");
        assert!(decisions.iter().all(|d| d.path() != AdmissionPath::FailOpen));
        assert_eq!(store.get("u1:import-job").unwrap().count, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_slow_paths_never_exceed_max() {
    let store = InMemoryCounterStore::new();
    let engines = cold_engines(&store, 32, 5);

    let handles = engines.into_iter().map(|engine| {
        tokio::spawn(async move { engine.check("u1", "import-job").await })
    });
    let allowed = join_all(handles).await.into_iter().filter(|r| r.as_ref().unwrap().is_allowed()).count();

    assert_eq!(allowed, 5);
    assert_eq!(store.get("u1:import-job").unwrap().count, 5);
}

/// Same-process concurrency: one shared cache, one store.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn single_instance_bound_holds_under_concurrency() {
    let store = InMemoryCounterStore::new();
    let engine = Arc::new(
        AdmissionEngine::builder(store.clone())
            .config(single_route("analyze", 60, 10))
            .clock(ManualClock::at_secs(0))
            .build()
            .unwrap(),
    );

    let handles = (0..200).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.check("u1", "analyze").await })
    });
    let decisions: Vec<_> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(decisions.iter().filter(|d| d.is_allowed()).count(), 10);
    assert!(decisions
        .iter()
        .filter_map(|d| d.retry_after_secs())
        .all(|retry| retry == 60));
}
