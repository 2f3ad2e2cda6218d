//! Concurrency tests for the hit counter.
//!
//! These verify that hits are neither lost nor double counted when many
//! tasks count on one gear while flushes run, and that the read side sees
//! a consistent view of several gears writing at once.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gear_hits::aggregator::{Aggregator, Report, ReportMode};
use gear_hits::flusher::{FlushPolicy, FlushScheduler};
use gear_hits::store::MemoryStore;
use gear_hits::tracker::HitTracker;

fn manual() -> FlushPolicy {
    FlushPolicy::Scheduled(Duration::from_secs(3600))
}

fn persisted(store: &MemoryStore) -> u64 {
    store.records().iter().map(|r| r.hits).sum()
}

// =============================================================================
// No loss, no double count
// =============================================================================

/// Concurrent adds interleaved with random manual flushes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_with_random_flushes_conserve_hits() {
    for seed in 0..5u64 {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(HitTracker::new("gear-a", Arc::clone(&store), manual(), true));
        let num_tasks = 16;
        let adds_per_task = 500u64;

        let adders: Vec<_> = (0..num_tasks)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    for _ in 0..adds_per_task {
                        tracker.add().await;
                    }
                })
            })
            .collect();

        let flusher = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..50 {
                    if rng.gen_bool(0.7) {
                        tracker.flush().await.expect("memory store is online");
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        for h in adders {
            h.await.unwrap();
        }
        flusher.await.unwrap();

        assert_eq!(
            persisted(&store) + tracker.pending(),
            num_tasks * adds_per_task,
            "seed {seed}: hits lost or double counted"
        );
    }
}

/// Same property with the request-driven triggers doing the flushing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_driven_policies_conserve_hits() {
    for policy in [
        FlushPolicy::Count(7),
        FlushPolicy::Elapsed(Duration::from_millis(1)),
    ] {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(HitTracker::new("gear-a", Arc::clone(&store), policy, true));

        let adders: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    for i in 0..300 {
                        tracker.add().await;
                        if i % 50 == 0 {
                            tokio::time::sleep(Duration::from_millis(2)).await;
                        }
                    }
                })
            })
            .collect();
        for h in adders {
            h.await.unwrap();
        }

        assert!(!store.is_empty(), "{policy} never flushed");
        assert_eq!(persisted(&store) + tracker.pending(), 8 * 300, "{policy}");
    }
}

/// Store outages during concurrent counting only delay hits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flaky_store_loses_no_hits() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(HitTracker::new(
        "gear-a",
        Arc::clone(&store),
        FlushPolicy::Count(5),
        true,
    ));

    let toggler = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..40 {
                store.set_available(i % 2 == 0);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            store.set_available(true);
        })
    };

    let adders: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                for _ in 0..250 {
                    tracker.add().await;
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for h in adders {
        h.await.unwrap();
    }
    toggler.await.unwrap();

    // Drain whatever the outages left behind
    tracker.flush().await.unwrap();
    assert_eq!(tracker.pending(), 0);
    assert_eq!(persisted(&store), 8 * 250);
}

/// The scheduler and request traffic share the same accumulator.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduled_flushes_during_traffic_conserve_hits() {
    let store = Arc::new(MemoryStore::new());
    let interval = Duration::from_millis(5);
    let tracker = Arc::new(HitTracker::new(
        "gear-a",
        Arc::clone(&store),
        FlushPolicy::Scheduled(interval),
        true,
    ));
    let scheduler = FlushScheduler::start(Arc::clone(&tracker), interval);

    let adders: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                for i in 0..400 {
                    tracker.add().await;
                    if i % 100 == 0 {
                        tokio::time::sleep(Duration::from_millis(6)).await;
                    }
                }
            })
        })
        .collect();
    for h in adders {
        h.await.unwrap();
    }

    scheduler.stop().await;
    tracker.flush().await.unwrap();

    assert!(store.len() > 1);
    assert_eq!(persisted(&store), 8 * 400);
}

// =============================================================================
// Several gears, one store
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aggregator_merges_gears_writing_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let gears = ["gear-a", "gear-b", "gear-c"];

    let handles: Vec<_> = gears
        .iter()
        .enumerate()
        .map(|(n, gear)| {
            let tracker = Arc::new(HitTracker::new(*gear, Arc::clone(&store), FlushPolicy::Count(10), true));
            tokio::spawn(async move {
                for _ in 0..(100 * (n as u64 + 1)) {
                    tracker.add().await;
                }
                tracker.flush().await.unwrap();
            })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }

    let aggregator = Aggregator::new(Arc::clone(&store), "scale");

    let Report::Collapsed(totals) = aggregator.query(0, ReportMode::Collapsed).await.unwrap() else {
        panic!("expected collapsed report");
    };
    assert_eq!(totals.gears["gear-a"], 100);
    assert_eq!(totals.gears["gear-b"], 200);
    assert_eq!(totals.gears["gear-c"], 300);

    let Report::Detailed(app) = aggregator.query(0, ReportMode::Detailed).await.unwrap() else {
        panic!("expected detailed report");
    };
    assert_eq!(app.children.len(), 3);
    let records: usize = app.children.iter().map(|g| g.children.len()).sum();
    assert_eq!(records, store.len());
}

/// Callers that poll with the wall-clock time of their previous call see
/// each record once, even when a gear flushes faster than once per ms.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wall_clock_polling_after_rapid_flushes_reports_nothing_twice() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(HitTracker::new("gear-a", Arc::clone(&store), FlushPolicy::Count(1), true));
    let aggregator = Aggregator::new(Arc::clone(&store), "scale");

    let t0 = chrono::Utc::now().timestamp_millis() - 1;
    for _ in 0..200 {
        tracker.add().await;
    }

    let first = aggregator.query(t0, ReportMode::Collapsed).await.unwrap();
    let t1 = chrono::Utc::now().timestamp_millis();
    assert_eq!(first.total_hits(), 200);

    let second = aggregator.query(t1, ReportMode::Collapsed).await.unwrap();
    assert_eq!(second.total_hits(), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    tracker.add().await;
    let third = aggregator.query(t1, ReportMode::Collapsed).await.unwrap();
    assert_eq!(third.total_hits(), 1);
}

/// Polling with the returned cursor while gears keep writing ends up
/// reporting every stored hit exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn polling_during_writes_reports_each_record_once() {
    let store = Arc::new(MemoryStore::new());
    let tracker = Arc::new(HitTracker::new("gear-a", Arc::clone(&store), manual(), true));
    let aggregator = Aggregator::new(Arc::clone(&store), "scale");

    let writer = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            for _ in 0..30 {
                for _ in 0..3 {
                    tracker.add().await;
                }
                tracker.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let mut cursor = 0;
    let mut polled = 0;
    while !writer.is_finished() {
        let report = aggregator.query(cursor, ReportMode::Collapsed).await.unwrap();
        polled += report.total_hits();
        cursor = report.latest().unwrap_or(cursor);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    writer.await.unwrap();
    polled += aggregator
        .query(cursor, ReportMode::Collapsed)
        .await
        .unwrap()
        .total_hits();

    assert_eq!(polled, 90);
}
