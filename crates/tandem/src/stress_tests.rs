//! Stress tests: randomized interleavings of enqueues, faults and reentrant
//! bus mutation.

use crate::{async_trait, Command, EventBus, Fault, Invoker, Listener};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Commands
// ============================================================================

struct Probe {
    id: usize,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    completed: Arc<Mutex<Vec<usize>>>,
    yields: usize,
    fail: bool,
}

#[async_trait]
impl Command for Probe {
    async fn execute(&self) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("probe {} failed", self.id);
        }
        self.completed.lock().push(self.id);
        Ok(())
    }

    async fn undo(&self) -> Result<()> {
        Ok(())
    }
}

struct Probes {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    completed: Arc<Mutex<Vec<usize>>>,
}

impl Probes {
    fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn probe(&self, id: usize, fail: bool) -> Probe {
        Probe {
            id,
            active: self.active.clone(),
            max_active: self.max_active.clone(),
            completed: self.completed.clone(),
            yields: fastrand::usize(0..4),
            fail,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_enqueue_never_overlaps() {
    let invoker = Invoker::new();
    let probes = Arc::new(Probes::new());

    let mut producers = Vec::new();
    for producer in 0..8 {
        let invoker = invoker.clone();
        let probes = probes.clone();
        producers.push(tokio::spawn(async move {
            let mut handles = Vec::new();
            for n in 0..25 {
                handles.push(invoker.enqueue(probes.probe(producer * 100 + n, false)));
                if fastrand::bool() {
                    tokio::task::yield_now().await;
                }
            }
            for handle in handles {
                handle.await.unwrap();
            }
        }));
    }

    for producer in producers {
        producer.await.unwrap();
    }
    invoker.wait_idle().await;

    assert_eq!(probes.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(invoker.history_len(), 200);
    assert_eq!(invoker.pending_len(), 0);
    assert!(!invoker.is_processing());
}

#[tokio::test]
async fn stress_history_matches_successes_in_completion_order() {
    let invoker = Invoker::new();
    let probes = Probes::new();

    let mut handles = Vec::new();
    let mut expected_failures = 0;
    for id in 0..150 {
        let fail = fastrand::u8(0..5) == 0;
        if fail {
            expected_failures += 1;
        }
        handles.push((fail, invoker.enqueue(probes.probe(id, fail))));
    }

    let mut failures = 0;
    for (fail, handle) in handles {
        let outcome = handle.await;
        assert_eq!(outcome.is_err(), fail);
        if let Err(fault) = outcome {
            assert!(matches!(fault, Fault::Execution { .. }));
            failures += 1;
        }
    }
    invoker.wait_idle().await;

    assert_eq!(failures, expected_failures);
    let completed = probes.completed.lock().clone();
    assert_eq!(invoker.history_len(), completed.len());
    assert_eq!(invoker.history_len(), 150 - expected_failures);

    // Sequential execution means completion order is enqueue order.
    let mut sorted = completed.clone();
    sorted.sort();
    assert_eq!(completed, sorted);
}

#[test]
fn stress_reentrant_bus_mutation() {
    let bus = EventBus::<(u32,)>::named("churn");
    let pool: Arc<Mutex<Vec<Arc<Listener>>>> = Arc::new(Mutex::new(Vec::new()));
    let notified = Arc::new(AtomicUsize::new(0));

    for n in 0..16 {
        let (bus, shared_pool, notified) = (bus.clone(), pool.clone(), notified.clone());
        let listener = Listener::builder(format!("churn-{n}"))
            .on::<u32, _>(move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
                let others = shared_pool.lock().clone();
                if others.is_empty() {
                    return Ok(());
                }
                let other = &others[fastrand::usize(..others.len())];
                match fastrand::u8(0..4) {
                    0 => bus.subscribe(other),
                    1 => {
                        bus.unsubscribe(other);
                    }
                    2 => anyhow::bail!("listener {n} chose to fail"),
                    _ => {}
                }
                Ok(())
            })
            .build();
        pool.lock().push(listener);
    }

    for listener in pool.lock().iter() {
        bus.subscribe(listener);
    }

    for round in 0..200 {
        let before = bus.listener_count();
        let start = notified.load(Ordering::SeqCst);
        bus.raise_value(round);
        let delivered = notified.load(Ordering::SeqCst) - start;

        // A raise reaches exactly the listeners present when it started.
        assert_eq!(delivered, before);
    }

    bus.remove_all_listeners();
    let start = notified.load(Ordering::SeqCst);
    bus.raise_value(0);
    assert_eq!(notified.load(Ordering::SeqCst), start);

    // Break the listener -> pool -> listener cycle.
    pool.lock().clear();
}
