#![cfg(feature = "sqlite")]

use std::{sync::Arc, thread};

use metrics_relay::{MemoryStore, Metric, MetricValue, SqliteStore, Store};
use proptest::prelude::*;

fn stores() -> Vec<(&'static str, Arc<dyn Store>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("sqlite", Arc::new(SqliteStore::open_in_memory().expect("in-memory sqlite"))),
    ]
}

#[test]
fn gauges_and_counters_merge_per_kind() {
    for (kind, store) in stores() {
        store.update_gauge("Alloc", 123.45).unwrap();
        store.update_counter("PollCount", 1).unwrap();
        store.update_counter("PollCount", 1).unwrap();

        assert_eq!(store.gauge("Alloc").unwrap(), Some(123.45), "{kind}");
        assert_eq!(store.counter("PollCount").unwrap(), Some(2), "{kind}");
        assert_eq!(store.gauge("Unknown").unwrap(), None, "{kind}");
        assert_eq!(store.counter("Unknown").unwrap(), None, "{kind}");
    }
}

#[test]
fn snapshot_is_a_copy() {
    for (kind, store) in stores() {
        store.update_gauge("g", 1.0).unwrap();
        store.update_counter("c", 10).unwrap();

        let mut snapshot = store.snapshot().unwrap();
        snapshot.gauges.insert("g".to_string(), 99.0);
        snapshot.gauges.insert("new".to_string(), 1.0);
        snapshot.counters.clear();

        assert_eq!(store.gauge("g").unwrap(), Some(1.0), "{kind}");
        assert_eq!(store.gauge("new").unwrap(), None, "{kind}");
        assert_eq!(store.counter("c").unwrap(), Some(10), "{kind}");

        let fresh = store.snapshot().unwrap();
        assert_eq!(fresh.gauges.len(), 1, "{kind}");
        assert_eq!(fresh.counters.len(), 1, "{kind}");
    }
}

#[test]
fn concurrent_counter_updates_are_not_lost() {
    const WRITERS: usize = 8;
    const UPDATES: usize = 250;

    for (kind, store) in stores() {
        thread::scope(|s| {
            for _ in 0..WRITERS {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..UPDATES {
                        store.update_counter("hits", 1).unwrap();
                    }
                });
            }

            // Readers run alongside the writers and must only ever see a partial count.
            for _ in 0..2 {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..UPDATES {
                        let seen = store.counter("hits").unwrap().unwrap_or(0);
                        assert!(seen <= (WRITERS * UPDATES) as i64);
                        let _ = store.snapshot().unwrap();
                    }
                });
            }
        });

        assert_eq!(store.counter("hits").unwrap(), Some((WRITERS * UPDATES) as i64), "{kind}");
    }
}

#[test]
fn counter_overflow_wraps_without_breaking_reads() {
    for (kind, store) in stores() {
        store.update_gauge("g", 1.0).unwrap();
        store.update_counter("c", i64::MAX).unwrap();
        store.update_counter("c", 1).unwrap();
        assert_eq!(store.counter("c").unwrap(), Some(i64::MIN), "{kind}");

        store.batch_update(&[Metric::counter("c", -1), Metric::counter("c", -1)]).unwrap();
        assert_eq!(store.counter("c").unwrap(), Some(i64::MAX - 1), "{kind}");

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.counters.get("c"), Some(&(i64::MAX - 1)), "{kind}");
        assert_eq!(snapshot.gauges.get("g"), Some(&1.0), "{kind}");
    }
}

#[test]
fn update_echo_is_not_affected_by_later_writers() {
    const WRITERS: i64 = 4;
    const UPDATES: i64 = 100;

    for (kind, store) in stores() {
        let mut echoed = thread::scope(|s| {
            let handles = (0..WRITERS)
                .map(|_| {
                    let store = &store;
                    s.spawn(move || {
                        (0..UPDATES)
                            .map(|_| match store.update(&Metric::counter("c", 1)).unwrap() {
                                MetricValue::Counter(n) => n,
                                other => panic!("unexpected value {other:?}"),
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        // Each update sees exactly its own increment, so the echoes are a permutation of 1..=N.
        echoed.sort_unstable();
        let expected = (1..=WRITERS * UPDATES).collect::<Vec<_>>();
        assert_eq!(echoed, expected, "{kind}");
    }
}

#[test]
fn concurrent_batches_accumulate() {
    for (kind, store) in stores() {
        thread::scope(|s| {
            for i in 0..4 {
                let store = &store;
                s.spawn(move || {
                    let batch = vec![Metric::counter("c", 1), Metric::gauge(format!("g{i}"), 1.0)];
                    for _ in 0..50 {
                        store.batch_update(&batch).unwrap();
                    }
                });
            }
        });

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.counters.get("c"), Some(&200), "{kind}");
        assert_eq!(snapshot.gauges.len(), 4, "{kind}");
    }
}

proptest! {
    #[test]
    fn counter_is_sum_of_deltas(deltas in prop::collection::vec(-1_000_000i64..1_000_000, 1..32)) {
        for (kind, store) in stores() {
            for delta in &deltas {
                store.update_counter("k", *delta).unwrap();
            }
            let expected = Some(deltas.iter().sum::<i64>());
            prop_assert_eq!(store.counter("k").unwrap(), expected, "{}", kind);
        }
    }

    #[test]
    fn gauge_keeps_last_write(values in prop::collection::vec(-1.0e9f64..1.0e9, 1..32)) {
        for (kind, store) in stores() {
            for value in &values {
                store.update_gauge("k", *value).unwrap();
            }
            prop_assert_eq!(store.gauge("k").unwrap(), values.last().copied(), "{}", kind);
        }
    }

    #[test]
    fn batch_matches_individual_updates(
        updates in prop::collection::vec((0usize..4, any::<bool>(), -1000i64..1000), 0..40),
    ) {
        let batch = updates
            .iter()
            .map(|(key, is_gauge, n)| {
                let name = format!("m{key}");
                if *is_gauge { Metric::gauge(name, *n as f64) } else { Metric::counter(name, *n) }
            })
            .collect::<Vec<_>>();

        for (kind, store) in stores() {
            let reference = MemoryStore::new();
            for metric in &batch {
                match metric.value() {
                    MetricValue::Gauge(v) => reference.update_gauge(metric.name(), v).unwrap(),
                    MetricValue::Counter(d) => reference.update_counter(metric.name(), d).unwrap(),
                }
            }

            store.batch_update(&batch).unwrap();
            prop_assert_eq!(store.snapshot().unwrap(), reference.snapshot().unwrap(), "{}", kind);
        }
    }
}
