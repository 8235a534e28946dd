//! Concurrent publish / subscribe / unsubscribe tests.

use crossbeam_channel::unbounded;
use link::{Link, LinkConfig, SubscriptionId};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

const PUBLISHERS: usize = 4;
const VALUES_PER_PUBLISHER: usize = 500;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

#[test]
fn test_concurrent_publishers_deliver_each_value_once() {
    init_tracing();
    let link = Arc::new(Link::new());
    let (tx, rx) = unbounded();
    link.subscribe(move |v: &usize| {
        tx.send(*v).unwrap();
    });

    let barrier = Arc::new(Barrier::new(PUBLISHERS));
    let handles: Vec<_> = (0..PUBLISHERS)
        .map(|p| {
            let link = Arc::clone(&link);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..VALUES_PER_PUBLISHER {
                    link.publish(p * VALUES_PER_PUBLISHER + i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let received: Vec<usize> = rx.try_iter().collect();
    let unique: HashSet<usize> = received.iter().copied().collect();
    assert_eq!(received.len(), PUBLISHERS * VALUES_PER_PUBLISHER);
    assert_eq!(unique.len(), received.len());
}

#[test]
fn test_per_publisher_order_preserved() {
    let link = Arc::new(Link::new());
    let (tx, rx) = unbounded();
    link.subscribe(move |v: &(usize, usize)| {
        tx.send(*v).unwrap();
    });

    let handles: Vec<_> = (0..PUBLISHERS)
        .map(|p| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for i in 0..VALUES_PER_PUBLISHER {
                    link.publish((p, i));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut last = vec![None; PUBLISHERS];
    for (p, i) in rx.try_iter() {
        if let Some(prev) = last[p] {
            assert!(i > prev, "publisher {} reordered: {} after {}", p, i, prev);
        }
        last[p] = Some(i);
    }
}

#[test]
fn test_subscribers_agree_on_global_order() {
    let link = Arc::new(Link::new());
    let (tx_a, rx_a) = unbounded();
    let (tx_b, rx_b) = unbounded();
    link.subscribe(move |v: &usize| tx_a.send(*v).unwrap());
    link.subscribe(move |v: &usize| tx_b.send(*v).unwrap());

    let handles: Vec<_> = (0..PUBLISHERS)
        .map(|p| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for i in 0..VALUES_PER_PUBLISHER {
                    link.publish(p * VALUES_PER_PUBLISHER + i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let a: Vec<usize> = rx_a.try_iter().collect();
    let b: Vec<usize> = rx_b.try_iter().collect();
    assert_eq!(a, b);
}

#[test]
fn test_churn_does_not_corrupt_registry() {
    init_tracing();
    let link = Arc::new(Link::new());
    let stable_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&stable_hits);
    let stable = link.subscribe(move |_: &usize| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for _ in 0..250 {
                    let id = link.subscribe(|_: &usize| {});
                    link.unsubscribe([id]);
                }
            })
        })
        .collect();
    let publishers: Vec<_> = (0..PUBLISHERS)
        .map(|_| {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for i in 0..VALUES_PER_PUBLISHER {
                    link.publish(i);
                }
            })
        })
        .collect();
    for h in churners.into_iter().chain(publishers) {
        h.join().unwrap();
    }

    assert_eq!(link.subscriber_count(), 1);
    assert!(link.is_subscribed(stable));
    assert_eq!(
        stable_hits.load(Ordering::SeqCst),
        PUBLISHERS * VALUES_PER_PUBLISHER
    );
}

#[test]
fn test_replay_never_duplicates_concurrent_publish() {
    let link = Arc::new(Link::with_config(LinkConfig::replaying()));
    link.publish(0usize);

    let publisher = {
        let link = Arc::clone(&link);
        thread::spawn(move || {
            for i in 1..=1000 {
                link.publish(i);
            }
        })
    };

    // Every late subscriber must see a strictly increasing sequence: the
    // replayed value never repeats one delivered live.
    let logs: Vec<Arc<Mutex<Vec<usize>>>> = (0..50)
        .map(|_| {
            let log = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&log);
            link.subscribe(move |v: &usize| sink.lock().unwrap().push(*v));
            log
        })
        .collect();
    publisher.join().unwrap();

    for log in logs {
        let values = log.lock().unwrap();
        assert!(!values.is_empty());
        assert!(values.windows(2).all(|w| w[0] < w[1]), "{:?}", *values);
        assert_eq!(*values.last().unwrap(), 1000);
    }
}

#[test]
fn test_unsubscribe_from_other_thread_during_dispatch() {
    let link = Arc::new(Link::new());
    let (started_tx, started_rx) = unbounded::<()>();
    let (release_tx, release_rx) = unbounded::<()>();

    link.subscribe(move |v: &u32| {
        if *v == 1 {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }
    });
    let (tx, rx) = unbounded();
    let victim = link.subscribe(move |v: &u32| tx.send(*v).unwrap());

    let publisher = {
        let link = Arc::clone(&link);
        thread::spawn(move || link.publish(1))
    };

    // Unsubscribing does not wait for the in-flight dispatch.
    started_rx.recv().unwrap();
    link.unsubscribe([victim]);
    release_tx.send(()).unwrap();
    publisher.join().unwrap();

    link.publish(2);
    let received: Vec<u32> = rx.try_iter().collect();
    // The in-flight publish may or may not reach it; later ones never do.
    assert!(!received.contains(&2));
}

proptest! {
    #[test]
    fn prop_every_subscriber_sees_admitted_values(
        values in proptest::collection::vec(any::<i16>(), 0..64),
        subscribers in 1usize..6,
        use_filter in any::<bool>(),
    ) {
        let link = Link::new();
        if use_filter {
            link.filter(|v: &i16| v % 2 == 0);
        }
        let logs: Vec<Arc<Mutex<Vec<i16>>>> = (0..subscribers)
            .map(|_| {
                let log = Arc::new(Mutex::new(Vec::new()));
                let sink = Arc::clone(&log);
                link.subscribe(move |v: &i16| sink.lock().unwrap().push(*v));
                log
            })
            .collect();

        for v in &values {
            link.publish(*v);
        }

        let expected: Vec<i16> = values
            .iter()
            .copied()
            .filter(|v| !use_filter || v % 2 == 0)
            .collect();
        for log in &logs {
            prop_assert_eq!(&*log.lock().unwrap(), &expected);
        }
        let last = link.last_value();
        prop_assert_eq!(last.as_deref(), values.last());
    }

    #[test]
    fn prop_unsubscribed_ids_never_receive(
        count in 1usize..10,
        remove_mask in proptest::collection::vec(any::<bool>(), 10),
    ) {
        let link = Link::new();
        let hits: Vec<Arc<AtomicUsize>> = (0..count).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let ids: Vec<SubscriptionId> = hits
            .iter()
            .map(|h| {
                let h = Arc::clone(h);
                link.subscribe(move |_: &u8| {
                    h.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let removed: Vec<SubscriptionId> = ids
            .iter()
            .zip(&remove_mask)
            .filter(|(_, remove)| **remove)
            .map(|(id, _)| *id)
            .collect();
        link.unsubscribe(removed.iter().copied());
        link.publish(1);

        for (i, h) in hits.iter().enumerate() {
            let expected = if remove_mask[i] { 0 } else { 1 };
            prop_assert_eq!(h.load(Ordering::SeqCst), expected);
        }
        prop_assert_eq!(link.subscriber_count(), count - removed.len());
    }
}
