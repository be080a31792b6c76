#![allow(missing_docs)]
//! Multi-threaded behaviour of the bounded two-lock queue: the
//! capacity-3 cascade scenario, producer/consumer round-trips, and
//! boundary behaviour under zero timeouts.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use handoff::BoundedQueue;

use common::{init_test_logging, join_all};

#[test]
fn capacity_three_cascade() {
    init_test_logging();
    let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(3));

    let mut producers = Vec::new();
    for p in 0..5_u32 {
        let queue = Arc::clone(&queue);
        producers.push(thread::spawn(move || {
            for i in 0..3 {
                queue.put(p * 3 + i + 1).unwrap();
            }
        }));
    }
    let mut consumers = Vec::new();
    for _ in 0..5 {
        let queue = Arc::clone(&queue);
        consumers.push(thread::spawn(move || {
            let mut got = Vec::new();
            for _ in 0..3 {
                got.push(queue.take().unwrap());
            }
            got
        }));
    }
    join_all(producers);
    let consumed: Vec<u32> = join_all(consumers).into_iter().flatten().collect();

    let seen: HashSet<u32> = consumed.iter().copied().collect();
    let expected: HashSet<u32> = (1..=15).collect();
    assert_eq!(seen, expected);
    assert_eq!(consumed.len(), 15);
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.remaining_capacity(), 3);
}

#[test]
fn per_producer_order_is_preserved() {
    init_test_logging();
    let queue: Arc<BoundedQueue<(usize, u32)>> = Arc::new(BoundedQueue::new(4));
    const PRODUCERS: usize = 5;
    const PER_PRODUCER: u32 = 50;

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                queue.put((p, seq)).unwrap();
            }
        }));
    }
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut next_seq = [0u32; PRODUCERS];
            for _ in 0..(PRODUCERS as u32 * PER_PRODUCER) {
                let (p, seq) = queue.take().unwrap();
                assert_eq!(seq, next_seq[p], "producer {p} reordered");
                next_seq[p] += 1;
            }
        })
    };
    join_all(producers);
    consumer.join().unwrap();
    assert!(queue.is_empty());
}

#[test]
fn multi_producer_multi_consumer_round_trip() {
    init_test_logging();
    let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(8));
    const PRODUCERS: u32 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u32 = 250;
    const TOTAL: u32 = PRODUCERS * PER_PRODUCER;

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                queue.put(p * PER_PRODUCER + seq).unwrap();
            }
        }));
    }
    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
        let queue = Arc::clone(&queue);
        consumers.push(thread::spawn(move || {
            let mut got = Vec::new();
            for _ in 0..(TOTAL as usize / CONSUMERS) {
                got.push(queue.take().unwrap());
            }
            got
        }));
    }
    join_all(producers);
    let consumed: Vec<u32> = join_all(consumers).into_iter().flatten().collect();
    let seen: HashSet<u32> = consumed.iter().copied().collect();
    assert_eq!(seen.len(), TOTAL as usize, "values lost or duplicated");
    assert!(queue.is_empty());
}

#[test]
fn zero_timeout_offer_on_full_queue_has_no_side_effects() {
    init_test_logging();
    let queue = BoundedQueue::new(2);
    queue.put(1).unwrap();
    queue.put(2).unwrap();

    let start = Instant::now();
    let err = queue.offer_timed(3, Duration::ZERO).unwrap_err();
    assert_eq!(err.into_inner(), 3);
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.take().unwrap(), 1);
    assert_eq!(queue.take().unwrap(), 2);
}

#[test]
fn timed_poll_returns_after_its_deadline() {
    init_test_logging();
    let queue: BoundedQueue<u32> = BoundedQueue::new(1);
    let start = Instant::now();
    assert_eq!(queue.poll_timed(Duration::from_millis(60)).unwrap(), None);
    assert!(start.elapsed() >= Duration::from_millis(60));
}

#[test]
fn producers_block_on_full_and_resume_in_bounded_time() {
    init_test_logging();
    let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));
    queue.put(0).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let start = Instant::now();
            queue.put(1).unwrap();
            start.elapsed()
        })
    };
    thread::sleep(Duration::from_millis(30));
    assert_eq!(queue.take().unwrap(), 0);
    let blocked_for = producer.join().unwrap();
    assert!(blocked_for >= Duration::from_millis(20));
    assert_eq!(queue.take().unwrap(), 1);
}

#[test]
fn weakly_consistent_iteration_with_concurrent_consumers() {
    init_test_logging();
    let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(64));
    for i in 0..32 {
        queue.put(i).unwrap();
    }
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for _ in 0..16 {
                let _ = queue.take().unwrap();
                thread::sleep(Duration::from_micros(200));
            }
        })
    };
    // Iterate while the consumer races us; every observed value must be
    // one that was enqueued, with no duplicates.
    let observed: Vec<u32> = queue.iter().collect();
    consumer.join().unwrap();
    let unique: HashSet<u32> = observed.iter().copied().collect();
    assert_eq!(unique.len(), observed.len(), "iterator duplicated a value");
    for v in observed {
        assert!(v < 32);
    }
}
