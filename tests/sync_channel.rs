#![allow(missing_docs)]
//! Rendezvous behaviour of the synchronous channel in both fairness
//! modes: pairing, ordering, stress, timeouts, and interrupts.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use handoff::error::{DequeueError, TransferError};
use handoff::{SyncChannel, TaskHandle};

use common::{init_test_logging, join_all};

#[test]
fn fair_rendezvous_within_bounded_time() {
    init_test_logging();
    let channel: Arc<SyncChannel<u32>> = Arc::new(SyncChannel::new_fair());
    let consumer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let start = Instant::now();
            let value = channel.take().unwrap();
            (value, start.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(10));
    let start = Instant::now();
    channel.put(42).unwrap();
    let producer_wait = start.elapsed();
    let (value, consumer_wait) = consumer.join().unwrap();

    assert_eq!(value, 42);
    assert!(consumer_wait < Duration::from_secs(2));
    assert!(producer_wait < Duration::from_secs(2));
}

#[test]
fn unfair_rendezvous_exchanges_item() {
    init_test_logging();
    let channel: Arc<SyncChannel<String>> = Arc::new(SyncChannel::new());
    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.put(String::from("payload")).unwrap())
    };
    let value = channel.take().unwrap();
    producer.join().unwrap();
    assert_eq!(value, "payload");
}

#[test]
fn fair_stress_preserves_set_and_per_producer_order() {
    init_test_logging();
    const PRODUCERS: u32 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u32 = 1000;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize;

    let channel: Arc<SyncChannel<u32>> = Arc::new(SyncChannel::new_fair());

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let channel = Arc::clone(&channel);
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                channel.put((p << 16) | seq).unwrap();
            }
        }));
    }
    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
        let channel = Arc::clone(&channel);
        consumers.push(thread::spawn(move || {
            let mut got = Vec::with_capacity(TOTAL / CONSUMERS);
            for _ in 0..TOTAL / CONSUMERS {
                got.push(channel.take().unwrap());
            }
            got
        }));
    }
    join_all(producers);
    let per_consumer = join_all(consumers);

    // Within one consumer, each producer's values must arrive in send
    // order; a rendezvous cannot reorder a producer against itself.
    for got in &per_consumer {
        let mut last_seq = [None::<u32>; PRODUCERS as usize];
        for value in got {
            let (p, seq) = ((value >> 16) as usize, value & 0xFFFF);
            if let Some(prev) = last_seq[p] {
                assert!(seq > prev, "producer {p} reordered: {seq} after {prev}");
            }
            last_seq[p] = Some(seq);
        }
    }

    let delivered: HashSet<u32> = per_consumer.into_iter().flatten().collect();
    assert_eq!(delivered.len(), TOTAL, "items lost or duplicated");
}

#[test]
fn unfair_stress_delivers_every_item() {
    init_test_logging();
    const PRODUCERS: u32 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u32 = 500;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize;

    let channel: Arc<SyncChannel<u32>> = Arc::new(SyncChannel::new());
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let channel = Arc::clone(&channel);
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                channel.put((p << 16) | seq).unwrap();
            }
        }));
    }
    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
        let channel = Arc::clone(&channel);
        consumers.push(thread::spawn(move || {
            let mut got = Vec::with_capacity(TOTAL / CONSUMERS);
            for _ in 0..TOTAL / CONSUMERS {
                got.push(channel.take().unwrap());
            }
            got
        }));
    }
    join_all(producers);
    let delivered: HashSet<u32> = join_all(consumers).into_iter().flatten().collect();
    assert_eq!(delivered.len(), TOTAL, "items lost or duplicated");
}

#[test]
fn zero_timeout_poll_returns_empty_immediately() {
    init_test_logging();
    for channel in [SyncChannel::<u32>::new(), SyncChannel::new_fair()] {
        let start = Instant::now();
        assert_eq!(channel.poll_timed(Duration::ZERO).unwrap(), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}

#[test]
fn zero_timeout_offer_with_no_consumer_returns_item() {
    init_test_logging();
    for channel in [SyncChannel::<u32>::new(), SyncChannel::new_fair()] {
        match channel.offer_timed(5, Duration::ZERO) {
            Err(TransferError::TimedOut(5)) => {}
            other => panic!("expected TimedOut(5), got {other:?}"),
        }
    }
}

#[test]
fn timed_offer_reports_after_its_deadline() {
    init_test_logging();
    for channel in [SyncChannel::<u32>::new(), SyncChannel::new_fair()] {
        let start = Instant::now();
        match channel.offer_timed(1, Duration::from_millis(40)) {
            Err(TransferError::TimedOut(1)) => {}
            other => panic!("expected TimedOut(1), got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}

#[test]
fn expired_producer_is_invisible_to_later_consumers() {
    init_test_logging();
    for channel in [SyncChannel::<u32>::new(), SyncChannel::new_fair()] {
        let _ = channel.offer_timed(9, Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.poll(), None);
    }
}

#[test]
fn interrupt_cancels_pending_take() {
    init_test_logging();
    for fair in [false, true] {
        let channel: Arc<SyncChannel<u32>> = Arc::new(SyncChannel::with_fairness(fair));
        let (tx, rx) = std::sync::mpsc::channel();
        let consumer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                tx.send(TaskHandle::current()).unwrap();
                channel.take()
            })
        };
        let task = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        task.interrupt();
        assert_eq!(consumer.join().unwrap(), Err(DequeueError::Interrupted));
        // The cancelled node must not capture a later producer.
        assert_eq!(channel.offer(1), Err(1), "fair={fair}");
    }
}

#[test]
fn interrupt_cancels_pending_put_and_returns_item() {
    init_test_logging();
    for fair in [false, true] {
        let channel: Arc<SyncChannel<u32>> = Arc::new(SyncChannel::with_fairness(fair));
        let (tx, rx) = std::sync::mpsc::channel();
        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                tx.send(TaskHandle::current()).unwrap();
                channel.put(11)
            })
        };
        let task = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        task.interrupt();
        match producer.join().unwrap() {
            Err(TransferError::Interrupted(11)) => {}
            other => panic!("expected Interrupted(11), got {other:?}"),
        }
        assert_eq!(channel.poll(), None, "fair={fair}");
    }
}
