#![allow(missing_docs)]
//! Orchestration over a real worker pool: invoke-all result sets,
//! invoke-any winner selection with loser cancellation, and rejection
//! behaviour under saturation.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use handoff::error::Result;
use handoff::{
    invoke_all, invoke_all_timed, invoke_any, invoke_any_timed, submit, Error, ErrorKind,
    FixedPool, TaskHandle,
};

use common::{init_test_logging, join_all};

/// Sleeps in small slices so a delivered interrupt is observed promptly.
fn interruptible_sleep(total: Duration) -> bool {
    let task = TaskHandle::current();
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if task.is_interrupted() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    task.is_interrupted()
}

#[test]
fn submit_through_pool_round_trips() {
    init_test_logging();
    let pool = FixedPool::new(2);
    let cell = submit(&pool, || Ok(123)).unwrap();
    assert_eq!(cell.get().unwrap(), 123);
    pool.shutdown();
}

#[test]
fn invoke_all_collects_every_value() {
    init_test_logging();
    let pool = FixedPool::new(4);
    const N: i32 = 8;
    let tasks: Vec<_> = (0..N).map(|i| move || Ok(i)).collect();
    let cells = invoke_all(&pool, tasks).unwrap();
    assert_eq!(cells.len(), N as usize);
    for cell in &cells {
        assert!(cell.is_done());
    }
    let values: HashSet<i32> = cells.iter().map(|c| c.get().unwrap()).collect();
    let expected: HashSet<i32> = (0..N).collect();
    assert_eq!(values, expected);
    pool.shutdown();
}

#[test]
fn invoke_all_preserves_submission_order() {
    init_test_logging();
    let pool = FixedPool::new(2);
    let tasks: Vec<_> = (0..6_i32).map(|i| move || Ok(i * 10)).collect();
    let cells = invoke_all(&pool, tasks).unwrap();
    let values: Vec<i32> = cells.iter().map(|c| c.get().unwrap()).collect();
    assert_eq!(values, vec![0, 10, 20, 30, 40, 50]);
    pool.shutdown();
}

#[test]
fn invoke_any_returns_fastest_and_cancels_losers() {
    init_test_logging();
    let pool = FixedPool::new(3);
    let slow_interrupted = Arc::new(AtomicBool::new(false));
    let slow_flag = Arc::clone(&slow_interrupted);

    let fast = || {
        thread::sleep(Duration::from_millis(5));
        Ok(String::from("A"))
    };
    let slow = move || {
        if interruptible_sleep(Duration::from_millis(500)) {
            slow_flag.store(true, Ordering::SeqCst);
            return Err(Error::new(ErrorKind::Interrupted).with_context("stopped early"));
        }
        Ok(String::from("B"))
    };
    let failing = || -> Result<String> {
        thread::sleep(Duration::from_millis(30));
        Err(Error::new(ErrorKind::ExecutionFailed).with_context("deliberate"))
    };

    let tasks: Vec<Box<dyn FnMut() -> Result<String> + Send>> = vec![
        Box::new(fast),
        Box::new(slow),
        Box::new(failing),
    ];
    let start = Instant::now();
    let winner = invoke_any(&pool, tasks).unwrap();
    assert_eq!(winner, "A");
    // The 500 ms task must observe its interrupt well before it finishes
    // naturally.
    let mut waited = Duration::ZERO;
    while !slow_interrupted.load(Ordering::SeqCst) && waited < Duration::from_millis(400) {
        thread::sleep(Duration::from_millis(5));
        waited += Duration::from_millis(5);
    }
    assert!(
        slow_interrupted.load(Ordering::SeqCst),
        "loser never observed its interrupt"
    );
    assert!(start.elapsed() < Duration::from_millis(450));
    pool.shutdown();
}

#[test]
fn invoke_any_with_all_failures_propagates_last() {
    init_test_logging();
    let pool = FixedPool::new(2);
    let tasks: Vec<Box<dyn FnMut() -> Result<i32> + Send>> = vec![
        Box::new(|| Err(Error::new(ErrorKind::ExecutionFailed).with_context("first"))),
        Box::new(|| Err(Error::new(ErrorKind::ExecutionFailed).with_context("second"))),
    ];
    let err = invoke_any(&pool, tasks).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
    pool.shutdown();
}

#[test]
fn invoke_any_timed_expires_when_nothing_finishes() {
    init_test_logging();
    let pool = FixedPool::new(2);
    let tasks: Vec<Box<dyn FnMut() -> Result<i32> + Send>> = vec![Box::new(|| {
        interruptible_sleep(Duration::from_millis(500));
        Ok(1)
    })];
    let start = Instant::now();
    let err = invoke_any_timed(&pool, tasks, Duration::from_millis(40)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(start.elapsed() < Duration::from_millis(450));
    pool.shutdown();
}

#[test]
fn invoke_all_timed_cancels_stragglers() {
    init_test_logging();
    let pool = FixedPool::new(2);
    let tasks: Vec<Box<dyn FnMut() -> Result<i32> + Send>> = vec![
        Box::new(|| Ok(1)),
        Box::new(|| {
            interruptible_sleep(Duration::from_millis(500));
            Ok(2)
        }),
    ];
    let start = Instant::now();
    let cells = invoke_all_timed(&pool, tasks, Duration::from_millis(50)).unwrap();
    assert!(start.elapsed() < Duration::from_millis(450));
    assert_eq!(cells[0].get().unwrap(), 1);
    // The straggler either got cancelled or lost the race to its cancel;
    // it must be settled either way.
    assert!(cells[1].is_done());
    pool.shutdown();
}

#[test]
fn saturated_pool_rejects_invoke_all() {
    init_test_logging();
    let pool = FixedPool::with_queue_depth(1, 1);
    // Occupy the worker and the single queue slot.
    let gate = Arc::new(AtomicBool::new(false));
    let release = Arc::clone(&gate);
    let _blocker = submit(&pool, move || {
        while !release.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(0)
    })
    .unwrap();
    thread::sleep(Duration::from_millis(20));
    let _filler = submit(&pool, || Ok(0)).unwrap();

    let tasks: Vec<Box<dyn FnMut() -> Result<i32> + Send>> = vec![Box::new(|| Ok(9))];
    let err = invoke_all(&pool, tasks).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);

    gate.store(true, Ordering::Release);
    pool.shutdown();
}

#[test]
fn parallel_submissions_from_many_threads() {
    init_test_logging();
    let pool = Arc::new(FixedPool::new(4));
    let mut submitters = Vec::new();
    for t in 0..4_i32 {
        let pool = Arc::clone(&pool);
        submitters.push(thread::spawn(move || {
            let mut values = Vec::new();
            for i in 0..25 {
                let cell = submit(&*pool, move || Ok(t * 100 + i)).unwrap();
                values.push(cell.get().unwrap());
            }
            values
        }));
    }
    let all: Vec<i32> = join_all(submitters).into_iter().flatten().collect();
    assert_eq!(all.len(), 100);
    pool.shutdown();
}
