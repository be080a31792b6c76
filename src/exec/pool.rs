//! Fixed worker pool over the bounded queue.
//!
//! The reference [`Execute`](super::Execute) implementation: a fixed set
//! of worker threads feeding from a [`BoundedQueue`] of jobs. `execute`
//! never blocks: a full queue is a rejection, which keeps back-pressure
//! at the submission boundary. Shutdown is graceful: queued jobs drain,
//! idle workers are interrupted, and `shutdown` joins every thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::park::TaskHandle;
use crate::queue::BoundedQueue;
use crate::tracing_compat::{debug, trace};

use super::{Execute, Job};

/// Default depth of the job queue when not specified.
const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Idle slice after which a worker re-checks the shutdown flag.
const IDLE_SLICE: Duration = Duration::from_millis(100);

struct PoolInner {
    queue: BoundedQueue<Job>,
    shutdown: AtomicBool,
    /// Number of workers currently executing a job.
    busy: AtomicUsize,
    /// Task handles of the workers, for shutdown interrupts.
    worker_tasks: Mutex<Vec<TaskHandle>>,
}

/// A fixed-width thread pool executor.
pub struct FixedPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for FixedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("workers", &self.workers.lock().len())
            .field("queued", &self.inner.queue.len())
            .field("busy", &self.inner.busy.load(Ordering::Relaxed))
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl FixedPool {
    /// A pool with `workers` threads and the default queue depth.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_queue_depth(workers, DEFAULT_QUEUE_DEPTH)
    }

    /// A pool with `workers` threads accepting up to `queue_depth` queued
    /// jobs.
    #[must_use]
    pub fn with_queue_depth(workers: usize, queue_depth: usize) -> Self {
        assert!(workers > 0, "pool needs at least one worker");
        let inner = Arc::new(PoolInner {
            queue: BoundedQueue::new(queue_depth),
            shutdown: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            worker_tasks: Mutex::new(Vec::with_capacity(workers)),
        });
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("handoff-pool-{id}"))
                .spawn(move || {
                    inner.worker_tasks.lock().push(TaskHandle::current());
                    worker_loop(&inner, id);
                })
                .expect("failed to spawn pool worker");
            handles.push(handle);
        }
        debug!(workers, queue_depth, "pool started");
        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Requests shutdown, drains queued jobs, and joins every worker.
    ///
    /// Jobs already queued still run; new submissions are rejected.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("pool shutting down");
        for task in self.inner.worker_tasks.lock().iter() {
            task.interrupt();
        }
        let handles = {
            let mut workers = self.workers.lock();
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            let _ = handle.join();
        }
        debug!("pool stopped");
    }
}

impl Execute for FixedPool {
    fn execute(&self, job: Job) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::new(ErrorKind::Rejected).with_context("pool is shut down"));
        }
        match self.inner.queue.offer(job) {
            Ok(()) => Ok(()),
            Err(_rejected) => {
                debug!("job rejected: queue full");
                Err(Error::new(ErrorKind::Rejected).with_context("job queue is full"))
            }
        }
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &PoolInner, id: usize) {
    let task = TaskHandle::current();
    loop {
        match inner.queue.poll_timed(IDLE_SLICE) {
            Ok(Some(job)) => {
                trace!(worker = id, "executing job");
                inner.busy.fetch_add(1, Ordering::Relaxed);
                job();
                inner.busy.fetch_sub(1, Ordering::Relaxed);
                // A job may leave a stale interrupt behind (a cancel that
                // lost its race); it must not poison the next job's waits.
                let _ = task.take_interrupt();
            }
            Ok(None) | Err(_) => {
                if inner.shutdown.load(Ordering::Acquire) && inner.queue.is_empty() {
                    break;
                }
            }
        }
    }
    trace!(worker = id, "worker retired");
}
