//! Completion service: futures delivered in completion order.
//!
//! Each cell submitted through a [`CompletionQueue`] carries a done hook
//! that enqueues its own handle onto a bounded queue the moment it
//! reaches a terminal state (value, failure, or cancellation). Consumers
//! then take handles in completion order instead of polling a fixed
//! sequence of cells.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::error::{DequeueError, Result};
use crate::exec::Execute;
use crate::future::FutureCell;
use crate::queue::BoundedQueue;
use crate::tracing_compat::debug;

/// A queue of settled future cells, fed by their done hooks.
///
/// The queue is bounded by the capacity given at construction; size it to
/// the number of submissions outstanding at once. The hook enqueues
/// without blocking so a completing worker is never stalled by a slow
/// orchestrator.
pub struct CompletionQueue<T> {
    completed: Arc<BoundedQueue<Arc<FutureCell<T>>>>,
}

impl<T: Send + Sync + 'static> std::fmt::Debug for CompletionQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("ready", &self.completed.len())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> CompletionQueue<T> {
    /// A completion queue accepting up to `capacity` undelivered
    /// completions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            completed: Arc::new(BoundedQueue::new(capacity)),
        }
    }

    /// Submits a computation whose cell will appear on this queue when it
    /// settles, however it settles.
    pub fn submit<E, F>(&self, executor: &E, computation: F) -> Result<Arc<FutureCell<T>>>
    where
        E: Execute + ?Sized,
        F: FnMut() -> crate::error::Result<T> + Send + 'static,
    {
        let completed = Arc::clone(&self.completed);
        let slot: Arc<OnceLock<Arc<FutureCell<T>>>> = Arc::new(OnceLock::new());
        let hook_slot = Arc::clone(&slot);
        let cell = Arc::new(FutureCell::with_done_hook(computation, move || {
            if let Some(cell) = hook_slot.get() {
                if completed.offer(Arc::clone(cell)).is_err() {
                    debug!("completion queue full; completion dropped");
                }
            }
        }));
        slot.set(Arc::clone(&cell))
            .unwrap_or_else(|_| unreachable!("hook slot is set exactly once"));
        let runner = Arc::clone(&cell);
        executor.execute(Box::new(move || runner.run()))?;
        Ok(cell)
    }

    /// Next settled cell, blocking until one completes.
    pub fn take(&self) -> std::result::Result<Arc<FutureCell<T>>, DequeueError> {
        self.completed.take()
    }

    /// Next settled cell if one is already queued.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<FutureCell<T>>> {
        self.completed.poll()
    }

    /// Next settled cell, waiting up to `timeout`; `Ok(None)` on expiry.
    pub fn poll_timed(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Option<Arc<FutureCell<T>>>, DequeueError> {
        self.completed.poll_timed(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::exec::Job;

    struct CallerRuns;

    impl Execute for CallerRuns {
        fn execute(&self, job: Job) -> Result<()> {
            job();
            Ok(())
        }
    }

    #[test]
    fn completion_appears_after_run() {
        let completion: CompletionQueue<i32> = CompletionQueue::with_capacity(4);
        let submitted = completion.submit(&CallerRuns, || Ok(10)).unwrap();
        let done = completion.poll().expect("cell completed synchronously");
        assert!(Arc::ptr_eq(&submitted, &done));
        assert_eq!(done.get().unwrap(), 10);
    }

    #[test]
    fn failed_tasks_complete_too() {
        let completion: CompletionQueue<i32> = CompletionQueue::with_capacity(4);
        completion
            .submit(&CallerRuns, || {
                Err(Error::new(ErrorKind::ExecutionFailed).with_context("broken"))
            })
            .unwrap();
        let done = completion.poll().expect("failure still completes");
        assert_eq!(done.get().unwrap_err().kind(), ErrorKind::ExecutionFailed);
    }

    #[test]
    fn cancelled_cell_is_delivered() {
        struct Never;
        impl Execute for Never {
            fn execute(&self, _job: Job) -> Result<()> {
                Ok(()) // accepted but never run
            }
        }
        let completion: CompletionQueue<i32> = CompletionQueue::with_capacity(4);
        let cell = completion.submit(&Never, || Ok(1)).unwrap();
        assert!(cell.cancel(false));
        let done = completion.poll().expect("cancellation completes the cell");
        assert!(done.is_cancelled());
    }

    #[test]
    fn poll_timed_reports_empty() {
        let completion: CompletionQueue<i32> = CompletionQueue::with_capacity(1);
        assert!(completion
            .poll_timed(Duration::from_millis(10))
            .unwrap()
            .is_none());
    }
}
