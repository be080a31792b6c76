//! Executor dispatch surface and invoke-all / invoke-any orchestration.
//!
//! The crate does not schedule anything itself: work is handed to an
//! opaque [`Execute`] implementation that runs it some time in the
//! future on some thread, or refuses it. [`submit`] pairs a computation
//! with a [`FutureCell`] so callers can wait on, time out on, or cancel
//! the work regardless of where it runs; cell construction never depends
//! on the executor.
//!
//! [`invoke_all`] and [`invoke_any`] compose the future core with a
//! completion queue: each submitted cell carries a done hook that
//! enqueues its own handle on terminal transition, so orchestration
//! observes completions in completion order instead of polling cells.
//!
//! [`FixedPool`] is the crate's reference executor, a fixed set of
//! worker threads fed from a [`BoundedQueue`](crate::BoundedQueue). It is
//! used by the tests and benches and small enough to embed.

mod completion;
mod pool;

pub use completion::CompletionQueue;
pub use pool::FixedPool;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::future::FutureCell;
use crate::time::Deadline;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An opaque dispatch surface: runs `job` some time in the future on any
/// thread, or refuses it with [`ErrorKind::Rejected`].
pub trait Execute: Send + Sync {
    /// Hands `job` to the executor.
    fn execute(&self, job: Job) -> Result<()>;
}

/// Submits a fallible computation, returning the cell to wait on.
///
/// The cell is constructed first and handed to the executor as a plain
/// job; a rejection surfaces as [`ErrorKind::Rejected`] and the cell is
/// discarded unrun.
pub fn submit<E, F, T>(executor: &E, computation: F) -> Result<Arc<FutureCell<T>>>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + 'static,
{
    let cell = Arc::new(FutureCell::new(computation));
    let runner = Arc::clone(&cell);
    executor.execute(Box::new(move || runner.run()))?;
    Ok(cell)
}

/// Submits a runnable with a fixed fallback result published on success.
pub fn submit_with_value<E, F, T>(executor: &E, runnable: F, value: T) -> Result<Arc<FutureCell<T>>>
where
    E: Execute + ?Sized,
    F: FnMut() + Send + 'static,
    T: Send + Sync + Clone + 'static,
{
    let cell = Arc::new(FutureCell::from_value(runnable, value));
    let runner = Arc::clone(&cell);
    executor.execute(Box::new(move || runner.run()))?;
    Ok(cell)
}

/// Submits every computation and waits until each cell has settled.
///
/// Per-cell results are not collapsed: a failing task does not abort its
/// siblings, and the caller inspects each returned cell. An interrupt of
/// the calling task (or a rejection while submitting) cancels everything
/// still pending and propagates.
pub fn invoke_all<E, F, T>(executor: &E, computations: Vec<F>) -> Result<Vec<Arc<FutureCell<T>>>>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + Clone + 'static,
{
    let cells = submit_all(executor, computations)?;
    for cell in &cells {
        if let Err(err) = cell.get() {
            if err.is_interrupted() {
                cancel_all(&cells);
                return Err(err);
            }
            // task-level failure; the caller reads it off the cell
        }
    }
    Ok(cells)
}

/// Timed [`invoke_all`]: the remaining global deadline applies to each
/// wait, and cells that have not settled when it expires are cancelled
/// (with interrupt) before the set is returned.
pub fn invoke_all_timed<E, F, T>(
    executor: &E,
    computations: Vec<F>,
    timeout: Duration,
) -> Result<Vec<Arc<FutureCell<T>>>>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + Clone + 'static,
{
    let deadline = Deadline::after(timeout);
    let cells = submit_all(executor, computations)?;
    for cell in &cells {
        match cell.get_timed(deadline.remaining()) {
            Ok(_) => {}
            Err(err) if err.is_interrupted() => {
                cancel_all(&cells);
                return Err(err);
            }
            Err(err) if err.is_timeout() => {
                cancel_all(&cells);
                break;
            }
            Err(_) => {
                // task-level failure; the caller reads it off the cell
            }
        }
    }
    Ok(cells)
}

/// Runs every computation and returns the first successful value,
/// cancelling the rest. If every task fails, the last observed failure
/// propagates.
pub fn invoke_any<E, F, T>(executor: &E, computations: Vec<F>) -> Result<T>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + Clone + 'static,
{
    do_invoke_any(executor, computations, None)
}

/// Timed [`invoke_any`]; fails with [`ErrorKind::TimedOut`] if no task
/// succeeds within `timeout`.
pub fn invoke_any_timed<E, F, T>(executor: &E, computations: Vec<F>, timeout: Duration) -> Result<T>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + Clone + 'static,
{
    do_invoke_any(executor, computations, Some(Deadline::after(timeout)))
}

/// Incremental-submission any-of race. One task is submitted up front;
/// another is released each time a completion comes back unsuccessful,
/// so a fast early success never pays for the whole set.
fn do_invoke_any<E, F, T>(
    executor: &E,
    computations: Vec<F>,
    deadline: Option<Deadline>,
) -> Result<T>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + Clone + 'static,
{
    let total = computations.len();
    if total == 0 {
        return Err(Error::new(ErrorKind::InvalidArgument).with_context("no tasks to run"));
    }
    let completion: CompletionQueue<T> = CompletionQueue::with_capacity(total);
    let mut pending = computations.into_iter();
    let mut cells: Vec<Arc<FutureCell<T>>> = Vec::with_capacity(total);
    let mut active = 0usize;
    let mut last_failure: Option<Error> = None;

    let outcome = 'race: {
        match completion.submit(executor, pending.next().expect("total > 0")) {
            Ok(cell) => {
                cells.push(cell);
                active += 1;
            }
            Err(err) => break 'race Err(err),
        }
        loop {
            let mut ready = completion.poll();
            if ready.is_none() {
                if let Some(f) = pending.next() {
                    match completion.submit(executor, f) {
                        Ok(cell) => {
                            cells.push(cell);
                            active += 1;
                        }
                        Err(err) => break 'race Err(err),
                    }
                    continue;
                }
                if active == 0 {
                    break 'race Err(last_failure.take().unwrap_or_else(|| {
                        Error::new(ErrorKind::ExecutionFailed).with_context("no task completed")
                    }));
                }
                ready = if let Some(d) = deadline {
                    match completion.poll_timed(d.remaining()) {
                        Ok(Some(cell)) => Some(cell),
                        Ok(None) => {
                            break 'race Err(Error::new(ErrorKind::TimedOut)
                                .with_context("no task finished in time"))
                        }
                        Err(e) => break 'race Err(e.into()),
                    }
                } else {
                    match completion.take() {
                        Ok(cell) => Some(cell),
                        Err(e) => break 'race Err(e.into()),
                    }
                };
            }
            if let Some(cell) = ready {
                active -= 1;
                match cell.get() {
                    Ok(value) => break 'race Ok(value),
                    Err(err) => last_failure = Some(err),
                }
            }
        }
    };

    cancel_all(&cells);
    outcome
}

fn submit_all<E, F, T>(executor: &E, computations: Vec<F>) -> Result<Vec<Arc<FutureCell<T>>>>
where
    E: Execute + ?Sized,
    F: FnMut() -> Result<T> + Send + 'static,
    T: Send + Sync + 'static,
{
    let mut cells = Vec::with_capacity(computations.len());
    for f in computations {
        cells.push(Arc::new(FutureCell::new(f)));
    }
    for cell in &cells {
        let runner = Arc::clone(cell);
        if let Err(err) = executor.execute(Box::new(move || runner.run())) {
            cancel_all(&cells);
            return Err(err);
        }
    }
    Ok(cells)
}

fn cancel_all<T: Send + 'static>(cells: &[Arc<FutureCell<T>>]) {
    for cell in cells {
        cell.cancel(true);
    }
}
