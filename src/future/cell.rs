//! The one-shot future cell.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, PanicPayload, Result};
use crate::park::{self, TaskHandle};
use crate::time::Deadline;

use super::state::{State, StateCell};
use super::waiters::{WaitNode, WaiterStack};

/// The wrapped computation. `FnMut` rather than `FnOnce` so a cell driven
/// through [`FutureCell::run_and_reset`] can execute repeatedly.
type Computation<T> = Box<dyn FnMut() -> Result<T> + Send>;

/// Completion callback, fired exactly once from the broadcast path.
type DoneHook = Box<dyn FnOnce() + Send>;

/// A one-shot computation whose outcome is published atomically to an
/// unbounded set of waiters, supporting cancellation racing completion.
///
/// Cells are shared behind `Arc`: the executor side calls [`run`], any
/// number of observers call [`get`] / [`get_timed`] / [`cancel`].
///
/// [`run`]: FutureCell::run
/// [`get`]: FutureCell::get
/// [`get_timed`]: FutureCell::get_timed
/// [`cancel`]: FutureCell::cancel
pub struct FutureCell<T> {
    state: StateCell,
    /// Write-once outcome; written only by the completer that won the
    /// `New -> Completing` transition, readable after any settled state.
    outcome: OnceLock<Result<T>>,
    computation: Mutex<Option<Computation<T>>>,
    /// Claim flag for the runner slot; at most one executing thread.
    runner_claimed: AtomicBool,
    /// Identity of the executing task while claimed; cancel(true) targets
    /// it. Cleared only after the state settles.
    runner: Mutex<Option<TaskHandle>>,
    waiters: WaiterStack,
    done_hook: Mutex<Option<DoneHook>>,
}

impl<T> fmt::Debug for FutureCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureCell")
            .field("state", &self.state.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> FutureCell<T> {
    /// Wraps a fallible computation.
    #[must_use]
    pub fn new<F>(computation: F) -> Self
    where
        F: FnMut() -> Result<T> + Send + 'static,
    {
        Self::build(Box::new(computation), None)
    }

    /// Wraps a computation run for its side effect; the cell settles with
    /// `value` when the runnable returns.
    #[must_use]
    pub fn from_value<F>(mut runnable: F, value: T) -> Self
    where
        F: FnMut() + Send + 'static,
        T: Clone,
    {
        Self::build(
            Box::new(move || {
                runnable();
                Ok(value.clone())
            }),
            None,
        )
    }

    /// Like [`new`](Self::new) with a completion callback, fired exactly
    /// once when the cell reaches a terminal state (value, failure, or
    /// cancellation).
    #[must_use]
    pub fn with_done_hook<F, H>(computation: F, hook: H) -> Self
    where
        F: FnMut() -> Result<T> + Send + 'static,
        H: FnOnce() + Send + 'static,
    {
        Self::build(Box::new(computation), Some(Box::new(hook)))
    }

    fn build(computation: Computation<T>, hook: Option<DoneHook>) -> Self {
        Self {
            state: StateCell::new(),
            outcome: OnceLock::new(),
            computation: Mutex::new(Some(computation)),
            runner_claimed: AtomicBool::new(false),
            runner: Mutex::new(None),
            waiters: WaiterStack::new(),
            done_hook: Mutex::new(hook),
        }
    }

    /// Executes the computation, unless the cell is already settled or
    /// another thread holds the runner claim. Idempotent.
    pub fn run(&self) {
        if self.state.load(Ordering::Acquire) != State::New || !self.claim_runner() {
            return;
        }
        let computation = self.computation.lock().take();
        if let Some(mut f) = computation {
            // Re-check under the claim: a cancel may have landed between
            // the first state read and the claim.
            if self.state.load(Ordering::Acquire) == State::New {
                match Self::invoke(&mut f) {
                    Ok(value) => self.settle(Ok(value)),
                    Err(err) => self.settle(Err(err)),
                }
            }
        }
        self.finish_run();
    }

    /// Executes the computation without publishing its value, leaving the
    /// cell in `New` so it can run again. Returns `true` iff the
    /// computation completed and no cancel intervened.
    ///
    /// Designed for tasks that inherently run multiple times (periodic
    /// work); a failure still settles the cell as with [`run`](Self::run).
    pub fn run_and_reset(&self) -> bool {
        if self.state.load(Ordering::Acquire) != State::New || !self.claim_runner() {
            return false;
        }
        let mut ran = false;
        let computation = self.computation.lock().take();
        if let Some(mut f) = computation {
            if self.state.load(Ordering::Acquire) == State::New {
                match Self::invoke(&mut f) {
                    Ok(_) => ran = true,
                    Err(err) => self.settle(Err(err)),
                }
            }
            if self.state.load(Ordering::Acquire) == State::New {
                *self.computation.lock() = Some(f);
            }
        }
        let observed = self.state.load(Ordering::Acquire);
        self.finish_run();
        ran && observed == State::New
    }

    /// Attempts to cancel. Returns whether this call won the transition
    /// out of `New`; a settled or already-cancelled cell returns `false`
    /// and nothing changes.
    ///
    /// With `interrupt = true` the claimed runner (if any) receives an
    /// interrupt; the terminal `Interrupted` state is published only after
    /// delivery, so the runner's epilogue can synchronise with it.
    pub fn cancel(&self, interrupt: bool) -> bool {
        let target = if interrupt {
            State::Interrupting
        } else {
            State::Cancelled
        };
        if !self.state.transition(State::New, target) {
            return false;
        }
        if interrupt {
            let runner = self.runner.lock().clone();
            if let Some(runner) = runner {
                runner.interrupt();
            }
            self.state.publish(State::Interrupted);
        }
        self.finish_completion();
        true
    }

    /// Blocks until the cell settles and reports the outcome.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut s = self.state.load(Ordering::Acquire);
        if !s.is_settled() {
            s = self.await_done(None)?;
        }
        self.report(s)
    }

    /// Timed [`get`](Self::get). Fails with
    /// [`ErrorKind::TimedOut`] if the cell has not settled within
    /// `timeout`; a cancel that races the deadline surfaces as
    /// cancellation instead.
    pub fn get_timed(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        let mut s = self.state.load(Ordering::Acquire);
        if !s.is_settled() {
            s = self.await_done(Some(Deadline::after(timeout)))?;
            if !s.is_settled() {
                return Err(Error::new(ErrorKind::TimedOut).with_context("future not settled"));
            }
        }
        self.report(s)
    }

    /// Whether the cell has left `New` (including in-flight completion and
    /// cancellation).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != State::New
    }

    /// Whether the cell was cancelled (with or without interrupt).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire).is_cancelled()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state.load(Ordering::Acquire)
    }

    fn invoke(f: &mut Computation<T>) -> Result<T> {
        match catch_unwind(AssertUnwindSafe(|| f())) {
            Ok(result) => result,
            Err(payload) => Err(Error::panicked(PanicPayload::from_unwind(payload.as_ref()))),
        }
    }

    /// Publishes the outcome. The two ordered writes (outcome, then the
    /// terminal release store under the `New -> Completing` claim) are the
    /// publication protocol every reader relies on.
    fn settle(&self, result: Result<T>) {
        if !self.state.transition(State::New, State::Completing) {
            // A cancel won the race; its broadcast wakes the waiters and
            // the computed value is discarded.
            return;
        }
        let terminal = if result.is_ok() {
            State::Normal
        } else {
            State::Exceptional
        };
        let _ = self.outcome.set(result);
        self.state.publish(terminal);
        self.finish_completion();
    }

    fn claim_runner(&self) -> bool {
        if self
            .runner_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.runner.lock() = Some(TaskHandle::current());
        true
    }

    /// Runner epilogue: release the claim, then synchronise with a
    /// concurrent `cancel(true)` so its interrupt cannot leak into
    /// whatever this thread executes next.
    fn finish_run(&self) {
        *self.runner.lock() = None;
        self.runner_claimed.store(false, Ordering::Release);
        let s = self.state.load(Ordering::Acquire);
        if s >= State::Interrupting {
            let backoff = Backoff::new();
            while self.state.load(Ordering::Acquire) == State::Interrupting {
                backoff.snooze();
            }
            let _ = TaskHandle::current().take_interrupt();
        }
    }

    /// Broadcast to all waiters and fire the done hook. Reached exactly
    /// once, by whichever thread won the transition out of `New`.
    fn finish_completion(&self) {
        self.waiters.detach_all();
        let hook = self.done_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        *self.computation.lock() = None;
    }

    /// Waits for a settled state, enrolling on the waiter stack once the
    /// fast paths (already settling, spin) are exhausted.
    fn await_done(&self, deadline: Option<Deadline>) -> Result<State> {
        let task = TaskHandle::current();
        let mut node: Option<Arc<WaitNode>> = None;
        let mut queued = false;
        loop {
            if task.take_interrupt() {
                if let Some(node) = node.as_ref() {
                    self.waiters.remove(node);
                }
                return Err(Error::new(ErrorKind::Interrupted).with_context("waiting on future"));
            }
            let s = self.state.load(Ordering::Acquire);
            if s.is_settled() {
                if let Some(node) = node.as_ref() {
                    node.deactivate();
                }
                return Ok(s);
            }
            if s == State::Completing {
                // Outcome publication is imminent; don't enroll.
                std::thread::yield_now();
            } else if node.is_none() {
                node = Some(WaitNode::new(task.clone()));
            } else if !queued {
                queued = self
                    .waiters
                    .try_push(node.as_ref().expect("node created on previous iteration"));
            } else if let Some(d) = deadline {
                if d.expired() {
                    self.waiters
                        .remove(node.as_ref().expect("queued node exists"));
                    return Ok(self.state.load(Ordering::Acquire));
                }
                park::park_until(d);
            } else {
                park::park();
            }
        }
    }

    fn report(&self, s: State) -> Result<T>
    where
        T: Clone,
    {
        match s {
            State::Normal | State::Exceptional => self
                .outcome
                .get()
                .expect("outcome is published before the terminal state is visible")
                .clone(),
            _ => Err(Error::new(ErrorKind::Cancelled).with_context("future cancelled")),
        }
    }
}
