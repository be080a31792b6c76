//! Task handles and the park/unpark primitive.
//!
//! Every OS thread that touches a blocking operation owns a [`TaskHandle`]:
//! a cloneable identity carrying the thread's unpark handle and an atomic
//! interrupt bit. Blocking operations observe the bit at every suspension
//! point and report [`ErrorKind::Interrupted`](crate::ErrorKind) when it is
//! set, consuming it.
//!
//! # Waking semantics
//!
//! - [`park`] suspends the calling thread until unparked, interrupted, or
//!   spuriously woken. A pending unpark token makes the next park return
//!   immediately.
//! - [`park_until`] is the timed variant. Waits at or below the spin
//!   threshold return immediately so the caller's re-check loop spins
//!   instead of paying the park/unpark round trip.
//! - [`TaskHandle::interrupt`] sets the bit, unparks the thread, and wakes
//!   any condition-variable wait the task has registered, so interrupts
//!   reach lock-based waiters as well as parked ones.
//!
//! Spurious wake-ups are allowed everywhere; callers re-check predicates.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};

use parking_lot::Mutex;

use crate::time::Deadline;

/// Wake closure installed while a task blocks on a condition variable.
///
/// The closure must take the condvar's paired mutex before notifying, so a
/// concurrent interrupt cannot slip between the waiter's predicate check
/// and its wait.
type WakeFn = Box<dyn Fn() + Send>;

struct TaskInner {
    /// OS thread handle; the unpark target.
    thread: Thread,
    /// The interrupt flag. Set by `interrupt`, consumed at suspension
    /// points via `take_interrupt`.
    interrupted: AtomicBool,
    /// Wake hook for an in-progress condvar wait, if any.
    wait_target: Mutex<Option<WakeFn>>,
}

/// A cloneable handle to a task (an OS thread in this crate).
///
/// Obtained via [`TaskHandle::current`]. Handles stay valid after the
/// thread exits; waking a finished task is a no-op.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("thread", &self.inner.thread.id())
            .field(
                "interrupted",
                &self.inner.interrupted.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

thread_local! {
    static CURRENT: TaskHandle = TaskHandle {
        inner: Arc::new(TaskInner {
            thread: thread::current(),
            interrupted: AtomicBool::new(false),
            wait_target: Mutex::new(None),
        }),
    };
}

impl TaskHandle {
    /// Returns the calling thread's task handle, creating it on first use.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(Self::clone)
    }

    /// The identity of the underlying thread.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.inner.thread.id()
    }

    /// Whether this handle refers to the calling thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.inner.thread.id() == thread::current().id()
    }

    /// Ensures the next (or in-flight) park by this task returns.
    pub fn unpark(&self) {
        self.inner.thread.unpark();
    }

    /// Requests that this task stop whatever it is blocked on.
    ///
    /// Sets the interrupt flag, unparks the thread, and fires the wake
    /// hook of any registered condvar wait. Interrupting the calling
    /// thread only sets the flag; its own re-check loop observes it.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        if self.is_current() {
            return;
        }
        self.inner.thread.unpark();
        let target = self.inner.wait_target.lock();
        if let Some(wake) = target.as_ref() {
            wake();
        }
    }

    /// Observes the interrupt flag without consuming it.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Consumes the interrupt flag, returning whether it was set.
    ///
    /// Operations that report an interrupt failure call this exactly once
    /// on the failure path, so the flag never leaks into unrelated work.
    #[must_use]
    pub fn take_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Registers a wake hook for the duration of a condvar wait.
    ///
    /// The returned guard deregisters on drop. Callers create the guard
    /// before taking the condvar's mutex and drop it after releasing, so
    /// the interrupting thread's hook can always acquire that mutex.
    #[must_use]
    pub fn enter_condvar_wait(&self, wake: WakeFn) -> CondvarWaitGuard<'_> {
        *self.inner.wait_target.lock() = Some(wake);
        CondvarWaitGuard { task: self }
    }
}

/// Deregisters a condvar wake hook on drop.
pub struct CondvarWaitGuard<'a> {
    task: &'a TaskHandle,
}

impl fmt::Debug for CondvarWaitGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondvarWaitGuard")
            .field("task", self.task)
            .finish()
    }
}

impl Drop for CondvarWaitGuard<'_> {
    fn drop(&mut self) {
        *self.task.inner.wait_target.lock() = None;
    }
}

/// Suspends the calling thread until unparked, interrupted, or spuriously
/// woken. Consumes a pending unpark token.
pub fn park() {
    thread::park();
}

/// Timed park. Returns immediately once the deadline has passed, and skips
/// the syscall entirely when the remaining wait is below the spin
/// threshold (the caller's re-check loop spins through it instead).
pub fn park_until(deadline: Deadline) {
    if deadline.within_spin_threshold() {
        std::hint::spin_loop();
        return;
    }
    thread::park_timeout(deadline.remaining());
}
