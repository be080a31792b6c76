//! One-shot cancellable future cells.
//!
//! A [`FutureCell`] wraps a fallible computation submitted for execution
//! somewhere else (an executor thread, a timer, a test harness). The cell
//! settles exactly once, with the computed value, the computation's
//! failure, or a cancellation, and publishes the outcome atomically to an
//! unbounded set of waiters.
//!
//! # Lifecycle
//!
//! ```text
//! New ─┬─> Completing ─┬─> Normal
//!      │               └─> Exceptional
//!      ├─> Cancelled
//!      └─> Interrupting ──> Interrupted
//! ```
//!
//! Possible transitions are exactly those shown; the four rightmost states
//! are terminal. The outcome is written between `New -> Completing` and
//! the terminal store, so observing a terminal state with an acquire load
//! is sufficient to read it.
//!
//! # Cancellation
//!
//! [`FutureCell::cancel`] races the completer for the `New -> ...` CAS;
//! whichever transition wins is the one all waiters observe. A cancel with
//! `interrupt = true` delivers an interrupt to the claimed runner, and the
//! runner's epilogue waits for the interrupter to finish before consuming
//! the flag, so a late interrupt can never leak into unrelated work.

mod cell;
mod state;
mod waiters;

pub use cell::FutureCell;
pub use state::State;
