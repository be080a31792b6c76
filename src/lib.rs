//! Handoff: cancel-correct blocking handoff and future-completion primitives.
//!
//! # Overview
//!
//! Handoff is the concurrency core of a blocking (thread-based) runtime: a
//! small set of primitives whose correctness rests on fine-grained atomic
//! state machines rather than coarse locking. Every blocking operation
//! observes a per-task interrupt flag, every timeout is a monotonic
//! deadline, and every completion is published through an explicit state
//! transition.
//!
//! # Core Guarantees
//!
//! - **One-shot publication**: a future cell settles exactly once; the
//!   terminal state write is the linearisation point and the outcome is
//!   readable forever after
//! - **No lost wake-ups**: every enrolled waiter either observes a terminal
//!   state or is unparked in bounded time after the transition
//! - **Interrupt-correctness**: cancellation and interrupts are first-class
//!   results, never silent drops; an interrupt aimed at a settled runner is
//!   consumed, not leaked into unrelated work
//! - **Paired rendezvous**: a synchronous transfer succeeds for a producer
//!   exactly when it succeeds for one consumer, exchanging one item
//!
//! # Module Structure
//!
//! - [`park`]: task handles, interrupt flags, and the park/unpark primitive
//! - [`future`]: one-shot cancellable future cells with waiter broadcast
//! - [`queue`]: bounded two-lock FIFO queue with cascading signals
//! - [`channel`]: zero-capacity synchronous channel (fair and unfair)
//! - [`exec`]: executor dispatch surface, a fixed worker pool, and
//!   invoke-all / invoke-any orchestration
//! - [`config`]: spin-policy configuration
//! - [`time`]: monotonic deadline helpers
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod channel;
pub mod config;
pub mod error;
pub mod exec;
pub mod future;
mod link;
pub mod park;
pub mod queue;
pub mod time;
pub mod tracing_compat;

// Re-exports for convenient access to core types
pub use channel::SyncChannel;
pub use config::SpinConfig;
pub use error::{
    DequeueError, EnqueueError, Error, ErrorKind, PanicPayload, Result, ResultExt, TransferError,
};
pub use exec::{
    invoke_all, invoke_all_timed, invoke_any, invoke_any_timed, submit, submit_with_value,
    CompletionQueue, Execute, FixedPool, Job,
};
pub use future::{FutureCell, State};
pub use park::TaskHandle;
pub use queue::BoundedQueue;
pub use time::Deadline;
