//! Bounded FIFO blocking queue.
//!
//! A linked-node queue with independent head and take locks so that, as
//! long as it is neither empty nor full, producers and consumers never
//! contend on the same lock. The element count is the only state shared
//! across the two lock domains, and a single condition variable per lock
//! carries the cascading wake-up discipline: each state transition signals
//! one peer, and an awakened peer re-signals if residual work remains.

mod bounded;

pub use bounded::{BoundedQueue, Iter};
