//! Zero-capacity synchronous handoff channel.
//!
//! A [`SyncChannel`] holds no buffer: every producer must rendezvous with
//! a consumer and vice versa, and the hand-off of one item is linearised
//! at a single state transition both sides observe. Two interchangeable
//! transfer algorithms implement the contract:
//!
//! - **Unfair (default)**: a LIFO dual stack. Arriving threads match the
//!   most recently arrived counterpart; under contention this maximises
//!   locality but gives no ordering guarantee across waiters.
//! - **Fair**: a FIFO dual queue. Producers match consumers in arrival
//!   order, and per-role ordering is preserved.
//!
//! Both are dual data structures: the channel at any instant contains
//! only requests or only data, and a complementary arrival matches
//! (fulfils) the oldest/newest entry instead of enqueuing. Waiting is
//! spin-then-park with the bounds from [`SpinConfig`](crate::SpinConfig).
//!
//! Size, peek, and containment observers are meaningless on a buffer-less
//! channel and return fixed empty values.

mod queue;
mod stack;

use std::time::Duration;

use crate::error::{DequeueError, TransferError};
use crate::park::TaskHandle;
use crate::time::Deadline;

use queue::TransferQueue;
use stack::TransferStack;

/// Result of one transfer attempt against either algorithm.
pub(crate) enum Transferred<T> {
    /// Consumer side matched; the producer's item.
    Taken(T),
    /// Producer side matched; the item now belongs to the consumer.
    Given,
    /// Timeout or interrupt. Carries the producer's item back (`None` for
    /// consumers); the failed attempt left no side effect a counterpart
    /// can observe.
    Failed(Option<T>),
}

enum Flavor<T> {
    Stack(TransferStack<T>),
    Queue(TransferQueue<T>),
}

/// A synchronous rendezvous channel.
///
/// See the [module docs](self) for the transfer semantics.
pub struct SyncChannel<T> {
    flavor: Flavor<T>,
}

impl<T> std::fmt::Debug for SyncChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fair = matches!(self.flavor, Flavor::Queue(_));
        f.debug_struct("SyncChannel").field("fair", &fair).finish()
    }
}

impl<T: Send> Default for SyncChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> SyncChannel<T> {
    /// Creates an unfair (LIFO dual stack) channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flavor: Flavor::Stack(TransferStack::new()),
        }
    }

    /// Creates a fair (FIFO dual queue) channel.
    #[must_use]
    pub fn new_fair() -> Self {
        Self {
            flavor: Flavor::Queue(TransferQueue::new()),
        }
    }

    /// Fairness selected at construction.
    #[must_use]
    pub fn with_fairness(fair: bool) -> Self {
        if fair {
            Self::new_fair()
        } else {
            Self::new()
        }
    }

    /// Whether this channel matches in arrival order.
    #[must_use]
    pub fn is_fair(&self) -> bool {
        matches!(self.flavor, Flavor::Queue(_))
    }

    /// Hands `item` to a consumer, waiting as long as it takes.
    pub fn put(&self, item: T) -> Result<(), TransferError<T>> {
        match self.transfer(Some(item), None) {
            Transferred::Given => Ok(()),
            Transferred::Failed(returned) => {
                let _ = TaskHandle::current().take_interrupt();
                Err(TransferError::Interrupted(Self::reclaim(returned)))
            }
            Transferred::Taken(_) => unreachable!("producer transfer cannot take"),
        }
    }

    /// Hands `item` to a consumer only if one is already waiting.
    pub fn offer(&self, item: T) -> Result<(), T> {
        match self.transfer(Some(item), Some(Deadline::after(Duration::ZERO))) {
            Transferred::Given => Ok(()),
            Transferred::Failed(returned) => Err(Self::reclaim(returned)),
            Transferred::Taken(_) => unreachable!("producer transfer cannot take"),
        }
    }

    /// Hands `item` to a consumer, waiting up to `timeout`.
    pub fn offer_timed(&self, item: T, timeout: Duration) -> Result<(), TransferError<T>> {
        match self.transfer(Some(item), Some(Deadline::after(timeout))) {
            Transferred::Given => Ok(()),
            Transferred::Failed(returned) => {
                let item = Self::reclaim(returned);
                if TaskHandle::current().take_interrupt() {
                    Err(TransferError::Interrupted(item))
                } else {
                    Err(TransferError::TimedOut(item))
                }
            }
            Transferred::Taken(_) => unreachable!("producer transfer cannot take"),
        }
    }

    /// Receives an item from a producer, waiting as long as it takes.
    pub fn take(&self) -> Result<T, DequeueError> {
        match self.transfer(None, None) {
            Transferred::Taken(item) => Ok(item),
            Transferred::Failed(_) => {
                let _ = TaskHandle::current().take_interrupt();
                Err(DequeueError::Interrupted)
            }
            Transferred::Given => unreachable!("consumer transfer cannot give"),
        }
    }

    /// Receives an item only if a producer is already waiting.
    #[must_use]
    pub fn poll(&self) -> Option<T> {
        match self.transfer(None, Some(Deadline::after(Duration::ZERO))) {
            Transferred::Taken(item) => Some(item),
            Transferred::Failed(_) => None,
            Transferred::Given => unreachable!("consumer transfer cannot give"),
        }
    }

    /// Receives an item, waiting up to `timeout`. `Ok(None)` is the
    /// distinguishable timeout result.
    pub fn poll_timed(&self, timeout: Duration) -> Result<Option<T>, DequeueError> {
        match self.transfer(None, Some(Deadline::after(timeout))) {
            Transferred::Taken(item) => Ok(Some(item)),
            Transferred::Failed(_) => {
                if TaskHandle::current().take_interrupt() {
                    Err(DequeueError::Interrupted)
                } else {
                    Ok(None)
                }
            }
            Transferred::Given => unreachable!("consumer transfer cannot give"),
        }
    }

    /// Always zero: the channel never holds elements.
    #[must_use]
    pub fn len(&self) -> usize {
        0
    }

    /// Always true: the channel never holds elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        true
    }

    /// Always `None`: there is never an element to observe.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        None
    }

    /// Always false: the channel never holds elements.
    #[must_use]
    pub fn contains(&self, _item: &T) -> bool {
        false
    }

    fn transfer(&self, item: Option<T>, deadline: Option<Deadline>) -> Transferred<T> {
        match &self.flavor {
            Flavor::Stack(stack) => stack.transfer(item, deadline),
            Flavor::Queue(queue) => queue.transfer(item, deadline),
        }
    }

    /// A failed producer attempt always hands its item back.
    fn reclaim(returned: Option<T>) -> T {
        returned.expect("failed producer transfer returns its item")
    }
}
