//! Fair transfer algorithm: a FIFO dual queue.
//!
//! One queue with a permanent dummy head. Same-mode arrivals append a
//! waiter at the tail and park; complementary arrivals fulfil the node
//! just past the head by flipping its item slot; the rendezvous is
//! linearised at that single slot transition. Producers match consumers
//! in arrival order on both sides.
//!
//! A cancelled node occupies its own item slot (the no-GC rendition of
//! the item-points-to-self sentinel) and is skipped by fulfilers.
//! Unlinking a cancelled interior node is O(1); a cancelled tail cannot
//! be unlinked immediately, so its predecessor is parked in the
//! `clean_me` slot and removed at the next cleanup opportunity, which
//! keeps cleanup terminating under adversarial cancellation of trailing
//! nodes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SpinConfig;
use crate::link::Link;
use crate::park::{self, TaskHandle};
use crate::time::Deadline;

use super::Transferred;

/// Occupant of a node's item slot. One transition out of `Waiting`
/// decides the node's fate; the slot lock is the linearisation point.
enum ItemSlot<T> {
    /// Still waiting: `Some` for a data (producer) node, `None` for a
    /// request (consumer) node.
    Waiting(Option<T>),
    /// Rendezvous happened: a fulfilled request holds the delivered item
    /// until its owner collects it; a fulfilled data node holds `None`.
    Fulfilled(Option<T>),
    /// Cancelled; a producer's item is held for reclamation by the owner.
    Cancelled(Option<T>),
}

struct QNode<T> {
    is_data: bool,
    slot: Mutex<ItemSlot<T>>,
    waiter: Mutex<Option<TaskHandle>>,
    next: Link<QNode<T>>,
    /// Set once the node has been passed by the head (it served as dummy
    /// and was replaced). Traversals treat it as "restart from the
    /// anchor".
    off_list: AtomicBool,
}

enum Fulfil<T> {
    /// Took the producer's item out of a data node.
    Took(T),
    /// Deposited our item into a request node.
    Gave,
    /// Node was already fulfilled or cancelled; skip past it.
    Lost,
}

enum WaitOutcome<T> {
    /// `Some` for a fulfilled request, `None` for fulfilled data.
    Fulfilled(Option<T>),
    /// Carries a producer's reclaimed item.
    Cancelled(Option<T>),
}

impl<T> QNode<T> {
    fn dummy() -> Arc<Self> {
        Arc::new(Self {
            is_data: false,
            slot: Mutex::new(ItemSlot::Fulfilled(None)),
            waiter: Mutex::new(None),
            next: Link::empty(),
            off_list: AtomicBool::new(false),
        })
    }

    fn new(item: Option<T>, is_data: bool) -> Arc<Self> {
        Arc::new(Self {
            is_data,
            slot: Mutex::new(ItemSlot::Waiting(item)),
            waiter: Mutex::new(None),
            next: Link::empty(),
            off_list: AtomicBool::new(false),
        })
    }

    /// Rendezvous attempt by a complementary arrival. The slot transition
    /// is the linearisation point of the whole transfer.
    fn try_fulfil(&self, give: &mut Option<T>) -> Fulfil<T> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            ItemSlot::Waiting(existing) => {
                let result = if self.is_data {
                    let item = existing.take().expect("waiting data node holds an item");
                    *slot = ItemSlot::Fulfilled(None);
                    Fulfil::Took(item)
                } else {
                    *slot = ItemSlot::Fulfilled(Some(
                        give.take().expect("fulfilling producer holds an item"),
                    ));
                    Fulfil::Gave
                };
                drop(slot);
                self.wake();
                result
            }
            ItemSlot::Fulfilled(_) | ItemSlot::Cancelled(_) => Fulfil::Lost,
        }
    }

    /// Cancels the node if it is still waiting, keeping a producer's item
    /// for reclamation.
    fn try_cancel(&self) {
        let mut slot = self.slot.lock();
        if let ItemSlot::Waiting(existing) = &mut *slot {
            let reclaimed = existing.take();
            *slot = ItemSlot::Cancelled(reclaimed);
        }
    }

    /// Owner-side check: consumes the terminal slot state if the node's
    /// fate is decided.
    fn try_finish(&self) -> Option<WaitOutcome<T>> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            ItemSlot::Waiting(_) => None,
            ItemSlot::Fulfilled(delivered) => Some(WaitOutcome::Fulfilled(delivered.take())),
            ItemSlot::Cancelled(reclaimed) => Some(WaitOutcome::Cancelled(reclaimed.take())),
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(&*self.slot.lock(), ItemSlot::Cancelled(_))
    }

    /// Reclaims the item of a node that never got linked.
    fn take_waiting(&self) -> Option<T> {
        match &mut *self.slot.lock() {
            ItemSlot::Waiting(existing) => existing.take(),
            _ => None,
        }
    }

    fn mark_off_list(&self) {
        self.off_list.store(true, Ordering::Release);
    }

    fn is_off_list(&self) -> bool {
        self.off_list.load(Ordering::Acquire)
    }

    fn set_waiter(&self, task: TaskHandle) {
        *self.waiter.lock() = Some(task);
    }

    fn has_waiter(&self) -> bool {
        self.waiter.lock().is_some()
    }

    fn clear_waiter(&self) {
        *self.waiter.lock() = None;
    }

    fn wake(&self) {
        let task = self.waiter.lock().take();
        if let Some(task) = task {
            task.unpark();
        }
    }
}

/// The FIFO dual queue.
pub(crate) struct TransferQueue<T> {
    head: Link<QNode<T>>,
    tail: Link<QNode<T>>,
    /// Predecessor of a cancelled tail node whose deletion was deferred.
    clean_me: Link<QNode<T>>,
}

impl<T: Send> TransferQueue<T> {
    pub(crate) fn new() -> Self {
        let dummy = QNode::dummy();
        Self {
            head: Link::to(Arc::clone(&dummy)),
            tail: Link::to(dummy),
            clean_me: Link::empty(),
        }
    }

    pub(crate) fn transfer(
        &self,
        mut item: Option<T>,
        deadline: Option<Deadline>,
    ) -> Transferred<T> {
        let is_data = item.is_some();
        loop {
            let (Some(t), Some(h)) = (self.tail.load(), self.head.load()) else {
                continue;
            };

            if Arc::ptr_eq(&t, &h) || t.is_data == is_data {
                // Empty queue or same-mode tail: append and wait.
                let tn = t.next.load();
                if !self.tail.refers_to(Some(&t)) {
                    continue;
                }
                if let Some(tn) = tn {
                    // Lagging tail; help advance it.
                    self.tail.compare_and_swap(Some(&t), Some(tn));
                    continue;
                }
                if let Some(d) = deadline {
                    if d.expired() {
                        return Transferred::Failed(item);
                    }
                }
                let node = QNode::new(item.take(), is_data);
                if !t.next.compare_and_swap(None, Some(Arc::clone(&node))) {
                    item = node.take_waiting();
                    continue;
                }
                self.tail.compare_and_swap(Some(&t), Some(Arc::clone(&node)));
                match self.await_fulfil(&node, deadline) {
                    WaitOutcome::Cancelled(reclaimed) => {
                        self.clean(&t, &node);
                        return Transferred::Failed(reclaimed);
                    }
                    WaitOutcome::Fulfilled(delivered) => {
                        if !node.is_off_list() {
                            self.advance_head(&t, &node);
                            node.clear_waiter();
                        }
                        return if is_data {
                            Transferred::Given
                        } else {
                            Transferred::Taken(
                                delivered.expect("fulfilled request carries an item"),
                            )
                        };
                    }
                }
            } else {
                // Complementary mode: fulfil the node just past the head.
                let m = h.next.load();
                if !self.tail.refers_to(Some(&t)) || !self.head.refers_to(Some(&h)) {
                    continue;
                }
                let Some(m) = m else { continue };
                match m.try_fulfil(&mut item) {
                    Fulfil::Lost => {
                        self.advance_head(&h, &m);
                    }
                    Fulfil::Took(delivered) => {
                        self.advance_head(&h, &m);
                        return Transferred::Taken(delivered);
                    }
                    Fulfil::Gave => {
                        self.advance_head(&h, &m);
                        return Transferred::Given;
                    }
                }
            }
        }
    }

    /// Spin-then-park until this node's slot flips.
    fn await_fulfil(&self, node: &Arc<QNode<T>>, deadline: Option<Deadline>) -> WaitOutcome<T> {
        let task = TaskHandle::current();
        let config = SpinConfig::get();
        let mut spins = if self.is_next_in_line(node) {
            config.spins(deadline.is_some())
        } else {
            0
        };
        loop {
            if task.is_interrupted() {
                node.try_cancel();
            }
            if let Some(outcome) = node.try_finish() {
                node.clear_waiter();
                return outcome;
            }
            if let Some(d) = deadline {
                if d.expired() {
                    node.try_cancel();
                    continue;
                }
            }
            if spins > 0 {
                spins = if self.is_next_in_line(node) { spins - 1 } else { 0 };
                std::hint::spin_loop();
            } else if !node.has_waiter() {
                node.set_waiter(task.clone());
            } else if let Some(d) = deadline {
                park::park_until(d);
            } else {
                park::park();
            }
        }
    }

    /// FIFO means only the head's successor is about to be fulfilled;
    /// nobody else bothers spinning.
    fn is_next_in_line(&self, node: &Arc<QNode<T>>) -> bool {
        self.head
            .load()
            .is_some_and(|h| h.next.refers_to(Some(node)))
    }

    /// Moves the head from `h` to `nh` (making `nh` the new dummy) and
    /// retires the old dummy.
    fn advance_head(&self, h: &Arc<QNode<T>>, nh: &Arc<QNode<T>>) {
        if self.head.compare_and_swap(Some(h), Some(Arc::clone(nh))) {
            h.mark_off_list();
            h.next.store(None);
        }
    }

    fn advance_tail(&self, t: &Arc<QNode<T>>, nt: Arc<QNode<T>>) {
        self.tail.compare_and_swap(Some(t), Some(nt));
    }

    /// Unlinks the cancelled `node` whose predecessor was `pred`.
    ///
    /// Interior nodes unsplice in O(1). A cancelled tail cannot be
    /// unspliced (a concurrent append may be linking behind it), so
    /// `pred` is saved in `clean_me` and both victims are dealt with at
    /// the next cleanup opportunity.
    fn clean(&self, pred: &Arc<QNode<T>>, node: &Arc<QNode<T>>) {
        node.clear_waiter();
        while pred.next.refers_to(Some(node)) {
            let (Some(h), Some(t)) = (self.head.load(), self.tail.load()) else {
                continue;
            };
            if let Some(hn) = h.next.load() {
                if hn.is_cancelled() {
                    self.advance_head(&h, &hn);
                    continue;
                }
            }
            if Arc::ptr_eq(&t, &h) {
                // Empty; nothing left to unlink.
                return;
            }
            if !self.tail.refers_to(Some(&t)) {
                continue;
            }
            if let Some(tn) = t.next.load() {
                self.advance_tail(&t, tn);
                continue;
            }
            if !Arc::ptr_eq(node, &t) {
                // Not the tail: splice it out directly.
                let succ = node.next.load();
                if node.is_off_list() || pred.next.compare_and_swap(Some(node), succ) {
                    return;
                }
                continue;
            }
            // The victim is the tail. Try to retire a previously deferred
            // victim, then defer this one.
            if let Some(deferred_pred) = self.clean_me.load() {
                let cleared = match deferred_pred.next.load() {
                    None => true,
                    Some(victim) => {
                        if !victim.is_cancelled() {
                            true
                        } else if Arc::ptr_eq(&victim, &t) {
                            false
                        } else {
                            match victim.next.load() {
                                Some(succ) if !victim.is_off_list() => deferred_pred
                                    .next
                                    .compare_and_swap(Some(&victim), Some(succ)),
                                _ => false,
                            }
                        }
                    }
                };
                if cleared {
                    self.clean_me.compare_and_swap(Some(&deferred_pred), None);
                }
                if Arc::ptr_eq(&deferred_pred, pred) {
                    // Our victim is already the saved one.
                    return;
                }
            } else if self
                .clean_me
                .compare_and_swap(None, Some(Arc::clone(pred)))
            {
                return;
            }
        }
    }
}

impl<T> Drop for TransferQueue<T> {
    fn drop(&mut self) {
        self.clean_me.store(None);
        self.tail.store(None);
        let mut p = self.head.swap(None);
        while let Some(node) = p {
            p = node.next.swap(None);
        }
    }
}
