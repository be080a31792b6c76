//! Unfair transfer algorithm: a LIFO dual stack.
//!
//! The stack holds either waiting requests or waiting data, never both.
//! An arrival of the same mode pushes a waiter node and parks; an arrival
//! of the opposite mode pushes a marker node carrying the `FULFILLING`
//! bit above the head waiter and tries to match it; any thread that finds
//! a fulfilling marker at the head helps complete that match before
//! retrying its own operation.
//!
//! A node is matched iff its match slot holds the fulfiller; cancellation
//! (timeout, interrupt) occupies the same slot, so matching and
//! cancelling race through one transition and a cancelled node can never
//! match. The matched waiter's thread is unparked exactly once.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SpinConfig;
use crate::link::Link;
use crate::park::{self, TaskHandle};
use crate::time::Deadline;

use super::Transferred;

/// Node represents an unfulfilled consumer.
const REQUEST: u8 = 0;
/// Node represents an unfulfilled producer.
const DATA: u8 = 1;
/// Node is actively fulfilling the waiter beneath it.
const FULFILLING: u8 = 2;

const fn is_fulfilling(mode: u8) -> bool {
    mode & FULFILLING != 0
}

/// Occupant of a node's match slot. One transition out of `Pending`
/// decides the node's fate; the slot lock is the linearisation point.
enum MatchSlot<T> {
    Pending,
    /// Matched by this fulfiller.
    Matched(Arc<SNode<T>>),
    /// Cancelled by the owner; the node can never match.
    Cancelled,
    /// Match observed and consumed by the owner; the fulfiller reference
    /// is dropped so no cycle outlives the rendezvous.
    Consumed,
}

enum MatchView<T> {
    Pending,
    Matched(Arc<SNode<T>>),
    Cancelled,
}

struct SNode<T> {
    mode: u8,
    /// Producer's item; taken exactly once by the matched consumer (or
    /// reclaimed by the owner on failure).
    item: Mutex<Option<T>>,
    matched: Mutex<MatchSlot<T>>,
    waiter: Mutex<Option<TaskHandle>>,
    next: Link<SNode<T>>,
}

impl<T> SNode<T> {
    fn new(item: Option<T>, mode: u8) -> Arc<Self> {
        Arc::new(Self {
            mode,
            item: Mutex::new(item),
            matched: Mutex::new(MatchSlot::Pending),
            waiter: Mutex::new(None),
            next: Link::empty(),
        })
    }

    /// Attempts to match this waiter with `fulfiller`. True if this call
    /// won the match or an earlier call matched the same fulfiller.
    fn try_match(self: &Arc<Self>, fulfiller: &Arc<Self>) -> bool {
        let mut slot = self.matched.lock();
        match &*slot {
            MatchSlot::Pending => {
                *slot = MatchSlot::Matched(Arc::clone(fulfiller));
                drop(slot);
                self.wake();
                true
            }
            MatchSlot::Matched(prev) => Arc::ptr_eq(prev, fulfiller),
            MatchSlot::Cancelled | MatchSlot::Consumed => false,
        }
    }

    /// Cancels the node if it is still pending.
    fn try_cancel(&self) {
        let mut slot = self.matched.lock();
        if matches!(&*slot, MatchSlot::Pending) {
            *slot = MatchSlot::Cancelled;
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(&*self.matched.lock(), MatchSlot::Cancelled)
    }

    fn match_view(&self) -> MatchView<T> {
        match &*self.matched.lock() {
            MatchSlot::Pending => MatchView::Pending,
            MatchSlot::Matched(m) => MatchView::Matched(Arc::clone(m)),
            MatchSlot::Cancelled => MatchView::Cancelled,
            MatchSlot::Consumed => MatchView::Pending,
        }
    }

    /// Drops the fulfiller reference once the owner has reported the
    /// rendezvous, so the pair of popped nodes cannot keep each other
    /// alive.
    fn consume_match(&self) {
        let mut slot = self.matched.lock();
        if matches!(&*slot, MatchSlot::Matched(_)) {
            *slot = MatchSlot::Consumed;
        }
    }

    fn take_item(&self) -> Option<T> {
        self.item.lock().take()
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

enum WaitOutcome<T> {
    Matched(Arc<SNode<T>>),
    Cancelled,
}

/// The LIFO dual stack.
pub(crate) struct TransferStack<T> {
    head: Link<SNode<T>>,
}

impl<T: Send> TransferStack<T> {
    pub(crate) const fn new() -> Self {
        Self { head: Link::empty() }
    }

    pub(crate) fn transfer(
        &self,
        mut item: Option<T>,
        deadline: Option<Deadline>,
    ) -> Transferred<T> {
        let mode = if item.is_some() { DATA } else { REQUEST };
        loop {
            let h = self.head.load();
            let head_mode = h.as_ref().map(|n| n.mode);

            if head_mode.map_or(true, |m| m == mode) {
                // Empty or same-mode head: wait our turn, unless the
                // caller cannot wait at all.
                if let Some(d) = deadline {
                    if d.expired() {
                        if let Some(hn) = h.as_ref() {
                            if hn.is_cancelled() {
                                self.head.compare_and_swap(Some(hn), hn.next.load());
                                continue;
                            }
                        }
                        return Transferred::Failed(item);
                    }
                }
                let node = SNode::new(item.take(), mode);
                node.next.store(h.clone());
                if !self.head.compare_and_swap(h.as_ref(), Some(Arc::clone(&node))) {
                    item = node.take_item();
                    continue;
                }
                match self.await_fulfill(&node, deadline) {
                    WaitOutcome::Cancelled => {
                        self.clean(&node);
                        return Transferred::Failed(node.take_item());
                    }
                    WaitOutcome::Matched(m) => {
                        // Help our fulfiller finish popping the pair.
                        if let Some(top) = self.head.load() {
                            if top.next.refers_to(Some(&node)) {
                                self.head.compare_and_swap(Some(&top), node.next.load());
                            }
                        }
                        let out = if mode == REQUEST {
                            Transferred::Taken(
                                m.take_item().expect("matched data node carries an item"),
                            )
                        } else {
                            Transferred::Given
                        };
                        node.consume_match();
                        return out;
                    }
                }
            } else if !is_fulfilling(head_mode.unwrap_or(0)) {
                // Complementary head: try to fulfil it.
                let waiter = h.expect("complementary mode implies a head node");
                if waiter.is_cancelled() {
                    self.head
                        .compare_and_swap(Some(&waiter), waiter.next.load());
                    continue;
                }
                let marker = SNode::new(item.take(), mode | FULFILLING);
                marker.next.store(Some(Arc::clone(&waiter)));
                if !self
                    .head
                    .compare_and_swap(Some(&waiter), Some(Arc::clone(&marker)))
                {
                    item = marker.take_item();
                    continue;
                }
                loop {
                    let Some(m) = marker.next.load() else {
                        // Everyone beneath the marker gave up; pop it and
                        // start over.
                        self.head.compare_and_swap(Some(&marker), None);
                        item = marker.take_item();
                        break;
                    };
                    let mn = m.next.load();
                    if m.try_match(&marker) {
                        self.head.compare_and_swap(Some(&marker), mn);
                        return if mode == REQUEST {
                            Transferred::Taken(
                                m.take_item().expect("matched data node carries an item"),
                            )
                        } else {
                            Transferred::Given
                        };
                    }
                    // The candidate is dead (cancelled); unlink and retry
                    // against its successor.
                    marker.next.compare_and_swap(Some(&m), mn);
                }
            } else {
                // Head is a fulfilling marker: help it, then retry.
                let marker = h.expect("fulfilling mode implies a head node");
                match marker.next.load() {
                    None => {
                        self.head.compare_and_swap(Some(&marker), None);
                    }
                    Some(m) => {
                        let mn = m.next.load();
                        if m.try_match(&marker) {
                            self.head.compare_and_swap(Some(&marker), mn);
                        } else {
                            marker.next.compare_and_swap(Some(&m), mn);
                        }
                    }
                }
            }
        }
    }

    /// Spin-then-park until this node is matched or cancelled.
    fn await_fulfill(&self, node: &Arc<SNode<T>>, deadline: Option<Deadline>) -> WaitOutcome<T> {
        let task = TaskHandle::current();
        let config = SpinConfig::get();
        let mut spins = if self.should_spin(node) {
            config.spins(deadline.is_some())
        } else {
            0
        };
        loop {
            if task.is_interrupted() {
                node.try_cancel();
            }
            match node.match_view() {
                MatchView::Matched(m) => return WaitOutcome::Matched(m),
                MatchView::Cancelled => {
                    node.clear_waiter();
                    return WaitOutcome::Cancelled;
                }
                MatchView::Pending => {}
            }
            if let Some(d) = deadline {
                if d.expired() {
                    node.try_cancel();
                    continue;
                }
            }
            if spins > 0 {
                spins = if self.should_spin(node) { spins - 1 } else { 0 };
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

    /// A node spins only while it is likely to be matched next: at the
    /// head, beneath an in-progress fulfiller, or on an empty stack.
    fn should_spin(&self, node: &Arc<SNode<T>>) -> bool {
        match self.head.load() {
            None => true,
            Some(h) => Arc::ptr_eq(&h, node) || is_fulfilling(h.mode),
        }
    }

    /// Unlinks a cancelled node: pop cancelled nodes off the head, then
    /// unsplice interior ones, stopping at the first node that was past
    /// the victim when cleanup began.
    fn clean(&self, node: &Arc<SNode<T>>) {
        node.clear_waiter();

        let mut past = node.next.load();
        if let Some(p) = past.clone() {
            if p.is_cancelled() {
                past = p.next.load();
            }
        }

        let mut p = self.head.load();
        while let Some(current) = p.clone() {
            if same(p.as_ref(), past.as_ref()) || !current.is_cancelled() {
                break;
            }
            let next = current.next.load();
            if self.head.compare_and_swap(Some(&current), next.clone()) {
                p = next;
            } else {
                p = self.head.load();
            }
        }
        while let Some(current) = p {
            if same(Some(&current), past.as_ref()) {
                break;
            }
            let n = current.next.load();
            match n {
                Some(ref successor) if successor.is_cancelled() => {
                    current
                        .next
                        .compare_and_swap(Some(successor), successor.next.load());
                    p = Some(current);
                }
                _ => p = n,
            }
        }
    }
}

impl<T> Drop for TransferStack<T> {
    fn drop(&mut self) {
        // Sever the chain iteratively so deep stacks of abandoned waiters
        // cannot recurse on drop.
        let mut p = self.head.swap(None);
        while let Some(node) = p {
            p = node.next.swap(None);
        }
    }
}

fn same<T>(a: Option<&Arc<SNode<T>>>, b: Option<&Arc<SNode<T>>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}
