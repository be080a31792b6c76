//! Stack of threads waiting on a future cell.
//!
//! Enrolment pushes onto a Treiber-style stack through the head link;
//! broadcast detaches the whole chain with a single swap and unparks every
//! waiter that still wants a wake-up; a waiter that gives up (timeout,
//! interrupt) marks its node inactive and unsplices inactive nodes on the
//! way out, restarting from the head whenever a compare-and-swap observes
//! interference.
//!
//! Nodes are reference-counted and links are identity-CAS cells, so a
//! traversal racing the broadcaster can at worst walk a detached chain,
//! never freed memory. The wake-up claim on each node is a real atomic
//! transition: a waiter is unparked at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::link::Link;
use crate::park::TaskHandle;

/// One enrolled waiter.
#[derive(Debug)]
pub(crate) struct WaitNode {
    task: TaskHandle,
    /// True while the waiter still wants a wake-up. Cleared exactly once,
    /// by the broadcaster (who then unparks) or by the waiter itself.
    active: AtomicBool,
    next: Link<WaitNode>,
}

impl WaitNode {
    pub(crate) fn new(task: TaskHandle) -> Arc<Self> {
        Arc::new(Self {
            task,
            active: AtomicBool::new(true),
            next: Link::empty(),
        })
    }

    /// Marks the node no longer interested in a wake-up.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claims the wake-up; at most one caller wins.
    fn claim_wake(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Treiber-style stack of [`WaitNode`]s.
#[derive(Debug)]
pub(crate) struct WaiterStack {
    head: Link<WaitNode>,
}

impl WaiterStack {
    pub(crate) const fn new() -> Self {
        Self { head: Link::empty() }
    }

    /// Single push attempt; the caller re-checks the cell state between
    /// attempts.
    pub(crate) fn try_push(&self, node: &Arc<WaitNode>) -> bool {
        let head = self.head.load();
        node.next.store(head.clone());
        self.head
            .compare_and_swap(head.as_ref(), Some(Arc::clone(node)))
    }

    /// Broadcast: detach the whole chain and unpark every waiter that has
    /// not already given up. The swap is the linearisation point.
    pub(crate) fn detach_all(&self) {
        let mut p = self.head.swap(None);
        while let Some(node) = p {
            if node.claim_wake() {
                node.task.unpark();
            }
            // Sever as we go so dropping the chain cannot recurse.
            p = node.next.swap(None);
        }
    }

    /// Unlinks `node` (and any other inactive node found on the way) after
    /// a timeout or interrupt. Restarts from the head whenever a CAS
    /// observes interference from the broadcaster or another unlinker.
    pub(crate) fn remove(&self, node: &Arc<WaitNode>) {
        node.deactivate();
        'retry: loop {
            let mut pred: Option<Arc<WaitNode>> = None;
            let mut p = self.head.load();
            while let Some(current) = p {
                let next = current.next.load();
                if current.is_active() {
                    pred = Some(Arc::clone(&current));
                } else if let Some(pred_node) = pred.as_ref() {
                    if !pred_node
                        .next
                        .compare_and_swap(Some(&current), next.clone())
                    {
                        continue 'retry;
                    }
                    if !pred_node.is_active() {
                        continue 'retry;
                    }
                } else if !self.head.compare_and_swap(Some(&current), next.clone()) {
                    continue 'retry;
                }
                p = next;
            }
            break;
        }
    }
}

impl Drop for WaiterStack {
    fn drop(&mut self) {
        // Sever the chain iteratively rather than letting the recursive
        // Arc drop walk it.
        let mut p = self.head.swap(None);
        while let Some(node) = p {
            p = node.next.swap(None);
        }
    }
}
