//! Reference-counted link cells for the lock-free node structures.
//!
//! The dual-structure algorithms in this crate mutate their head, tail,
//! and successor pointers exclusively through identity compare-and-swap. A
//! garbage-collected implementation stores raw pointers; here each link is
//! a reference-counted cell whose compare-and-swap runs as a critical
//! section over just that one word. The guard is never held across a
//! suspension or another link operation, so link maintenance stays
//! deadlock-free and its critical sections are a handful of instructions.
//!
//! The algorithms' linearisation points do not live here: matching and
//! cancellation are real atomic transitions on per-node state words. The
//! links only carry list membership.

use std::sync::Arc;

use parking_lot::Mutex;

/// A mutable, shareable link to a node of type `N`.
pub(crate) struct Link<N>(Mutex<Option<Arc<N>>>);

impl<N> Link<N> {
    /// An empty link.
    pub(crate) const fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// A link initially referring to `node`.
    pub(crate) fn to(node: Arc<N>) -> Self {
        Self(Mutex::new(Some(node)))
    }

    /// Current referent, if any.
    pub(crate) fn load(&self) -> Option<Arc<N>> {
        self.0.lock().clone()
    }

    /// Unconditional store.
    pub(crate) fn store(&self, value: Option<Arc<N>>) {
        *self.0.lock() = value;
    }

    /// Replaces the referent, returning the previous one.
    pub(crate) fn swap(&self, value: Option<Arc<N>>) -> Option<Arc<N>> {
        std::mem::replace(&mut *self.0.lock(), value)
    }

    /// Identity compare-and-swap: installs `new` iff the current referent
    /// is `expected` (by pointer identity). Returns whether it swapped.
    pub(crate) fn compare_and_swap(&self, expected: Option<&Arc<N>>, new: Option<Arc<N>>) -> bool {
        let mut slot = self.0.lock();
        if same(slot.as_ref(), expected) {
            *slot = new;
            true
        } else {
            false
        }
    }

    /// Whether the current referent is `expected` (by pointer identity).
    pub(crate) fn refers_to(&self, expected: Option<&Arc<N>>) -> bool {
        same(self.0.lock().as_ref(), expected)
    }
}

impl<N> std::fmt::Debug for Link<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied = self.0.lock().is_some();
        f.debug_struct("Link").field("occupied", &occupied).finish()
    }
}

fn same<N>(a: Option<&Arc<N>>, b: Option<&Arc<N>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_and_swap_checks_identity() {
        let a = Arc::new(1);
        let b = Arc::new(1);
        let link = Link::to(Arc::clone(&a));

        // same value, different allocation: must not swap
        assert!(!link.compare_and_swap(Some(&b), None));
        assert!(link.refers_to(Some(&a)));

        assert!(link.compare_and_swap(Some(&a), Some(Arc::clone(&b))));
        assert!(link.refers_to(Some(&b)));
    }

    #[test]
    fn empty_link_swaps_from_none() {
        let link: Link<u32> = Link::empty();
        let node = Arc::new(5);
        assert!(link.compare_and_swap(None, Some(Arc::clone(&node))));
        assert!(!link.compare_and_swap(None, None));
        assert_eq!(link.swap(None).map(|n| *n), Some(5));
        assert!(link.refers_to(None));
    }
}
