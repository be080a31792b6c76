//! Two-lock bounded FIFO queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{DequeueError, EnqueueError, Error, ErrorKind, Result};
use crate::park::TaskHandle;
use crate::time::Deadline;

/// One linked node. The list always starts with a sentinel whose `item`
/// is empty; live elements hang off `head.next`.
struct Node<T> {
    item: Mutex<Option<T>>,
    next: Mutex<Option<Arc<Node<T>>>>,
    /// Set when the node has been dequeued and replaced as sentinel. A
    /// traversal that observes the flag restarts from the head anchor;
    /// this is the no-GC rendition of the classic self-link sentinel.
    off_list: AtomicBool,
}

impl<T> Node<T> {
    fn sentinel() -> Arc<Self> {
        Arc::new(Self {
            item: Mutex::new(None),
            next: Mutex::new(None),
            off_list: AtomicBool::new(false),
        })
    }

    fn new(item: T) -> Arc<Self> {
        Arc::new(Self {
            item: Mutex::new(Some(item)),
            next: Mutex::new(None),
            off_list: AtomicBool::new(false),
        })
    }
}

/// Consumer-side lock domain: the sentinel head and its condition.
struct TakeSide<T> {
    head: Mutex<Arc<Node<T>>>,
    not_empty: Condvar,
}

/// Producer-side lock domain: the tail and its condition.
struct PutSide<T> {
    tail: Mutex<Arc<Node<T>>>,
    not_full: Condvar,
}

/// A bounded FIFO blocking queue with independent head and tail locks.
///
/// Whenever the queue is neither empty nor full, producers touch only the
/// tail lock and consumers only the head lock. Order is FIFO across the
/// queue; `len` is exact at the instant it is read.
pub struct BoundedQueue<T> {
    capacity: usize,
    count: CachePadded<AtomicUsize>,
    take: Arc<TakeSide<T>>,
    put: Arc<PutSide<T>>,
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.count.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a zero-capacity handoff is what
    /// [`SyncChannel`](crate::channel::SyncChannel) is for.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::try_new(capacity).expect("queue capacity must be non-zero")
    }

    /// Fallible constructor; `InvalidArgument` on zero capacity.
    pub fn try_new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(
                Error::new(ErrorKind::InvalidArgument).with_context("queue capacity must be > 0")
            );
        }
        let sentinel = Node::sentinel();
        Ok(Self {
            capacity,
            count: CachePadded::new(AtomicUsize::new(0)),
            take: Arc::new(TakeSide {
                head: Mutex::new(Arc::clone(&sentinel)),
                not_empty: Condvar::new(),
            }),
            put: Arc::new(PutSide {
                tail: Mutex::new(sentinel),
                not_full: Condvar::new(),
            }),
        })
    }

    /// Creates a queue pre-populated from `initial`, failing with
    /// `CapacityExceeded` if the collection does not fit.
    pub fn with_initial<I>(capacity: usize, initial: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let queue = Self::try_new(capacity)?;
        {
            let mut tail = queue.put.tail.lock();
            let mut n = 0usize;
            for item in initial {
                if n == capacity {
                    return Err(Error::new(ErrorKind::CapacityExceeded)
                        .with_context("initial collection exceeds capacity"));
                }
                Self::enqueue(&mut tail, Node::new(item));
                n += 1;
            }
            queue.count.store(n, Ordering::SeqCst);
        }
        Ok(queue)
    }

    /// Maximum number of elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many more elements fit right now.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.len()
    }

    /// Inserts at the tail, blocking while the queue is full.
    pub fn put(&self, item: T) -> std::result::Result<(), EnqueueError<T>> {
        self.enqueue_blocking(item, None)
    }

    /// Non-blocking insert; hands the element back if the queue is full.
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        if self.len() == self.capacity {
            return Err(item);
        }
        let mut tail = self.put.tail.lock();
        if self.len() == self.capacity {
            drop(tail);
            return Err(item);
        }
        let prev = self.insert(&mut tail, item);
        drop(tail);
        if prev == 0 {
            self.signal_not_empty();
        }
        Ok(())
    }

    /// Timed insert, blocking up to `timeout` for space.
    pub fn offer_timed(
        &self,
        item: T,
        timeout: Duration,
    ) -> std::result::Result<(), EnqueueError<T>> {
        self.enqueue_blocking(item, Some(Deadline::after(timeout)))
    }

    /// Removes the head element, blocking while the queue is empty.
    pub fn take(&self) -> std::result::Result<T, DequeueError> {
        match self.dequeue_blocking(None) {
            Ok(Some(item)) => Ok(item),
            Ok(None) => unreachable!("untimed dequeue only returns on success or interrupt"),
            Err(e) => Err(e),
        }
    }

    /// Non-blocking removal.
    #[must_use]
    pub fn poll(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let mut head = self.take.head.lock();
        if self.is_empty() {
            return None;
        }
        let item = Self::dequeue(&mut head);
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev > 1 {
            self.take.not_empty.notify_one();
        }
        drop(head);
        if prev == self.capacity {
            self.signal_not_full();
        }
        Some(item)
    }

    /// Timed removal; `Ok(None)` is the distinguishable timeout result.
    pub fn poll_timed(&self, timeout: Duration) -> std::result::Result<Option<T>, DequeueError> {
        self.dequeue_blocking(Some(Deadline::after(timeout)))
    }

    /// Reads the head element without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let head = self.take.head.lock();
        let first = head.next.lock().clone();
        first.and_then(|node| node.item.lock().clone())
    }

    /// Removes the first element equal to `target`. Returns whether one
    /// was found. Takes both locks.
    pub fn remove(&self, target: &T) -> bool
    where
        T: PartialEq,
    {
        let (mut tail, head) = self.fully_lock();
        let mut pred = Arc::clone(&*head);
        loop {
            let current = pred.next.lock().clone();
            let Some(node) = current else { return false };
            let matches = node.item.lock().as_ref() == Some(target);
            if matches {
                self.unlink(&node, &pred, &mut tail);
                return true;
            }
            pred = node;
        }
    }

    /// Whether some element equals `target`. Takes both locks.
    pub fn contains(&self, target: &T) -> bool
    where
        T: PartialEq,
    {
        let (_tail, head) = self.fully_lock();
        let mut p = head.next.lock().clone();
        while let Some(node) = p {
            if node.item.lock().as_ref() == Some(target) {
                return true;
            }
            p = node.next.lock().clone();
        }
        false
    }

    /// Discards every element. Takes both locks.
    pub fn clear(&self) {
        let (mut tail, mut head) = self.fully_lock();
        let mut h = Arc::clone(&*head);
        // Unlink iteratively; a recursive chain drop would overflow the
        // stack for large capacities.
        loop {
            let next = h.next.lock().take();
            h.off_list.store(true, Ordering::Release);
            match next {
                Some(p) => {
                    *p.item.lock() = None;
                    h = p;
                }
                None => break,
            }
        }
        // The old tail (item already cleared) becomes the new sentinel.
        h.off_list.store(false, Ordering::Release);
        *head = Arc::clone(&h);
        *tail = h;
        let prev = self.count.swap(0, Ordering::SeqCst);
        drop(head);
        if prev == self.capacity {
            self.put.not_full.notify_one();
        }
    }

    /// Drains every element into `sink`; returns how many moved.
    pub fn drain_to(&self, sink: &mut Vec<T>) -> usize {
        self.drain_to_limit(sink, usize::MAX)
    }

    /// Drains at most `max` elements into `sink`; returns how many moved.
    /// Holds only the take lock.
    pub fn drain_to_limit(&self, sink: &mut Vec<T>, max: usize) -> usize {
        let mut head = self.take.head.lock();
        let n = max.min(self.len());
        for _ in 0..n {
            sink.push(Self::dequeue(&mut head));
        }
        let prev = self.count.fetch_sub(n, Ordering::SeqCst);
        drop(head);
        if n > 0 && prev == self.capacity {
            self.signal_not_full();
        }
        n
    }

    /// A weakly consistent iterator: it observes a snapshot lazily, may
    /// miss concurrent insertions or removals, and never fails. Each
    /// advance takes both locks briefly.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T>
    where
        T: Clone,
    {
        let (_tail, head) = self.fully_lock();
        let first = Self::first_live(&head);
        let current_item = first
            .as_ref()
            .and_then(|node| node.item.lock().clone());
        Iter {
            queue: self,
            current: first,
            current_item,
        }
    }

    fn first_live(head: &Arc<Node<T>>) -> Option<Arc<Node<T>>> {
        let mut p = head.next.lock().clone();
        while let Some(node) = p {
            if node.item.lock().is_some() {
                return Some(node);
            }
            p = node.next.lock().clone();
        }
        None
    }

    fn enqueue_blocking(
        &self,
        item: T,
        deadline: Option<Deadline>,
    ) -> std::result::Result<(), EnqueueError<T>> {
        let task = TaskHandle::current();
        let put = Arc::clone(&self.put);
        let _wait = task.enter_condvar_wait(Box::new(move || {
            let _guard = put.tail.lock();
            put.not_full.notify_all();
        }));
        let prev;
        {
            let mut tail = self.put.tail.lock();
            loop {
                if task.take_interrupt() {
                    return Err(EnqueueError::Interrupted(item));
                }
                if self.len() < self.capacity {
                    break;
                }
                match deadline {
                    Some(d) => {
                        if d.expired() {
                            return Err(EnqueueError::TimedOut(item));
                        }
                        let _ = self
                            .put
                            .not_full
                            .wait_until(&mut tail, d.instant());
                    }
                    None => self.put.not_full.wait(&mut tail),
                }
            }
            prev = self.insert(&mut tail, item);
        }
        if prev == 0 {
            self.signal_not_empty();
        }
        Ok(())
    }

    /// Enqueue under the tail lock plus the signalling bookkeeping shared
    /// by every insert path. Returns the pre-increment count.
    fn insert(&self, tail: &mut MutexGuard<'_, Arc<Node<T>>>, item: T) -> usize {
        Self::enqueue(tail, Node::new(item));
        let prev = self.count.fetch_add(1, Ordering::SeqCst);
        // Cascading notify: leave a wake-up behind for the next producer
        // if there is still slack.
        if prev + 1 < self.capacity {
            self.put.not_full.notify_one();
        }
        prev
    }

    fn dequeue_blocking(
        &self,
        deadline: Option<Deadline>,
    ) -> std::result::Result<Option<T>, DequeueError> {
        let task = TaskHandle::current();
        let take = Arc::clone(&self.take);
        let _wait = task.enter_condvar_wait(Box::new(move || {
            let _guard = take.head.lock();
            take.not_empty.notify_all();
        }));
        let item;
        let prev;
        {
            let mut head = self.take.head.lock();
            loop {
                if task.take_interrupt() {
                    return Err(DequeueError::Interrupted);
                }
                if self.len() > 0 {
                    break;
                }
                match deadline {
                    Some(d) => {
                        if d.expired() {
                            return Ok(None);
                        }
                        let _ = self
                            .take
                            .not_empty
                            .wait_until(&mut head, d.instant());
                    }
                    None => self.take.not_empty.wait(&mut head),
                }
            }
            item = Self::dequeue(&mut head);
            prev = self.count.fetch_sub(1, Ordering::SeqCst);
            if prev > 1 {
                // Cascading notify for the next consumer.
                self.take.not_empty.notify_one();
            }
        }
        if prev == self.capacity {
            self.signal_not_full();
        }
        Ok(Some(item))
    }

    /// Links a node at the tail. Caller holds the tail lock.
    fn enqueue(tail: &mut MutexGuard<'_, Arc<Node<T>>>, node: Arc<Node<T>>) {
        *tail.next.lock() = Some(Arc::clone(&node));
        **tail = node;
    }

    /// Unlinks the successor of the sentinel, which becomes the new
    /// sentinel. Caller holds the head lock and has checked `count > 0`.
    fn dequeue(head: &mut MutexGuard<'_, Arc<Node<T>>>) -> T {
        let first = head
            .next
            .lock()
            .clone()
            .expect("count > 0 guarantees a successor");
        head.off_list.store(true, Ordering::Release);
        let item = first
            .item
            .lock()
            .take()
            .expect("a linked non-sentinel node carries an item");
        **head = first;
        item
    }

    /// Unlinks an interior node found by `remove`. Both locks held.
    fn unlink(
        &self,
        node: &Arc<Node<T>>,
        pred: &Arc<Node<T>>,
        tail: &mut MutexGuard<'_, Arc<Node<T>>>,
    ) {
        *node.item.lock() = None;
        let succ = node.next.lock().clone();
        *pred.next.lock() = succ;
        if Arc::ptr_eq(node, &*tail) {
            **tail = Arc::clone(pred);
        }
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev == self.capacity {
            self.put.not_full.notify_one();
        }
    }

    /// Lock both sides, producers first. Every multi-lock path uses this
    /// order.
    fn fully_lock(&self) -> (MutexGuard<'_, Arc<Node<T>>>, MutexGuard<'_, Arc<Node<T>>>) {
        let tail = self.put.tail.lock();
        let head = self.take.head.lock();
        (tail, head)
    }

    /// Wake one consumer after a transition out of empty. Called without
    /// the tail lock held.
    fn signal_not_empty(&self) {
        let _head = self.take.head.lock();
        self.take.not_empty.notify_one();
    }

    /// Wake one producer after a transition out of full. Called without
    /// the head lock held.
    fn signal_not_full(&self) {
        let _tail = self.put.tail.lock();
        self.put.not_full.notify_one();
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // Sever the chain iteratively; the default recursive drop would
        // overflow the stack for deep queues.
        let head = self.take.head.lock().clone();
        let mut p = head.next.lock().take();
        while let Some(node) = p {
            p = node.next.lock().take();
        }
    }
}

/// Weakly consistent iterator over a [`BoundedQueue`].
pub struct Iter<'a, T> {
    queue: &'a BoundedQueue<T>,
    current: Option<Arc<Node<T>>>,
    current_item: Option<T>,
}

impl<T: Clone + Send + 'static> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.current_item.take()?;
        let (_tail, head) = self.queue.fully_lock();
        let mut node = self.current.take();
        loop {
            let Some(n) = node else { break };
            let succ = if n.off_list.load(Ordering::Acquire) {
                // Fell off the list: restart from the head anchor.
                BoundedQueue::first_live(&head)
            } else {
                n.next.lock().clone()
            };
            match succ {
                Some(s) => {
                    let next_item = s.item.lock().clone();
                    if let Some(next_item) = next_item {
                        self.current = Some(s);
                        self.current_item = Some(next_item);
                        break;
                    }
                    node = Some(s);
                }
                None => break,
            }
        }
        Some(item)
    }
}

impl<T: Clone + Send + 'static> std::iter::FusedIterator for Iter<'_, T> {}
