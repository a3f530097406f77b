//! Michael—Scott queue.
//!
//! Usable with any number of producers and consumers.
//!
//! Michael and Scott.  Simple, Fast, and Practical Non-Blocking and Blocking Concurrent Queue
//! Algorithms.  PODC 1996.  <http://dl.acm.org/citation.cfm?id=248106>

use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

use crate::counted::{CountedAtomic, CountedPtr};
use crate::err::DequeueError;
use crate::trace::trace;

/// A node in the list.
///
/// Aligned to 64 bytes, which leaves six low bits of every node pointer for the generation.
#[repr(align(64))]
struct Node<T> {
    /// The payload.
    ///
    /// Uninitialized in the sentinel node. Every other node holds a value until the dequeue that
    /// turns it into the sentinel moves the value out.
    value: MaybeUninit<T>,

    /// The next node, or null if this is the last one.
    next: CountedAtomic<Node<T>>,
}

impl<T> Node<T> {
    fn new(value: T) -> Node<T> {
        Node {
            value: MaybeUninit::new(value),
            next: CountedAtomic::null(),
        }
    }

    fn sentinel() -> Node<T> {
        Node {
            value: MaybeUninit::uninit(),
            next: CountedAtomic::null(),
        }
    }
}

/// An unbounded lock-free multi-producer multi-consumer queue.
///
/// The queue is a singly-linked list whose first node is a sentinel. Both ends are counted
/// pointers, and nodes removed from the front are reclaimed through `crossbeam-epoch` once no
/// thread can still observe them.
///
/// # Examples
///
/// ```
/// use crossbeam_msqueue::LockFreeQueue;
///
/// let q = LockFreeQueue::new();
///
/// q.enqueue('a');
/// q.enqueue('b');
///
/// assert_eq!(q.dequeue(), Some('a'));
/// assert_eq!(q.dequeue(), Some('b'));
/// assert!(q.dequeue().is_none());
/// ```
pub struct LockFreeQueue<T> {
    /// The sentinel node.
    ///
    /// Its successor, if any, holds the oldest value in the queue.
    head: CachePadded<CountedAtomic<Node<T>>>,

    /// The last node, or the node right before it.
    ///
    /// The tail is moved forward by whichever thread gets there first, so it may briefly lag
    /// behind a freshly linked node.
    tail: CachePadded<CountedAtomic<Node<T>>>,

    /// Indicates that dropping a `LockFreeQueue<T>` may drop values of type `T`.
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    /// Creates a new, empty queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use crossbeam_msqueue::LockFreeQueue;
    ///
    /// let q = LockFreeQueue::<i32>::new();
    /// assert!(q.is_empty());
    /// ```
    pub fn new() -> LockFreeQueue<T> {
        // SAFETY: the queue is not shared with any other thread yet.
        let sentinel = Owned::new(Node::sentinel()).into_shared(unsafe { epoch::unprotected() });

        LockFreeQueue {
            head: CachePadded::new(CountedAtomic::from(sentinel)),
            tail: CachePadded::new(CountedAtomic::from(sentinel)),
            _marker: PhantomData,
        }
    }

    /// Appends `value` to the back of the queue.
    ///
    /// This never blocks and never fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use crossbeam_msqueue::LockFreeQueue;
    ///
    /// let q = LockFreeQueue::new();
    ///
    /// q.enqueue(10);
    /// q.enqueue(20);
    /// ```
    pub fn enqueue(&self, value: T) {
        let guard = &epoch::pin();
        self.enqueue_in(value, guard);
    }

    /// Removes the value at the front of the queue.
    ///
    /// Returns `None` if the queue is observed to be empty. This never blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use crossbeam_msqueue::LockFreeQueue;
    ///
    /// let q = LockFreeQueue::new();
    ///
    /// q.enqueue(10);
    /// assert_eq!(q.dequeue(), Some(10));
    /// assert!(q.dequeue().is_none());
    /// ```
    pub fn dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();
        self.dequeue_in(guard)
    }

    /// Removes the value at the front of the queue, reporting an empty queue as an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use crossbeam_msqueue::{DequeueError, LockFreeQueue};
    ///
    /// let q = LockFreeQueue::new();
    ///
    /// q.enqueue(10);
    /// assert_eq!(q.try_dequeue(), Ok(10));
    /// assert_eq!(q.try_dequeue(), Err(DequeueError));
    /// ```
    pub fn try_dequeue(&self) -> Result<T, DequeueError> {
        self.dequeue().ok_or(DequeueError)
    }

    /// Returns `true` if the queue is empty.
    ///
    /// Other threads may change the queue at any moment, so the answer is only a snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// use crossbeam_msqueue::LockFreeQueue;
    ///
    /// let q = LockFreeQueue::new();
    ///
    /// assert!(q.is_empty());
    /// q.enqueue(1);
    /// assert!(!q.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Acquire, guard);
        // SAFETY: the head is never null and stays allocated while `guard` is pinned.
        let next = unsafe { head.deref() }.next.load(Acquire, guard);
        next.is_null()
    }

    fn enqueue_in(&self, value: T, guard: &Guard) {
        let new = Owned::new(Node::new(value)).into_shared(guard);
        let tail = self.link(new, guard);

        // A failed CAS means some other thread has already moved the tail past `tail`.
        let _ = self.tail.compare_exchange(tail, new, Release, Relaxed, guard);
    }

    /// Links `new` after the last node without touching the tail.
    ///
    /// Returns the snapshot of the tail that `new` was linked onto.
    fn link<'g>(&self, new: Shared<'g, Node<T>>, guard: &'g Guard) -> CountedPtr<'g, Node<T>> {
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(Acquire, guard);
            // SAFETY: the tail is never null and stays allocated while `guard` is pinned.
            let tail_node = unsafe { tail.deref() };
            let next = tail_node.next.load(Acquire, guard);

            if self.tail.load(Acquire, guard) != tail {
                backoff.spin();
                continue;
            }

            if next.is_null() {
                if tail_node
                    .next
                    .compare_exchange(next, new, Release, Relaxed, guard)
                    .is_ok()
                {
                    return tail;
                }
            } else {
                self.help_advance_tail(tail, next, guard);
            }

            backoff.spin();
        }
    }

    /// Moves a lagging tail forward to the node already linked after it.
    fn help_advance_tail<'g>(
        &self,
        tail: CountedPtr<'g, Node<T>>,
        next: CountedPtr<'g, Node<T>>,
        guard: &'g Guard,
    ) {
        if self
            .tail
            .compare_exchange(tail, next.pointer(), Release, Relaxed, guard)
            .is_ok()
        {
            trace!(
                tail = ?tail.as_raw(),
                generation = tail.generation(),
                next = ?next.as_raw(),
                "advanced lagging tail"
            );
        }
    }

    fn dequeue_in(&self, guard: &Guard) -> Option<T> {
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Acquire, guard);
            let tail = self.tail.load(Acquire, guard);
            // SAFETY: the head is never null and stays allocated while `guard` is pinned.
            let next = unsafe { head.deref() }.next.load(Acquire, guard);

            if self.head.load(Acquire, guard) != head {
                backoff.spin();
                continue;
            }

            if head.as_raw() == tail.as_raw() {
                if next.is_null() {
                    return None;
                }
                self.help_advance_tail(tail, next, guard);
            } else if let Some(next_node) = unsafe { next.as_ref() } {
                // `next_node` is kept alive by `guard` even if another thread unlinks it first,
                // so holding on to it across the CAS is fine.
                if self
                    .head
                    .compare_exchange(head, next.pointer(), Release, Relaxed, guard)
                    .is_ok()
                {
                    // SAFETY: winning the CAS makes this thread the only one to move the value
                    // out of the new sentinel, and the old sentinel is no longer reachable.
                    unsafe {
                        guard.defer_destroy(head.pointer());
                        return Some(next_node.value.as_ptr().read());
                    }
                }
            }

            backoff.spin();
        }
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();

            while self.dequeue_in(guard).is_some() {}

            // Destroy the remaining sentinel node.
            let sentinel = self.head.load(Relaxed, guard);
            drop(sentinel.pointer().into_owned());
        }
    }
}

impl<T> fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("LockFreeQueue { .. }")
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> LockFreeQueue<T> {
        LockFreeQueue::new()
    }
}

impl<T> Extend<T> for LockFreeQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.enqueue(value);
        }
    }
}

impl<T> FromIterator<T> for LockFreeQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> LockFreeQueue<T> {
        let mut queue = LockFreeQueue::new();
        queue.extend(iter);
        queue
    }
}

impl<T> IntoIterator for LockFreeQueue<T> {
    type Item = T;

    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { queue: self }
    }
}

/// An owning iterator that drains a [`LockFreeQueue`] in FIFO order.
pub struct IntoIter<T> {
    queue: LockFreeQueue<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.dequeue()
    }
}

impl<T> fmt::Debug for IntoIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("IntoIter { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_utils::thread::scope;

    const CONC_COUNT: i64 = if cfg!(miri) { 500 } else { 100_000 };

    /// Performs the linking half of an enqueue only, leaving the tail behind the new node the
    /// way a producer descheduled right after its link CAS would.
    fn enqueue_without_advancing_tail<T>(q: &LockFreeQueue<T>, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node::new(value)).into_shared(guard);
        q.link(new, guard);
    }

    fn tail_lags<T>(q: &LockFreeQueue<T>) -> bool {
        let guard = &epoch::pin();
        let tail = q.tail.load(Acquire, guard);
        !unsafe { tail.deref() }.next.load(Acquire, guard).is_null()
    }

    #[test]
    fn new_queue_shares_sentinel() {
        let q = LockFreeQueue::<i64>::new();
        let guard = &epoch::pin();
        let head = q.head.load(Acquire, guard);
        let tail = q.tail.load(Acquire, guard);
        assert_eq!(head, tail);
        assert_eq!(head.generation(), 0);
        assert!(q.is_empty());
        assert!(!tail_lags(&q));
    }

    #[test]
    fn enqueue_helps_lagging_tail() {
        let q = LockFreeQueue::new();
        enqueue_without_advancing_tail(&q, 1);
        assert!(tail_lags(&q));

        let generation = q.tail.load(Acquire, &epoch::pin()).generation();
        q.enqueue(2);

        // One CAS helping the first producer, one by the second producer itself.
        assert!(!tail_lags(&q));
        assert_eq!(q.tail.load(Acquire, &epoch::pin()).generation(), generation + 2);

        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn dequeue_helps_lagging_tail() {
        let q = LockFreeQueue::new();
        enqueue_without_advancing_tail(&q, 7);
        assert!(tail_lags(&q));
        assert!(!q.is_empty());

        assert_eq!(q.dequeue(), Some(7));

        // The tail was moved forward before the head passed it.
        let guard = &epoch::pin();
        let head = q.head.load(Acquire, guard);
        let tail = q.tail.load(Acquire, guard);
        assert_eq!(head.as_raw(), tail.as_raw());
        assert!(!tail_lags(&q));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn head_generation_counts_dequeues() {
        let q = LockFreeQueue::new();
        for i in 0..10 {
            q.enqueue(i);
        }
        for _ in 0..10 {
            assert!(q.dequeue().is_some());
        }
        assert_eq!(q.head.load(Acquire, &epoch::pin()).generation(), 10);
    }

    #[test]
    fn lagging_producers_only_seq() {
        let q = LockFreeQueue::new();
        for i in 0..200 {
            enqueue_without_advancing_tail(&q, i);
        }
        for i in 0..200 {
            assert_eq!(q.dequeue(), Some(i));
        }
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn lagging_producers_mpmc() {
        const THREADS: i64 = 3;

        let q = LockFreeQueue::new();
        let mut received = scope(|scope| {
            let q = &q;
            for t in 0..THREADS {
                scope.spawn(move |_| {
                    for i in 0..CONC_COUNT {
                        if t == 0 {
                            q.enqueue((t, i));
                        } else {
                            enqueue_without_advancing_tail(q, (t, i));
                        }
                    }
                });
            }

            let consumers: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(move |_| {
                        let mut last = vec![-1; THREADS as usize];
                        let mut got = Vec::new();
                        while (got.len() as i64) < CONC_COUNT {
                            if let Some((t, i)) = q.dequeue() {
                                assert!(i > last[t as usize]);
                                last[t as usize] = i;
                                got.push((t, i));
                            }
                        }
                        got
                    })
                })
                .collect();

            consumers
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        received.sort_unstable();
        let expected: Vec<_> = (0..THREADS)
            .flat_map(|t| (0..CONC_COUNT).map(move |i| (t, i)))
            .collect();
        assert_eq!(received, expected);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn extend_pins_per_element() {
        let mut q = LockFreeQueue::new();
        q.extend((0..100).map(|i| {
            assert!(!epoch::is_pinned());
            i
        }));

        for i in 0..100 {
            assert_eq!(q.dequeue(), Some(i));
        }
        assert!(q.is_empty());
        assert!(!tail_lags(&q));
    }
}
