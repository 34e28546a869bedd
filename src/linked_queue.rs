use core::mem::MaybeUninit;
use core::ptr::null_mut;

use crossbeam_utils::CachePadded;

use crate::atomics::*;
use crate::backoff::Backoff;
use crate::channel::{Channel, EnqueueError};
use crate::smr::{Guard, GuardArray, Smr};

struct Node<T> {
    data: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn dummy() -> *mut Self {
        Box::into_raw(Box::new(Self {
            data: MaybeUninit::uninit(),
            next: AtomicPtr::new(null_mut()),
        }))
    }

    fn with_value(value: T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            data: MaybeUninit::new(value),
            next: AtomicPtr::new(null_mut()),
        }))
    }
}

/// Deleter handed to the SMR. By the time a node is retired its payload has
/// been moved out (or it was a dummy), so only the box itself is freed.
unsafe fn drop_node<T>(ptr: *mut ()) {
    drop(unsafe { Box::from_raw(ptr.cast::<Node<T>>()) });
}

/// An unbounded lock-free MPMC queue: a singly-linked list with a permanent
/// dummy head, made reclamation-safe by hazard pointers.
///
/// `head` always points at the current dummy; the node after it carries the
/// next value. Dequeuing swings `head` forward, hands the old dummy to
/// [`Smr::retire`], and the node it swung to becomes the new dummy with its
/// payload moved out. A lagging `tail` is helped forward by whichever
/// thread notices it.
///
/// The blocking [`Channel::dequeue`] spins with [`Backoff`] on an empty
/// open queue; `close` turns that wait into `None` once the list drains.
///
/// # Example
/// ```
/// use conqueue::{Channel, LinkedQueue};
///
/// let queue = LinkedQueue::new();
/// assert!(queue.enqueue(String::from("job")).is_ok());
/// assert_eq!(queue.dequeue().as_deref(), Some("job"));
/// ```
pub struct LinkedQueue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    closed: CachePadded<AtomicBool>,
    size: CachePadded<AtomicUsize>,
}

// SAFETY: nodes hand values across threads; list surgery is CAS-published
// and every traversal holds a hazard on what it dereferences.
unsafe impl<T: Send> Send for LinkedQueue<T> {}
unsafe impl<T: Send> Sync for LinkedQueue<T> {}

impl<T> LinkedQueue<T> {
    pub fn new() -> Self {
        Smr::construct_default();
        let dummy = Node::<T>::dummy();
        Self {
            head: CachePadded::new(AtomicPtr::new(dummy)),
            tail: CachePadded::new(AtomicPtr::new(dummy)),
            closed: CachePadded::new(AtomicBool::new(false)),
            size: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Links an allocated node at the tail.
    fn push_node(&self, new: *mut Node<T>) {
        let guards = GuardArray::<2>::new();
        let mut backoff = Backoff::new();
        loop {
            // The list always holds at least the dummy, so `tail` is never
            // null.
            let tail = guards.protect(0, &self.tail);
            // SAFETY: hazarded above and re-validated by `protect`.
            let tail_ref = unsafe { &*tail };
            let next = tail_ref.next.load(Acquire);

            if self.tail.load(Acquire) != tail {
                continue;
            }
            if !next.is_null() {
                // Tail lags behind the real end; help it forward.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed);
                continue;
            }
            if tail_ref
                .next
                .compare_exchange(null_mut(), new, Release, Relaxed)
                .is_ok()
            {
                let _ = self.tail.compare_exchange(tail, new, Release, Relaxed);
                return;
            }
            backoff.wait();
        }
    }

    fn take<const BLOCK: bool>(&self) -> Option<T> {
        let guards = GuardArray::<2>::new();
        let mut backoff = Backoff::new();
        loop {
            let head = guards.protect(0, &self.head);
            // SAFETY: hazarded above and re-validated by `protect`.
            let next = guards.protect(1, unsafe { &(*head).next });

            if self.head.load(Acquire) != head {
                continue;
            }
            if next.is_null() {
                if self.closed.load(Acquire) {
                    return None;
                }
                if const { !BLOCK } {
                    return None;
                }
                backoff.wait();
                continue;
            }

            let tail = self.tail.load(Acquire);
            if head == tail {
                // Tail has not caught up with an in-flight insertion.
                let _ = self.tail.compare_exchange(tail, next, Release, Relaxed);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, AcqRel, Relaxed)
                .is_ok()
            {
                // `next` is the new dummy; we alone may move its payload
                // out, and the hazard on it keeps the read safe.
                // SAFETY: exactly one thread wins the CAS for this node.
                let value = unsafe { (*next).data.assume_init_read() };
                self.size.fetch_sub(1, Relaxed);
                // SAFETY: `head` is unlinked; nobody can reach it through
                // the queue anymore, and it is retired exactly once.
                unsafe { Smr::retire(head.cast(), drop_node::<T>) };
                return Some(value);
            }
            backoff.wait();
        }
    }
}

impl<T> Default for LinkedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> for LinkedQueue<T> {
    fn enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        if self.closed.load(Acquire) {
            return Err(EnqueueError::Closed(value));
        }
        // Counted before linking so the counter never dips below zero when
        // a consumer races ahead of it.
        self.size.fetch_add(1, Relaxed);
        self.push_node(Node::with_value(value));
        Ok(())
    }

    /// Enqueue never waits on capacity here, so this is [`Channel::enqueue`].
    fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        self.enqueue(value)
    }

    fn dequeue(&self) -> Option<T> {
        self.take::<true>()
    }

    fn try_dequeue(&self) -> Option<T> {
        self.take::<false>()
    }

    fn close(&self) {
        self.closed.store(true, Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    /// A maintained counter, not a list walk; includes enqueues that are
    /// still mid-link and is stale the moment it returns.
    fn len(&self) -> usize {
        self.size.load(Relaxed)
    }

    fn is_empty(&self) -> bool {
        let guard = Guard::new();
        let head = guard.protect(&self.head);
        // SAFETY: hazarded above.
        unsafe { (*head).next.load(Acquire).is_null() }
    }
}

impl<T> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        self.close();
        while self.try_dequeue().is_some() {}
        // Only the dummy remains and no other thread touches the queue
        // during drop.
        let dummy = self.head.load(Relaxed);
        // SAFETY: the dummy was never retired and is now unreachable.
        unsafe { drop(Box::from_raw(dummy)) };
    }
}
