use core::fmt;

/// Error returned by the enqueue operations. The rejected value rides along
/// so the caller decides what happens to it.
pub enum EnqueueError<T> {
    /// The queue was closed before the value could be committed.
    Closed(T),
    /// The queue is at capacity. Only the non-waiting flavor on a bounded
    /// queue reports this.
    Full(T),
}

impl<T> EnqueueError<T> {
    /// Recovers the value that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) | Self::Full(value) => value,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed(_) => "Closed(..)",
            Self::Full(_) => "Full(..)",
        })
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed(_) => "queue is closed",
            Self::Full(_) => "queue is full",
        })
    }
}

impl<T> core::error::Error for EnqueueError<T> {}

impl<T: PartialEq> PartialEq for EnqueueError<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Closed(a), Self::Closed(b)) | (Self::Full(a), Self::Full(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Eq> Eq for EnqueueError<T> {}

/// The uniform producer/consumer surface shared by every queue in this
/// crate.
///
/// The contract, regardless of the synchronization discipline underneath:
///
/// - every committed value is observed by exactly one dequeue, or dropped by
///   the queue's destructor;
/// - values from a single producer come out in the order they went in;
///   cross-producer order is unspecified;
/// - [`close`](Channel::close) is idempotent and irreversible: it fails
///   further enqueues, wakes every waiter, and lets already-queued values
///   drain;
/// - a blocking [`dequeue`](Channel::dequeue) returns `None` only once the
///   queue is closed *and* empty.
///
/// Dropping a queue is the owner's job: no thread may be mid-operation, and
/// the destructor closes, drains, and destroys what is left.
pub trait Channel<T> {
    /// Enqueues `value`, waiting out back-pressure (a bounded queue at
    /// capacity, lock contention). Fails only when the queue was closed
    /// before the value committed.
    fn enqueue(&self, value: T) -> Result<(), EnqueueError<T>>;

    /// Enqueues without waiting. On a bounded queue at capacity this fails
    /// with [`EnqueueError::Full`].
    fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>>;

    /// Builds the value with `f` only once a slot is committed, sparing a
    /// move of large values. Returns whether the value was enqueued.
    fn enqueue_with<F: FnOnce() -> T>(&self, f: F) -> bool {
        if self.is_closed() {
            return false;
        }
        self.enqueue(f()).is_ok()
    }

    /// Non-waiting flavor of [`enqueue_with`](Channel::enqueue_with).
    fn try_enqueue_with<F: FnOnce() -> T>(&self, f: F) -> bool {
        if self.is_closed() {
            return false;
        }
        self.try_enqueue(f()).is_ok()
    }

    /// Removes the next value, waiting until one is available. Returns
    /// `None` only once the queue is closed and drained.
    fn dequeue(&self) -> Option<T>;

    /// Like [`dequeue`](Channel::dequeue), handing the value to `f` instead
    /// of returning it.
    fn dequeue_with<F: FnOnce(T)>(&self, f: F) -> bool {
        match self.dequeue() {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Removes the next value without waiting. `None` means empty, whether
    /// or not the queue is still open.
    fn try_dequeue(&self) -> Option<T>;

    /// Non-waiting flavor of [`dequeue_with`](Channel::dequeue_with).
    fn try_dequeue_with<F: FnOnce(T)>(&self, f: F) -> bool {
        match self.try_dequeue() {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    /// Closes the queue. Idempotent; wakes all blocked producers and
    /// consumers. Queued values stay dequeueable.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Number of queued values. A snapshot; stale by the time it returns
    /// under contention.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains and drops everything currently queued.
    fn clear(&self) {
        while self.try_dequeue().is_some() {}
    }
}

/// Capacity surface of the bounded queues.
pub trait Bounded {
    fn capacity(&self) -> usize;

    fn is_full(&self) -> bool;
}
