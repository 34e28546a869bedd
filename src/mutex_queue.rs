use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::channel::{Bounded, Channel, EnqueueError};

struct Shared<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            closed: false,
        }
    }
}

/// An unbounded mutex+condvar queue.
///
/// Enqueues never wait on capacity; allocation is the only back-pressure.
/// Consumers block on a not-empty condvar until a value arrives or the
/// queue closes.
///
/// # Example
/// ```
/// use conqueue::{Channel, MutexQueue};
///
/// let queue = MutexQueue::new();
/// assert!(queue.enqueue(7).is_ok());
/// assert_eq!(queue.dequeue(), Some(7));
/// ```
pub struct MutexQueue<T> {
    shared: Mutex<Shared<T>>,
    not_empty: Condvar,
}

impl<T> MutexQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared::new()),
            not_empty: Condvar::new(),
        }
    }
}

impl<T> Default for MutexQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> for MutexQueue<T> {
    fn enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return Err(EnqueueError::Closed(value));
            }
            shared.items.push_back(value);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        self.enqueue(value)
    }

    fn dequeue(&self) -> Option<T> {
        let mut shared = self.shared.lock();
        while shared.items.is_empty() && !shared.closed {
            self.not_empty.wait(&mut shared);
        }
        shared.items.pop_front()
    }

    fn try_dequeue(&self) -> Option<T> {
        self.shared.lock().items.pop_front()
    }

    fn close(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return;
            }
            shared.closed = true;
        }
        self.not_empty.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    fn clear(&self) {
        let drained = core::mem::take(&mut self.shared.lock().items);
        // Element destructors run outside the lock.
        drop(drained);
    }
}

impl<T> Drop for MutexQueue<T> {
    fn drop(&mut self) {
        self.close();
        self.clear();
    }
}

/// A bounded mutex+condvar queue with capacity back-pressure.
///
/// A full queue makes [`Channel::enqueue`] wait on a not-full condvar until
/// a consumer frees a slot or the queue closes. Fairness between waiters is
/// whatever the OS gives.
///
/// # Example
/// ```
/// use conqueue::{Bounded, Channel, BoundedMutexQueue};
///
/// let queue = BoundedMutexQueue::new(2);
/// assert!(queue.try_enqueue(1).is_ok());
/// assert!(queue.try_enqueue(2).is_ok());
/// assert!(queue.try_enqueue(3).unwrap_err().is_full());
/// assert_eq!(queue.capacity(), 2);
/// ```
pub struct BoundedMutexQueue<T> {
    shared: Mutex<Shared<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedMutexQueue<T> {
    /// # Panics
    /// `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "bounded queue needs a capacity of at least 1");
        Self {
            shared: Mutex::new(Shared::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }
}

impl<T> Channel<T> for BoundedMutexQueue<T> {
    fn enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        {
            let mut shared = self.shared.lock();
            loop {
                if shared.closed {
                    return Err(EnqueueError::Closed(value));
                }
                if shared.items.len() < self.capacity {
                    break;
                }
                self.not_full.wait(&mut shared);
            }
            shared.items.push_back(value);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return Err(EnqueueError::Closed(value));
            }
            if shared.items.len() >= self.capacity {
                return Err(EnqueueError::Full(value));
            }
            shared.items.push_back(value);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    fn dequeue(&self) -> Option<T> {
        let value = {
            let mut shared = self.shared.lock();
            while shared.items.is_empty() && !shared.closed {
                self.not_empty.wait(&mut shared);
            }
            shared.items.pop_front()
        };
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    fn try_dequeue(&self) -> Option<T> {
        let value = self.shared.lock().items.pop_front();
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    fn close(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return;
            }
            shared.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    fn clear(&self) {
        let drained = core::mem::take(&mut self.shared.lock().items);
        self.not_full.notify_all();
        drop(drained);
    }
}

impl<T> Bounded for BoundedMutexQueue<T> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_full(&self) -> bool {
        self.shared.lock().items.len() >= self.capacity
    }
}

impl<T> Drop for BoundedMutexQueue<T> {
    fn drop(&mut self) {
        self.close();
        self.clear();
    }
}
