use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

use crate::atomics::*;
use crate::backoff::Backoff;
use crate::buffer::RawRing;
use crate::channel::{Bounded, Channel, EnqueueError};

/// One ring cell. The sequence number encodes both the lap and who may
/// claim the cell next: `seq == pos` means a producer claiming `pos` may
/// write, `seq == pos + 1` means the consumer claiming `pos` may read.
struct Slot<T> {
    sequence: AtomicU64,
    data: UnsafeCell<MaybeUninit<T>>,
}

enum Rejected {
    Full,
    Closed,
}

/// A bounded lock-free MPMC queue over a ring of sequenced cells.
///
/// Producers and consumers claim positions by CAS on their cursor once the
/// target cell's sequence says it is their turn; publication is a release
/// store of the next sequence value. No allocation happens after
/// construction.
///
/// The blocking flavors spin with adaptive [`Backoff`]; there is no kernel
/// wait. A consumer parked on an empty open queue burns its
/// time slice, so pair this queue with an external signal if producers can
/// go quiet for long.
///
/// # Example
/// ```
/// use conqueue::{Bounded, Channel, RingQueue};
///
/// let queue = RingQueue::new(8);
/// assert_eq!(queue.capacity(), 8);
/// assert!(queue.enqueue(1).is_ok());
/// assert_eq!(queue.dequeue(), Some(1));
/// ```
pub struct RingQueue<T> {
    buffer: RawRing<Slot<T>>,
    pos_enqueue: CachePadded<AtomicU64>,
    pos_dequeue: CachePadded<AtomicU64>,
    closed: CachePadded<AtomicBool>,
}

// SAFETY: values move through cells under the sequence-number handshake;
// a cell is visible to exactly one claimant at a time.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Builds a queue of `capacity` cells, each seeded with its own index
    /// as the sequence number.
    ///
    /// # Panics
    /// `capacity` must be a power of two and at least 2.
    pub fn new(capacity: usize) -> Self {
        let buffer: RawRing<Slot<T>> = RawRing::new(capacity);
        for i in 0..capacity {
            // SAFETY: construction writes into raw cells exactly once.
            unsafe {
                buffer.cell(i).write(Slot {
                    sequence: AtomicU64::new(i as u64),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                });
            }
        }
        Self {
            buffer,
            pos_enqueue: CachePadded::new(AtomicU64::new(0)),
            pos_dequeue: CachePadded::new(AtomicU64::new(0)),
            closed: CachePadded::new(AtomicBool::new(false)),
        }
    }

    #[inline(always)]
    fn slot(&self, pos: u64) -> &Slot<T> {
        // SAFETY: cells were initialized in `new` and indexing is masked.
        unsafe { &*self.buffer.cell(pos as usize) }
    }

    /// Claims a producer position. Waits out a full ring when `BLOCK`,
    /// bailing once the queue closes; otherwise reports a definitively
    /// full ring right away.
    fn claim_enqueue<const BLOCK: bool>(&self) -> Result<u64, Rejected> {
        let mut backoff = Backoff::new();
        let mut pos = self.pos_enqueue.load(Acquire);
        loop {
            let seq = self.slot(pos).sequence.load(Acquire);
            let diff = seq as i64 - pos as i64;
            if diff == 0 {
                match self
                    .pos_enqueue
                    .compare_exchange_weak(pos, pos + 1, AcqRel, Acquire)
                {
                    Ok(_) => return Ok(pos),
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                // The consumer one lap behind has not released this cell.
                if const { BLOCK } {
                    if self.closed.load(Acquire) {
                        return Err(Rejected::Closed);
                    }
                } else if pos.wrapping_sub(self.pos_dequeue.load(Acquire))
                    >= self.buffer.capacity() as u64
                {
                    return Err(Rejected::Full);
                }
                backoff.wait();
                pos = self.pos_enqueue.load(Acquire);
            } else {
                // Another producer advanced the cursor under us.
                pos = self.pos_enqueue.load(Acquire);
            }
        }
    }

    /// Claims a consumer position, or `None` for empty (closed-and-empty
    /// when `BLOCK`, plain empty otherwise).
    fn claim_dequeue<const BLOCK: bool>(&self) -> Option<u64> {
        let mut backoff = Backoff::new();
        let mut attempts = 0;
        let mut pos = self.pos_dequeue.load(Acquire);
        loop {
            let seq = self.slot(pos).sequence.load(Acquire);
            let diff = seq as i64 - (pos + 1) as i64;
            if diff == 0 {
                match self
                    .pos_dequeue
                    .compare_exchange_weak(pos, pos + 1, AcqRel, Acquire)
                {
                    Ok(_) => return Some(pos),
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                // Nothing published at `pos` yet.
                if self.closed.load(Acquire) && self.pos_enqueue.load(Acquire) == pos {
                    return None;
                }
                if const { !BLOCK } {
                    if self.pos_enqueue.load(Acquire) == pos {
                        return None;
                    }
                    // A producer claimed the cell but has not published;
                    // give it a moment, then report empty rather than wait.
                    attempts += 1;
                    if attempts > 8 {
                        return None;
                    }
                }
                backoff.wait();
                pos = self.pos_dequeue.load(Acquire);
            } else {
                pos = self.pos_dequeue.load(Acquire);
            }
        }
    }

    /// # Safety
    /// `pos` must be a freshly claimed producer position.
    #[inline]
    unsafe fn publish(&self, pos: u64, value: T) {
        let slot = self.slot(pos);
        // SAFETY: the claim gives exclusive write access to the cell.
        unsafe { (*slot.data.get()).write(value) };
        slot.sequence.store(pos + 1, Release);
    }

    /// # Safety
    /// `pos` must be a freshly claimed consumer position.
    #[inline]
    unsafe fn consume(&self, pos: u64) -> T {
        let slot = self.slot(pos);
        // SAFETY: the claim gives exclusive read access, and the producer's
        // release store of the sequence made the value visible.
        let value = unsafe { (*slot.data.get()).assume_init_read() };
        // Release the cell for the producer one lap ahead.
        slot.sequence
            .store(pos + self.buffer.capacity() as u64, Release);
        value
    }
}

impl<T> Channel<T> for RingQueue<T> {
    fn enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        if self.closed.load(Acquire) {
            return Err(EnqueueError::Closed(value));
        }
        match self.claim_enqueue::<true>() {
            Ok(pos) => {
                // SAFETY: `pos` was just claimed.
                unsafe { self.publish(pos, value) };
                Ok(())
            }
            Err(_) => Err(EnqueueError::Closed(value)),
        }
    }

    fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        if self.closed.load(Acquire) {
            return Err(EnqueueError::Closed(value));
        }
        match self.claim_enqueue::<false>() {
            Ok(pos) => {
                // SAFETY: `pos` was just claimed.
                unsafe { self.publish(pos, value) };
                Ok(())
            }
            Err(Rejected::Full) => Err(EnqueueError::Full(value)),
            Err(Rejected::Closed) => Err(EnqueueError::Closed(value)),
        }
    }

    fn enqueue_with<F: FnOnce() -> T>(&self, f: F) -> bool {
        if self.closed.load(Acquire) {
            return false;
        }
        match self.claim_enqueue::<true>() {
            Ok(pos) => {
                // SAFETY: `pos` was just claimed; the value is built
                // straight into the cell.
                unsafe { self.publish(pos, f()) };
                true
            }
            Err(_) => false,
        }
    }

    fn try_enqueue_with<F: FnOnce() -> T>(&self, f: F) -> bool {
        if self.closed.load(Acquire) {
            return false;
        }
        match self.claim_enqueue::<false>() {
            Ok(pos) => {
                // SAFETY: `pos` was just claimed.
                unsafe { self.publish(pos, f()) };
                true
            }
            Err(_) => false,
        }
    }

    fn dequeue(&self) -> Option<T> {
        // SAFETY: `pos` was just claimed.
        self.claim_dequeue::<true>()
            .map(|pos| unsafe { self.consume(pos) })
    }

    fn try_dequeue(&self) -> Option<T> {
        // SAFETY: `pos` was just claimed.
        self.claim_dequeue::<false>()
            .map(|pos| unsafe { self.consume(pos) })
    }

    fn close(&self) {
        self.closed.store(true, Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    fn len(&self) -> usize {
        let tail = self.pos_enqueue.load(Acquire);
        let head = self.pos_dequeue.load(Acquire);
        tail.saturating_sub(head) as usize
    }
}

impl<T> Bounded for RingQueue<T> {
    fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn is_full(&self) -> bool {
        self.len() >= self.buffer.capacity()
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        self.close();
        // Sole owner: every cell is either published or free, so this
        // drains exactly the live values before the raw ring deallocates.
        while self.try_dequeue().is_some() {}
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use loom::sync::Arc;
    use loom::thread;

    use super::*;

    #[test]
    pub fn loom_spsc_handoff() {
        loom::model(|| {
            let queue = Arc::new(RingQueue::new(2));

            let producer = thread::spawn({
                let queue = queue.clone();
                move || {
                    queue.try_enqueue(7u32).unwrap();
                }
            });

            let mut seen = None;
            for _ in 0..2 {
                if let Some(v) = queue.try_dequeue() {
                    seen = Some(v);
                    break;
                }
                thread::yield_now();
            }

            producer.join().unwrap();
            if seen.is_none() {
                seen = queue.try_dequeue();
            }
            assert_eq!(seen, Some(7));
        });
    }

    #[test]
    pub fn loom_close_is_final() {
        loom::model(|| {
            let queue = Arc::new(RingQueue::<u32>::new(2));

            let closer = thread::spawn({
                let queue = queue.clone();
                move || queue.close()
            });
            closer.join().unwrap();

            // Enqueues that start after close() returned must fail.
            assert!(queue.try_enqueue(1).is_err());
            assert_eq!(queue.try_dequeue(), None);
        });
    }
}
