//! End-to-end scenarios run against every queue through the channel
//! contract.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conqueue::{
    Bounded, BoundedMutexQueue, Channel, LinkedQueue, MutexQueue, RingQueue,
};

fn spsc_roundtrip<Q>(queue: Q, items: u64)
where
    Q: Channel<u64> + Send + Sync + 'static,
{
    let queue = Arc::new(queue);
    let producer = std::thread::spawn({
        let queue = queue.clone();
        move || {
            for i in 0..items {
                queue.enqueue(i).unwrap();
            }
            queue.close();
        }
    });

    let mut expected = 0;
    while let Some(value) = queue.dequeue() {
        assert_eq!(value, expected);
        expected += 1;
    }
    assert_eq!(expected, items);
    producer.join().unwrap();
}

#[test]
fn spsc_roundtrip_each_queue() {
    spsc_roundtrip(MutexQueue::new(), 10_000);
    spsc_roundtrip(BoundedMutexQueue::new(1024), 10_000);
    spsc_roundtrip(RingQueue::new(1024), 10_000);
    spsc_roundtrip(LinkedQueue::new(), 10_000);
}

/// Every `(producer, sequence)` pair must land in the bitmap exactly once:
/// nothing lost, nothing duplicated, nothing invented.
fn mpmc_bitmap<Q>(queue: Q, producers: usize, consumers: usize, per_producer: usize)
where
    Q: Channel<(usize, usize)> + Send + Sync + 'static,
{
    let queue = Arc::new(queue);
    let bitmap: Arc<Vec<AtomicBool>> = Arc::new(
        (0..producers * per_producer)
            .map(|_| AtomicBool::new(false))
            .collect(),
    );

    let producer_handles: Vec<_> = (0..producers)
        .map(|p| {
            std::thread::spawn({
                let queue = queue.clone();
                move || {
                    for i in 0..per_producer {
                        queue.enqueue((p, i)).unwrap();
                    }
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            std::thread::spawn({
                let queue = queue.clone();
                let bitmap = bitmap.clone();
                move || {
                    while let Some((p, i)) = queue.dequeue() {
                        let index = p * per_producer + i;
                        assert!(
                            !bitmap[index].swap(true, Ordering::Relaxed),
                            "value ({p}, {i}) delivered twice"
                        );
                    }
                }
            })
        })
        .collect();

    for handle in producer_handles {
        handle.join().unwrap();
    }
    queue.close();
    for handle in consumer_handles {
        handle.join().unwrap();
    }

    let delivered = bitmap.iter().filter(|bit| bit.load(Ordering::Relaxed)).count();
    assert_eq!(delivered, producers * per_producer);
}

#[test]
fn mpmc_bitmap_ring() {
    mpmc_bitmap(RingQueue::new(2048), 8, 8, 50_000);
}

#[test]
fn mpmc_bitmap_linked() {
    mpmc_bitmap(LinkedQueue::new(), 8, 8, 50_000);
}

#[test]
fn mpmc_bitmap_mutex() {
    mpmc_bitmap(MutexQueue::new(), 8, 8, 20_000);
    mpmc_bitmap(BoundedMutexQueue::new(2048), 8, 8, 20_000);
}

fn close_wakes_waiter<Q>(queue: Q)
where
    Q: Channel<u32> + Send + Sync + 'static,
{
    let queue = Arc::new(queue);
    let start = Instant::now();
    let consumer = std::thread::spawn({
        let queue = queue.clone();
        move || queue.dequeue()
    });

    std::thread::sleep(Duration::from_millis(10));
    queue.close();
    assert_eq!(consumer.join().unwrap(), None);
    assert!(start.elapsed() < Duration::from_secs(1), "waiter not woken promptly");
}

#[test]
fn close_wakes_waiter_each_queue() {
    close_wakes_waiter(MutexQueue::new());
    close_wakes_waiter(BoundedMutexQueue::new(8));
    close_wakes_waiter(RingQueue::new(8));
    close_wakes_waiter(LinkedQueue::new());
}

fn close_unblocks_full_producer<Q>(queue: Q)
where
    Q: Channel<u32> + Bounded + Send + Sync + 'static,
{
    let queue = Arc::new(queue);
    for i in 0..queue.capacity() as u32 {
        queue.enqueue(i).unwrap();
    }
    assert!(queue.is_full());

    let producer = std::thread::spawn({
        let queue = queue.clone();
        move || queue.enqueue(u32::MAX)
    });

    std::thread::sleep(Duration::from_millis(10));
    queue.close();
    assert!(producer.join().unwrap().unwrap_err().is_closed());
}

#[test]
fn close_unblocks_full_producer_each_bounded_queue() {
    close_unblocks_full_producer(BoundedMutexQueue::new(4));
    close_unblocks_full_producer(RingQueue::new(4));
}

fn bounded_boundary<Q>(queue: Q)
where
    Q: Channel<usize> + Bounded,
{
    let capacity = queue.capacity();
    for i in 0..capacity {
        assert!(queue.try_enqueue(i).is_ok());
    }
    assert!(queue.try_enqueue(capacity).unwrap_err().is_full());

    for i in 0..capacity {
        assert_eq!(queue.try_dequeue(), Some(i));
    }
    assert_eq!(queue.try_dequeue(), None);
}

#[test]
fn bounded_boundary_each_bounded_queue() {
    bounded_boundary(BoundedMutexQueue::new(16));
    bounded_boundary(RingQueue::new(16));
}

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn destructor_drains<Q>(queue: Q)
where
    Q: Channel<Tracked>,
{
    let drops = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        queue.enqueue(Tracked(drops.clone())).unwrap();
    }
    drop(queue);
    assert_eq!(drops.load(Ordering::Relaxed), 10);
}

#[test]
fn destructor_drains_each_queue() {
    destructor_drains(MutexQueue::new());
    destructor_drains(BoundedMutexQueue::new(16));
    destructor_drains(RingQueue::new(16));
    destructor_drains(LinkedQueue::new());
}

#[test]
fn smr_churn_heap_payloads() {
    // Four threads alternate enqueue/dequeue of heap-backed payloads; every
    // payload allocation must drop exactly once even though node memory is
    // reclaimed lazily.
    const THREADS: usize = 4;
    const PAIRS: usize = 100_000;

    let drops = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(LinkedQueue::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            std::thread::spawn({
                let queue = queue.clone();
                let drops = drops.clone();
                move || {
                    for _ in 0..PAIRS {
                        queue.enqueue(Tracked(drops.clone())).unwrap();
                        let _ = queue.dequeue();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    drop(queue);

    assert_eq!(drops.load(Ordering::Relaxed), THREADS * PAIRS);
}

#[test]
fn pool_round_trip_over_each_queue() {
    use conqueue::ThreadPool;

    fn run<Q>(queue: Q)
    where
        Q: Channel<(u64, conqueue::oneshot::Sender<u64>)> + Send + Sync + 'static,
    {
        let pool = ThreadPool::with_queue(queue, 4, |n: &mut u64| *n += 1);
        let handles: Vec<_> = (0..1000u64).map(|i| pool.submit(i).unwrap()).collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.recv(), Some(i as u64 + 1));
        }
    }

    run(MutexQueue::new());
    run(BoundedMutexQueue::new(256));
    run(RingQueue::new(1024));
    run(LinkedQueue::new());
}
