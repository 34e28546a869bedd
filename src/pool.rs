use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::channel::Channel;
use crate::mutex_queue::MutexQueue;
use crate::oneshot;

type Task<D> = (D, oneshot::Sender<D>);

/// A fixed-size worker pool fed through a queue.
///
/// Workers block in [`Channel::dequeue`] on the shared task queue, run the
/// pool's callback over each task's data, and fulfill the task's
/// completion handle with the processed data. Dropping the pool closes the
/// queue; workers drain what is left and exit when the queue reports
/// closed-and-empty, then the threads are joined.
///
/// # Example
/// ```
/// use conqueue::ThreadPool;
///
/// let pool = ThreadPool::new(2, |n: &mut u32| *n *= 2);
/// let doubled = pool.submit(21).unwrap();
/// assert_eq!(doubled.recv(), Some(42));
/// ```
pub struct ThreadPool<D, Q = MutexQueue<Task<D>>>
where
    Q: Channel<Task<D>>,
{
    queue: Arc<Q>,
    workers: Vec<JoinHandle<()>>,
    _marker: PhantomData<fn() -> D>,
}

impl<D> ThreadPool<D, MutexQueue<Task<D>>>
where
    D: Send + 'static,
{
    pub const DEFAULT_WORKERS: usize = 4;
    pub const MAX_WORKERS: usize = 10;

    /// Spawns `workers` threads (clamped to 1..=[`Self::MAX_WORKERS`])
    /// over an unbounded mutex queue.
    pub fn new<F>(workers: usize, callback: F) -> Self
    where
        F: Fn(&mut D) + Send + Sync + 'static,
    {
        Self::with_queue(MutexQueue::new(), workers, callback)
    }
}

impl<D, Q> ThreadPool<D, Q>
where
    D: Send + 'static,
    Q: Channel<Task<D>> + Send + Sync + 'static,
{
    /// Spawns the pool over a caller-supplied queue, for pairing the pool
    /// with any [`Channel`] implementation.
    pub fn with_queue<F>(queue: Q, workers: usize, callback: F) -> Self
    where
        F: Fn(&mut D) + Send + Sync + 'static,
    {
        let workers = workers.clamp(1, ThreadPool::<D>::MAX_WORKERS);
        let queue = Arc::new(queue);
        let callback: Arc<dyn Fn(&mut D) + Send + Sync> = Arc::new(callback);

        let workers = (0..workers)
            .map(|_| {
                thread::spawn({
                    let queue = queue.clone();
                    let callback = callback.clone();
                    move || {
                        while let Some((mut data, done)) = queue.dequeue() {
                            callback(&mut data);
                            done.send(data);
                        }
                    }
                })
            })
            .collect();

        Self {
            queue,
            workers,
            _marker: PhantomData,
        }
    }

    /// Hands `data` to the pool. The returned handle resolves to the
    /// processed data; `None` when the pool is already shut down.
    pub fn submit(&self, data: D) -> Option<oneshot::Receiver<D>> {
        let (done, handle) = oneshot::channel();
        match self.queue.enqueue((data, done)) {
            Ok(()) => Some(handle),
            Err(_) => None,
        }
    }

    /// Tasks accepted but not yet picked up by a worker.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl<D, Q> Drop for ThreadPool<D, Q>
where
    Q: Channel<Task<D>>,
{
    fn drop(&mut self) {
        self.queue.close();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
#[cfg(not(loom))]
mod tests {
    use super::*;
    use crate::linked_queue::LinkedQueue;

    #[test]
    pub fn test_submit_collect() {
        let pool = ThreadPool::new(4, |n: &mut u64| *n *= 2);
        let handles: Vec<_> = (0..100u64).map(|i| pool.submit(i).unwrap()).collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.recv(), Some(i as u64 * 2));
        }
    }

    #[test]
    pub fn test_worker_count_clamped() {
        let pool = ThreadPool::new(64, |_: &mut u8| {});
        assert_eq!(pool.worker_count(), ThreadPool::<u8>::MAX_WORKERS);

        let pool = ThreadPool::new(0, |_: &mut u8| {});
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    pub fn test_drop_drains_accepted_tasks() {
        // Tasks accepted before drop still complete: close lets the queue
        // drain before the workers see `None`.
        let pool = ThreadPool::new(1, |n: &mut u32| *n += 1);
        let handles: Vec<_> = (0..50).map(|i| pool.submit(i).unwrap()).collect();
        drop(pool);

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.recv(), Some(i as u32 + 1));
        }
    }

    #[test]
    pub fn test_runs_on_lock_free_queue() {
        let pool = ThreadPool::with_queue(LinkedQueue::new(), 2, |n: &mut u64| *n += 10);
        assert_eq!(pool.submit(5).unwrap().recv(), Some(15));
    }
}
