use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

enum State<T> {
    Pending,
    Ready(T),
    Closed,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// A single-use completion signal: one value crosses from the thread that
/// finishes a piece of work to the thread that waits on it.
///
/// Dropping the [`Sender`] without sending wakes the receiver with `None`.
///
/// # Example
/// ```
/// use conqueue::oneshot;
///
/// let (tx, rx) = oneshot::channel();
/// std::thread::spawn(move || tx.send(42));
/// assert_eq!(rx.recv(), Some(42));
/// ```
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State::Pending),
        ready: Condvar::new(),
    });
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Sender<T> {
    /// Fulfills the signal. The paired receiver (current or future call)
    /// gets the value.
    pub fn send(self, value: T) {
        {
            let mut state = self.inner.state.lock();
            *state = State::Ready(value);
        }
        self.inner.ready.notify_one();
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if matches!(*state, State::Pending) {
            *state = State::Closed;
            drop(state);
            self.inner.ready.notify_one();
        }
    }
}

pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Receiver<T> {
    /// Waits for the value. `None` means the sender was dropped without
    /// sending.
    pub fn recv(self) -> Option<T> {
        let mut state = self.inner.state.lock();
        loop {
            match core::mem::replace(&mut *state, State::Closed) {
                State::Ready(value) => return Some(value),
                State::Closed => return None,
                State::Pending => {
                    *state = State::Pending;
                    self.inner.ready.wait(&mut state);
                }
            }
        }
    }

    /// Non-waiting probe. `Err(self)` when nothing has arrived yet.
    pub fn try_recv(self) -> Result<Option<T>, Self> {
        let mut state = self.inner.state.lock();
        match core::mem::replace(&mut *state, State::Closed) {
            State::Ready(value) => Ok(Some(value)),
            State::Closed => Ok(None),
            State::Pending => {
                *state = State::Pending;
                drop(state);
                Err(self)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_send_recv() {
        let (tx, rx) = channel();
        tx.send(5);
        assert_eq!(rx.recv(), Some(5));
    }

    #[test]
    pub fn test_dropped_sender_closes() {
        let (tx, rx) = channel::<u32>();
        drop(tx);
        assert_eq!(rx.recv(), None);
    }

    #[test]
    pub fn test_try_recv_pending() {
        let (tx, rx) = channel();
        let rx = rx.try_recv().unwrap_err();
        tx.send(1);
        assert_eq!(rx.recv(), Some(1));
    }

    #[test]
    pub fn test_cross_thread() {
        let (tx, rx) = channel();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            tx.send("done");
        });
        assert_eq!(rx.recv(), Some("done"));
        sender.join().unwrap();
    }
}
