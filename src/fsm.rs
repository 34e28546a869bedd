use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::channel::Channel;
use crate::mutex_queue::MutexQueue;
use crate::oneshot;

/// An action attached to a state: runs on the worker thread with the event
/// that triggered it.
pub type Action<E> = Box<dyn Fn(&E) + Send>;

/// Per-state behavior. Any of the three hooks may be absent.
pub struct StateSpec<E> {
    /// Runs when the machine transitions into the state.
    pub entry: Option<Action<E>>,
    /// Runs when the machine transitions out of the state.
    pub exit: Option<Action<E>>,
    /// Runs for every event received while in the state.
    pub callback: Option<Action<E>>,
}

impl<E> Default for StateSpec<E> {
    fn default() -> Self {
        Self {
            entry: None,
            exit: None,
            callback: None,
        }
    }
}

type Envelope<S, E> = (E, oneshot::Sender<S>);

/// A finite-state machine driven through a queue.
///
/// Events go in through [`Fsm::submit`]; a dedicated worker thread drains
/// the queue, dispatches the current state's callback, consults the
/// transition table, and on a transition runs the old state's exit and the
/// new state's entry. Each submission returns a completion handle that
/// resolves to the state the machine was in once the event was processed.
///
/// The queue is the only cross-thread channel: dropping the machine closes
/// it, the worker drains what is queued, and the thread is joined.
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use conqueue::fsm::{Fsm, StateSpec};
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// enum State { Idle, Busy }
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// enum Event { Start, Finish }
///
/// let mut states = HashMap::new();
/// states.insert(State::Idle, StateSpec::default());
/// states.insert(State::Busy, StateSpec::default());
///
/// let mut transitions = HashMap::new();
/// transitions.insert((State::Idle, Event::Start), State::Busy);
/// transitions.insert((State::Busy, Event::Finish), State::Idle);
///
/// let fsm = Fsm::new(State::Idle, states, transitions);
/// let done = fsm.submit(Event::Start).unwrap();
/// assert_eq!(done.recv(), Some(State::Busy));
/// ```
pub struct Fsm<S, E, Q = MutexQueue<Envelope<S, E>>>
where
    Q: Channel<Envelope<S, E>>,
{
    queue: Arc<Q>,
    worker: Option<JoinHandle<()>>,
    _marker: PhantomData<fn() -> (S, E)>,
}

impl<S, E> Fsm<S, E, MutexQueue<Envelope<S, E>>>
where
    S: Copy + Eq + Hash + Send + 'static,
    E: Copy + Eq + Hash + Send + 'static,
{
    /// Starts the machine in `initial` on an unbounded mutex queue.
    pub fn new(
        initial: S,
        states: HashMap<S, StateSpec<E>>,
        transitions: HashMap<(S, E), S>,
    ) -> Self {
        Self::with_queue(MutexQueue::new(), initial, states, transitions)
    }
}

impl<S, E, Q> Fsm<S, E, Q>
where
    S: Copy + Eq + Hash + Send + 'static,
    E: Copy + Eq + Hash + Send + 'static,
    Q: Channel<Envelope<S, E>> + Send + Sync + 'static,
{
    /// Starts the machine on a caller-supplied queue, for pairing the
    /// engine with any [`Channel`] implementation.
    pub fn with_queue(
        queue: Q,
        initial: S,
        states: HashMap<S, StateSpec<E>>,
        transitions: HashMap<(S, E), S>,
    ) -> Self {
        let queue = Arc::new(queue);
        let worker = thread::spawn({
            let queue = queue.clone();
            move || Self::run(&*queue, initial, states, transitions)
        });
        Self {
            queue,
            worker: Some(worker),
            _marker: PhantomData,
        }
    }

    /// Hands an event to the worker. The returned handle resolves to the
    /// machine's state after the event was dispatched; `None` when the
    /// machine is already shut down.
    pub fn submit(&self, event: E) -> Option<oneshot::Receiver<S>> {
        let (done, handle) = oneshot::channel();
        match self.queue.enqueue((event, done)) {
            Ok(()) => Some(handle),
            Err(_) => None,
        }
    }

    fn run(
        queue: &Q,
        initial: S,
        states: HashMap<S, StateSpec<E>>,
        transitions: HashMap<(S, E), S>,
    ) {
        let mut state = initial;
        while let Some((event, done)) = queue.dequeue() {
            if let Some(spec) = states.get(&state) {
                if let Some(callback) = &spec.callback {
                    callback(&event);
                }
            }

            if let Some(&to) = transitions.get(&(state, event)) {
                // A transition to an unknown or identical state is a
                // no-op; the tables are user data, not trusted input.
                if to != state && states.contains_key(&to) {
                    if let Some(exit) = states.get(&state).and_then(|s| s.exit.as_ref()) {
                        exit(&event);
                    }
                    state = to;
                    if let Some(entry) = states.get(&state).and_then(|s| s.entry.as_ref()) {
                        entry(&event);
                    }
                }
            }

            done.send(state);
        }
    }
}

impl<S, E, Q> Drop for Fsm<S, E, Q>
where
    Q: Channel<Envelope<S, E>>,
{
    fn drop(&mut self) {
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
