//! A family of concurrent queues behind one channel contract.
//!
//! Four queues trade off synchronization discipline and capacity model:
//! [`MutexQueue`] and [`BoundedMutexQueue`] block on condvars, [`RingQueue`]
//! is a lock-free bounded ring of sequenced cells, and [`LinkedQueue`] is a
//! lock-free linked queue kept reclamation-safe by the hazard-pointer
//! manager in [`smr`]. The [`fsm`] engine and [`pool`] worker pool consume
//! any of them through the [`Channel`] trait.

pub(crate) mod atomics;
pub mod backoff;
mod buffer;
pub mod channel;
pub mod fsm;
pub mod linked_queue;
pub mod mutex_queue;
pub mod oneshot;
pub mod pool;
pub mod ring_queue;
pub mod smr;

pub use backoff::Backoff;
pub use channel::{Bounded, Channel, EnqueueError};
pub use fsm::{Fsm, StateSpec};
pub use linked_queue::LinkedQueue;
pub use mutex_queue::{BoundedMutexQueue, MutexQueue};
pub use pool::ThreadPool;
pub use ring_queue::RingQueue;
pub use smr::{Guard, GuardArray, Smr};
