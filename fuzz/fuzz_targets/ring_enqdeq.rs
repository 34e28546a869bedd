#![no_main]

use libfuzzer_sys::fuzz_target;

use conqueue::{Bounded, Channel, RingQueue};

#[derive(arbitrary::Arbitrary, Debug)]
pub struct RingParams {
    order: u8,
    values: Vec<u64>,
}

fuzz_target!(|params: RingParams| {
    // Capacities from 2 to 512.
    let capacity = 1usize << (params.order % 10).max(1);
    let queue = RingQueue::new(capacity);

    let mut accepted = 0;
    for value in &params.values {
        match queue.try_enqueue(*value) {
            Ok(()) => accepted += 1,
            Err(e) => {
                assert!(e.is_full());
                assert_eq!(accepted, queue.capacity());
            }
        }
    }
    assert_eq!(queue.len(), accepted);

    // FIFO comes back out in order, then empty.
    for value in params.values.iter().take(accepted) {
        assert_eq!(queue.try_dequeue(), Some(*value));
    }
    assert_eq!(queue.try_dequeue(), None);
});
