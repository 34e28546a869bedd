#![no_main]

use libfuzzer_sys::fuzz_target;

use conqueue::{Channel, LinkedQueue};

#[derive(arbitrary::Arbitrary, Debug)]
pub enum Op {
    Enqueue(u64),
    Dequeue,
    Close,
}

fuzz_target!(|ops: Vec<Op>| {
    let queue = LinkedQueue::new();
    let mut model = std::collections::VecDeque::new();
    let mut closed = false;

    for op in ops {
        match op {
            Op::Enqueue(value) => {
                let result = queue.enqueue(value);
                if closed {
                    assert!(result.is_err());
                } else {
                    assert!(result.is_ok());
                    model.push_back(value);
                }
            }
            Op::Dequeue => {
                assert_eq!(queue.try_dequeue(), model.pop_front());
            }
            Op::Close => {
                queue.close();
                closed = true;
            }
        }
    }

    // Drain what the model still holds.
    while let Some(expected) = model.pop_front() {
        assert_eq!(queue.try_dequeue(), Some(expected));
    }
    assert_eq!(queue.try_dequeue(), None);
});
