#[cfg(loom)]
pub use loom::sync::atomic::{
    fence, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering, Ordering::*,
};

#[cfg(all(not(loom), not(feature = "portable-atomic")))]
pub use core::sync::atomic::{
    fence, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering, Ordering::*,
};

#[cfg(all(not(loom), feature = "portable-atomic"))]
pub use portable_atomic::{
    fence, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering, Ordering::*,
};
