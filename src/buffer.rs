use core::alloc::Layout;
use core::ptr::NonNull;
use std::alloc::{alloc, dealloc, handle_alloc_error};

/// Raw power-of-two cell storage with masked indexing.
///
/// No cell constructor runs on allocation and no cell destructor runs on
/// drop; the owning queue is responsible for the lifetime of whatever it
/// writes through [`RawRing::cell`].
pub(crate) struct RawRing<T> {
    ptr: NonNull<T>,
    capacity: usize,
    mask: usize,
}

impl<T> RawRing<T> {
    /// Allocates storage for `capacity` cells.
    ///
    /// # Panics
    /// `capacity` must be a power of two and at least 2.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "ring capacity must be a power of two >= 2, got {capacity}"
        );

        let layout = Layout::array::<T>(capacity).expect("ring layout overflows isize");
        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: the layout is non-zero-sized here.
            let raw = unsafe { alloc(layout) };
            let Some(ptr) = NonNull::new(raw.cast::<T>()) else {
                handle_alloc_error(layout);
            };
            ptr
        };

        Self {
            ptr,
            capacity,
            mask: capacity - 1,
        }
    }

    /// Pointer to the cell for position `pos`, wrapped by the capacity mask.
    /// The cell may be uninitialized; the caller tracks what lives there.
    #[inline(always)]
    pub(crate) fn cell(&self, pos: usize) -> *mut T {
        // SAFETY: masking keeps the index within the allocation.
        unsafe { self.ptr.as_ptr().add(pos & self.mask) }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for RawRing<T> {
    fn drop(&mut self) {
        let layout = Layout::array::<T>(self.capacity).expect("ring layout overflows isize");
        if layout.size() != 0 {
            // SAFETY: allocated in `new` with this exact layout. Live cells
            // were destroyed by the owning queue before we got here.
            unsafe { dealloc(self.ptr.as_ptr().cast(), layout) };
        }
    }
}
