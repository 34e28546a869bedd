//! Hazard-pointer safe memory reclamation.
//!
//! Lock-free readers publish the address they are about to dereference into
//! a per-thread hazard slot; writers that unlink shared nodes hand them to
//! [`Smr::retire`], and a scan frees a retired node only once no slot
//! anywhere advertises it. The manager is process-global: threads attach on
//! first use and their records stay allocated (inactive, reusable) until
//! [`Smr::destruct`].

use core::cell::{Cell, UnsafeCell};
use core::ptr::{self, null_mut};

use crossbeam_utils::CachePadded;

use crate::atomics::*;

/// Deferred deletion entry: a type-erased pointer plus the function that
/// frees it.
#[derive(Clone, Copy)]
struct RetiredPtr {
    ptr: *mut (),
    deleter: unsafe fn(*mut ()),
}

/// One published hazard pointer. `next` threads the owning record's free
/// list and is only ever touched by the owner thread.
struct HazardSlot {
    hp: AtomicPtr<()>,
    next: Cell<*const HazardSlot>,
}

impl HazardSlot {
    fn new() -> Self {
        Self {
            hp: AtomicPtr::new(null_mut()),
            next: Cell::new(ptr::null()),
        }
    }
}

/// Per-thread state, linked into the global record list.
///
/// Ownership rules keep this sound without a lock: `slots` contents are
/// written only by the owner (scanners merely load `hp`), `free` and the
/// interior of `retired` are touched only by the owner or by a helper that
/// has claimed the record through a CAS on `active`.
struct ThreadRecord {
    slots: Box<[HazardSlot]>,
    free: Cell<*const HazardSlot>,
    retired: UnsafeCell<Vec<RetiredPtr>>,
    active: AtomicBool,
    next: AtomicPtr<ThreadRecord>,
}

// SAFETY: cross-thread access is limited to `hp` loads, the `active` flag,
// and `retired` behind an `active` claim, per the rules above.
unsafe impl Send for ThreadRecord {}
unsafe impl Sync for ThreadRecord {}

impl ThreadRecord {
    fn new(hazard_ptr_count: usize, retired_capacity: usize) -> Box<Self> {
        let record = Box::new(Self {
            slots: (0..hazard_ptr_count).map(|_| HazardSlot::new()).collect(),
            free: Cell::new(ptr::null()),
            retired: UnsafeCell::new(Vec::with_capacity(retired_capacity)),
            active: AtomicBool::new(true),
            next: AtomicPtr::new(null_mut()),
        });

        // Thread the free list only once the slots sit at their final
        // address.
        for i in 0..hazard_ptr_count.saturating_sub(1) {
            record.slots[i].next.set(&record.slots[i + 1] as *const HazardSlot);
        }
        record
            .free
            .set(record.slots.first().map_or(ptr::null(), |s| s as *const _));
        record
    }

    /// Takes a slot off the free list.
    ///
    /// # Panics
    /// When every slot is taken: guards are nested deeper than the
    /// per-thread hazard pointer count, a programming error.
    fn alloc_slot(&self) -> *const HazardSlot {
        let slot = self.free.get();
        assert!(
            !slot.is_null(),
            "hazard slots exhausted: guards nested deeper than the per-thread count"
        );
        // SAFETY: slots live as long as the record, which lives until
        // process teardown.
        self.free.set(unsafe { (*slot).next.get() });
        slot
    }

    fn free_slot(&self, slot: *const HazardSlot) {
        // SAFETY: `slot` came out of `alloc_slot` on this record.
        let slot_ref = unsafe { &*slot };
        slot_ref.hp.store(null_mut(), Release);
        slot_ref.next.set(self.free.get());
        self.free.set(slot);
    }
}

/// The process-global hazard-pointer manager.
///
/// Constructed once (explicitly via [`Smr::construct`] or implicitly by the
/// first guard), torn down only by [`Smr::destruct`]. Thread records are
/// pushed onto an intrusive lock-free list and never freed before teardown;
/// a detached thread's record is marked inactive and reused by a later
/// attach.
pub struct Smr {
    head: CachePadded<AtomicPtr<ThreadRecord>>,
    hazard_ptr_count: usize,
    max_threads: usize,
    retired_capacity: usize,
    allocated: AtomicUsize,
}

static INSTANCE: core::sync::atomic::AtomicPtr<Smr> =
    core::sync::atomic::AtomicPtr::new(null_mut());

struct ThreadHandle {
    rec: Cell<*const ThreadRecord>,
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let rec = self.rec.get();
        if !rec.is_null() {
            // SAFETY: records outlive every attached thread.
            unsafe { Smr::detach_record(rec) };
        }
    }
}

thread_local! {
    static HANDLE: ThreadHandle = const {
        ThreadHandle { rec: Cell::new(ptr::null()) }
    };
}

impl Smr {
    pub const DEFAULT_HAZARD_PTR_COUNT: usize = 8;
    pub const DEFAULT_MAX_THREADS: usize = 128;
    pub const DEFAULT_RETIRED_CAPACITY: usize = 100;

    /// Installs the process-wide manager. Idempotent: later calls (and
    /// racing calls) leave the first winner in place, whatever their
    /// parameters.
    ///
    /// # Example
    /// ```
    /// use conqueue::Smr;
    ///
    /// Smr::construct(8, 128, 100);
    /// Smr::attach_thread();
    /// ```
    pub fn construct(hazard_ptr_count: usize, max_threads: usize, retired_capacity: usize) {
        assert!(hazard_ptr_count > 0, "need at least one hazard slot per thread");
        if !INSTANCE.load(Acquire).is_null() {
            return;
        }
        let smr = Box::into_raw(Box::new(Smr {
            head: CachePadded::new(AtomicPtr::new(null_mut())),
            hazard_ptr_count,
            max_threads,
            retired_capacity,
            allocated: AtomicUsize::new(0),
        }));
        if INSTANCE
            .compare_exchange(null_mut(), smr, AcqRel, Acquire)
            .is_err()
        {
            // Lost the installation race.
            // SAFETY: `smr` never escaped this call.
            drop(unsafe { Box::from_raw(smr) });
        }
    }

    pub fn construct_default() {
        Self::construct(
            Self::DEFAULT_HAZARD_PTR_COUNT,
            Self::DEFAULT_MAX_THREADS,
            Self::DEFAULT_RETIRED_CAPACITY,
        );
    }

    pub fn is_constructed() -> bool {
        !INSTANCE.load(Acquire).is_null()
    }

    /// Tears the manager down, freeing every thread record and running
    /// every pending deleter.
    ///
    /// # Safety
    /// No guard may be live anywhere in the process and no thread may call
    /// back into this module (including through queue operations) after
    /// this returns. This is a process-shutdown facility.
    pub unsafe fn destruct() {
        let smr = INSTANCE.swap(null_mut(), AcqRel);
        if smr.is_null() {
            return;
        }
        // SAFETY: per the caller contract nobody else references the
        // manager or its records anymore.
        unsafe {
            let smr = Box::from_raw(smr);
            let mut rec = smr.head.load(Acquire);
            while !rec.is_null() {
                let boxed = Box::from_raw(rec);
                for retired in (*boxed.retired.get()).iter() {
                    (retired.deleter)(retired.ptr);
                }
                rec = boxed.next.load(Acquire);
            }
        }
    }

    fn instance() -> &'static Smr {
        let mut smr = INSTANCE.load(Acquire);
        if smr.is_null() {
            Self::construct_default();
            smr = INSTANCE.load(Acquire);
        }
        // SAFETY: once installed, the instance lives until `destruct`,
        // whose contract excludes concurrent use.
        unsafe { &*smr }
    }

    pub fn hazard_ptr_count() -> usize {
        Self::instance().hazard_ptr_count
    }

    pub fn max_threads() -> usize {
        Self::instance().max_threads
    }

    pub fn retired_capacity() -> usize {
        Self::instance().retired_capacity
    }

    /// Binds the calling thread to a record. Implicit in guard and retire
    /// paths; exposed for symmetry with [`Smr::detach_thread`].
    pub fn attach_thread() {
        let _ = current_record();
    }

    /// Releases the calling thread's record: reclaims what it can, hands
    /// unreclaimable leftovers to future help-scans, and marks the record
    /// reusable. Also runs on thread exit.
    pub fn detach_thread() {
        HANDLE.with(|handle| {
            let rec = handle.rec.replace(ptr::null());
            if !rec.is_null() {
                // SAFETY: records outlive every attached thread.
                unsafe { Self::detach_record(rec) };
            }
        });
    }

    /// Scans the calling thread's retired list now, freeing every entry no
    /// hazard slot still covers.
    pub fn scan() {
        let smr = Self::instance();
        // SAFETY: `current_record` returns a record owned by this thread.
        smr.scan_record(unsafe { &*current_record() });
    }

    /// Defers `deleter(ptr)` until no hazard slot anywhere holds `ptr`.
    ///
    /// # Safety
    /// `ptr` must no longer be reachable from any shared location (no new
    /// hazard can be published for it), must not have been retired before,
    /// and `deleter` must free it exactly once.
    pub unsafe fn retire(ptr: *mut (), deleter: unsafe fn(*mut ())) {
        let smr = Self::instance();
        let rec = current_record();
        // SAFETY: the record is owned by this thread; no helper can claim
        // it while `active` is set.
        let rec = unsafe { &*rec };
        let full = {
            let retired = unsafe { &mut *rec.retired.get() };
            retired.push(RetiredPtr { ptr, deleter });
            retired.len() >= smr.retired_capacity
        };
        if full {
            smr.scan_record(rec);
        }
    }

    /// Finds a record for a new thread: reuse an inactive one, else push a
    /// fresh record onto the list head.
    fn acquire_record(&self) -> *const ThreadRecord {
        let mut rec = self.head.load(Acquire);
        while !rec.is_null() {
            // SAFETY: records are never freed before teardown.
            let r = unsafe { &*rec };
            if r
                .active
                .compare_exchange(false, true, AcqRel, Acquire)
                .is_ok()
            {
                return rec;
            }
            rec = r.next.load(Acquire);
        }

        let allocated = self.allocated.fetch_add(1, Relaxed);
        assert!(
            allocated < self.max_threads,
            "thread limit reached: more than {} threads attached",
            self.max_threads
        );

        let new_rec = Box::into_raw(ThreadRecord::new(
            self.hazard_ptr_count,
            self.retired_capacity,
        ));
        let mut head = self.head.load(Relaxed);
        loop {
            // SAFETY: `new_rec` is unpublished until the CAS below succeeds.
            unsafe { (*new_rec).next.store(head, Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, new_rec, Release, Relaxed)
            {
                Ok(_) => return new_rec,
                Err(observed) => head = observed,
            }
        }
    }

    /// The scan of §classic hazard pointers: snapshot every published
    /// hazard, then free the retired entries the snapshot does not cover
    /// and compact the survivors.
    fn scan_record(&self, rec: &ThreadRecord) {
        // Order the hazard snapshot after all earlier hazard publications.
        fence(SeqCst);

        let mut hazards: Vec<*mut ()> = Vec::new();
        let mut cursor = self.head.load(Acquire);
        while !cursor.is_null() {
            // SAFETY: records are never freed before teardown.
            let record = unsafe { &*cursor };
            if record.active.load(Acquire) {
                for slot in record.slots.iter() {
                    let hp = slot.hp.load(Acquire);
                    if !hp.is_null() {
                        hazards.push(hp);
                    }
                }
            }
            cursor = record.next.load(Acquire);
        }
        hazards.sort_unstable();

        // SAFETY: `rec` is owned by the caller (its own record, or one
        // claimed through `active`), so the retired vec is not aliased.
        let retired = unsafe { &mut *rec.retired.get() };
        retired.retain(|entry| {
            if hazards.binary_search(&entry.ptr).is_ok() {
                true
            } else {
                // SAFETY: the pointer was unreachable when retired and no
                // hazard covers it now, so this is the only deletion.
                unsafe { (entry.deleter)(entry.ptr) };
                false
            }
        });
    }

    /// Adopts the leftover retired entries of inactive records, so a
    /// detached thread's garbage still gets freed. Each victim is claimed
    /// through its `active` flag, emptied, then released.
    fn help_scan(&self, rec: &ThreadRecord) {
        let mut cursor = self.head.load(Acquire);
        while !cursor.is_null() {
            // SAFETY: records are never freed before teardown.
            let other = unsafe { &*cursor };
            if !ptr::eq(other, rec)
                && other
                    .active
                    .compare_exchange(false, true, AcqRel, Acquire)
                    .is_ok()
            {
                // SAFETY: the claim above gives exclusive access to the
                // victim's retired vec.
                let leftovers = core::mem::take(unsafe { &mut *other.retired.get() });
                other.active.store(false, Release);

                for entry in leftovers {
                    // SAFETY: `rec` is owned by the caller; scoped borrows
                    // keep the vec unaliased across the scan call below.
                    let full = {
                        let mine = unsafe { &mut *rec.retired.get() };
                        mine.push(entry);
                        mine.len() >= self.retired_capacity
                    };
                    if full {
                        self.scan_record(rec);
                    }
                }
            }
            cursor = other.next.load(Acquire);
        }
    }

    /// # Safety
    /// `rec` must be the calling thread's record and the thread must hold
    /// no guards.
    unsafe fn detach_record(rec: *const ThreadRecord) {
        let smr = INSTANCE.load(Acquire);
        if smr.is_null() {
            // Torn down first; `destruct` already swept everything.
            return;
        }
        // SAFETY: instance and record both outlive this call.
        let smr = unsafe { &*smr };
        let rec = unsafe { &*rec };
        smr.scan_record(rec);
        smr.help_scan(rec);
        rec.active.store(false, Release);
    }
}

fn current_record() -> *const ThreadRecord {
    HANDLE.with(|handle| {
        let mut rec = handle.rec.get();
        if rec.is_null() {
            rec = Smr::instance().acquire_record();
            handle.rec.set(rec);
        }
        rec
    })
}

/// Scoped owner of one hazard slot.
///
/// [`Guard::protect`] publishes a pointer loaded from a shared
/// `AtomicPtr` and re-reads the source until publication and source agree,
/// at which point the pointee cannot be freed while the guard holds it.
/// The slot is returned on drop, unwind included. Moving a guard moves the
/// slot with it; guards do not clone and do not cross threads.
pub struct Guard {
    rec: *const ThreadRecord,
    slot: *const HazardSlot,
}

impl Guard {
    /// Acquires a slot from the calling thread's pool, attaching the
    /// thread first if needed.
    ///
    /// # Panics
    /// When the pool of [`Smr::hazard_ptr_count`] slots is exhausted.
    pub fn new() -> Self {
        let rec = current_record();
        // SAFETY: records outlive every attached thread.
        let slot = unsafe { (*rec).alloc_slot() };
        Self { rec, slot }
    }

    /// Publishes the pointer read from `src` and returns it once stable.
    ///
    /// The returned pointer (when non-null) stays safe to dereference until
    /// the guard is dropped, cleared, or repointed.
    pub fn protect<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        // SAFETY: the slot belongs to this guard.
        let slot = unsafe { &*self.slot };
        let mut current = src.load(Relaxed);
        loop {
            slot.hp.store(current.cast(), Release);
            let reread = src.load(Acquire);
            if reread == current {
                return current;
            }
            current = reread;
        }
    }

    /// Publishes `ptr` directly, without a source to validate against.
    pub fn assign<T>(&self, ptr: *mut T) {
        // SAFETY: the slot belongs to this guard.
        unsafe { &*self.slot }.hp.store(ptr.cast(), Release);
    }

    pub fn clear(&self) {
        // SAFETY: the slot belongs to this guard.
        unsafe { &*self.slot }.hp.store(null_mut(), Release);
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        // SAFETY: `rec` and `slot` were paired in `new` and the record
        // outlives the thread.
        unsafe { (*self.rec).free_slot(self.slot) };
    }
}

/// Scoped owner of `N` hazard slots, for operations that must hold several
/// protections at once (`N` at most [`Smr::hazard_ptr_count`]).
pub struct GuardArray<const N: usize> {
    rec: *const ThreadRecord,
    slots: [*const HazardSlot; N],
}

impl<const N: usize> GuardArray<N> {
    /// # Panics
    /// When fewer than `N` slots remain in the thread's pool.
    pub fn new() -> Self {
        let rec = current_record();
        // SAFETY: records outlive every attached thread.
        let slots = core::array::from_fn(|_| unsafe { (*rec).alloc_slot() });
        Self { rec, slots }
    }

    /// [`Guard::protect`] through slot `idx`.
    pub fn protect<T>(&self, idx: usize, src: &AtomicPtr<T>) -> *mut T {
        // SAFETY: the slot belongs to this array.
        let slot = unsafe { &*self.slots[idx] };
        let mut current = src.load(Relaxed);
        loop {
            slot.hp.store(current.cast(), Release);
            let reread = src.load(Acquire);
            if reread == current {
                return current;
            }
            current = reread;
        }
    }

    pub fn assign<T>(&self, idx: usize, ptr: *mut T) {
        // SAFETY: the slot belongs to this array.
        unsafe { &*self.slots[idx] }.hp.store(ptr.cast(), Release);
    }

    pub fn clear(&self, idx: usize) {
        // SAFETY: the slot belongs to this array.
        unsafe { &*self.slots[idx] }.hp.store(null_mut(), Release);
    }
}

impl<const N: usize> Default for GuardArray<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for GuardArray<N> {
    fn drop(&mut self) {
        for slot in self.slots {
            // SAFETY: slots were paired with `rec` in `new`.
            unsafe { (*self.rec).free_slot(slot) };
        }
    }
}
