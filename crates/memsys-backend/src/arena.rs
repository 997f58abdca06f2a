//! Lock-free linear (bump) arena used to serve `TEMPORARY`-hinted allocations
//! without touching the system allocator.
//!
//! The arena owns a single fixed-size block obtained once at initialization
//! and hands out slices of it via a CAS loop on an atomic cursor. It is
//! intentionally non-checking past capacity: once the cursor would run past
//! the end of the block, the next allocation wraps back to the start rather
//! than failing. Temporary memory handed out this way can be silently
//! overwritten by a later wrapped allocation; the documented contract is
//! "best-effort, do not retain," matching the arena's role as overflow-prone
//! scratch space rather than a general-purpose allocator.

use std::sync::atomic::{AtomicUsize, Ordering};

use memsys_membrane::pointer::WORD;

/// A single fixed-size bump-allocated region.
///
/// `base` points at the start of the underlying storage (as returned by the
/// system allocator); the first [`WORD`] bytes are reserved so that no
/// arena-issued address can equal `base` itself, which would otherwise
/// collide with the storage pointer tracked for the block as a whole.
pub struct LinearArena {
    base: *mut u8,
    size: usize,
    maxchunk: usize,
    head: AtomicUsize,
}

// SAFETY: all mutation goes through the atomic cursor; the wrap-around path
// is deliberately unchecked (see module docs) rather than unsound — every
// address handed out still lies within [base, base + size).
unsafe impl Send for LinearArena {}
unsafe impl Sync for LinearArena {}

impl LinearArena {
    /// Wraps a `size`-byte block starting at `base`, reserving the first
    /// word so the cursor never starts at offset zero.
    ///
    /// `maxchunk` (the largest single request the arena will ever attempt to
    /// serve) is fixed at `size / 8` for the lifetime of the arena.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `size` bytes for the
    /// lifetime of the arena.
    #[must_use]
    pub unsafe fn new(base: *mut u8, size: usize) -> Self {
        Self {
            base,
            size,
            maxchunk: size / 8,
            head: AtomicUsize::new(base as usize + WORD),
        }
    }

    /// The largest single request this arena will serve. Callers must check
    /// a request against this bound *before* calling [`LinearArena::allocate`]
    /// — the arena itself performs no such check and will happily wrap a
    /// request larger than `maxchunk`, corrupting whatever else is live past
    /// the wrap point.
    #[must_use]
    pub fn maxchunk(&self) -> usize {
        self.maxchunk
    }

    /// Bump-allocates `chunk` bytes, wrapping back to the start of the block
    /// if the request would run past the end. Always returns a pointer
    /// within `[base + WORD, base + size)` for `chunk <= maxchunk`; larger
    /// requests may wrap immediately and collide with already-issued memory,
    /// which is the documented, non-checking arena contract.
    #[must_use]
    pub fn allocate(&self, chunk: usize) -> *mut u8 {
        let base_addr = self.base as usize;
        let end = base_addr + self.size;
        let start = base_addr + WORD;
        loop {
            let old_head = self.head.load(Ordering::Acquire);
            let (return_addr, candidate) = {
                let candidate = old_head.wrapping_add(chunk);
                if candidate > end {
                    (start, start.wrapping_add(chunk))
                } else {
                    (old_head, candidate)
                }
            };
            if self
                .head
                .compare_exchange_weak(old_head, candidate, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return return_addr as *mut u8;
            }
        }
    }

    /// Resets the cursor to the start of the usable block, discarding all
    /// outstanding allocations. Callers must guarantee no other thread holds
    /// a live reference into the arena when this is called.
    pub fn reset(&self) {
        self.head
            .store(self.base as usize + WORD, Ordering::Release);
    }

    /// Returns the storage base pointer, for release back to the system
    /// allocator at finalize time.
    #[must_use]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Returns the total size of the underlying block.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_starts_after_reserved_word() {
        let mut storage = vec![0u8; 256];
        let base = storage.as_mut_ptr();
        // SAFETY: storage is valid for 256 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(base, 256) };
        let p = arena.allocate(16) as usize;
        assert!(p > base as usize);
        assert_eq!(p, base as usize + WORD);
    }

    #[test]
    fn sequential_allocations_do_not_overlap() {
        let mut storage = vec![0u8; 256];
        let base = storage.as_mut_ptr();
        // SAFETY: storage is valid for 256 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(base, 256) };
        let a = arena.allocate(32) as usize;
        let b = arena.allocate(32) as usize;
        assert!(b >= a + 32);
    }

    #[test]
    fn maxchunk_is_one_eighth_of_size() {
        let mut storage = vec![0u8; 4096];
        let base = storage.as_mut_ptr();
        // SAFETY: storage is valid for 4096 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(base, 4096) };
        assert_eq!(arena.maxchunk(), 512);
    }

    #[test]
    fn exhausting_the_block_wraps_back_to_the_start() {
        let mut storage = vec![0u8; 64];
        let base = storage.as_mut_ptr();
        // SAFETY: storage is valid for 64 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(base, 64) };
        let first = arena.allocate(32) as usize;
        assert_eq!(first, base as usize + WORD);
        // This request does not fit in the remaining 32 bytes before `end`,
        // so it must wrap back to `base + WORD` rather than returning a
        // pointer past `end`.
        let wrapped = arena.allocate(32) as usize;
        assert_eq!(wrapped, base as usize + WORD);
    }

    #[test]
    fn repeated_allocation_past_many_multiples_of_size_stays_in_bounds() {
        let mut storage = vec![0u8; 256];
        let base = storage.as_mut_ptr();
        let end = base as usize + 256;
        // SAFETY: storage is valid for 256 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(base, 256) };
        for _ in 0..1000 {
            let p = arena.allocate(32) as usize;
            assert!(p >= base as usize && p < end);
        }
    }

    #[test]
    fn reset_reclaims_the_whole_block() {
        let mut storage = vec![0u8; 64];
        let base = storage.as_mut_ptr();
        // SAFETY: storage is valid for 64 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(base, 64) };
        arena.allocate(48);
        arena.reset();
        let p = arena.allocate(16) as usize;
        assert_eq!(p, base as usize + WORD);
    }
}
