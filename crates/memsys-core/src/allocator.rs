//! Pluggable allocator backend.
//!
//! [`AllocatorTable`] is the swappable capability spec.md §3 calls "the
//! allocator table": five lifecycle/allocation slots an embedder can
//! implement to replace the default `malloc`-family backend entirely. Unlike
//! [`crate::tracker::Tracker`], this table is installed once at
//! [`crate::initialize`] and cannot be hot-swapped afterward — spec.md §3's
//! "Lifecycles" paragraph is explicit that the allocator table "cannot be
//! hot-swapped," only the tracker table can.
//!
//! [`SystemMalloc`] is the default implementation, a thin pass-through to
//! `memsys_backend::raw`. It is what [`crate::initialize`] installs when no
//! other table is supplied, and what [`crate::system_malloc`] hands back for
//! an embedder that wants to name it explicitly.

#![allow(unsafe_code)]

use memsys_membrane::hint::Hint;

/// The five function slots spec.md §3 describes for a swappable allocator
/// backend, plus [`AllocatorTable::is_low32`], a query this port adds (with
/// a safe default) so [`crate::facade::reallocate`]'s alloc-and-copy
/// fallback can recover a block's low-32 address class without the backend
/// itself needing to understand reallocate semantics.
pub trait AllocatorTable: Send + Sync {
    /// Runs once when this table is installed via [`crate::initialize`] (or
    /// [`crate::initialize_with_allocator`]). The default does nothing.
    fn initialize(&self) {}

    /// Runs once when this table is uninstalled via [`crate::finalize`]. The
    /// default does nothing.
    fn finalize(&self) {}

    /// Runs when a thread using this table is retired. The default does
    /// nothing; a table backed by thread-local pools would release them here.
    fn thread_finalize(&self) {}

    /// Allocates `size` bytes aligned to `align` (already normalized by
    /// [`memsys_membrane::pointer::forced_align`]), honoring `hint`.
    ///
    /// # Safety
    ///
    /// `size` and `align` must describe a well-formed allocation request;
    /// the returned pointer, if any, is valid for `size` bytes until passed
    /// to [`AllocatorTable::deallocate`].
    unsafe fn allocate(&self, size: usize, align: u32, hint: Hint) -> Option<*mut u8>;

    /// Attempts to grow or shrink `payload` in place to `new_size` total
    /// bytes (header included), without moving it. Returns `None` if the
    /// implementation cannot resize in place, in which case the caller falls
    /// back to allocate + copy + deallocate.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer this table previously returned from
    /// [`AllocatorTable::allocate`] with `align == 0`, not yet deallocated.
    unsafe fn reallocate_in_place(&self, payload: *mut u8, new_size: usize) -> Option<*mut u8>;

    /// Releases a block previously returned by [`AllocatorTable::allocate`]
    /// or [`AllocatorTable::reallocate_in_place`]. Returns `true` on success;
    /// a `false` return is a release failure the caller should log and
    /// otherwise ignore (spec.md §7's "platform release failure" policy).
    ///
    /// # Safety
    ///
    /// `payload` must be a live pointer previously returned by this table,
    /// not yet released.
    unsafe fn deallocate(&self, payload: *mut u8) -> bool;

    /// Reports whether `payload` was allocated with [`Hint::ADDRESS_32BIT`],
    /// i.e. must keep landing in the low 32-bit address range across a
    /// reallocate. Tables with no such notion (every allocation equally
    /// addressable) can leave this at the default `false`.
    ///
    /// # Safety
    ///
    /// `payload` must be a live pointer previously returned by this table,
    /// not yet released.
    unsafe fn is_low32(&self, payload: *mut u8) -> bool {
        let _ = payload;
        false
    }
}

/// The default allocator table: a thin pass-through to
/// `memsys_backend::raw`, the platform `malloc`-family backend described in
/// spec.md §4.4.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMalloc;

impl AllocatorTable for SystemMalloc {
    unsafe fn allocate(&self, size: usize, align: u32, hint: Hint) -> Option<*mut u8> {
        // SAFETY: forwarded from this method's own contract.
        unsafe { memsys_backend::raw::allocate(size, align, hint) }
    }

    unsafe fn reallocate_in_place(&self, payload: *mut u8, new_size: usize) -> Option<*mut u8> {
        // SAFETY: forwarded from this method's own contract.
        unsafe { memsys_backend::raw::reallocate_in_place(payload, new_size) }
    }

    unsafe fn deallocate(&self, payload: *mut u8) -> bool {
        // SAFETY: forwarded from this method's own contract.
        unsafe { memsys_backend::raw::deallocate(payload) }
    }

    unsafe fn is_low32(&self, payload: *mut u8) -> bool {
        // SAFETY: forwarded from this method's own contract.
        unsafe { memsys_backend::raw::is_low32(payload) }
    }
}
