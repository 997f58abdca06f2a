//! Allocation dispatch: routes each request to the linear arena or the raw
//! system allocator, wraps the result in the bookkeeping every live
//! allocation carries, and keeps statistics and the tracker in sync.
//!
//! # Block layout
//!
//! Every pointer this module hands back to a caller is preceded, working
//! backwards from the payload, by:
//!
//! ```text
//! [ backend pointer ][ user size ][ guard header band (if enabled) ] PAYLOAD [ guard footer band (if enabled) ]
//!      WORD               WORD           MAX_ALIGN                   size           MAX_ALIGN
//! ```
//!
//! The backend pointer is whatever [`memsys_backend::raw::allocate`] or the
//! arena returned; it is never itself aligned to the caller's requested
//! alignment; instead enough slop is requested up front that the payload
//! can float to the correct alignment while the backend pointer stays
//! recoverable immediately behind it. This mirrors the way
//! `memsys_backend::raw` itself floats its own malloc-header behind
//! whatever alignment the caller asked for.
//!
//! Every entry point here takes the installed [`AllocatorTable`] as a
//! parameter rather than calling `memsys_backend::raw` directly, so swapping
//! the backend (spec.md §3's "pluggable allocator façade") only ever touches
//! [`crate::lifecycle`]'s installation point, never this dispatch logic.

#![allow(unsafe_code)]

use memsys_backend::{arena::LinearArena, guard};
use memsys_membrane::hint::Hint;
use memsys_membrane::pointer::{align_up, forced_align, MAX_ALIGN, WORD};

use crate::allocator::AllocatorTable;
use crate::log::{self, MemoryLogLevel};
use crate::stats::Statistics;
use crate::tracker::Tracker;

const BACKPTR_SLOT: usize = WORD;
const SIZE_SLOT: usize = WORD;

fn guard_enabled() -> bool {
    cfg!(feature = "guard")
}

fn fixed_prefix() -> usize {
    BACKPTR_SLOT + SIZE_SLOT + if guard_enabled() { MAX_ALIGN } else { 0 }
}

fn fixed_suffix() -> usize {
    if guard_enabled() {
        MAX_ALIGN
    } else {
        0
    }
}

fn within_arena(ptr: *mut u8, arena: &LinearArena) -> bool {
    let addr = ptr as usize;
    let base = arena.base() as usize;
    addr >= base && addr < base + arena.size()
}

/// Wraps a raw backend (or arena) pointer valid for `request` bytes into a
/// payload pointer honoring `align`, writing the backend-pointer and size
/// header words and, if enabled, the guard bands.
///
/// # Safety
///
/// `backend_ptr` must be valid for `request` bytes, where `request` was
/// computed by the same formula [`allocate`] uses (`size + prefix + suffix +
/// align - 1`).
unsafe fn finish_block(backend_ptr: *mut u8, size: usize, align: usize, hint: Hint) -> *mut u8 {
    let prefix = fixed_prefix();
    // SAFETY: forwarded from this function's contract.
    unsafe {
        let candidate = backend_ptr.add(prefix);
        let payload = align_up(candidate, align as u32);
        let header_base = payload.sub(prefix);
        header_base.cast::<usize>().write_unaligned(backend_ptr as usize);
        header_base
            .add(BACKPTR_SLOT)
            .cast::<usize>()
            .write_unaligned(size);
        if guard_enabled() {
            let guard_block = payload.sub(MAX_ALIGN);
            guard::initialize(guard_block, size);
        }
        if hint.contains(Hint::ZERO_INITIALIZED) {
            payload.write_bytes(0, size);
        }
        payload
    }
}

/// Allocates `size` bytes honoring `align` and `hint`, recording the result
/// in `stats` and (if tracking is active) `tracker` under `context` (the
/// caller-supplied context id, or the calling thread's current
/// memory-context if `context == 0`).
pub fn allocate(
    size: usize,
    align: u32,
    hint: Hint,
    context: u64,
    arena: Option<&LinearArena>,
    stats: &Statistics,
    tracker: &dyn Tracker,
    table: &dyn AllocatorTable,
) -> Option<*mut u8> {
    let align = forced_align(align).max(WORD as u32) as usize;
    let prefix = fixed_prefix();
    let suffix = fixed_suffix();
    let request = size
        .checked_add(prefix)?
        .checked_add(suffix)?
        .checked_add(align - 1)?;

    let from_arena = hint.contains(Hint::TEMPORARY)
        && arena.is_some_and(|a| request <= a.maxchunk());

    let backend_ptr = if from_arena {
        // SAFETY: `from_arena` only holds when `arena` is `Some`.
        arena.unwrap().allocate(request)
    } else {
        // SAFETY: request/align/hint are well-formed values computed above.
        match unsafe { table.allocate(request, align as u32, hint) } {
            Some(p) => p,
            None => {
                log::record(
                    MemoryLogLevel::Error,
                    "allocate",
                    "oom",
                    None,
                    Some(size),
                    Some(request),
                    format!("unable to allocate {request} bytes of memory ({size} requested)"),
                );
                return None;
            }
        }
    };

    // SAFETY: backend_ptr is valid for `request` bytes, computed above from
    // the same formula `finish_block` relies on.
    let payload = unsafe { finish_block(backend_ptr, size, align, hint) };

    stats.record_allocate(size);
    let resolved_context = if context != 0 { context } else { crate::context::current() };
    tracker.track(payload as usize, size, resolved_context);
    Some(payload)
}

/// Recovers `(backend_ptr, size)` from a live payload pointer, validating
/// guard canaries along the way if the `guard` feature is enabled.
///
/// # Safety
///
/// `payload` must be a pointer previously returned by [`allocate`] or
/// [`reallocate`], not yet deallocated.
unsafe fn recover(payload: *mut u8) -> (*mut u8, usize) {
    // SAFETY: caller guarantees `payload` carries a valid header.
    unsafe {
        let size_ptr = payload.sub(SIZE_SLOT + if guard_enabled() { MAX_ALIGN } else { 0 });
        let size = size_ptr.cast::<usize>().read_unaligned();
        if guard_enabled() {
            guard::verify(payload, size);
        }
        let backptr_ptr = size_ptr.sub(BACKPTR_SLOT);
        let backend_ptr = backptr_ptr.cast::<usize>().read_unaligned() as *mut u8;
        (backend_ptr, size)
    }
}

/// Releases a block previously returned by [`allocate`] or [`reallocate`].
///
/// # Safety
///
/// `payload` must be a pointer previously returned by [`allocate`] or
/// [`reallocate`], not yet deallocated.
pub unsafe fn deallocate(
    payload: *mut u8,
    arena: Option<&LinearArena>,
    stats: &Statistics,
    tracker: &dyn Tracker,
    table: &dyn AllocatorTable,
) {
    // SAFETY: forwarded to `recover`, whose contract matches this function's.
    let (backend_ptr, size) = unsafe { recover(payload) };
    let in_arena = arena.is_some_and(|a| within_arena(backend_ptr, a));
    if !in_arena {
        // SAFETY: backend_ptr was returned by `table.allocate` in `allocate`.
        let released = unsafe { table.deallocate(backend_ptr) };
        if !released {
            log::record(
                MemoryLogLevel::Warn,
                "deallocate",
                "release_failed",
                Some(backend_ptr as usize),
                Some(size),
                None,
                format!("platform release of {size} bytes at {backend_ptr:p} failed"),
            );
        }
    }
    stats.record_deallocate(size);
    tracker.untrack(payload as usize);
}

/// Whether an in-place backend resize can be attempted for a block that was
/// allocated with `align` and currently lives outside the arena. Guard
/// bands make in-place growth unsafe (the footer would need to move), and
/// ARM targets historically disallow resizing a block whose alignment
/// padding was computed relative to a different base address.
fn supports_in_place(align: u32) -> bool {
    !guard_enabled()
        && forced_align(align) <= WORD as u32
        && !cfg!(any(target_arch = "arm", target_arch = "aarch64"))
}

/// Grows or shrinks a previously allocated block to `new_size`, preserving
/// the lesser of the old and new sizes worth of content. The block's
/// low-32-bit address class (if it was allocated with
/// [`Hint::ADDRESS_32BIT`]) is preserved automatically; callers do not need
/// to (and cannot) re-supply a hint for a reallocate.
///
/// # Safety
///
/// `payload` must be a pointer previously returned by [`allocate`] or
/// [`reallocate`], not yet deallocated, and must not lie within the arena
/// (arena memory is reclaimed only at arena tear-down, never individually).
pub unsafe fn reallocate(
    payload: *mut u8,
    new_size: usize,
    align: u32,
    context: u64,
    arena: Option<&LinearArena>,
    stats: &Statistics,
    tracker: &dyn Tracker,
    table: &dyn AllocatorTable,
) -> Option<*mut u8> {
    // SAFETY: forwarded to `recover`, whose contract matches this function's.
    let (backend_ptr, old_size) = unsafe { recover(payload) };
    let in_arena = arena.is_some_and(|a| within_arena(backend_ptr, a));
    assert!(!in_arena, "Trying to reallocate temporary memory");

    if supports_in_place(align) {
        let request = new_size.checked_add(2 * WORD)?;
        // SAFETY: backend_ptr was returned by `table.allocate` with
        // align == 0, matching `reallocate_in_place`'s precondition.
        if let Some(new_backend_ptr) = unsafe { table.reallocate_in_place(backend_ptr, request) } {
            // SAFETY: new_backend_ptr is valid for `request` bytes.
            let new_payload = unsafe {
                new_backend_ptr
                    .cast::<usize>()
                    .write_unaligned(new_backend_ptr as usize);
                new_backend_ptr
                    .add(BACKPTR_SLOT)
                    .cast::<usize>()
                    .write_unaligned(new_size);
                new_backend_ptr.add(2 * WORD)
            };
            stats.record_resize(old_size, new_size);
            let resolved_context = if context != 0 { context } else { crate::context::current() };
            tracker.untrack(payload as usize);
            tracker.track(new_payload as usize, new_size, resolved_context);
            return Some(new_payload);
        }
    }

    // Fall back: allocate fresh, copy the overlap, release the old block.
    // The old block's low-32 class must be preserved explicitly here: the
    // backend has no way to infer it from `new_size`/`align` alone, and
    // nothing else records it once the old block is released below.
    // SAFETY: backend_ptr was returned by `table.allocate` in the original
    // `allocate` call, not yet released.
    let low32 = unsafe { table.is_low32(backend_ptr) };
    let hint = if low32 { Hint::ADDRESS_32BIT } else { Hint::empty() };
    let new_payload = allocate(new_size, align, hint, context, arena, stats, tracker, table)?;
    let copy_len = old_size.min(new_size);
    // SAFETY: `payload` has `old_size` readable bytes and `new_payload` has
    // `new_size` writable bytes, both non-overlapping (distinct blocks).
    unsafe {
        std::ptr::copy_nonoverlapping(payload, new_payload, copy_len);
        deallocate(payload, arena, stats, tracker, table);
    }
    Some(new_payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SystemMalloc;
    use crate::tracker::NoopTracker;

    #[test]
    fn allocate_beyond_maxchunk_is_routed_to_the_backend() {
        let mut storage = vec![0u8; 4096];
        // SAFETY: storage is valid for 4096 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(storage.as_mut_ptr(), 4096) };
        let stats = Statistics::new();
        let tracker = NoopTracker;
        let table = SystemMalloc;
        // maxchunk is 4096/8 = 512; request 1024 bytes, which must not come
        // from the arena.
        let p = allocate(1024, 0, Hint::TEMPORARY, 0, Some(&arena), &stats, &tracker, &table)
            .unwrap();
        let addr = p as usize;
        let base = storage.as_ptr() as usize;
        assert!(addr < base || addr >= base + 4096);
        // SAFETY: p was just allocated above and is not the arena.
        unsafe { deallocate(p, Some(&arena), &stats, &tracker, &table) };
    }

    #[test]
    fn reallocate_of_arena_memory_panics() {
        let mut storage = vec![0u8; 4096];
        // SAFETY: storage is valid for 4096 bytes for the test's duration.
        let arena = unsafe { LinearArena::new(storage.as_mut_ptr(), 4096) };
        let stats = Statistics::new();
        let tracker = NoopTracker;
        let table = SystemMalloc;
        let p = allocate(64, 0, Hint::TEMPORARY, 0, Some(&arena), &stats, &tracker, &table)
            .unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // SAFETY: p is a live arena allocation; this call is expected to
            // panic before touching it further.
            unsafe {
                reallocate(
                    p,
                    128,
                    0,
                    0,
                    Some(&arena),
                    &stats,
                    &tracker,
                    &table,
                )
            }
        }));
        assert!(result.is_err());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn reallocate_preserves_the_low32_class_through_the_fallback_path() {
        let stats = Statistics::new();
        let tracker = NoopTracker;
        let table = SystemMalloc;
        // Force the fallback path (not in-place) by requesting an alignment
        // above WORD, which `supports_in_place` rejects.
        let align = memsys_membrane::pointer::MAX_ALIGN as u32;
        let p = allocate(64, align, Hint::ADDRESS_32BIT, 0, None, &stats, &tracker, &table)
            .unwrap();
        // SAFETY: p is a live, non-arena allocation.
        let grown = unsafe { reallocate(p, 4096, align, 0, None, &stats, &tracker, &table) }
            .unwrap();
        // SAFETY: grown was just returned by `reallocate` above.
        let (backend_ptr, _) = unsafe { recover(grown) };
        // SAFETY: backend_ptr is a live pointer returned by `table.allocate`.
        assert!(unsafe { table.is_low32(backend_ptr) });
        // SAFETY: grown is a live, non-arena allocation, not yet released.
        unsafe { deallocate(grown, None, &stats, &tracker, &table) };
    }
}
