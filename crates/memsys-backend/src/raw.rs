//! Platform raw allocator.
//!
//! Every allocation this module hands out is preceded by a tagged header
//! word: the low bit of the word at `payload - WORD` is `0` for ordinary
//! heap memory (freed with `libc::free`) and `1` for a low-32-bit mapping
//! (freed with `libc::munmap`, whose length lives in a second header word at
//! `payload - 2 * WORD`). [`deallocate`] and [`reallocate_in_place`] read
//! this tag back out to route to the right release path.

use std::ffi::c_void;

use memsys_membrane::hint::Hint;
use memsys_membrane::pointer::{align_up, forced_align, WORD};

/// Upper bound (exclusive) of the address range a `ADDRESS_32BIT` allocation
/// must land within.
const LOW32_LIMIT: usize = 0x8000_0000;
/// Lower bound of the POSIX sliding-window search, matching the original
/// allocator's choice of staying clear of the zero page and typical
/// low-address reservations.
const LOW32_WINDOW_START: usize = 0x1_0000;
const LOW32_WINDOW_STEP: usize = 0x10_0000;

/// Tag bit stored in the header word: set when the block came from the
/// low-32-bit mapping path rather than the ordinary heap.
const TAG_LOW32: usize = 1;

/// Allocates `size` bytes aligned to `align` (`0` meaning "no particular
/// alignment"), honoring [`Hint::ADDRESS_32BIT`] when present.
///
/// Returns `None` on allocation failure. The returned pointer has `size`
/// usable bytes; callers that also asked for zero-initialization must zero
/// the buffer themselves, as the backend does not do this automatically.
#[must_use]
pub unsafe fn allocate(size: usize, align: u32, hint: Hint) -> Option<*mut u8> {
    let align = forced_align(align);
    // SAFETY: delegated to the chosen path below, same contract either way.
    unsafe {
        if hint.contains(Hint::ADDRESS_32BIT) && cfg!(target_pointer_width = "64") {
            allocate_low32(size, align)
        } else {
            allocate_heap(size, align)
        }
    }
}

/// Releases a block previously returned by [`allocate`].
///
/// Returns `true` on success. A low-32 mapping released via `munmap` can
/// fail (the release is a separate syscall from the allocation, unlike
/// `free`, which cannot report failure to the caller); callers are expected
/// to log a warning and continue rather than treat this as fatal, per this
/// subsystem's policy that release failures never abort an in-flight
/// deallocation.
///
/// # Safety
///
/// `payload` must be a pointer previously returned by [`allocate`] or
/// [`reallocate_in_place`] and not yet released.
pub unsafe fn deallocate(payload: *mut u8) -> bool {
    // SAFETY: caller guarantees `payload` carries a valid header.
    unsafe {
        let header = read_header_word(payload);
        let raw = (header & !TAG_LOW32) as *mut u8;
        if header & TAG_LOW32 != 0 {
            let len = read_len_word(payload);
            libc::munmap(raw as *mut c_void, len) == 0
        } else {
            libc::free(raw as *mut c_void);
            true
        }
    }
}

/// Reports whether `payload` was allocated via the low-32-bit mapping path
/// (i.e. with [`Hint::ADDRESS_32BIT`]), as opposed to the ordinary heap.
/// Callers that need to preserve a block's address-range class across a
/// reallocate (the fallback alloc-and-copy path cannot infer it any other
/// way) read this before releasing the old block.
///
/// # Safety
///
/// `payload` must be a pointer previously returned by [`allocate`], not yet
/// released.
#[must_use]
pub unsafe fn is_low32(payload: *mut u8) -> bool {
    // SAFETY: caller guarantees `payload` carries a valid header.
    unsafe { read_header_word(payload) & TAG_LOW32 != 0 }
}

/// Grows or shrinks a heap-backed (non-low-32, `align == 0`) block in
/// place where possible, returning the new payload pointer.
///
/// Returns `None` for low-32 blocks, which cannot be grown via
/// `libc::realloc`; callers must fall back to allocate + copy + deallocate.
///
/// # Safety
///
/// `payload` must be a pointer previously returned by [`allocate`] with
/// `align == 0`, still valid.
pub unsafe fn reallocate_in_place(payload: *mut u8, new_size: usize) -> Option<*mut u8> {
    // SAFETY: caller guarantees `payload` carries a valid header and was
    // allocated with align == 0, so raw + WORD == payload with no slop.
    unsafe {
        let header = read_header_word(payload);
        if header & TAG_LOW32 != 0 {
            return None;
        }
        let raw = header as *mut u8;
        let total = WORD + new_size;
        let new_raw = libc::realloc(raw as *mut c_void, total) as *mut u8;
        if new_raw.is_null() {
            return None;
        }
        let new_payload = new_raw.add(WORD);
        write_header_word(new_payload, new_raw as usize);
        Some(new_payload)
    }
}

unsafe fn allocate_heap(size: usize, align: u32) -> Option<*mut u8> {
    let align = align.max(WORD as u32) as usize;
    let total = WORD + (align - 1) + size;
    // SAFETY: total is a valid allocation request size computed above.
    unsafe {
        let raw = libc::malloc(total) as *mut u8;
        if raw.is_null() {
            return None;
        }
        let candidate = raw.add(WORD);
        let payload = align_up(candidate, align as u32);
        write_header_word(payload, raw as usize);
        Some(payload)
    }
}

#[cfg(windows)]
unsafe fn allocate_low32(size: usize, align: u32) -> Option<*mut u8> {
    // `libc` does not expose `NtAllocateVirtualMemory` on Windows and this
    // workspace does not depend on `windows-sys`; approximate with the
    // ordinary heap path. Allocations served this way are not guaranteed to
    // sit below the 2 GiB boundary.
    // SAFETY: forwarded to `allocate_heap`, same contract.
    unsafe { allocate_heap(size, align) }
}

#[cfg(unix)]
unsafe fn allocate_low32(size: usize, align: u32) -> Option<*mut u8> {
    let align = align.max(WORD as u32) as usize;
    let header = WORD * 2;
    let page = page_size();
    let total = round_up(header + (align - 1) + size, page);

    // SAFETY: mmap with MAP_PRIVATE | MAP_ANONYMOUS and a null fd is a
    // well-formed anonymous mapping request; `total` is page-rounded above.
    unsafe {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        {
            if let Some(p) = mmap_anonymous(std::ptr::null_mut(), total, libc::MAP_32BIT) {
                return finish_low32(p, total, header, align);
            }
        }

        let mut addr = LOW32_WINDOW_START;
        while addr + total <= LOW32_LIMIT {
            if let Some(p) = mmap_anonymous(addr as *mut c_void, total, 0) {
                if (p as usize) + total <= LOW32_LIMIT {
                    return finish_low32(p, total, header, align);
                }
                libc::munmap(p, total);
            }
            addr += LOW32_WINDOW_STEP;
        }
        None
    }
}

#[cfg(unix)]
unsafe fn finish_low32(
    raw: *mut c_void,
    total: usize,
    header: usize,
    align: usize,
) -> Option<*mut u8> {
    // SAFETY: `raw` is a fresh mapping of at least `total` bytes.
    unsafe {
        let raw = raw as *mut u8;
        let candidate = raw.add(header);
        let payload = align_up(candidate, align as u32);
        write_header_word(payload, raw as usize | TAG_LOW32);
        write_len_word(payload, total);
        Some(payload)
    }
}

#[cfg(unix)]
unsafe fn mmap_anonymous(addr: *mut c_void, len: usize, extra_flags: i32) -> Option<*mut c_void> {
    // SAFETY: standard anonymous mapping request; result checked for
    // MAP_FAILED below.
    unsafe {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | extra_flags;
        let p = libc::mmap(addr, len, libc::PROT_READ | libc::PROT_WRITE, flags, -1, 0);
        if p == libc::MAP_FAILED {
            None
        } else {
            Some(p)
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

#[cfg(unix)]
fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) / multiple * multiple
}

unsafe fn read_header_word(payload: *mut u8) -> usize {
    // SAFETY: caller guarantees a header word precedes `payload`.
    unsafe { payload.cast::<usize>().sub(1).read_unaligned() }
}

unsafe fn write_header_word(payload: *mut u8, value: usize) {
    // SAFETY: caller guarantees room for a header word before `payload`.
    unsafe { payload.cast::<usize>().sub(1).write_unaligned(value) }
}

#[cfg(unix)]
unsafe fn read_len_word(payload: *mut u8) -> usize {
    // SAFETY: caller guarantees a low-32 block has a length word at -2 WORD.
    unsafe { payload.cast::<usize>().sub(2).read_unaligned() }
}

#[cfg(unix)]
unsafe fn write_len_word(payload: *mut u8, value: usize) {
    // SAFETY: caller guarantees room for a length word two words before
    // `payload`.
    unsafe { payload.cast::<usize>().sub(2).write_unaligned(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_allocate_and_deallocate_round_trip() {
        // SAFETY: test-local allocation, released before returning.
        unsafe {
            let p = allocate(128, 0, Hint::empty()).unwrap();
            p.write_bytes(0x7A, 128);
            deallocate(p);
        }
    }

    #[test]
    fn heap_allocate_respects_alignment() {
        // SAFETY: test-local allocation, released before returning.
        unsafe {
            let p = allocate(64, 64, Hint::empty()).unwrap();
            assert_eq!(p as usize % 64, 0);
            deallocate(p);
        }
    }

    #[test]
    fn reallocate_in_place_preserves_prefix() {
        // SAFETY: test-local allocation chain, released at the end.
        unsafe {
            let p = allocate(16, 0, Hint::empty()).unwrap();
            p.write_bytes(0x11, 16);
            let grown = reallocate_in_place(p, 64).unwrap();
            for i in 0..16 {
                assert_eq!(grown.add(i).read(), 0x11);
            }
            deallocate(grown);
        }
    }

    #[test]
    #[cfg(unix)]
    fn low32_allocation_lands_below_limit() {
        // SAFETY: test-local allocation, released before returning.
        unsafe {
            let p = allocate(256, 0, Hint::ADDRESS_32BIT).unwrap();
            assert!((p as usize) < LOW32_LIMIT);
            deallocate(p);
        }
    }

    #[test]
    #[cfg(unix)]
    fn is_low32_reports_the_tag_the_allocation_was_made_with() {
        // SAFETY: test-local allocations, released before returning.
        unsafe {
            let heap = allocate(64, 0, Hint::empty()).unwrap();
            assert!(!is_low32(heap));
            deallocate(heap);

            let low32 = allocate(64, 0, Hint::ADDRESS_32BIT).unwrap();
            assert!(is_low32(low32));
            deallocate(low32);
        }
    }
}
