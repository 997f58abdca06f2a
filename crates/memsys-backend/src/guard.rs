//! Canary guard-band codec.
//!
//! When the `guard` feature is enabled on `memsys-core`, every allocation is
//! wrapped in a header canary band and a footer canary band, each
//! [`MAX_ALIGN`] bytes wide. `initialize` writes them around a block the
//! caller already knows the size of; `verify` checks them before the block
//! is released. The block's size is tracked by the caller (`memsys-core`
//! keeps a size header of its own) and passed back into `verify` — the
//! guard bands carry no bookkeeping of their own, only canaries.

use memsys_membrane::pointer::MAX_ALIGN;

/// Canary word written into every guard slot.
const CANARY_VALUE: u32 = 0xDEAD_BEEF;

/// Total extra bytes a guarded allocation reserves beyond the payload.
pub const GUARD_OVERHEAD: usize = MAX_ALIGN * 2;

/// Writes the header and footer canary bands around `size` bytes of payload
/// starting at `block + MAX_ALIGN`, and returns the payload pointer.
///
/// # Safety
///
/// `block` must be valid for writes of `size + GUARD_OVERHEAD` bytes and
/// aligned to at least 4 bytes.
#[must_use]
pub unsafe fn initialize(block: *mut u8, size: usize) -> *mut u8 {
    // SAFETY: caller guarantees `block` is valid for `size + GUARD_OVERHEAD` bytes.
    unsafe {
        let mut header = block.cast::<u32>();
        let mut footer = block.add(size + MAX_ALIGN).cast::<u32>();
        for _ in 0..(MAX_ALIGN / 4) {
            header.write_unaligned(CANARY_VALUE);
            footer.write_unaligned(CANARY_VALUE);
            header = header.add(1);
            footer = footer.add(1);
        }
        block.add(MAX_ALIGN)
    }
}

/// Verifies the header and footer canary bands around `payload` (a block of
/// `size` bytes produced by a matching [`initialize`] call), panicking with
/// `"Memory underwrite"` or `"Memory overwrite"` on the first mismatch
/// found, and returns the original block pointer (`payload - MAX_ALIGN`).
///
/// # Safety
///
/// `payload` must have been produced by a matching [`initialize`] call whose
/// underlying block is still live, and `size` must match the size passed to
/// that call.
#[must_use]
pub unsafe fn verify(payload: *mut u8, size: usize) -> *mut u8 {
    // SAFETY: caller guarantees `payload` was produced by `initialize` with
    // the same `size`.
    unsafe {
        let block = payload.sub(MAX_ALIGN);
        let mut header = block.cast::<u32>();
        let mut footer = payload.add(size).cast::<u32>();
        for _ in 0..(MAX_ALIGN / 4) {
            assert_eq!(header.read_unaligned(), CANARY_VALUE, "Memory underwrite");
            assert_eq!(footer.read_unaligned(), CANARY_VALUE, "Memory overwrite");
            header = header.add(1);
            footer = footer.add(1);
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_clean_block_verifies() {
        let size = 37usize;
        let mut buf = vec![0u8; size + GUARD_OVERHEAD];
        let block = buf.as_mut_ptr();
        // SAFETY: buf is large enough and correctly aligned.
        let payload = unsafe { initialize(block, size) };
        for i in 0..size {
            // SAFETY: payload is valid for `size` bytes.
            unsafe { payload.add(i).write(0xAB) };
        }
        // SAFETY: payload was produced by `initialize` above and is still live.
        let recovered_block = unsafe { verify(payload, size) };
        assert_eq!(recovered_block, block);
    }

    #[test]
    #[should_panic(expected = "Memory underwrite")]
    fn header_corruption_panics() {
        let size = 16usize;
        let mut buf = vec![0u8; size + GUARD_OVERHEAD];
        let block = buf.as_mut_ptr();
        // SAFETY: buf is large enough and correctly aligned.
        let payload = unsafe { initialize(block, size) };
        // SAFETY: corrupting one byte inside the header canary band on purpose.
        unsafe { payload.sub(1).write(0) };
        // SAFETY: payload still live; this call is expected to panic.
        unsafe { verify(payload, size) };
    }

    #[test]
    #[should_panic(expected = "Memory overwrite")]
    fn footer_corruption_panics() {
        let size = 16usize;
        let mut buf = vec![0u8; size + GUARD_OVERHEAD];
        let block = buf.as_mut_ptr();
        // SAFETY: buf is large enough and correctly aligned.
        let payload = unsafe { initialize(block, size) };
        // SAFETY: corrupting one byte inside the footer canary band on purpose.
        unsafe { payload.add(size).write(0) };
        // SAFETY: payload still live; this call is expected to panic.
        unsafe { verify(payload, size) };
    }
}
