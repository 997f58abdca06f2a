//! Allocation hint flags, combined by callers at the call site.

use bitflags::bitflags;

bitflags! {
    /// Bit flags describing how a single allocation should be served.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Hint: u32 {
        /// Prefer the linear arena for this allocation.
        const TEMPORARY = 1 << 0;
        /// Long-lived allocation; never served from the arena.
        const PERSISTENT = 1 << 1;
        /// Payload must be zeroed before it is returned to the caller.
        const ZERO_INITIALIZED = 1 << 2;
        /// Caller asserts the request is thread-local (advisory only).
        const THREAD = 1 << 3;
        /// Allocation must lie entirely within the low 32-bit address range.
        const ADDRESS_32BIT = 1 << 4;
    }
}
