//! # memsys-core
//!
//! Safe public façade for the memsys memory subsystem: allocation policy
//! (arena vs. raw allocator), guard-band protected bookkeeping, leak
//! tracking, per-thread memory contexts, and process-wide statistics.
//!
//! `unsafe` is denied by default at this crate's boundary, matching
//! `frankenlibc-core`'s crate-level `#![deny(unsafe_code)]`; the handful of
//! spots that genuinely cross into raw-pointer territory (resizing and
//! freeing a caller's pointer, the `facade` and `lifecycle` modules that
//! wrap `memsys-backend`) carry a narrow, file- or item-level
//! `#[allow(unsafe_code)]` instead, the same way `frankenlibc-core` allows it
//! module-by-module (`syscall`, `pthread::tls`) rather than crate-wide.

#![deny(unsafe_code)]

pub mod allocator;
mod context;
mod facade;
mod lifecycle;
pub mod log;
pub mod stats;
pub mod tracker;

pub use allocator::{AllocatorTable, SystemMalloc};
pub use log::{drain_log, MemoryLogLevel, MemoryLogRecord};
pub use memsys_membrane::hint::Hint;
pub use memsys_membrane::Config;
pub use stats::StatisticsSnapshot;
pub use tracker::{LeakReport, Tracker, TrackedAllocation};

use std::sync::Arc;

/// Brings the memory subsystem up with `config`, installing the default
/// [`SystemMalloc`] allocator table. See [`lifecycle::initialize`].
pub fn initialize(config: Config) {
    lifecycle::initialize(config, Arc::new(SystemMalloc));
}

/// Brings the memory subsystem up with `config`, installing `table` as the
/// allocator backend in place of [`SystemMalloc`]. See
/// [`lifecycle::initialize`].
pub fn initialize_with_allocator(config: Config, table: Arc<dyn AllocatorTable>) {
    lifecycle::initialize(config, table);
}

/// Tears the memory subsystem down. See [`lifecycle::finalize`].
pub fn finalize() {
    lifecycle::finalize();
}

/// Whether [`initialize`] has been called without a matching [`finalize`].
pub fn is_initialized() -> bool {
    lifecycle::is_initialized()
}

/// Allocates `size` bytes honoring `align` (`0` for "no particular
/// alignment") and `hint`, tracked under `context` (or, if `context == 0`,
/// the calling thread's current memory context). Returns `None` on
/// allocation failure.
pub fn allocate(context: u64, size: usize, align: u32, hint: Hint) -> Option<*mut u8> {
    let table = lifecycle::allocator_table();
    lifecycle::with_arena(|arena| {
        facade::allocate(
            size,
            align,
            hint,
            context,
            arena,
            lifecycle::statistics(),
            lifecycle::tracker().as_ref(),
            table.as_ref(),
        )
    })
}

/// Resizes a block previously returned by [`allocate`] or [`reallocate`] to
/// `new_size`, preserving the lesser of the old and new sizes worth of
/// content. A block originally allocated with [`Hint::ADDRESS_32BIT`] keeps
/// that address-range class automatically; there is no `hint` parameter to
/// re-supply it, matching `memory_reallocate(payload, new_size, align,
/// old_size)`'s signature.
///
/// Unlike [`allocate`], failure here is fatal: callers cannot meaningfully
/// recover from losing the old payload mid-resize, so an allocation failure
/// is logged at [`MemoryLogLevel::Error`] and then panics, matching the
/// "fatal on failure" contract every allocator in this family gives
/// `reallocate`.
///
/// # Safety
///
/// `ptr` must be a live pointer previously returned by [`allocate`] or
/// [`reallocate`] and not yet passed to [`deallocate`], and must not lie
/// within the arena (temporary memory is never individually reallocated).
#[allow(unsafe_code)]
pub unsafe fn reallocate(ptr: *mut u8, new_size: usize, align: u32) -> *mut u8 {
    let table = lifecycle::allocator_table();
    let result = lifecycle::with_arena(|arena| {
        // SAFETY: forwarded from this function's own contract.
        unsafe {
            facade::reallocate(
                ptr,
                new_size,
                align,
                0,
                arena,
                lifecycle::statistics(),
                lifecycle::tracker().as_ref(),
                table.as_ref(),
            )
        }
    });
    match result {
        Some(p) => p,
        None => {
            log::record(
                MemoryLogLevel::Error,
                "reallocate",
                "oom",
                Some(ptr as usize),
                Some(new_size),
                None,
                format!("unable to reallocate to {new_size} bytes of memory"),
            );
            panic!("memsys: reallocate failed, out of memory");
        }
    }
}

/// Releases a block previously returned by [`allocate`] or [`reallocate`].
///
/// # Safety
///
/// `ptr` must be a live pointer previously returned by [`allocate`] or
/// [`reallocate`], not yet deallocated.
#[allow(unsafe_code)]
pub unsafe fn deallocate(ptr: *mut u8) {
    let table = lifecycle::allocator_table();
    lifecycle::with_arena(|arena| {
        // SAFETY: forwarded from this function's own contract.
        unsafe {
            facade::deallocate(
                ptr,
                arena,
                lifecycle::statistics(),
                lifecycle::tracker().as_ref(),
                table.as_ref(),
            )
        }
    });
}

/// Returns a snapshot of the process-wide allocation counters.
#[must_use]
pub fn statistics() -> StatisticsSnapshot {
    lifecycle::statistics().snapshot()
}

/// Returns the active arena's `[base, end)` address range, if one is
/// configured. See [`lifecycle::arena_bounds`].
#[must_use]
pub fn arena_bounds() -> Option<(usize, usize)> {
    lifecycle::arena_bounds()
}

/// Pushes `context` onto the calling thread's memory-context stack.
pub fn context_push(context: u64) {
    crate::context::push(context, &lifecycle::config());
}

/// Pops the calling thread's memory-context stack.
pub fn context_pop() {
    crate::context::pop();
}

/// Returns the calling thread's current memory context, or `0` if none has
/// been pushed.
#[must_use]
pub fn context() -> u64 {
    crate::context::current()
}

/// Clears the calling thread's memory-context stack.
pub fn context_thread_finalize() {
    crate::context::thread_finalize();
}

/// Per-thread teardown hook: clears this thread's memory-context stack.
/// Intended to be called when a thread is about to be retired (especially
/// relevant for thread-pool worker threads that get reused).
pub fn thread_finalize() {
    crate::context::thread_finalize();
}

/// Installs `tracker` as the active tracker, replacing whatever was
/// installed before.
pub fn set_tracker(tracker: Arc<dyn Tracker>) {
    lifecycle::set_tracker(tracker);
}

/// Builds a fresh stack-capturing tracker sized from the active
/// configuration, ready to pass to [`set_tracker`].
#[must_use]
pub fn tracker_local() -> Arc<dyn Tracker> {
    lifecycle::tracker_local()
}

/// Returns a no-op tracker, ready to pass to [`set_tracker`] to disable
/// tracking.
#[must_use]
pub fn tracker_none() -> Arc<dyn Tracker> {
    lifecycle::tracker_none()
}

/// Produces a leak report from the currently installed tracker.
#[must_use]
pub fn tracker_report() -> LeakReport {
    lifecycle::tracker().report()
}

/// Returns a fresh handle to the default [`SystemMalloc`] allocator table,
/// the same table [`initialize`] installs when no other table is supplied.
/// Intended for embedders that want to name the default explicitly when
/// composing a table for [`initialize_with_allocator`] (for example, to wrap
/// it rather than replace it outright).
#[must_use]
pub fn system_malloc() -> Arc<dyn AllocatorTable> {
    Arc::new(SystemMalloc)
}
