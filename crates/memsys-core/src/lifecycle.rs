//! Process-wide initialization, finalization, allocator-table and
//! tracker installation.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

use memsys_backend::arena::LinearArena;
use memsys_membrane::hint::Hint;
use memsys_membrane::Config;

use crate::allocator::{AllocatorTable, SystemMalloc};
use crate::log::{self, MemoryLogLevel};
use crate::stats::Statistics;
use crate::tracker::{LocalTracker, NoopTracker, Tracker};

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static CONFIG: RwLock<Config> = RwLock::new(Config::DEFAULT);
static ARENA: RwLock<Option<LinearArena>> = RwLock::new(None);
static STATISTICS: Statistics = Statistics::new();
static TRACKER: LazyLock<RwLock<Arc<dyn Tracker>>> =
    LazyLock::new(|| RwLock::new(Arc::new(NoopTracker)));
static ALLOCATOR: LazyLock<RwLock<Arc<dyn AllocatorTable>>> =
    LazyLock::new(|| RwLock::new(Arc::new(SystemMalloc)));

/// Brings the memory subsystem up with `config`, installing `table` as the
/// allocator backend. Allocates the linear arena's backing storage through
/// `table` itself (so it is accounted for like any other persistent
/// allocation) when `config.temporary_memory` is non-zero.
///
/// Unlike the tracker table, the allocator table cannot be hot-swapped once
/// installed (spec.md §3): the only way to replace it is to `finalize` and
/// `initialize` again.
///
/// Calling `initialize` again while already initialized tears down and
/// rebuilds the arena (and replaces the allocator table) with the new
/// configuration; it is not additive.
pub fn initialize(config: Config, table: Arc<dyn AllocatorTable>) {
    finalize();
    table.initialize();
    if config.temporary_memory > 0 {
        // SAFETY: size and alignment are well-formed; the arena takes
        // ownership of the returned storage until `finalize` releases it.
        // Routed through `facade::allocate`, not `table.allocate` directly,
        // so the storage block is itself counted by statistics and the
        // tracker, same as `_atomic_allocate_initialize` allocating its
        // storage via `memory_allocate` rather than the raw back end.
        let storage = unsafe {
            crate::facade::allocate(
                config.temporary_memory,
                16,
                Hint::PERSISTENT,
                0,
                None,
                &STATISTICS,
                tracker().as_ref(),
                table.as_ref(),
            )
        };
        if let Some(storage) = storage {
            // SAFETY: storage is valid for config.temporary_memory bytes and
            // owned exclusively by the arena from this point on.
            let arena = unsafe { LinearArena::new(storage, config.temporary_memory) };
            *ARENA.write().unwrap() = Some(arena);
        }
    }
    *CONFIG.write().unwrap() = config;
    *ALLOCATOR.write().unwrap() = table;
    INITIALIZED.store(true, Ordering::Release);
}

/// Tears the memory subsystem down: latches the active tracker out (which
/// reports every allocation it still considers outstanding as a leak, see
/// [`set_tracker`]), releases the arena's backing storage, runs the
/// allocator table's `thread_finalize`/`finalize` hooks, and installs
/// [`NoopTracker`] and the default [`SystemMalloc`] table. Statistics are
/// left intact so a caller can still inspect the last snapshot after
/// finalizing.
///
/// A no-op if the subsystem was never initialized.
pub fn finalize() {
    set_tracker(Arc::new(NoopTracker));
    let table = ALLOCATOR.read().unwrap().clone();
    if let Some(arena) = ARENA.write().unwrap().take() {
        // SAFETY: the arena's backing storage was allocated through
        // `facade::allocate` in `initialize` and is released exactly once
        // here, through the same façade (so statistics stay balanced)
        // rather than the raw back end directly. `arena` is not itself the
        // storage region being released, so `arena: None` here is correct —
        // otherwise `within_arena` would treat the storage address as lying
        // inside the very arena it defines and skip releasing it.
        unsafe {
            crate::facade::deallocate(
                arena.base(),
                None,
                &STATISTICS,
                tracker().as_ref(),
                table.as_ref(),
            )
        };
    }
    table.thread_finalize();
    table.finalize();
    *ALLOCATOR.write().unwrap() = Arc::new(SystemMalloc);
    INITIALIZED.store(false, Ordering::Release);
}

/// Emits one [`MemoryLogLevel::Warn`] record per allocation `tracker` still
/// considers outstanding. Lossy by construction: the tracker itself may have
/// already lost slots to collisions (see [`crate::tracker`]), so this is a
/// lower bound on real leaks, never an exact count.
fn report_leaks(tracker: &dyn Tracker) {
    for leaked in tracker.report().outstanding {
        log::record(
            MemoryLogLevel::Warn,
            "finalize",
            "leak",
            Some(leaked.address),
            Some(leaked.size),
            None,
            format!(
                "leaked {} bytes at {:#x} (context {:#x}, {} frame(s))",
                leaked.size,
                leaked.address,
                leaked.context,
                leaked.frames.len()
            ),
        );
    }
}

/// Whether [`initialize`] has been called without a matching [`finalize`].
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Returns the active configuration.
pub fn config() -> Config {
    *CONFIG.read().unwrap()
}

/// Runs `f` with a reference to the active arena, if one is configured.
pub fn with_arena<R>(f: impl FnOnce(Option<&LinearArena>) -> R) -> R {
    let guard = ARENA.read().unwrap();
    f(guard.as_ref())
}

/// Returns the active arena's `[base, end)` address range, if one is
/// configured. Diagnostic only: callers should never rely on this to decide
/// how to free a pointer, since the arena itself is reclaimed only at
/// `finalize`.
pub fn arena_bounds() -> Option<(usize, usize)> {
    with_arena(|arena| arena.map(|a| (a.base() as usize, a.base() as usize + a.size())))
}

/// Returns the process-wide statistics counters.
pub fn statistics() -> &'static Statistics {
    &STATISTICS
}

/// Returns the currently installed allocator table.
pub fn allocator_table() -> Arc<dyn AllocatorTable> {
    ALLOCATOR.read().unwrap().clone()
}

/// Installs `tracker` as the active tracker, reporting everything the
/// outgoing tracker still considers outstanding as a leak first.
///
/// A no-op if `tracker` is already installed (compared by `Arc` identity).
/// Otherwise the previous tracker is replaced with [`NoopTracker`] first and
/// only then with `tracker`, so a concurrent `track`/`untrack` call that
/// already holds the old `Arc` runs to completion against a tracker no
/// longer reachable through `TRACKER` rather than one being torn down
/// underneath it; the leak report runs against the detached `Arc` after it
/// is no longer installed, for the same reason.
pub fn set_tracker(tracker: Arc<dyn Tracker>) {
    let mut slot = TRACKER.write().unwrap();
    if Arc::ptr_eq(&slot, &tracker) {
        return;
    }
    let outgoing = std::mem::replace(&mut *slot, Arc::new(NoopTracker));
    report_leaks(outgoing.as_ref());
    *slot = tracker;
}

/// Returns the currently installed tracker.
pub fn tracker() -> Arc<dyn Tracker> {
    TRACKER.read().unwrap().clone()
}

/// Builds a fresh [`LocalTracker`] sized from the active configuration.
/// Falls back to [`NoopTracker`] when the `tracker` feature is compiled out,
/// matching the original's `BUILD_ENABLE_TRACKER` switch compiling the
/// stack-capturing machinery out entirely.
#[must_use]
pub fn tracker_local() -> Arc<dyn Tracker> {
    if cfg!(feature = "tracker") {
        Arc::new(LocalTracker::new(config().memory_tracker_max))
    } else {
        Arc::new(NoopTracker)
    }
}

/// Returns [`NoopTracker`] as an installable tracker handle.
#[must_use]
pub fn tracker_none() -> Arc<dyn Tracker> {
    Arc::new(NoopTracker)
}
