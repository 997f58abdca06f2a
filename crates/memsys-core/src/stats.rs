//! Process-wide allocation counters.
//!
//! All four counters are plain `AtomicU64`s updated with `Relaxed` ordering:
//! they are diagnostic, not synchronization primitives, so callers observing
//! them concurrently with allocation traffic see an approximation, not a
//! linearizable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time snapshot of the counters in [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticsSnapshot {
    /// Allocations currently outstanding (allocate - deallocate).
    pub active_allocations: u64,
    /// Bytes currently outstanding (allocated - deallocated).
    pub active_bytes: u64,
    /// Total allocate calls that returned a non-null pointer.
    pub total_allocations: u64,
    /// Total bytes ever handed out by a successful allocate call.
    pub total_bytes_allocated: u64,
}

/// Process-wide allocation counters, updated on every allocate/deallocate.
#[derive(Debug, Default)]
pub struct Statistics {
    active_allocations: AtomicU64,
    active_bytes: AtomicU64,
    total_allocations: AtomicU64,
    total_bytes_allocated: AtomicU64,
}

fn statistics_enabled() -> bool {
    cfg!(feature = "statistics")
}

impl Statistics {
    pub const fn new() -> Self {
        Self {
            active_allocations: AtomicU64::new(0),
            active_bytes: AtomicU64::new(0),
            total_allocations: AtomicU64::new(0),
            total_bytes_allocated: AtomicU64::new(0),
        }
    }

    /// Records a successful allocation of `size` bytes. A no-op when the
    /// `statistics` feature is compiled out.
    pub fn record_allocate(&self, size: usize) {
        if !statistics_enabled() {
            return;
        }
        self.active_allocations.fetch_add(1, Ordering::Relaxed);
        self.active_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_allocated
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Records a deallocation of `size` bytes previously counted by
    /// [`Statistics::record_allocate`]. A no-op when the `statistics` feature
    /// is compiled out.
    pub fn record_deallocate(&self, size: usize) {
        if !statistics_enabled() {
            return;
        }
        self.active_allocations.fetch_sub(1, Ordering::Relaxed);
        self.active_bytes.fetch_sub(size as u64, Ordering::Relaxed);
    }

    /// Records the net effect of a resize from `old_size` to `new_size` on
    /// an allocation already counted as active. A no-op when the
    /// `statistics` feature is compiled out.
    pub fn record_resize(&self, old_size: usize, new_size: usize) {
        if !statistics_enabled() {
            return;
        }
        if new_size > old_size {
            let grew = (new_size - old_size) as u64;
            self.active_bytes.fetch_add(grew, Ordering::Relaxed);
            self.total_bytes_allocated.fetch_add(grew, Ordering::Relaxed);
        } else if old_size > new_size {
            let shrank = (old_size - new_size) as u64;
            self.active_bytes.fetch_sub(shrank, Ordering::Relaxed);
        }
    }

    /// Takes a non-atomic snapshot of all four counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            active_allocations: self.active_allocations.load(Ordering::Relaxed),
            active_bytes: self.active_bytes.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            total_bytes_allocated: self.total_bytes_allocated.load(Ordering::Relaxed),
        }
    }
}
