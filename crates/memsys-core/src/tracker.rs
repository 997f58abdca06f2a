//! Allocation leak tracker.
//!
//! A tracker observes every allocate/deallocate/reallocate call and can be
//! asked to produce a report of everything still outstanding. The default,
//! installed at [`crate::initialize`] time, is [`NoopTracker`]: tracking a
//! live process's entire allocation traffic is expensive, so it is opt-in
//! via [`crate::set_tracker`].
//!
//! [`LocalTracker`] records each live allocation's address, size, context
//! tag, and a captured call stack in a fixed-capacity slot table. Lookup and
//! removal on `untrack` scan linearly from a hashed starting slot; this
//! tracker intentionally does not guarantee it finds every untracked
//! allocation under contention (a concurrent `track` can relocate a slot a
//! concurrent `untrack` is mid-scan over) — its reports are a best-effort
//! snapshot, not an authoritative ledger.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use backtrace::Backtrace;

/// Number of stack frames captured per tracked allocation.
const TRACE_DEPTH: usize = 14;
/// Frames skipped before capture: `Backtrace::new`, the capture helper, and
/// the public `memsys_core` entry point that called into it.
const SKIP_FRAMES: usize = 3;

/// One outstanding allocation as seen by [`LocalTracker`].
#[derive(Debug, Clone)]
pub struct TrackedAllocation {
    pub address: usize,
    pub size: usize,
    pub context: u64,
    pub frames: Vec<String>,
}

/// Leak report produced by [`Tracker::report`].
#[derive(Debug, Clone, Default)]
pub struct LeakReport {
    pub outstanding: Vec<TrackedAllocation>,
}

/// Behavior every installable tracker implements.
pub trait Tracker: Send + Sync {
    /// Records a newly returned allocation.
    fn track(&self, address: usize, size: usize, context: u64);
    /// Removes a previously tracked allocation. A no-op if `address` is not
    /// currently tracked (the tracker is lossy by design, see module docs).
    fn untrack(&self, address: usize);
    /// Produces a snapshot of everything currently tracked.
    fn report(&self) -> LeakReport;
}

/// Tracker that does nothing. The default installed by [`crate::initialize`].
#[derive(Debug, Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn track(&self, _address: usize, _size: usize, _context: u64) {}
    fn untrack(&self, _address: usize) {}
    fn report(&self) -> LeakReport {
        LeakReport::default()
    }
}

struct Slot {
    address: AtomicUsize,
    size: AtomicUsize,
    context: AtomicU64,
    frames: Mutex<Vec<String>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            address: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            context: AtomicU64::new(0),
            frames: Mutex::new(Vec::new()),
        }
    }
}

/// Fixed-capacity stack-capturing tracker.
pub struct LocalTracker {
    slots: Vec<Slot>,
}

impl LocalTracker {
    /// Creates a tracker with room for `capacity` outstanding allocations.
    /// Beyond that, new allocations are tracked on a best-effort basis by
    /// overwriting the slot a hash collision lands on.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::empty);
        Self { slots }
    }

    fn slot_for(&self, address: usize) -> usize {
        (address.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize % self.slots.len()
    }

    fn capture_frames() -> Vec<String> {
        let backtrace = Backtrace::new();
        backtrace
            .frames()
            .iter()
            .skip(SKIP_FRAMES)
            .take(TRACE_DEPTH)
            .flat_map(|frame| frame.symbols())
            .map(|symbol| {
                symbol
                    .name()
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string())
            })
            .collect()
    }
}

impl Tracker for LocalTracker {
    fn track(&self, address: usize, size: usize, context: u64) {
        let start = self.slot_for(address);
        let len = self.slots.len();
        for i in 0..len {
            let slot = &self.slots[(start + i) % len];
            if slot
                .address
                .compare_exchange(0, address, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.size.store(size, Ordering::Relaxed);
                slot.context.store(context, Ordering::Relaxed);
                *slot.frames.lock().unwrap() = Self::capture_frames();
                return;
            }
        }
        // Table full: overwrite the hashed slot outright. Lossy by design.
        let slot = &self.slots[start];
        slot.address.store(address, Ordering::Relaxed);
        slot.size.store(size, Ordering::Relaxed);
        slot.context.store(context, Ordering::Relaxed);
        *slot.frames.lock().unwrap() = Self::capture_frames();
    }

    fn untrack(&self, address: usize) {
        let start = self.slot_for(address);
        let len = self.slots.len();
        for i in 0..len {
            let slot = &self.slots[(start + i) % len];
            if slot
                .address
                .compare_exchange(address, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.size.store(0, Ordering::Relaxed);
                slot.context.store(0, Ordering::Relaxed);
                slot.frames.lock().unwrap().clear();
                return;
            }
        }
    }

    fn report(&self) -> LeakReport {
        let mut outstanding = Vec::new();
        for slot in &self.slots {
            let address = slot.address.load(Ordering::Acquire);
            if address != 0 {
                outstanding.push(TrackedAllocation {
                    address,
                    size: slot.size.load(Ordering::Relaxed),
                    context: slot.context.load(Ordering::Relaxed),
                    frames: slot.frames.lock().unwrap().clone(),
                });
            }
        }
        LeakReport { outstanding }
    }
}
