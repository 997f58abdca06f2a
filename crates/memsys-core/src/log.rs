//! Structured lifecycle logging.
//!
//! This workspace never pulls in `log`/`tracing`: lifecycle and allocation
//! events are collected into a process-wide buffer as structured records and
//! drained by whatever embedding application wants to route them somewhere
//! (stderr, a telemetry pipe, a test assertion). This mirrors the
//! `AllocatorLogRecord` / `AllocatorLogLevel` pair the rest of this codebase
//! uses for its own allocator lifecycle events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Severity of a [`MemoryLogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured memory-subsystem lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLogRecord {
    /// Monotonic event id, unique for the life of the process.
    pub decision_id: u64,
    /// Correlation id derived from `symbol` and `decision_id`.
    pub trace_id: String,
    /// Severity.
    pub level: MemoryLogLevel,
    /// Public entry point that produced this record (`allocate`, `reallocate`,
    /// `deallocate`, `finalize`, ...).
    pub symbol: &'static str,
    /// Event kind (`oom`, `leak`, `release_failed`, ...).
    pub event: &'static str,
    /// Address involved, if any.
    pub address: Option<usize>,
    /// Caller-requested size involved, if any.
    pub requested: Option<usize>,
    /// Actual size requested from the backend allocator, if different from
    /// `requested` (padded for alignment/guard bands).
    pub padded: Option<usize>,
    /// Free-form details.
    pub details: String,
}

static NEXT_DECISION_ID: AtomicU64 = AtomicU64::new(1);
static LOG: Mutex<Vec<MemoryLogRecord>> = Mutex::new(Vec::new());

fn next_decision_id() -> u64 {
    NEXT_DECISION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Appends a record to the process-wide lifecycle log.
#[allow(clippy::too_many_arguments)]
pub fn record(
    level: MemoryLogLevel,
    symbol: &'static str,
    event: &'static str,
    address: Option<usize>,
    requested: Option<usize>,
    padded: Option<usize>,
    details: impl Into<String>,
) {
    let decision_id = next_decision_id();
    let trace_id = format!("memsys::{symbol}::{decision_id:016x}");
    let record = MemoryLogRecord {
        decision_id,
        trace_id,
        level,
        symbol,
        event,
        address,
        requested,
        padded,
        details: details.into(),
    };
    LOG.lock().unwrap_or_else(|e| e.into_inner()).push(record);
}

/// Drains and returns every record collected so far.
pub fn drain_log() -> Vec<MemoryLogRecord> {
    std::mem::take(&mut *LOG.lock().unwrap_or_else(|e| e.into_inner()))
}
