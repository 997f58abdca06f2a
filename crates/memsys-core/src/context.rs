//! Per-thread memory-context stack.
//!
//! A memory context is an opaque `u64` tag (the original's `hash_t`) an
//! application pushes before a block of allocations it wants grouped
//! together in tracker reports (for example, one tag per subsystem or per
//! call frame). The stack is thread-local and bounded.
//!
//! Saturation behavior intentionally matches the original byte-for-byte: a
//! push always writes `slots[depth]`, then advances `depth` only while
//! `depth < depth_max - 1`. Once saturated, every further push keeps
//! overwriting `slots[depth_max - 1]` — the *last* array slot — while
//! [`current`] keeps reading `slots[depth - 1]`, which is one slot short of
//! that overwritten tail. This looks like a quirk (pushes past depth `- 1`
//! are invisible to `current`) because it is one: it is exactly what the
//! original C does, so it is reproduced rather than "fixed".

use std::cell::RefCell;

use memsys_membrane::Config;

thread_local! {
    static STACK: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

/// The context reported when no context has been pushed on this thread.
pub const DEFAULT_CONTEXT: u64 = 0;

fn context_enabled() -> bool {
    cfg!(feature = "context")
}

#[derive(Default)]
struct ContextStack {
    slots: Vec<u64>,
    depth: usize,
}

/// Pushes `context` onto this thread's stack, per the saturating-sink rule
/// described in the module docs. A no-op when the `context` feature is
/// compiled out.
pub fn push(context: u64, config: &Config) {
    if !context_enabled() {
        return;
    }
    STACK.with(|cell| {
        let mut stack = cell.borrow_mut();
        let depth_max = config.memory_context_depth.max(1);
        if stack.slots.len() < depth_max {
            stack.slots.resize(depth_max, 0);
        }
        stack.slots[stack.depth] = context;
        if stack.depth < depth_max - 1 {
            stack.depth += 1;
        }
    });
}

/// Pops the most recently pushed context on this thread. A no-op if the
/// stack is already empty, or if the `context` feature is compiled out.
pub fn pop() {
    if !context_enabled() {
        return;
    }
    STACK.with(|cell| {
        let mut stack = cell.borrow_mut();
        if stack.depth > 0 {
            stack.depth -= 1;
        }
    });
}

/// Returns the current context on this thread, or [`DEFAULT_CONTEXT`] if
/// none has been pushed or the `context` feature is compiled out.
#[must_use]
pub fn current() -> u64 {
    if !context_enabled() {
        return DEFAULT_CONTEXT;
    }
    STACK.with(|cell| {
        let stack = cell.borrow();
        if stack.depth > 0 {
            stack.slots[stack.depth - 1]
        } else {
            DEFAULT_CONTEXT
        }
    })
}

/// Clears this thread's context stack entirely. Called when a thread is
/// finalized so a reused thread-local does not leak stale context into a
/// new logical thread of execution (relevant mainly to thread-pool reuse).
pub fn thread_finalize() {
    STACK.with(|cell| {
        let mut stack = cell.borrow_mut();
        stack.slots.clear();
        stack.depth = 0;
    });
}
