//! A thread pool optimized for running the same task function across all threads once per
//! round, with CPU-affinity pinning to a fixed set of logical processors.
//!
//! A typical thread pool creates a new task per unit of work and schedules tasks onto whichever
//! thread is free; that's too slow here and gives no control over which CPU core a given unit of
//! work lands on, which matters on NUMA architectures. [`pool::WorkerPool`] instead dispatches a
//! single function to run once on every worker thread per round, and keeps the number of workers
//! running concurrently bounded by a configurable logical-processor count independent of the
//! total worker count.
//!
//! If the pool uses CPU pinning, a task running inside [`pool::WorkerPool::start_task_fn`] can
//! read the CPU its thread is currently pinned to via [`core_affinity`].

// https://github.com/rust-lang/rfcs/blob/master/text/2585-unsafe-block-in-unsafe-fn.md
#![deny(unsafe_op_in_unsafe_fn)]

pub mod pool;

mod logical_processor;
mod sync;

use std::cell::Cell;

// the pool implementation can read/write the thread-local directly, but external modules can
// only read it using `core_affinity()`

std::thread_local! {
    /// The core affinity of the current thread, as set by the active worker pool.
    static CORE_AFFINITY: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Get the core affinity of the current thread, as set by the active worker pool. Will be `None`
/// if the pool is not using CPU pinning, or if called from a thread not owned by the pool.
pub fn core_affinity() -> Option<u32> {
    CORE_AFFINITY.with(|x| x.get())
}
