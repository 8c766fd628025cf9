//! A thin wrapper around a POSIX binary/counting semaphore, used as the per-worker wake signal in
//! [`crate::pool::WorkerPool`].
//!
//! Workers block in `wait()` at the top of their run loop; the coordinator (or a sibling worker,
//! when stealing hands a worker a new logical processor to run on) posts the semaphore to wake
//! them. Every failure here is a kernel resource or programmer-error condition, not something a
//! caller can recover from, so it panics rather than returning a `Result`.

use std::cell::UnsafeCell;
use std::sync::Arc;

#[derive(Clone)]
pub struct Semaphore {
    // SAFETY: the inner `sem_t` must never be moved once initialized.
    inner: Arc<RawSemaphore>,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        let sem = Self {
            // moves `RawSemaphore` into the `Arc`, but that's fine since it isn't initialized yet
            inner: Arc::new(RawSemaphore::new()),
        };

        // SAFETY: not moved since `new()`, and this is the only `init` call for this semaphore.
        unsafe { sem.inner.init(initial) };

        sem
    }

    /// Blocks until the semaphore's count is positive, then decrements it.
    pub fn wait(&self) {
        unsafe { self.inner.wait() };
    }

    /// Increments the semaphore's count, waking one waiter if any are blocked.
    pub fn post(&self) {
        unsafe { self.inner.post() };
    }
}

struct RawSemaphore {
    inner: UnsafeCell<libc::sem_t>,
}

// SAFETY: `libc::sem_t` is safe to share and operate on from multiple threads; it's only not
// `Sync` by default because it's a raw `UnsafeCell`-like C struct.
unsafe impl Send for RawSemaphore {}
unsafe impl Sync for RawSemaphore {}

impl RawSemaphore {
    /// Zeroes the `sem_t` but does not initialize it. Call [`Self::init`] once this value has
    /// reached its final memory location (e.g. inside an `Arc`) — `sem_init` must not run before
    /// the move, and must never run more than once.
    fn new() -> Self {
        Self {
            inner: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        }
    }

    /// SAFETY: must not be called more than once, and `self` must not have moved since `new()`.
    unsafe fn init(&self, initial: u32) {
        let rv = unsafe { libc::sem_init(self.inner.get(), 0, initial) };
        assert_eq!(rv, 0, "sem_init failed: {}", std::io::Error::last_os_error());
    }

    /// SAFETY: `self` must have been initialized via [`Self::init`] and not moved since.
    unsafe fn wait(&self) {
        loop {
            let rv = unsafe { libc::sem_wait(self.inner.get()) };
            if rv == 0 {
                return;
            }
            match std::io::Error::last_os_error().kind() {
                std::io::ErrorKind::Interrupted => continue,
                _ => panic!("sem_wait failed: {}", std::io::Error::last_os_error()),
            }
        }
    }

    /// SAFETY: `self` must have been initialized via [`Self::init`] and not moved since.
    unsafe fn post(&self) {
        loop {
            let rv = unsafe { libc::sem_post(self.inner.get()) };
            if rv == 0 {
                return;
            }
            match std::io::Error::last_os_error().kind() {
                std::io::ErrorKind::Interrupted => continue,
                _ => panic!("sem_post failed: {}", std::io::Error::last_os_error()),
            }
        }
    }
}

impl Drop for RawSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_destroy(self.inner.get()) };
    }
}
