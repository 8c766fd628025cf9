//! Thread-local state for a single worker thread: the simulation time currently executing on
//! this thread, the active host, and this thread's allocation/deallocation/syscall counters.
//!
//! Event-dispatch code (see [`crate::dispatch`]) reads and writes this state while a task
//! function runs inside [`scheduler::pool::WorkerPool::start_task_fn`]; outside of that window
//! there is no live `Worker` for the calling thread, and the counter helpers fall back to a
//! process-global counter instead of panicking.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use scheduler::pool::PoolHandle;

use crate::collaborators::Host;
use crate::counter::Counter;
use crate::time::EmulatedTime;

/// Governs whether the counter helpers below do any work. Wired to
/// [`crate::config::RuntimeConfig::use_object_counters`] by the embedding application.
static USE_OBJECT_COUNTERS: AtomicBool = AtomicBool::new(true);

static ALLOC_COUNTER: Lazy<Mutex<Counter>> = Lazy::new(|| Mutex::new(Counter::new()));
static DEALLOC_COUNTER: Lazy<Mutex<Counter>> = Lazy::new(|| Mutex::new(Counter::new()));
static SYSCALL_COUNTER: Lazy<Mutex<Counter>> = Lazy::new(|| Mutex::new(Counter::new()));

std::thread_local! {
    static WORKER: once_cell::unsync::OnceCell<RefCell<Worker>> = once_cell::unsync::OnceCell::new();
}

/// Per-thread state for one worker thread of a [`scheduler::pool::WorkerPool`].
pub struct Worker {
    worker_id: usize,
    pool: PoolHandle,
    active_host: RefCell<Option<Box<dyn Host>>>,
    current_time: Cell<Option<EmulatedTime>>,
    round_end_time: Cell<Option<EmulatedTime>>,
    last_event_time: Cell<Option<EmulatedTime>>,
    bootstrap_end_time: EmulatedTime,
    object_alloc_counter: RefCell<Counter>,
    object_dealloc_counter: RefCell<Counter>,
    syscall_counter: RefCell<Counter>,
}

impl Worker {
    /// Configure whether object counters are tracked at all. Call once, before any worker thread
    /// starts; later calls race with readers of the flag.
    pub fn set_use_object_counters(enabled: bool) {
        USE_OBJECT_COUNTERS.store(enabled, Ordering::Relaxed);
    }

    /// Construct the Worker state for the calling thread. Must be called at most once per
    /// thread, from the thread the pool spawned for `worker_id`.
    pub fn new_for_this_thread(worker_id: usize, pool: PoolHandle, bootstrap_end_time: EmulatedTime) {
        WORKER.with(|worker| {
            let res = worker.set(RefCell::new(Self {
                worker_id,
                pool,
                active_host: RefCell::new(None),
                current_time: Cell::new(None),
                round_end_time: Cell::new(None),
                last_event_time: Cell::new(None),
                bootstrap_end_time,
                object_alloc_counter: RefCell::new(Counter::new()),
                object_dealloc_counter: RefCell::new(Counter::new()),
                syscall_counter: RefCell::new(Counter::new()),
            }));
            assert!(res.is_ok(), "Worker already initialized for this thread");
        });
    }

    /// Whether the calling thread is a live worker thread.
    pub fn is_alive() -> bool {
        Worker::with(|_| ()).is_some()
    }

    /// The pool-assigned id of the calling thread's worker, or `None` off-worker.
    pub fn thread_id() -> Option<usize> {
        Worker::with(|w| w.worker_id)
    }

    /// The CPU this thread is currently pinned to, or `None` if unpinned or off-worker.
    pub fn affinity() -> Option<u32> {
        scheduler::core_affinity()
    }

    /// Run `f` with the active host, or return `None` if no host is active on this thread.
    #[must_use]
    pub fn with_active_host<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&dyn Host) -> R,
    {
        Worker::with(|w| {
            let active = w.active_host.borrow();
            active.as_ref().map(|h| f(h.as_ref()))
        })
        .flatten()
    }

    /// Bracket the execution of events against `host`: must be paired with
    /// [`Worker::clear_active_host`].
    pub fn set_active_host(host: Box<dyn Host>) {
        let old = Worker::with(|w| w.active_host.borrow_mut().replace(host)).unwrap();
        debug_assert!(old.is_none());
    }

    pub fn clear_active_host() -> Box<dyn Host> {
        Worker::with(|w| w.active_host.borrow_mut().take())
            .unwrap()
            .unwrap()
    }

    /// The time horizon of the round currently in progress. Events discovered at or after this
    /// time belong to a future round.
    pub fn set_round_end_time(t: EmulatedTime) {
        Worker::with(|w| w.round_end_time.set(Some(t))).unwrap();
    }

    pub(crate) fn round_end_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.round_end_time.get()).flatten()
    }

    /// The simulation time of the event currently executing on this thread, or `None` outside
    /// event execution.
    pub fn current_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.current_time.get()).flatten()
    }

    pub fn set_current_time(t: EmulatedTime) {
        Worker::with(|w| w.current_time.set(Some(t))).unwrap();
    }

    pub fn clear_current_time() {
        Worker::with(|w| w.current_time.set(None)).unwrap();
    }

    pub fn set_last_event_time(t: EmulatedTime) {
        Worker::with(|w| w.last_event_time.set(Some(t))).unwrap();
    }

    pub fn last_event_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.last_event_time.get()).flatten()
    }

    pub fn bootstrap_end_time() -> Option<EmulatedTime> {
        Worker::with(|w| w.bootstrap_end_time)
    }

    /// Offered by event-dispatch code when it learns that some event will occur at time `t`. If
    /// `t` falls inside the round currently in progress, it's the current round's problem, not
    /// the coordinator's next horizon, and is ignored. Otherwise forwarded to the pool's
    /// per-logical-processor minimum.
    pub fn set_min_event_time_next_round(t: EmulatedTime) {
        Worker::with(|w| {
            if let Some(round_end) = w.round_end_time.get() {
                if t < round_end {
                    return;
                }
            }
            w.pool
                .offer_min_event_time(w.worker_id, EmulatedTime::to_raw_nanos(Some(t)));
        });
    }

    pub fn increment_object_alloc_counter(s: &str) {
        if !USE_OBJECT_COUNTERS.load(Ordering::Relaxed) {
            return;
        }
        Worker::with(|w| {
            w.object_alloc_counter.borrow_mut().add_one(s);
        })
        .unwrap_or_else(|| {
            ALLOC_COUNTER.lock().unwrap().add_one(s);
        });
    }

    pub fn increment_object_dealloc_counter(s: &str) {
        if !USE_OBJECT_COUNTERS.load(Ordering::Relaxed) {
            return;
        }
        Worker::with(|w| {
            w.object_dealloc_counter.borrow_mut().add_one(s);
        })
        .unwrap_or_else(|| {
            DEALLOC_COUNTER.lock().unwrap().add_one(s);
        });
    }

    pub fn increment_syscall_counter(s: &str) {
        Worker::with(|w| {
            w.syscall_counter.borrow_mut().add_one(s);
        })
        .unwrap_or_else(|| {
            SYSCALL_COUNTER.lock().unwrap().add_one(s);
        });
    }

    /// Drains this thread's counters into the process-global fallback counters. Called once per
    /// worker on pool shutdown, mirroring the per-worker-to-manager merge of §4.6's `finish`.
    pub fn drain_counters_into_globals() {
        Worker::with(|w| {
            log::debug!(
                "worker {} merging counters: alloc={} dealloc={} syscall={}",
                w.worker_id,
                &*w.object_alloc_counter.borrow(),
                &*w.object_dealloc_counter.borrow(),
                &*w.syscall_counter.borrow(),
            );

            let mut global_alloc = ALLOC_COUNTER.lock().unwrap();
            let mut global_dealloc = DEALLOC_COUNTER.lock().unwrap();
            let mut global_syscall = SYSCALL_COUNTER.lock().unwrap();

            for (k, v) in w.object_alloc_counter.borrow().iter() {
                global_alloc.add_value(k, *v);
            }
            for (k, v) in w.object_dealloc_counter.borrow().iter() {
                global_dealloc.add_value(k, *v);
            }
            for (k, v) in w.syscall_counter.borrow().iter() {
                global_syscall.add_value(k, *v);
            }

            *w.object_alloc_counter.borrow_mut() = Counter::new();
            *w.object_dealloc_counter.borrow_mut() = Counter::new();
            *w.syscall_counter.borrow_mut() = Counter::new();
        });
    }

    /// Snapshot of the process-global fallback counters, for a caller with no live Worker (e.g.
    /// process-wide static destruction) that still wants to report final counts.
    pub fn global_counters() -> (Counter, Counter, Counter) {
        (
            ALLOC_COUNTER.lock().unwrap().clone(),
            DEALLOC_COUNTER.lock().unwrap().clone(),
            SYSCALL_COUNTER.lock().unwrap().clone(),
        )
    }

    #[must_use]
    fn with<F, O>(f: F) -> Option<O>
    where
        F: FnOnce(&Worker) -> O,
    {
        WORKER.with(|w| w.get().map(|w| f(&w.borrow())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SimulationTime;

    // A fresh native thread per test gives each one its own `WORKER` thread-local, matching how
    // the default test harness already isolates `#[test]` functions.
    fn run_on_worker_thread<F: FnOnce() + Send + 'static>(f: F) {
        std::thread::spawn(f).join().unwrap();
    }

    fn bootstrap_end() -> EmulatedTime {
        EmulatedTime::SIMULATION_START + SimulationTime::from_secs(60)
    }

    #[test]
    fn is_alive_is_false_until_initialized() {
        run_on_worker_thread(|| {
            assert!(!Worker::is_alive());
            let pool = scheduler::pool::WorkerPool::new(&[], 0, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(3, pool.handle(), bootstrap_end());
            assert!(Worker::is_alive());
            assert_eq!(Worker::thread_id(), Some(3));
        });
    }

    #[test]
    #[should_panic(expected = "already initialized")]
    fn double_initialization_panics() {
        run_on_worker_thread(|| {
            let pool = scheduler::pool::WorkerPool::new(&[], 0, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());
        });
    }

    #[test]
    fn current_time_round_trips_through_set_and_clear() {
        run_on_worker_thread(|| {
            let pool = scheduler::pool::WorkerPool::new(&[], 0, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());

            assert_eq!(Worker::current_time(), None);
            let t = EmulatedTime::SIMULATION_START;
            Worker::set_current_time(t);
            assert_eq!(Worker::current_time(), Some(t));
            Worker::clear_current_time();
            assert_eq!(Worker::current_time(), None);
        });
    }

    #[test]
    fn bootstrap_end_time_is_fixed_at_construction() {
        run_on_worker_thread(|| {
            let pool = scheduler::pool::WorkerPool::new(&[], 0, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());
            assert_eq!(Worker::bootstrap_end_time(), Some(bootstrap_end()));
        });
    }

    #[test]
    fn min_event_time_inside_the_current_round_is_ignored() {
        run_on_worker_thread(|| {
            let pool = scheduler::pool::WorkerPool::new(&[], 1, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());

            let round_end = EmulatedTime::SIMULATION_START + SimulationTime::from_secs(10);
            Worker::set_round_end_time(round_end);

            Worker::set_min_event_time_next_round(round_end - SimulationTime::SECOND);
            assert_eq!(pool.global_next_event_time(), scheduler::pool::NO_EVENT_TIME);

            let future = round_end + SimulationTime::SECOND;
            Worker::set_min_event_time_next_round(future);
            assert_eq!(pool.global_next_event_time(), EmulatedTime::to_raw_nanos(Some(future)));
        });
    }

    #[test]
    fn object_counters_are_tracked_per_thread_when_enabled() {
        run_on_worker_thread(|| {
            Worker::set_use_object_counters(true);
            let pool = scheduler::pool::WorkerPool::new(&[], 0, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());

            Worker::increment_object_alloc_counter("Widget");
            Worker::increment_object_alloc_counter("Widget");
            Worker::increment_object_dealloc_counter("Widget");

            Worker::drain_counters_into_globals();
            let (mut alloc, mut dealloc, _syscall) = Worker::global_counters();
            assert_eq!(alloc.get_value("Widget"), 2);
            assert_eq!(dealloc.get_value("Widget"), 1);
        });
    }

    #[test]
    fn counters_fall_back_to_the_process_global_off_worker() {
        run_on_worker_thread(|| {
            Worker::set_use_object_counters(true);
            assert!(!Worker::is_alive());
            Worker::increment_syscall_counter("read");
            let (_alloc, _dealloc, mut syscall) = Worker::global_counters();
            assert!(syscall.get_value("read") >= 1);
        });
    }

    #[test]
    fn set_active_host_is_visible_to_with_active_host() {
        run_on_worker_thread(|| {
            let pool = scheduler::pool::WorkerPool::new(&[], 0, 1, "test-worker").unwrap();
            Worker::new_for_this_thread(0, pool.handle(), bootstrap_end());

            assert_eq!(Worker::with_active_host(|_| ()), None);

            struct StubHost;
            impl crate::collaborators::Host for StubHost {
                fn id(&self) -> crate::collaborators::HostId {
                    crate::collaborators::HostId::new(42)
                }
                fn upstream_router_ip(&self, _ip: std::net::Ipv4Addr) -> Option<std::net::Ipv4Addr> {
                    None
                }
                fn random_reliability_draw(&mut self) -> f64 {
                    0.0
                }
                fn boot(&mut self) {}
                fn shutdown(&mut self) {}
                fn free_all_applications(&mut self) {}
                fn continue_execution_timer(&mut self) {}
                fn stop_execution_timer(&mut self) {}
                fn next_event_id(&mut self) -> u64 {
                    0
                }
                fn enqueue_upstream(&mut self, _packet: Box<dyn crate::collaborators::Packet>) {}
            }

            Worker::set_active_host(Box::new(StubHost));
            let id = Worker::with_active_host(|h| h.id());
            assert_eq!(id, Some(crate::collaborators::HostId::new(42)));

            let host = Worker::clear_active_host();
            assert_eq!(host.id(), crate::collaborators::HostId::new(42));
            assert_eq!(Worker::with_active_host(|_| ()), None);
        });
    }
}
