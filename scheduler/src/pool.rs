//! A worker pool that dispatches one task function per round across a fixed set of OS threads,
//! with parallelism bounded independently of the worker count.
//!
//! Each worker is bound to a logical processor (LP) at any instant, and LPs are pinned to CPU ids
//! via [`nix::sched::sched_setaffinity`]. A round starts when [`WorkerPool::start_task_fn`] wakes
//! one worker per LP; as each worker finishes, it hands its LP off to the next ready worker
//! (stealing from a sibling LP if its own queue is empty) before the original caller of
//! [`WorkerPool::await_task_fn`] returns. This bounds the number of workers running concurrently to
//! the number of LPs, independent of how many worker threads exist in total.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::logical_processor::LogicalProcessors;
use crate::sync::count_down_latch::{build_count_down_latch, LatchCounter, LatchWaiter};
use crate::sync::semaphore::Semaphore;

/// Sentinel meaning "no event scheduled", mirroring `SIMTIME_MAX` without depending on any
/// particular time type. Callers translate to and from their own nanosecond representation.
pub const NO_EVENT_TIME: u64 = u64::MAX;

/// Errors that can be diagnosed at construction time, before any worker thread has been spawned.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("cpu id {cpu_id} for logical processor {lpi} is not representable by this platform's affinity mask")]
    InvalidCpuId { lpi: usize, cpu_id: u32 },
}

/// The unit of work dispatched to every worker once per round.
enum Task {
    /// Run `f(worker_id)` on every worker thread.
    ExecuteRound(Arc<dyn Fn(usize) + Send + Sync>),
    /// Exit the worker loop.
    Shutdown,
}

struct WorkerHandle {
    semaphore: Semaphore,
    tid: nix::unistd::Pid,
    lp_idx: AtomicUsize,
}

struct PoolShared {
    lps: AtomicRefCell<LogicalProcessors>,
    workers: Vec<WorkerHandle>,
    task: AtomicRefCell<Option<Task>>,
    panicked: std::sync::atomic::AtomicBool,
    /// One slot per logical processor: the lowest event time offered by whichever worker is
    /// currently assigned to that LP. Never locked — at most one worker is assigned to a given LP
    /// at a time, so the slot has a single writer.
    min_event_times: Vec<AtomicU64>,
}

/// A cloneable, `Send + Sync` handle onto the part of a [`WorkerPool`] that a task function needs
/// while it's running on a worker thread: reporting the next event time it discovered. Obtained
/// via [`WorkerPool::handle`].
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Equivalent to [`WorkerPool::offer_min_event_time`], callable from inside a dispatched task
    /// function without access to the `WorkerPool` itself.
    pub fn offer_min_event_time(&self, worker_id: usize, time: u64) {
        let lpi = self.shared.workers[worker_id].lp_idx.load(Ordering::Relaxed);
        self.shared.min_event_times[lpi].fetch_min(time, Ordering::Relaxed);
    }
}

/// A fixed pool of `n_workers` OS threads, dispatching across `l = min(n_workers, n_parallel)`
/// logical processors.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Vec<std::thread::JoinHandle<()>>,
    round_end_waiter: LatchWaiter,
    has_dispatched: bool,
    joined: bool,
}

impl WorkerPool {
    /// `cpu_ids[i]` pins logical processor `i` to that CPU id, or leaves it unpinned if `None`.
    /// Only the first `l = min(n_workers, n_parallel, cpu_ids.len())` logical processors are
    /// constructed; any remaining entries in `cpu_ids` are ignored.
    ///
    /// Returns [`PoolError`] if a given CPU id can't be diagnosed up front, before any worker
    /// thread is spawned. Every failure past this point (kernel resource exhaustion, a worker
    /// thread dying) is an invariant violation and panics instead.
    pub fn new(
        cpu_ids: &[Option<u32>],
        n_workers: usize,
        n_parallel: usize,
        thread_name_prefix: &str,
    ) -> Result<Self, PoolError> {
        if n_parallel < n_workers {
            log::warn!(
                "parallelism cap {n_parallel} is below worker count {n_workers}; clamping logical processors to {n_parallel}"
            );
        }

        if n_workers == 0 {
            log::warn!("worker pool constructed with 0 workers; running in synchronous test mode");
            // degenerate pool: start_task_fn runs the round inline on the caller's thread instead
            // of spawning any workers.
            return Ok(Self {
                shared: Arc::new(PoolShared {
                    lps: AtomicRefCell::new(LogicalProcessors::new(&[], 0)),
                    workers: Vec::new(),
                    task: AtomicRefCell::new(None),
                    panicked: std::sync::atomic::AtomicBool::new(false),
                    min_event_times: Vec::new(),
                }),
                threads: Vec::new(),
                round_end_waiter: build_count_down_latch().1,
                has_dispatched: false,
                joined: false,
            });
        }

        let l = n_workers.min(n_parallel.max(1));
        let mut cpu_ids: Vec<Option<u32>> = cpu_ids.iter().copied().take(l).collect();
        cpu_ids.resize(l, None);

        for (lpi, cpu_id) in cpu_ids.iter().enumerate() {
            if let Some(cpu_id) = cpu_id {
                let mut probe = nix::sched::CpuSet::new();
                if probe.set(*cpu_id as usize).is_err() {
                    return Err(PoolError::InvalidCpuId { lpi, cpu_id: *cpu_id });
                }
            }
        }

        let lps = LogicalProcessors::new(&cpu_ids, n_workers);

        let (round_end_counter, round_end_waiter) = build_count_down_latch();

        let mut join_handles = Vec::with_capacity(n_workers);
        let mut tid_receivers = Vec::with_capacity(n_workers);
        let mut shared_senders = Vec::with_capacity(n_workers);

        for worker_id in 0..n_workers {
            let (tid_send, tid_recv) = crossbeam::channel::bounded(1);
            let (shared_send, shared_recv) = crossbeam::channel::bounded(1);
            let counter = round_end_counter.clone();
            let name = format!("{thread_name_prefix}-{worker_id}");

            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(worker_id, tid_send, shared_recv, counter))
                .expect("failed to spawn worker thread");

            join_handles.push(handle);
            tid_receivers.push(tid_recv);
            shared_senders.push(shared_send);
        }

        let workers: Vec<WorkerHandle> = tid_receivers
            .iter()
            .enumerate()
            .map(|(worker_id, recv)| WorkerHandle {
                semaphore: Semaphore::new(0),
                tid: recv.recv().expect("worker thread died before reporting its tid"),
                lp_idx: AtomicUsize::new(worker_id % l),
            })
            .collect();

        // assign w to LP w mod L and bind its affinity to that LP's cpu id up front, rather than
        // deferring the syscall to the first time the worker happens to migrate.
        for (worker_id, worker) in workers.iter().enumerate() {
            let lpi = worker.lp_idx.load(Ordering::Relaxed);
            lps.ready_push(lpi, worker_id);
            set_affinity(worker, lpi, &lps);
        }

        let shared = Arc::new(PoolShared {
            lps: AtomicRefCell::new(lps),
            workers,
            task: AtomicRefCell::new(None),
            panicked: std::sync::atomic::AtomicBool::new(false),
            min_event_times: (0..l).map(|_| AtomicU64::new(NO_EVENT_TIME)).collect(),
        });

        for sender in shared_senders {
            sender.send(Arc::clone(&shared)).unwrap();
        }

        Ok(Self {
            shared,
            threads: join_handles,
            round_end_waiter,
            has_dispatched: false,
            joined: false,
        })
    }

    pub fn n_workers(&self) -> usize {
        self.threads.len()
    }

    pub fn n_processors(&self) -> usize {
        self.shared.lps.borrow().n()
    }

    /// Dispatch `f` to run once on every worker thread. Does not block; call
    /// [`WorkerPool::await_task_fn`] to wait for the round to finish. Panics if called again
    /// before a prior round's `await_task_fn` has returned.
    pub fn start_task_fn(&mut self, f: impl Fn(usize) + Send + Sync + 'static) {
        assert!(!self.joined, "start_task_fn called on a joined pool");
        assert!(
            !self.shared.panicked.load(Ordering::Relaxed),
            "worker pool already had a worker panic"
        );
        assert!(
            !self.has_dispatched,
            "start_task_fn called again before await_task_fn returned"
        );
        self.has_dispatched = true;

        if self.threads.is_empty() {
            // degenerate pool: run the round inline, there is no one to dispatch to.
            f(0);
            return;
        }

        *self.shared.task.borrow_mut() = Some(Task::ExecuteRound(Arc::new(f)));

        let lps = self.shared.lps.borrow();
        for lpi in lps.iter() {
            dispatch_one(lpi, &self.shared, &lps);
        }
    }

    /// Block until every worker has executed this round's task exactly once.
    pub fn await_task_fn(&mut self) {
        assert!(
            self.has_dispatched,
            "await_task_fn called without a matching start_task_fn"
        );
        self.has_dispatched = false;

        if self.threads.is_empty() {
            return;
        }

        self.round_end_waiter.wait();
        *self.shared.task.borrow_mut() = None;
        self.shared.lps.borrow_mut().finish_task();

        if self.shared.panicked.load(Ordering::Relaxed) {
            panic!("a worker thread panicked while running a task");
        }
    }

    /// Atomically record `time` as the lowest upcoming event time known to the logical processor
    /// `worker_id` currently runs on, keeping the lower of the existing and new values. Safe to
    /// call without locking: at most one worker is assigned to a given LP at any instant, so the
    /// LP's slot has a single writer.
    pub fn offer_min_event_time(&self, worker_id: usize, time: u64) {
        let lpi = self.shared.workers[worker_id].lp_idx.load(Ordering::Relaxed);
        self.shared.min_event_times[lpi].fetch_min(time, Ordering::Relaxed);
    }

    /// The minimum of every logical processor's offered event time since the last call, or
    /// [`NO_EVENT_TIME`] if none was offered. Resets every slot back to [`NO_EVENT_TIME`] in the
    /// same pass, not after, so a slot can never be read twice for the same round. Only valid to
    /// call between rounds, while every worker is idle. `O(L)`, not `O(N)`.
    pub fn global_next_event_time(&self) -> u64 {
        self.shared
            .min_event_times
            .iter()
            .map(|slot| slot.swap(NO_EVENT_TIME, Ordering::Relaxed))
            .min()
            .unwrap_or(NO_EVENT_TIME)
    }

    /// A cheaply cloneable handle that a task function running on worker `worker_id` can use to
    /// call [`PoolHandle::offer_min_event_time`] without borrowing the pool itself (the pool is
    /// owned by the coordinator, not by the workers it dispatches to).
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Signal every worker to exit and join their OS threads. Calling this a second time is a
    /// no-op.
    pub fn join_all(&mut self) {
        if self.joined {
            return;
        }
        assert!(
            !self.has_dispatched,
            "join_all called with a round still in progress; call await_task_fn first"
        );
        self.joined = true;

        if self.threads.is_empty() {
            return;
        }

        *self.shared.task.borrow_mut() = Some(Task::Shutdown);
        for worker in &self.shared.workers {
            worker.semaphore.post();
        }

        let check_for_panics = !self.shared.panicked.load(Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let result = handle.join();
            if check_for_panics {
                result.expect("a worker thread panicked while shutting down");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join_all();
    }
}

/// Pop the next ready worker for `lpi` and wake it, rebinding its affinity if it was stolen from
/// another LP. Leaves `lpi` idle if no worker was ready.
fn dispatch_one(lpi: usize, shared: &Arc<PoolShared>, lps: &LogicalProcessors) {
    match lps.pop_worker_to_run_on(lpi) {
        Some(worker_id) => {
            lps.idle_timer_stop(lpi);
            let worker = &shared.workers[worker_id];
            if worker.lp_idx.load(Ordering::Relaxed) != lpi {
                set_affinity(worker, lpi, lps);
            }
            worker.semaphore.post();
        }
        None => lps.idle_timer_continue(lpi),
    }
}

fn set_affinity(worker: &WorkerHandle, lpi: usize, lps: &LogicalProcessors) {
    log::trace!("rebinding tid {:?} to logical processor {lpi}", worker.tid);
    if let Some(cpu_id) = lps.cpu_id(lpi) {
        // already validated in WorkerPool::new; cpu_ids don't change afterwards.
        let mut cpu_set = nix::sched::CpuSet::new();
        cpu_set.set(cpu_id as usize).unwrap();
        if cfg!(not(miri)) {
            nix::sched::sched_setaffinity(worker.tid, &cpu_set)
                .expect("sched_setaffinity failed");
        }
    }
    worker.lp_idx.store(lpi, Ordering::Release);
}

/// Runs `start_next_thread_when_dropped`'s handoff even if the task panics, so a panicking task
/// never leaves its logical processor stuck waiting forever.
struct HandoffOnDrop<'a> {
    shared: &'a Arc<PoolShared>,
    lps: &'a LogicalProcessors,
    lpi: usize,
    worker_id: usize,
}

impl Drop for HandoffOnDrop<'_> {
    fn drop(&mut self) {
        self.lps.done_push(self.lpi, self.worker_id);
        dispatch_one(self.lpi, self.shared, self.lps);
    }
}

fn worker_loop(
    worker_id: usize,
    tid_send: crossbeam::channel::Sender<nix::unistd::Pid>,
    shared_recv: crossbeam::channel::Receiver<Arc<PoolShared>>,
    mut round_end_counter: LatchCounter,
) {
    struct PoisonOnDrop<'a>(&'a PoolShared);
    impl Drop for PoisonOnDrop<'_> {
        fn drop(&mut self) {
            self.0.panicked.store(true, Ordering::Relaxed);
        }
    }

    let tid = if cfg!(not(miri)) {
        nix::unistd::gettid()
    } else {
        nix::unistd::Pid::from_raw(-1)
    };
    tid_send.send(tid).unwrap();

    let shared = shared_recv.recv().expect("pool dropped before sending shared state");
    let semaphore = shared.workers[worker_id].semaphore.clone();
    let poison_on_drop = PoisonOnDrop(&shared);

    loop {
        semaphore.wait();

        let done = {
            let lps = shared.lps.borrow();
            let lpi = shared.workers[worker_id].lp_idx.load(Ordering::Relaxed);

            // `set_affinity` runs the pinning syscall from whichever thread is dispatching this
            // worker (the coordinator, or the previous occupant of this LP during handoff), since
            // `sched_setaffinity` takes a target tid. Only this thread can update its own
            // thread-local, so it's refreshed here on every wakeup rather than at the call site.
            crate::CORE_AFFINITY.with(|x| x.set(lps.cpu_id(lpi)));

            // the handoff must run even if the task below panics, and must run before we count
            // down (otherwise the caller of await_task_fn could observe a round as "done" while
            // this LP is still waiting for its next worker to be dispatched).
            let _handoff = HandoffOnDrop {
                shared: &shared,
                lps: &lps,
                lpi,
                worker_id,
            };

            match shared.task.borrow().deref() {
                Some(Task::ExecuteRound(f)) => {
                    f(worker_id);
                    false
                }
                Some(Task::Shutdown) | None => true,
            }
        };

        // the handoff and the latch count-down both happen before we act on `done`, so a
        // shutdown round looks like any other round to everything but this loop's exit check.
        round_end_counter.count_down();

        if done {
            break;
        }
    }

    log::trace!("worker {worker_id} (tid {tid:?}) shutting down");
    std::mem::forget(poison_on_drop);
}
