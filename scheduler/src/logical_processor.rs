//! A fixed set of logical processors, each with its own ready/done worker queues and an idle-time
//! accumulator.
//!
//! A logical processor (LP) is a scheduling slot bound to a CPU id. At any instant a worker is
//! either sitting in some LP's ready queue, sitting in some LP's done queue (having just finished
//! its turn there this round), or actively running on the LP it was popped for.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;

/// A set of `n` logical processors.
pub struct LogicalProcessors {
    lps: Vec<LogicalProcessor>,
}

impl LogicalProcessors {
    /// `processors[i]` is the cpu id bound to LP `i` (or `None` if affinity isn't pinned there).
    /// `num_workers` sizes the ready/done queues; every worker must fit in any single LP's queue
    /// since stealing can in principle collect them all onto one LP.
    pub fn new(processors: &[Option<u32>], num_workers: usize) -> Self {
        let lps = processors
            .iter()
            .map(|cpu_id| LogicalProcessor {
                cpu_id: *cpu_id,
                ready_workers: ArrayQueue::new(num_workers.max(1)),
                done_workers: ArrayQueue::new(num_workers.max(1)),
                idle: Mutex::new(IdleTimer::new()),
            })
            .collect();

        Self { lps }
    }

    /// The number of logical processors, `L`.
    pub fn n(&self) -> usize {
        self.lps.len()
    }

    /// The cpu id bound to LP `i`, for use with a platform affinity call.
    pub fn cpu_id(&self, lpi: usize) -> Option<u32> {
        self.lps[lpi].cpu_id
    }

    /// Append `worker` to LP `lpi`'s ready queue.
    pub fn ready_push(&self, lpi: usize, worker: usize) {
        self.lps[lpi]
            .ready_workers
            .push(worker)
            .unwrap_or_else(|_| panic!("ready queue for lp {lpi} is full"));
    }

    /// Append `worker` to LP `lpi`'s done queue: the worker has just finished its turn there.
    pub fn done_push(&self, lpi: usize, worker: usize) {
        self.lps[lpi]
            .done_workers
            .push(worker)
            .unwrap_or_else(|_| panic!("done queue for lp {lpi} is full"));
    }

    /// Returns the next worker that should run on `lpi`, or `None` if every LP's ready queue is
    /// empty. Pops `lpi`'s own ready queue first; failing that, steals from another LP's ready
    /// queue in round-robin order starting at `lpi`.
    ///
    /// At most one caller may be inside this function for the same `lpi` concurrently; calls for
    /// distinct `lpi` may run concurrently with each other and with `ready_push`/`done_push` on
    /// any LP.
    pub fn pop_worker_to_run_on(&self, lpi: usize) -> Option<usize> {
        let n = self.lps.len();
        (0..n)
            .map(|offset| (lpi + offset) % n)
            .find_map(|from_lpi| self.lps[from_lpi].ready_workers.pop())
    }

    /// Called once by the coordinator at the end of a round: moves every worker id from its LP's
    /// done queue back into that same LP's ready queue, preserving FIFO order.
    pub fn finish_task(&mut self) {
        for lp in &mut self.lps {
            assert!(
                lp.ready_workers.is_empty(),
                "finish_task called while a worker is still unaccounted for"
            );
            std::mem::swap(&mut lp.ready_workers, &mut lp.done_workers);
        }
    }

    /// Stop LP `lpi`'s idle timer: a worker has just begun executing there.
    pub fn idle_timer_stop(&self, lpi: usize) {
        self.lps[lpi].idle.lock().unwrap().stop();
    }

    /// Resume LP `lpi`'s idle timer: the LP has gone idle (the last `pop_worker_to_run_on` for it
    /// returned `None`).
    pub fn idle_timer_continue(&self, lpi: usize) {
        self.lps[lpi].idle.lock().unwrap().resume();
    }

    /// Cumulative wall time during which no worker has run on LP `lpi`, including any interval
    /// currently in progress.
    pub fn idle_timer_elapsed(&self, lpi: usize) -> Duration {
        self.lps[lpi].idle.lock().unwrap().elapsed()
    }

    /// Returns an iterator of logical processor indexes.
    pub fn iter(&self) -> impl std::iter::ExactSizeIterator<Item = usize> + Clone {
        0..self.lps.len()
    }
}

struct LogicalProcessor {
    cpu_id: Option<u32>,
    ready_workers: ArrayQueue<usize>,
    done_workers: ArrayQueue<usize>,
    idle: Mutex<IdleTimer>,
}

/// Starts in the running (idle) state, matching the state machine in §4.1: an LP with no worker
/// assigned yet is idle from the moment the pool exists.
struct IdleTimer {
    accumulated: Duration,
    /// `Some(t)` while idle (timer running since `t`); `None` while a worker is executing.
    running_since: Option<Instant>,
}

impl IdleTimer {
    fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: Some(Instant::now()),
        }
    }

    fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn resume(&mut self) {
        assert!(self.running_since.is_none(), "idle timer already running");
        self.running_since = Some(Instant::now());
    }

    fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_push_then_pop_returns_same_lp() {
        let lps = LogicalProcessors::new(&[None, None], 4);
        lps.ready_push(0, 7);
        assert_eq!(lps.pop_worker_to_run_on(0), Some(7));
        assert_eq!(lps.pop_worker_to_run_on(0), None);
    }

    #[test]
    fn pop_steals_from_other_lp_when_own_queue_empty() {
        let lps = LogicalProcessors::new(&[None, None, None], 4);
        lps.ready_push(2, 1);
        assert_eq!(lps.pop_worker_to_run_on(0), Some(1));
    }

    #[test]
    fn pop_returns_none_when_all_empty() {
        let lps = LogicalProcessors::new(&[None, None], 4);
        assert_eq!(lps.pop_worker_to_run_on(0), None);
        assert_eq!(lps.pop_worker_to_run_on(1), None);
    }

    #[test]
    fn finish_task_moves_done_back_to_ready_preserving_order() {
        let mut lps = LogicalProcessors::new(&[None], 4);
        lps.done_push(0, 3);
        lps.done_push(0, 1);
        lps.finish_task();
        assert_eq!(lps.pop_worker_to_run_on(0), Some(3));
        assert_eq!(lps.pop_worker_to_run_on(0), Some(1));
    }

    #[test]
    #[should_panic(expected = "still unaccounted for")]
    fn finish_task_panics_if_ready_queue_nonempty() {
        let mut lps = LogicalProcessors::new(&[None], 4);
        lps.ready_push(0, 0);
        lps.finish_task();
    }

    #[test]
    fn idle_timer_accumulates_only_while_stopped_is_not_called() {
        let lps = LogicalProcessors::new(&[None], 4);
        // starts idle
        assert!(lps.idle_timer_elapsed(0) >= Duration::ZERO);
        lps.idle_timer_stop(0);
        let busy_snapshot = lps.idle_timer_elapsed(0);
        std::thread::sleep(Duration::from_millis(5));
        // no time accrues while stopped
        assert_eq!(lps.idle_timer_elapsed(0), busy_snapshot);
        lps.idle_timer_continue(0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(lps.idle_timer_elapsed(0) > busy_snapshot);
    }
}
