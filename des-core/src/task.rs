use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::worker::Worker;

/// A unit of work executed against a host: a timer firing, an application callback, a packet
/// delivery. Wraps a boxed closure so callers don't need a trait per kind of task.
pub struct Task {
    callback: Box<dyn FnMut(&mut dyn crate::collaborators::Host) + Send>,
}

impl Task {
    pub fn new(callback: Box<dyn FnMut(&mut dyn crate::collaborators::Host) + Send>) -> Self {
        Worker::increment_object_alloc_counter("Task");
        Self { callback }
    }

    pub fn execute(&mut self, host: &mut dyn crate::collaborators::Host) {
        (self.callback)(host)
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        Worker::increment_object_dealloc_counter("Task");
    }
}

/// A shared, cheaply-cloneable handle to a [`Task`]. Events and scheduled callbacks hold this
/// rather than an owned `Task` since the same task may be referenced while it's in flight.
#[derive(Clone)]
pub struct TaskRef(Arc<AtomicRefCell<Task>>);

impl TaskRef {
    pub fn new(task: Task) -> Self {
        Self(Arc::new(AtomicRefCell::new(task)))
    }

    pub fn execute(&self, host: &mut dyn crate::collaborators::Host) {
        self.0.borrow_mut().execute(host)
    }
}

impl std::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRef").finish_non_exhaustive()
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskRef {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Host, HostId, Packet};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NullHost;

    impl Host for NullHost {
        fn id(&self) -> HostId {
            HostId::new(0)
        }
        fn upstream_router_ip(&self, _ip: Ipv4Addr) -> Option<Ipv4Addr> {
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
        fn enqueue_upstream(&mut self, _packet: Box<dyn Packet>) {}
    }

    #[test]
    fn execute_runs_the_callback() {
        let mut host = NullHost;
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let mut task = Task::new(Box::new(move |_: &mut dyn Host| {
            ran_clone.store(true, Ordering::Relaxed);
        }));
        task.execute(&mut host);
        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    fn clone_shares_identity() {
        let a = TaskRef::new(Task::new(Box::new(|_: &mut dyn Host| {})));
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_task_refs_are_unequal() {
        let a = TaskRef::new(Task::new(Box::new(|_: &mut dyn Host| {})));
        let b = TaskRef::new(Task::new(Box::new(|_: &mut dyn Host| {})));
        assert_ne!(a, b);
    }

    #[test]
    fn execute_through_a_task_ref_runs_the_shared_task() {
        let mut host = NullHost;
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let task_ref = TaskRef::new(Task::new(Box::new(move |_: &mut dyn Host| {
            ran_clone.store(true, Ordering::Relaxed);
        })));
        task_ref.execute(&mut host);
        assert!(ran.load(Ordering::Relaxed));
    }
}
