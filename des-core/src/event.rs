use crate::collaborators::{Host, HostId};
use crate::task::TaskRef;
use crate::time::EmulatedTime;
use crate::worker::Worker;

/// A task scheduled to run against a specific host at a specific time. Ordered primarily by
/// time so a scheduler can use a binary heap; ties are broken deterministically so that two
/// events landing at the same instant still produce a total order.
#[derive(Debug)]
pub struct Event {
    task: TaskRef,
    time: EmulatedTime,
    src_host_id: HostId,
    dst_host_id: HostId,
    src_host_event_id: u64,
}

impl Event {
    pub fn new(task: TaskRef, time: EmulatedTime, src_host: &mut dyn Host, dst_host_id: HostId) -> Self {
        Worker::increment_object_alloc_counter("Event");
        Self {
            task,
            time,
            src_host_id: src_host.id(),
            dst_host_id,
            src_host_event_id: src_host.next_event_id(),
        }
    }

    pub fn execute(self, host: &mut dyn Host) {
        assert_eq!(self.host_id(), host.id());

        host.continue_execution_timer();
        self.task.execute(host);
        host.stop_execution_timer();
    }

    pub fn time(&self) -> EmulatedTime {
        self.time
    }

    pub fn host_id(&self) -> HostId {
        self.dst_host_id
    }

    pub fn set_time(&mut self, time: EmulatedTime) {
        self.time = time;
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        Worker::increment_object_dealloc_counter("Event");
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task
            && self.time == other.time
            && self.src_host_id == other.src_host_id
            && self.dst_host_id == other.dst_host_id
            && self.src_host_event_id == other.src_host_event_id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let cmp = self
            .time
            .cmp(&other.time)
            .then_with(|| self.dst_host_id.cmp(&other.dst_host_id))
            .then_with(|| self.src_host_id.cmp(&other.src_host_id))
            .then_with(|| self.src_host_event_id.cmp(&other.src_host_event_id));

        if cmp == std::cmp::Ordering::Equal {
            if self.task != other.task {
                assert_ne!(self, other);
                return None;
            }
            assert_eq!(self, other);
        }

        Some(cmp)
    }
}
