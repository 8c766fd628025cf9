//! The thin layer of operations invoked by executing events: running an event, scheduling a
//! future task on a host, and sending a packet between hosts. Everything here is a consumer of
//! the [`crate::collaborators`] traits; it owns no simulation state of its own beyond the
//! thread-local [`Worker`].

use std::sync::Arc;

use scheduler::pool::PoolHandle;

use crate::collaborators::{DeliveryStatus, EventScheduler, Host, Manager};
use crate::event::Event;
use crate::task::{Task, TaskRef};
use crate::time::{EmulatedTime, SimulationTime};
use crate::worker::Worker;

/// Ensures the calling thread has a live [`Worker`]. Call at the top of the task function
/// dispatched to [`scheduler::pool::WorkerPool::start_task_fn`]; a no-op after the first call on
/// a given thread.
pub fn ensure_worker_initialized(worker_id: usize, pool: PoolHandle, bootstrap_end_time: EmulatedTime) {
    if !Worker::is_alive() {
        Worker::new_for_this_thread(worker_id, pool, bootstrap_end_time);
    }
}

/// Runs `event` against `host`: sets the current time to the event's time, executes it, clears
/// the current time, and records it as the last event time.
pub fn run_event(event: Event, host: &mut dyn Host) {
    let time = event.time();
    Worker::set_current_time(time);
    event.execute(host);
    Worker::set_last_event_time(time);
    Worker::clear_current_time();
}

/// Schedules `task` to run on `host` after `delay`. Returns `false` without constructing an
/// event if the scheduler is no longer running.
pub fn schedule_task<M: Manager, S: EventScheduler>(
    manager: &M,
    scheduler: &S,
    task: TaskRef,
    host: &mut dyn Host,
    delay: SimulationTime,
) -> bool {
    if !manager.scheduler_is_running() {
        return false;
    }

    let current_time = Worker::current_time().expect("schedule_task called outside event execution");
    let time = current_time + delay;
    let host_id = host.id();
    let event = Event::new(task, time, host, host_id);
    scheduler.push(event, host_id, host_id)
}

/// Resolves source and destination addresses, draws for reliability, and either schedules a
/// delivery event on the destination host or marks the packet dropped. A silent no-op if the
/// scheduler is no longer running, or if the scheduler rejects the resulting event (both are
/// normal during shutdown, not failures).
///
/// A packet is delivered if any of: it's a zero-length control packet (so congestion control
/// still sees an ack-like signal even under packet loss), the network hasn't finished
/// bootstrapping yet, or the reliability draw falls within the path's reliability. These are
/// three independently true conditions, not a single combined check, so each is testable on its
/// own.
pub fn send_packet<M: Manager, S: EventScheduler>(
    manager: &M,
    scheduler: &S,
    src_host: &mut dyn Host,
    mut packet: Box<dyn crate::collaborators::Packet>,
) {
    if !manager.scheduler_is_running() {
        return;
    }

    let current_time = Worker::current_time().expect("send_packet called outside event execution");
    let round_end_time = Worker::round_end_time();

    let src_ip = packet.source_ip();
    let dst_ip = packet.destination_ip();

    let dst_host_id = manager
        .dns()
        .resolve_ip_to_address(dst_ip)
        .expect("no host for destination address");

    let is_bootstrapping = current_time < EmulatedTime::from_abs_simtime(manager.bootstrap_end_time());
    let is_control_packet = packet.payload_len() == 0;

    let reliability = manager.topology().reliability(src_ip, dst_ip);
    let draw = src_host.random_reliability_draw();

    let delivered = is_control_packet || is_bootstrapping || draw <= reliability;

    if !delivered {
        packet.add_delivery_status(DeliveryStatus::Dropped);
        return;
    }

    packet.add_delivery_status(DeliveryStatus::Sent);
    manager.topology().increment_path_packet_counter(src_ip, dst_ip);

    let latency_ms = manager.topology().latency_ms(src_ip, dst_ip);
    let delay = SimulationTime::ceil_from_millis_f64(latency_ms);
    let mut deliver_time = current_time + delay;

    if let Some(round_end_time) = round_end_time {
        if deliver_time < round_end_time {
            deliver_time = round_end_time;
        }
    }

    let copy = Arc::new(std::sync::Mutex::new(Some(packet.copy())));
    let delivery_task = TaskRef::new(Task::new(Box::new(move |host: &mut dyn Host| {
        let packet = copy.lock().unwrap().take().expect("delivery task ran twice");
        host.enqueue_upstream(packet);
    })));

    let src_host_id = src_host.id();
    let event = Event::new(delivery_task, deliver_time, src_host, dst_host_id);

    Worker::set_min_event_time_next_round(deliver_time);

    // a `false` return means the scheduler stopped accepting events (e.g. concurrent shutdown);
    // that's the same silent no-op as the `scheduler_is_running` guard above, not a fatal error.
    scheduler.push(event, src_host_id, dst_host_id);
}

/// Boots every host in `hosts`, bracketing each with the active-host marker.
pub fn boot_hosts<'a>(hosts: impl IntoIterator<Item = &'a mut (dyn Host + 'a)>) {
    for host in hosts {
        host.boot();
    }
}

/// Shuts down every host in `hosts` and merges this worker's counters into `manager`.
pub fn finish<'a, M: Manager>(manager: &M, hosts: impl IntoIterator<Item = &'a mut (dyn Host + 'a)>) {
    for host in hosts {
        host.shutdown();
        host.free_all_applications();
    }

    Worker::drain_counters_into_globals();
    let (alloc, dealloc, syscall) = Worker::global_counters();
    manager.merge_counters(&alloc, &dealloc, &syscall);
}
