//! Traits describing everything the core dispatches into but does not own: the simulation
//! manager, the event scheduler, DNS, the network topology, hosts, CPU affinity, and packets.
//! An embedding simulator implements these; this crate only calls them.

use std::net::Ipv4Addr;

use crate::event::Event;
use crate::time::SimulationTime;

/// Stable identifier for a simulated host, used to route events and look up bandwidth/latency.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct HostId(u32);

impl HostId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Direction of a bandwidth query against a node in the topology.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BandwidthDirection {
    Up,
    Down,
}

/// Outcome recorded against a packet once the dispatch decision has been made.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DeliveryStatus {
    Sent,
    Dropped,
}

/// The simulation-wide collaborator queried for configuration, DNS, topology, timing, and
/// counter merging. There is exactly one Manager per simulation.
pub trait Manager {
    type Dns: Dns;
    type Topology: Topology;

    fn dns(&self) -> &Self::Dns;
    fn topology(&self) -> &Self::Topology;

    /// The simulation time at which the network finishes bootstrapping (before which packet
    /// loss and latency are not yet modeled faithfully).
    fn bootstrap_end_time(&self) -> SimulationTime;

    /// Whether the scheduler is still accepting new events. Dispatch code must stop scheduling
    /// tasks once this returns false.
    fn scheduler_is_running(&self) -> bool;

    fn node_bandwidth(&self, host: HostId, ip: Ipv4Addr, direction: BandwidthDirection) -> u64;
    fn latency(&self, src: HostId, dst: HostId) -> SimulationTime;

    /// Called when a newly learned minimum inter-host latency might shrink the smallest delay
    /// the simulation has ever observed.
    fn update_min_time_jump(&self, min_latency: SimulationTime);

    fn increment_plugin_error(&self);

    /// Merge a worker's local allocation/deallocation/syscall counters into the manager-wide
    /// totals. Called once per worker on shutdown, and from the global fallback path.
    fn merge_counters(&self, alloc: &crate::counter::Counter, dealloc: &crate::counter::Counter, syscall: &crate::counter::Counter);
}

/// Accepts and routes events between hosts.
pub trait EventScheduler {
    /// Pushes `event`, originating at `src_host` and targeted at `dst_host`. Returns false if
    /// the scheduler is no longer accepting events.
    fn push(&self, event: Event, src_host: HostId, dst_host: HostId) -> bool;

    fn host(&self, id: HostId) -> Option<&dyn Host>;
}

pub trait Dns {
    fn resolve_ip_to_address(&self, ip: Ipv4Addr) -> Option<HostId>;
    fn resolve_name_to_address(&self, name: &str) -> Option<HostId>;
}

/// The network topology graph: per-edge reliability and latency, and per-path packet counters.
pub trait Topology {
    /// Probability in `[0, 1]` that a packet sent along this path arrives.
    fn reliability(&self, src: Ipv4Addr, dst: Ipv4Addr) -> f64;
    /// One-way latency in milliseconds.
    fn latency_ms(&self, src: Ipv4Addr, dst: Ipv4Addr) -> f64;
    fn increment_path_packet_counter(&self, src: Ipv4Addr, dst: Ipv4Addr);
}

/// A simulated host. The core only needs enough of a host's surface to boot it, shut it down,
/// and run events against it; application and network-stack internals are out of scope.
pub trait Host: Send {
    fn id(&self) -> HostId;
    fn upstream_router_ip(&self, ip: Ipv4Addr) -> Option<Ipv4Addr>;

    /// Draws a reliability sample in `[0, 1)` from this host's random source.
    fn random_reliability_draw(&mut self) -> f64;

    fn boot(&mut self);
    fn shutdown(&mut self);
    fn free_all_applications(&mut self);

    fn continue_execution_timer(&mut self);
    fn stop_execution_timer(&mut self);

    /// Monotonic per-host counter used to break ties in event ordering.
    fn next_event_id(&mut self) -> u64;

    fn enqueue_upstream(&mut self, packet: Box<dyn Packet>);
}

/// A reference-counted network packet. `copy` produces an independent handle to a duplicate of
/// the payload, matching the reference-counting discipline the simulator uses for packets that
/// cross host boundaries.
pub trait Packet: Send {
    fn source_ip(&self) -> Ipv4Addr;
    fn destination_ip(&self) -> Ipv4Addr;
    fn payload_len(&self) -> usize;
    fn add_delivery_status(&mut self, status: DeliveryStatus);
    fn copy(&self) -> Box<dyn Packet>;
}
