//! Core worker-pool and event-dispatch subsystem of a discrete-event network simulator.
//!
//! Simulated hosts execute events that produce further events at future simulation times; this
//! crate runs those events across a fixed-size pool of OS threads (via [`scheduler`]) while
//! keeping a global lower bound on event times, CPU-affinity locality, and a parallelism policy
//! independent of the worker count.
//!
//! Everything outside this subsystem — CLI parsing, configuration loading, DNS tables, topology
//! storage, host/application construction, packet payload representation — is an external
//! collaborator. The traits in [`collaborators`] describe what this crate consumes from them;
//! it does not implement their internals.

pub mod collaborators;
pub mod config;
pub mod counter;
pub mod dispatch;
pub mod event;
pub mod task;
pub mod time;
pub mod worker;

pub use event::Event;
pub use task::{Task, TaskRef};
pub use worker::Worker;
