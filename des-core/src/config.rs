//! The configuration surface owned by this crate. Everything else about how a simulation is
//! configured (topology files, command-line flags, the rest of an embedding application's
//! configuration document) belongs to the caller; this crate only needs to know whether object
//! counters are enabled.

use serde::{Deserialize, Serialize};

/// Runtime options recognized by this crate. An embedding application is expected to fold this
/// into whatever larger configuration document it owns and deserializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// When true, worker-local object allocation/deallocation counters are tracked and merged
    /// into the global counters on thread exit. When false, the counter calls are no-ops.
    #[serde(default = "default_use_object_counters")]
    pub use_object_counters: bool,
}

fn default_use_object_counters() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            use_object_counters: default_use_object_counters(),
        }
    }
}
