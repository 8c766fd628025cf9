//! An instant in time, as opposed to [`super::simulation_time::SimulationTime`] which is a
//! duration. Internally represented as nanoseconds since the Unix epoch.

use std::sync::atomic::{AtomicU64, Ordering};

use super::simulation_time::{SimulationTime, SIMTIME_ONE_MINUTE};

/// An instant in time (analogous to [`std::time::Instant`]) in a simulation run.
#[derive(Copy, Clone, Eq, PartialEq, Debug, PartialOrd, Ord, Hash)]
pub struct EmulatedTime(u64);

/// The number of nanoseconds from the Unix epoch to January 1st, 2000 at 12:00am UTC. Simulated
/// hosts observe wall-clock time offset by this much so that applications inside the simulation
/// see a plausible recent date rather than the epoch.
pub const EMUTIME_SIMULATION_START: u64 = 946_684_800u64 * 1_000_000_000u64;

const EMUTIME_INVALID: u64 = u64::MAX;
const EMUTIME_MAX: u64 = u64::MAX - 1;

impl EmulatedTime {
    /// The start of the simulation - 00:00:00 UTC on 1 January, 2000.
    pub const SIMULATION_START: Self = Self(EMUTIME_SIMULATION_START);
    /// The Unix epoch (00:00:00 UTC on 1 January 1970).
    pub const UNIX_EPOCH: Self = Self(0);

    pub const MAX: Self = Self(EMUTIME_MAX);
    pub const MIN: Self = Self(0);

    /// Get the instant corresponding to `val` nanoseconds since the Unix epoch.
    pub const fn from_raw_nanos(val: u64) -> Option<Self> {
        if val == EMUTIME_INVALID || val > EMUTIME_MAX {
            None
        } else {
            Some(Self(val))
        }
    }

    /// Convert to nanoseconds since the Unix epoch.
    pub const fn to_raw_nanos(val: Option<Self>) -> u64 {
        match val {
            Some(v) => v.0,
            None => EMUTIME_INVALID,
        }
    }

    /// Get the instant corresponding to `val` time units since the simulation began.
    pub fn from_abs_simtime(val: SimulationTime) -> Self {
        Self::SIMULATION_START + val
    }

    /// Convert to the [`SimulationTime`] elapsed since the simulation began.
    pub fn to_abs_simtime(self) -> SimulationTime {
        self.duration_since(&Self::SIMULATION_START)
    }

    /// Returns the duration since `earlier`. Panics if `earlier` is after `self`, or if the
    /// difference can't be represented as a [`SimulationTime`].
    pub fn duration_since(&self, earlier: &EmulatedTime) -> SimulationTime {
        self.checked_duration_since(earlier).unwrap()
    }

    /// Returns the duration since `earlier`, or `None` if `earlier` is after `self`.
    pub fn checked_duration_since(&self, earlier: &EmulatedTime) -> Option<SimulationTime> {
        let d = self.0.checked_sub(earlier.0)?;
        SimulationTime::from_raw_nanos(d)
    }

    /// Returns the duration since `earlier`, or zero if `earlier` is after `self`.
    pub fn saturating_duration_since(&self, earlier: &EmulatedTime) -> SimulationTime {
        self.checked_duration_since(earlier)
            .unwrap_or(SimulationTime::ZERO)
    }

    pub fn checked_add(&self, duration: SimulationTime) -> Option<EmulatedTime> {
        EmulatedTime::from_raw_nanos(self.0.checked_add(duration.as_nanos())?)
    }

    pub fn checked_sub(&self, duration: SimulationTime) -> Option<EmulatedTime> {
        EmulatedTime::from_raw_nanos(self.0.checked_sub(duration.as_nanos())?)
    }

    pub fn saturating_add(&self, duration: SimulationTime) -> EmulatedTime {
        self.checked_add(duration).unwrap_or(EmulatedTime::MAX)
    }

    pub fn saturating_sub(&self, duration: SimulationTime) -> EmulatedTime {
        self.checked_sub(duration)
            .unwrap_or(EmulatedTime::SIMULATION_START)
    }
}

impl std::ops::Add<SimulationTime> for EmulatedTime {
    type Output = EmulatedTime;

    fn add(self, other: SimulationTime) -> Self {
        self.checked_add(other).unwrap()
    }
}

impl std::ops::AddAssign<SimulationTime> for EmulatedTime {
    fn add_assign(&mut self, rhs: SimulationTime) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<SimulationTime> for EmulatedTime {
    type Output = EmulatedTime;

    fn sub(self, other: SimulationTime) -> Self {
        self.checked_sub(other).unwrap()
    }
}

impl std::ops::Sub<EmulatedTime> for EmulatedTime {
    type Output = SimulationTime;

    fn sub(self, other: EmulatedTime) -> Self::Output {
        self.duration_since(&other)
    }
}

impl std::ops::SubAssign<SimulationTime> for EmulatedTime {
    fn sub_assign(&mut self, rhs: SimulationTime) {
        *self = self.checked_sub(rhs).unwrap();
    }
}

/// An [`EmulatedTime`] that can be shared between threads without locking.
pub struct AtomicEmulatedTime(AtomicU64);

impl AtomicEmulatedTime {
    pub fn new(t: EmulatedTime) -> Self {
        Self(AtomicU64::new(t.0))
    }

    pub fn load(&self, order: Ordering) -> EmulatedTime {
        EmulatedTime(self.0.load(order))
    }

    pub fn store(&self, val: EmulatedTime, order: Ordering) {
        self.0.store(val.0, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_nanos_round_trips() {
        let nanos = 5 * SIMTIME_ONE_MINUTE + 7_000_000;
        let t = EmulatedTime::from_raw_nanos(nanos).unwrap();

        assert_eq!(t.duration_since(&EmulatedTime::UNIX_EPOCH).as_secs(), 5 * 60);
        assert_eq!(
            t.duration_since(&EmulatedTime::UNIX_EPOCH).as_millis(),
            5 * 60 * 1_000 + 7
        );
    }

    #[test]
    fn to_raw_nanos_round_trips_none_as_invalid() {
        let t = EmulatedTime::UNIX_EPOCH
            + SimulationTime::SECOND * 60 * 5
            + SimulationTime::MILLISECOND * 7;
        let nanos = 5 * SIMTIME_ONE_MINUTE + 7_000_000;

        assert_eq!(EmulatedTime::to_raw_nanos(Some(t)), nanos);
        assert_eq!(EmulatedTime::to_raw_nanos(None), EMUTIME_INVALID);
    }

    #[test]
    fn from_abs_simtime_offsets_from_simulation_start() {
        assert_eq!(
            EmulatedTime::from_abs_simtime(SimulationTime::ZERO),
            EmulatedTime::SIMULATION_START
        );

        assert_eq!(
            EmulatedTime::from_abs_simtime(SimulationTime::SECOND),
            EmulatedTime::SIMULATION_START + SimulationTime::SECOND
        );
    }

    #[test]
    fn to_abs_simtime_is_the_inverse_of_from_abs_simtime() {
        assert_eq!(
            EmulatedTime::SIMULATION_START.to_abs_simtime(),
            SimulationTime::ZERO
        );

        assert_eq!(
            (EmulatedTime::SIMULATION_START + SimulationTime::SECOND).to_abs_simtime(),
            SimulationTime::SECOND
        );
    }

    #[test]
    fn saturating_sub_floors_at_simulation_start() {
        assert_eq!(
            EmulatedTime::SIMULATION_START.saturating_sub(SimulationTime::SECOND),
            EmulatedTime::SIMULATION_START
        );
    }

    #[test]
    fn atomic_emulated_time_loads_what_it_stores() {
        let a = AtomicEmulatedTime::new(EmulatedTime::UNIX_EPOCH);
        a.store(EmulatedTime::SIMULATION_START, Ordering::Relaxed);
        assert_eq!(a.load(Ordering::Relaxed), EmulatedTime::SIMULATION_START);
    }
}
