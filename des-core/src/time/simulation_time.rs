//! A simulated duration, measured in nanoseconds.
//!
//! Use [`EmulatedTime`][super::emulated_time::EmulatedTime] for an instant in time, and
//! `SimulationTime` for the interval between two instants.

use std::time::Duration;

#[derive(Copy, Clone, Eq, PartialEq, Debug, PartialOrd, Ord, Hash)]
pub struct SimulationTime(u64);

pub const SIMTIME_INVALID: u64 = u64::MAX;
pub const SIMTIME_MAX: u64 = u64::MAX - 1;
pub const SIMTIME_MIN: u64 = 0;
pub const SIMTIME_ONE_NANOSECOND: u64 = 1;
pub const SIMTIME_ONE_MICROSECOND: u64 = 1_000;
pub const SIMTIME_ONE_MILLISECOND: u64 = 1_000_000;
pub const SIMTIME_ONE_SECOND: u64 = 1_000_000_000;
pub const SIMTIME_ONE_MINUTE: u64 = 60_000_000_000;
pub const SIMTIME_ONE_HOUR: u64 = 3_600_000_000_000;

impl SimulationTime {
    pub const MAX: SimulationTime = SimulationTime(SIMTIME_MAX);
    pub const ZERO: SimulationTime = SimulationTime(0);
    pub const SECOND: SimulationTime = SimulationTime(SIMTIME_ONE_SECOND);
    pub const MILLISECOND: SimulationTime = SimulationTime(SIMTIME_ONE_MILLISECOND);
    pub const MICROSECOND: SimulationTime = SimulationTime(SIMTIME_ONE_MICROSECOND);
    pub const NANOSECOND: SimulationTime = SimulationTime(SIMTIME_ONE_NANOSECOND);

    /// `SIMTIME_INVALID` and anything past `SIMTIME_MAX` both map to `None`: the former marks
    /// "not currently inside an event", the latter is simply out of range.
    pub fn from_raw_nanos(val: u64) -> Option<Self> {
        if val == SIMTIME_INVALID || val > SIMTIME_MAX {
            None
        } else {
            Some(Self(val))
        }
    }

    pub fn to_raw_nanos(val: Option<Self>) -> u64 {
        match val {
            Some(val) => val.0,
            None => SIMTIME_INVALID,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / SIMTIME_ONE_SECOND
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / SIMTIME_ONE_MILLISECOND
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        Self::from_raw_nanos(self.0.checked_add(other.0)?)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        Self::from_raw_nanos(self.0.checked_sub(other.0)?)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self::from_raw_nanos(self.0.checked_add(other.0).unwrap_or(SIMTIME_MAX)).unwrap()
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self::from_raw_nanos(self.0.checked_sub(other.0).unwrap_or(SIMTIME_MIN)).unwrap()
    }

    pub fn try_from_secs(s: u64) -> Option<Self> {
        Self::SECOND.0.checked_mul(s).and_then(Self::from_raw_nanos)
    }

    pub fn from_secs(s: u64) -> Self {
        Self::try_from_secs(s).unwrap()
    }

    pub fn try_from_millis(ms: u64) -> Option<Self> {
        Self::MILLISECOND.0.checked_mul(ms).and_then(Self::from_raw_nanos)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::try_from_millis(ms).unwrap()
    }

    /// Round `latency_ms` up to whole nanoseconds, so a positive latency can never collapse to a
    /// zero delay.
    pub fn ceil_from_millis_f64(latency_ms: f64) -> Self {
        let nanos = (latency_ms * SIMTIME_ONE_MILLISECOND as f64).ceil();
        Self::from_raw_nanos(nanos as u64).unwrap()
    }
}

impl std::ops::Add for SimulationTime {
    type Output = SimulationTime;
    fn add(self, other: Self) -> Self::Output {
        self.checked_add(other).unwrap()
    }
}

impl std::ops::Sub for SimulationTime {
    type Output = SimulationTime;
    fn sub(self, other: Self) -> Self::Output {
        self.checked_sub(other).unwrap()
    }
}

impl std::convert::TryFrom<Duration> for SimulationTime {
    type Error = ();

    fn try_from(val: Duration) -> Result<Self, Self::Error> {
        let nanos: u64 = val.as_nanos().try_into().map_err(|_| ())?;
        Self::from_raw_nanos(nanos).ok_or(())
    }
}

impl std::convert::From<SimulationTime> for Duration {
    fn from(val: SimulationTime) -> Duration {
        Duration::from_nanos(val.0)
    }
}

impl std::ops::Mul<u32> for SimulationTime {
    type Output = SimulationTime;
    fn mul(self, other: u32) -> Self::Output {
        Self::from_raw_nanos(self.0.checked_mul(other.into()).unwrap()).unwrap()
    }
}
