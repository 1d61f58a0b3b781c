//! Deterministic simulation time
//!
//! Fixed 60Hz tick rate. The tick counter doubles as the modification stamp
//! used by the network index to find components that need resynchronizing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fixed simulation tick rate (60 Hz = 16.666ms per tick)
pub const TICK_RATE_HZ: u32 = 60;
pub const TICK_DURATION: Duration = Duration::from_micros(16_666); // ~16.666ms

/// Monotonic simulation tick number.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimulationTick(u64);

impl SimulationTick {
    pub const ZERO: SimulationTick = SimulationTick(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SimulationTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Simulation time tracker
pub struct SimulationTime {
    tick: SimulationTick,
    accumulated_time: Duration,
}

impl SimulationTime {
    pub fn new() -> Self {
        Self {
            tick: SimulationTick::ZERO,
            accumulated_time: Duration::ZERO,
        }
    }

    pub fn tick(&self) -> SimulationTick {
        self.tick
    }

    pub fn advance_tick(&mut self) -> SimulationTick {
        self.tick = self.tick.next();
        self.accumulated_time += TICK_DURATION;
        self.tick
    }

    pub fn total_time(&self) -> Duration {
        self.accumulated_time
    }
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_moves_tick_and_time_together() {
        let mut time = SimulationTime::new();
        assert_eq!(time.tick(), SimulationTick::ZERO);

        let tick = time.advance_tick();
        time.advance_tick();

        assert_eq!(tick, SimulationTick::new(1));
        assert_eq!(time.tick().raw(), 2);
        assert_eq!(time.total_time(), TICK_DURATION * 2);
    }
}
