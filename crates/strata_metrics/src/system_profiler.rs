//! Per-tick phase profiler

use std::time::{Duration, Instant};

/// Accumulates the time spent in named phases of a simulation tick
/// (systems, cull, event dispatch).
///
/// Phases are kept in first-seen order so reports are stable between runs.
pub struct TickProfiler {
    phases: Vec<(&'static str, Duration)>,
    ticks: u64,
}

impl TickProfiler {
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            ticks: 0,
        }
    }

    pub fn time_phase<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        match self.phases.iter_mut().find(|(phase, _)| *phase == name) {
            Some((_, total)) => *total += elapsed,
            None => self.phases.push((name, elapsed)),
        }
        result
    }

    pub fn end_tick(&mut self) {
        self.ticks += 1;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn total(&self, name: &str) -> Duration {
        self.phases
            .iter()
            .find(|(phase, _)| *phase == name)
            .map(|(_, total)| *total)
            .unwrap_or(Duration::ZERO)
    }

    /// Mean time per tick spent in `name`.
    pub fn average(&self, name: &str) -> Duration {
        if self.ticks == 0 {
            return Duration::ZERO;
        }
        self.total(name) / self.ticks as u32
    }

    pub fn reset(&mut self) {
        self.phases.clear();
        self.ticks = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.phases.iter().copied()
    }
}

impl Default for TickProfiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_keep_first_seen_order() {
        let mut profiler = TickProfiler::new();
        profiler.time_phase("systems", || ());
        profiler.time_phase("cull", || ());
        profiler.time_phase("systems", || ());
        profiler.end_tick();

        let names: Vec<_> = profiler.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["systems", "cull"]);
        assert_eq!(profiler.ticks(), 1);
    }

    #[test]
    fn average_is_zero_without_ticks() {
        let profiler = TickProfiler::new();
        assert_eq!(profiler.average("systems"), Duration::ZERO);
    }
}
