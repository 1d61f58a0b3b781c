//! Strata Metrics - lifecycle counters and tick profiling
//!
//! Provides zero-cost abstractions for metrics collection that completely
//! vanish in production builds via feature flags.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use strata_metrics::{CounterKind, LifecycleCounters, TickProfiler};
//!
//! let counters = LifecycleCounters::new();
//! counters.increment(CounterKind::Added);
//!
//! let mut profiler = TickProfiler::new();
//! profiler.time_phase("cull", || world.cull());
//! profiler.end_tick();
//! ```
//!
//! In production builds (without `metrics` feature), all instrumentation
//! is compiled out to zero overhead.

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod system_profiler;

#[cfg(feature = "metrics")]
pub use counter::{CounterKind, LifecycleCounters};
#[cfg(feature = "metrics")]
pub use system_profiler::TickProfiler;

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Added,
    Removed,
    Deferred,
    Deleted,
    Culled,
    CallbackFailed,
}

#[cfg(not(feature = "metrics"))]
impl CounterKind {
    pub const ALL: [CounterKind; 6] = [
        CounterKind::Added,
        CounterKind::Removed,
        CounterKind::Deferred,
        CounterKind::Deleted,
        CounterKind::Culled,
        CounterKind::CallbackFailed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CounterKind::Added => "added",
            CounterKind::Removed => "removed",
            CounterKind::Deferred => "deferred",
            CounterKind::Deleted => "deleted",
            CounterKind::Culled => "culled",
            CounterKind::CallbackFailed => "callback_failed",
        }
    }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct LifecycleCounters;

#[cfg(not(feature = "metrics"))]
impl LifecycleCounters {
    pub fn new() -> Self { Self }
    pub fn increment(&self, _kind: CounterKind) {}
    pub fn add(&self, _kind: CounterKind, _value: u64) {}
    pub fn get(&self, _kind: CounterKind) -> u64 { 0 }
    pub fn reset(&self) {}
    pub fn iter(&self) -> impl Iterator<Item = (CounterKind, u64)> + '_ { std::iter::empty() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Default)]
pub struct TickProfiler;

#[cfg(not(feature = "metrics"))]
impl TickProfiler {
    pub fn new() -> Self { Self }
    pub fn time_phase<F, R>(&mut self, _name: &'static str, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn end_tick(&mut self) {}
    pub fn ticks(&self) -> u64 { 0 }
    pub fn total(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn average(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn reset(&mut self) {}
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, std::time::Duration)> + '_ { std::iter::empty() }
}
