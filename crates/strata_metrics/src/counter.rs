//! Lifecycle counters for the component store

use std::cell::Cell;
use std::fmt;

/// Events counted by [`LifecycleCounters`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Added,
    Removed,
    Deferred,
    Deleted,
    Culled,
    CallbackFailed,
}

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

    fn slot(self) -> usize {
        self as usize
    }
}

/// Running totals of lifecycle transitions.
///
/// Counters use `Cell` so they can be bumped through a shared borrow of the
/// store (the deferred-removal path only has `&World`).
#[derive(Default)]
pub struct LifecycleCounters {
    counts: [Cell<u64>; 6],
}

impl LifecycleCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, kind: CounterKind) {
        self.add(kind, 1);
    }

    pub fn add(&self, kind: CounterKind, value: u64) {
        let cell = &self.counts[kind.slot()];
        cell.set(cell.get() + value);
    }

    pub fn get(&self, kind: CounterKind) -> u64 {
        self.counts[kind.slot()].get()
    }

    pub fn reset(&self) {
        for cell in &self.counts {
            cell.set(0);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CounterKind, u64)> + '_ {
        CounterKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }
}

impl fmt::Debug for LifecycleCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, value) in self.iter() {
            map.entry(&kind.name(), &value);
        }
        map.finish()
    }
}
