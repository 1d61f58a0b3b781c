// storage.rs - Generational slot arena for component instances
//
// Every live component instance sits in exactly one slot. Per-type tables,
// the per-entity index and the network index only store `ComponentId`
// handles into this arena. Freeing a slot bumps its generation, which is
// what makes a handle read as deleted afterwards.

use crate::ecs::{CompIdx, Component, ComponentId, Entity, LifeStage, Liveness};
use crate::time::SimulationTick;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Per-type table: which component (if any) fills this index for an entity.
pub(crate) type TypeTable = HashMap<Entity, ComponentId>;

/// One component instance plus its lifecycle bookkeeping.
///
/// Stage, liveness and the modification stamp are `Cell`s so the deferred
/// removal path can move them forward through `&World`.
pub(crate) struct ComponentEntry {
    pub owner: Entity,
    pub index: CompIdx,
    pub stage: Cell<LifeStage>,
    pub liveness: Cell<Liveness>,
    pub last_modified: Cell<SimulationTick>,
    pub data: RefCell<Box<dyn Component>>,
}

impl ComponentEntry {
    pub fn new(owner: Entity, index: CompIdx, data: Box<dyn Component>, tick: SimulationTick) -> Self {
        Self {
            owner,
            index,
            stage: Cell::new(LifeStage::PreAdd),
            liveness: Cell::new(Liveness::Live),
            last_modified: Cell::new(tick),
            data: RefCell::new(data),
        }
    }

    #[inline]
    pub fn stage(&self) -> LifeStage {
        self.stage.get()
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.liveness.get() == Liveness::Live
    }
}

struct Slot {
    generation: u32,
    entry: Option<ComponentEntry>,
}

/// Slot arena with a LIFO free list.
pub(crate) struct ComponentSlots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ComponentSlots {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, entry: ComponentEntry) -> ComponentId {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let cell = &mut self.slots[slot as usize];
            debug_assert!(cell.entry.is_none());
            cell.entry = Some(entry);
            return ComponentId::new(slot, cell.generation);
        }

        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        ComponentId::new(slot, 0)
    }

    #[inline]
    pub fn get(&self, id: ComponentId) -> Option<&ComponentEntry> {
        let slot = self.slots.get(id.slot() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.get(id).is_some()
    }

    /// Free the slot. The handle (and every copy of it) stops resolving.
    pub fn remove(&mut self, id: ComponentId) -> Option<ComponentEntry> {
        let slot = self.slots.get_mut(id.slot() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot());
        self.len -= 1;
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Drop every instance. Outstanding handles all go stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
        // Keep the free list LIFO from the front of the arena.
        self.free.reverse();
        self.len = 0;
    }
}
