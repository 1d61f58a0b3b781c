// deletion.rs - Deferred removal and the per-tick cull
//
// Deferred removal runs Shutdown and Remove right away but leaves the
// instance filed in every index, flagged `PendingDeletion`, so open queries
// keep seeing it. If the caller still holds a borrow of the data (the usual
// case inside a query loop) the hooks wait for the cull instead.
// `World::cull` is the single point where those instances are finally
// detached.

use crate::ecs::{CompIdx, Component, ComponentId, Entity, Liveness, StoreError, World};
use std::collections::HashSet;
use strata_metrics::CounterKind;
use tracing::{debug, trace};

/// Handles waiting for the next cull, in the order they were queued.
#[derive(Debug, Default)]
pub(crate) struct DeletionQueue {
    order: Vec<ComponentId>,
    members: HashSet<ComponentId>,
}

impl DeletionQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: Vec::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns false if `id` was already queued.
    pub fn insert(&mut self, id: ComponentId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push(id);
        true
    }

    pub fn forget(&mut self, id: ComponentId) {
        if self.members.remove(&id) {
            self.order.retain(|queued| *queued != id);
        }
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.members.contains(&id)
    }

    pub fn drain(&mut self) -> Vec<ComponentId> {
        self.members.clear();
        std::mem::take(&mut self.order)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

impl World {
    /// Shut down and remove the `T` on `entity` now, delete it at the next
    /// [`cull`](Self::cull).
    ///
    /// Safe to call while a query is open. Returns `Ok(false)` if there is
    /// no `T` or it is already waiting for the cull.
    pub fn remove_deferred<T: Component>(&self, entity: Entity) -> Result<bool, StoreError> {
        let idx = self.index_of::<T>()?;
        self.remove_deferred_index(entity, idx)
    }

    pub fn remove_deferred_index(&self, entity: Entity, idx: CompIdx) -> Result<bool, StoreError> {
        let Some(id) = self.slot_of(entity, idx) else {
            return Ok(false);
        };
        self.defer_removal(entity, id)
    }

    /// Deferred removal by handle. `entity` must be its owner.
    pub fn remove_component_deferred(
        &self,
        entity: Entity,
        id: ComponentId,
    ) -> Result<bool, StoreError> {
        self.defer_removal(entity, id)
    }

    pub(crate) fn defer_removal(&self, owner: Entity, id: ComponentId) -> Result<bool, StoreError> {
        let entry = self.check_removal(owner, id, false)?;
        if entry.liveness.get() == Liveness::PendingDeletion {
            return Ok(false);
        }

        if !self.deletion.borrow_mut().insert(id) {
            return Ok(false);
        }

        if entry.data.try_borrow_mut().is_err() {
            // Held by the caller; Shutdown and Remove run at the cull.
            entry.liveness.set(Liveness::PendingDeletion);
            self.counters.increment(CounterKind::Deferred);
            if self.config.trace_lifecycle {
                trace!(
                    entity = %owner,
                    component = self.registry.name_of(entry.index),
                    "teardown hooks postponed to cull"
                );
            }
            return Ok(true);
        }

        if let Err(err) = self.retire(id) {
            self.deletion.borrow_mut().forget(id);
            return Err(err);
        }

        self.counters.increment(CounterKind::Deferred);
        Ok(true)
    }

    /// Number of components waiting for the next cull.
    pub fn pending_deletions(&self) -> usize {
        self.deletion.borrow().len()
    }

    pub fn is_pending_deletion(&self, id: ComponentId) -> bool {
        self.deletion.borrow().contains(id)
    }

    /// Delete everything queued by deferred removal, in teardown order.
    ///
    /// Components whose Shutdown and Remove were postponed run them here,
    /// just before their own deletion. Returns how many components were
    /// deleted. With nothing queued this does nothing. Removals requested by
    /// Removed or Deleted handlers during the cull wait for the next one.
    pub fn cull(&mut self) -> usize {
        let queued = self.deletion.get_mut().drain();
        if queued.is_empty() {
            return 0;
        }

        let ordered = self.in_safe_order(queued, false);
        let culled = ordered.len();
        for id in ordered {
            self.retire_postponed(id);
            self.delete_component(id);
        }

        self.counters.add(CounterKind::Culled, culled as u64);
        debug!(culled, "culled deferred components");
        culled
    }
}
