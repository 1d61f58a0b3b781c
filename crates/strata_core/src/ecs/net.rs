// net.rs - Network-id index and dirty tracking
//
// The network index is derived from the primary store: `add_internal` and
// `detach` update it in the same step as the per-type tables, so it never
// disagrees with them about which components exist.

use crate::ecs::{
    component, CompIdx, Component, ComponentId, Entity, MetaData, NetId, StoreError, Violation,
    World,
};
use crate::time::SimulationTick;
use std::cell::Ref;

impl World {
    /// Every networked component on `entity`, ascending by net id.
    pub fn net_components(&self, entity: Entity) -> impl Iterator<Item = (NetId, ComponentId)> + '_ {
        self.net_index
            .get(&entity)
            .into_iter()
            .flat_map(|set| set.iter().map(|(net_id, id)| (*net_id, *id)))
    }

    pub fn net_component_id(&self, entity: Entity, net_id: NetId) -> Option<ComponentId> {
        self.net_index.get(&entity)?.get(&net_id).copied()
    }

    #[inline]
    pub fn has_net(&self, entity: Entity, net_id: NetId) -> bool {
        self.net_component_id(entity, net_id)
            .map_or(false, |id| self.components.contains(id))
    }

    pub fn try_get_net(&self, entity: Entity, net_id: NetId) -> Option<Ref<'_, dyn Component>> {
        self.component(self.net_component_id(entity, net_id)?)
    }

    pub fn get_net(&self, entity: Entity, net_id: NetId) -> Result<Ref<'_, dyn Component>, StoreError> {
        let id = self
            .net_component_id(entity, net_id)
            .ok_or_else(|| StoreError::NotFound {
                entity,
                component: format!("net id {net_id}"),
            })?;
        self.component(id)
            .ok_or_else(|| StoreError::invalid(entity, Violation::Borrowed))
    }

    /// Remove by network id right away. `Ok(false)` if nothing has that id.
    pub fn remove_net(&mut self, entity: Entity, net_id: NetId) -> Result<bool, StoreError> {
        let Some(id) = self.net_component_id(entity, net_id) else {
            return Ok(false);
        };
        self.remove_immediate(entity, id, false)?;
        Ok(true)
    }

    /// Deferred removal by network id.
    pub fn remove_deferred_net(&self, entity: Entity, net_id: NetId) -> Result<bool, StoreError> {
        let Some(id) = self.net_component_id(entity, net_id) else {
            return Ok(false);
        };
        self.defer_removal(entity, id)
    }

    /// Flag a component for resynchronization.
    ///
    /// Stamps the component and its entity's metadata with the current tick
    /// and records the entity for [`take_dirty_entities`](Self::take_dirty_entities).
    pub fn mark_dirty(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| StoreError::invalid(Entity::INVALID, Violation::AlreadyDeleted))?;
        let tick = self.tick();
        entry.last_modified.set(tick);

        if entry.index != CompIdx::METADATA {
            self.get_mut::<MetaData>(entry.owner)?.last_modified = tick;
        }
        self.dirty.borrow_mut().insert(entry.owner);
        Ok(())
    }

    /// Infallible variant used by the store; skips the metadata stamp if
    /// metadata is borrowed.
    pub(crate) fn stamp_dirty(&self, id: ComponentId) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        let tick = self.tick();
        entry.last_modified.set(tick);

        if let Some(meta_id) = self.slot_of(entry.owner, CompIdx::METADATA) {
            if let Some(meta_entry) = self.entry(meta_id) {
                if let Ok(mut data) = meta_entry.data.try_borrow_mut() {
                    if let Some(meta) = component::downcast_mut::<MetaData>(&mut **data) {
                        meta.last_modified = tick;
                    }
                }
            }
        }
        self.dirty.borrow_mut().insert(entry.owner);
    }

    /// Tick at which the component was added or last marked dirty.
    pub fn last_modified(&self, id: ComponentId) -> Option<SimulationTick> {
        self.entry(id).map(|entry| entry.last_modified.get())
    }

    pub fn entity_last_modified(&self, entity: Entity) -> Option<SimulationTick> {
        self.try_get::<MetaData>(entity).map(|meta| meta.last_modified)
    }

    /// Entities touched since the last call, ascending.
    ///
    /// Includes entities whose networked components were deleted, which may
    /// no longer exist.
    pub fn take_dirty_entities(&self) -> Vec<Entity> {
        std::mem::take(&mut *self.dirty.borrow_mut())
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{ComponentDescriptor, ComponentRegistry};

    #[derive(Debug, Default)]
    struct Position(f32);
    #[derive(Debug, Default)]
    struct Velocity(f32);
    crate::define_component!(Position, Velocity);

    fn world() -> World {
        let mut builder = ComponentRegistry::builder();
        builder
            .register(ComponentDescriptor::of::<Position>("Position").net_id(7))
            .unwrap();
        builder
            .register(ComponentDescriptor::of::<Velocity>("Velocity").net_id(3))
            .unwrap();
        World::new(builder.build())
    }

    #[test]
    fn net_index_follows_the_store() {
        let mut world = world();
        let entity = world.spawn_initialized("ship").unwrap();
        let position = world.add(entity, Position(1.0), false).unwrap();
        let velocity = world.add(entity, Velocity(2.0), false).unwrap();

        assert_eq!(
            world.net_components(entity).collect::<Vec<_>>(),
            vec![(3, velocity), (7, position)]
        );
        assert!(world.has_net(entity, 7) && world.has::<Position>(entity));

        world.remove::<Position>(entity).unwrap();
        assert!(!world.has_net(entity, 7));
        assert!(!world.has::<Position>(entity));

        assert!(world.remove_net(entity, 3).unwrap());
        assert!(!world.has::<Velocity>(entity));
        assert_eq!(world.net_components(entity).count(), 0);
    }

    #[test]
    fn deferred_net_removal_keeps_both_views_in_step() {
        let mut world = world();
        let entity = world.spawn_initialized("ship").unwrap();
        world.add(entity, Position(1.0), false).unwrap();

        assert!(world.remove_deferred_net(entity, 7).unwrap());
        assert_eq!(world.has_net(entity, 7), world.has::<Position>(entity));
        world.cull();
        assert!(!world.has_net(entity, 7));
        assert_eq!(world.has_net(entity, 7), world.has::<Position>(entity));
    }

    #[test]
    fn dirty_tracking_stamps_ticks() {
        let mut world = world();
        let entity = world.spawn_initialized("ship").unwrap();
        world.add(entity, Position(1.0), false).unwrap();
        assert_eq!(world.take_dirty_entities(), vec![entity]);
        assert!(world.take_dirty_entities().is_empty());

        let tick = world.advance_tick();
        let id = world.component_id::<Position>(entity).unwrap();
        world.mark_dirty(id).unwrap();

        assert_eq!(world.last_modified(id), Some(tick));
        assert_eq!(world.entity_last_modified(entity), Some(tick));
        assert_eq!(world.take_dirty_entities(), vec![entity]);
    }
}
