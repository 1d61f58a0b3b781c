// store.rs - Adding and removing components
//
// Index updates for a single component are all-or-nothing: a component is
// either filed under every reference index, the per-entity list and (when it
// has one) the network index, or under none of them.

use crate::ecs::storage::ComponentEntry;
use crate::ecs::{
    CompIdx, Component, ComponentEventKind, ComponentId, Entity, EntityLifeStage, LifeStage,
    Liveness, StoreError, Violation, World,
};
use std::sync::Arc;
use strata_metrics::CounterKind;
use tracing::{error, trace, warn};

impl World {
    /// Attach `component` to `entity`.
    ///
    /// Fails with [`StoreError::Conflict`] if a live component already fills
    /// one of the new component's reference indices and `overwrite` is
    /// false; with `overwrite` the occupant is torn down first. Components
    /// waiting for the next cull never block an add and are deleted on the
    /// spot.
    ///
    /// If the entity is already initializing or initialized, the new
    /// component is brought up to the same readiness before this returns.
    pub fn add<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
        overwrite: bool,
    ) -> Result<ComponentId, StoreError> {
        let idx = self.index_of::<T>()?;
        self.add_internal(entity, idx, Box::new(component), overwrite, false)
    }

    /// Attach a default-constructed `T`.
    pub fn add_default<T: Component + Default>(
        &mut self,
        entity: Entity,
    ) -> Result<ComponentId, StoreError> {
        self.add(entity, T::default(), false)
    }

    /// Return the live `T` on `entity`, adding a default one if needed.
    pub fn ensure<T: Component + Default>(
        &mut self,
        entity: Entity,
    ) -> Result<ComponentId, StoreError> {
        if let Some(id) = self.component_id::<T>(entity) {
            if self.entry(id).map_or(false, ComponentEntry::is_live) {
                return Ok(id);
            }
        }
        self.add_default::<T>(entity)
    }

    /// Attach an already boxed component under an explicit index.
    ///
    /// The box must hold the concrete type registered at `idx`.
    pub fn add_boxed(
        &mut self,
        entity: Entity,
        idx: CompIdx,
        component: Box<dyn Component>,
        overwrite: bool,
    ) -> Result<ComponentId, StoreError> {
        let expected = self
            .registry
            .registration(idx)
            .and_then(|registration| registration.type_id());
        if expected != Some((*component).as_any().type_id()) {
            return Err(StoreError::UnknownComponent {
                type_name: format!("boxed component for index {idx}"),
            });
        }
        self.add_internal(entity, idx, component, overwrite, false)
    }

    pub(crate) fn add_internal(
        &mut self,
        entity: Entity,
        idx: CompIdx,
        component: Box<dyn Component>,
        overwrite: bool,
        skip_init: bool,
    ) -> Result<ComponentId, StoreError> {
        if !self.entities.is_alive(entity) {
            return Err(StoreError::invalid(entity, Violation::EntityMissing));
        }

        let registry = Arc::clone(&self.registry);
        let registration = registry
            .registration(idx)
            .ok_or_else(|| StoreError::UnknownComponent {
                type_name: format!("index {idx}"),
            })?;
        if registration.is_reference_tag() {
            return Err(StoreError::invalid(entity, Violation::ReferenceTag(idx)));
        }

        // Validate every slot before touching anything.
        let mut displaced: Vec<ComponentId> = Vec::new();
        for &slot in registration.references() {
            let Some(occupant) = self.slot_of(entity, slot) else {
                continue;
            };
            let Some(entry) = self.entry(occupant) else {
                return Err(StoreError::InternalInvariant(format!(
                    "index '{}' of {entity} points at deleted {occupant}",
                    registry.name_of(slot)
                )));
            };
            if entry.is_live() {
                if !overwrite {
                    return Err(StoreError::Conflict {
                        entity,
                        slot: registry.name_of(slot).to_string(),
                        occupant,
                    });
                }
                if registry.order_of(entry.index).is_protected() {
                    warn!(entity = %entity, component = registry.name_of(entry.index), "refusing to overwrite a protected component");
                    return Err(StoreError::invalid(entity, Violation::ProtectedComponent));
                }
            }
            if !displaced.contains(&occupant) {
                displaced.push(occupant);
            }
        }

        for occupant in displaced {
            self.remove_immediate(entity, occupant, false)?;
        }

        let id = self
            .components
            .insert(ComponentEntry::new(entity, idx, component, self.tick()));
        for &slot in registration.references() {
            let previous = self.tables[slot.slot()].insert(entity, id);
            debug_assert!(previous.is_none(), "displaced occupant still indexed");
        }
        self.entity_index.entry(entity).or_default().push(id);
        if let Some(net_id) = registration.net_id() {
            self.net_index.entry(entity).or_default().insert(net_id, id);
        }

        if let Err(err) = self.life_add(id) {
            self.detach(id);
            return Err(err);
        }

        if registration.net_id().is_some() {
            self.stamp_dirty(id);
        }
        self.counters.increment(CounterKind::Added);
        self.emit(ComponentEventKind::Added, entity, id, idx);

        if !skip_init {
            if let Err(err) = self.complete_initialization(id) {
                self.abort_add(id);
                return Err(err);
            }
        }
        Ok(id)
    }

    /// Undo an add whose initialization failed. Subscribers that saw Added
    /// get the matching Removed and Deleted. A displaced occupant stays
    /// deleted.
    fn abort_add(&mut self, id: ComponentId) {
        if let Err(err) = self.retire(id) {
            warn!(component = %id, error = %err, "teardown of a failed add also failed");
        }
        self.delete_component(id);
    }

    /// Remove the `T` on `entity` right away.
    ///
    /// Returns `Ok(false)` if there is nothing to remove. Metadata and
    /// transform are refused with [`Violation::ProtectedComponent`].
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<bool, StoreError> {
        let idx = self.index_of::<T>()?;
        self.remove_index(entity, idx)
    }

    /// Remove whatever fills `idx` on `entity`, reference tags included.
    pub fn remove_index(&mut self, entity: Entity, idx: CompIdx) -> Result<bool, StoreError> {
        let Some(id) = self.slot_of(entity, idx) else {
            return Ok(false);
        };
        self.remove_immediate(entity, id, false)?;
        Ok(true)
    }

    /// Like [`remove_index`](Self::remove_index) but also accepts metadata
    /// and transform. The entity is left without a builtin it relies on, so
    /// this is only for callers about to destroy or rebuild it.
    pub fn remove_protected(&mut self, entity: Entity, idx: CompIdx) -> Result<bool, StoreError> {
        let Some(id) = self.slot_of(entity, idx) else {
            return Ok(false);
        };
        self.remove_immediate(entity, id, true)?;
        Ok(true)
    }

    /// Remove a component by handle. `entity` must be its owner.
    pub fn remove_component(&mut self, entity: Entity, id: ComponentId) -> Result<(), StoreError> {
        self.remove_immediate(entity, id, false)
    }

    /// Shutdown, remove and delete in one go. A component already waiting
    /// for the cull skips straight to deletion.
    pub(crate) fn remove_immediate(
        &mut self,
        owner: Entity,
        id: ComponentId,
        allow_protected: bool,
    ) -> Result<(), StoreError> {
        let entry = self.check_removal(owner, id, allow_protected)?;

        if entry.is_live() {
            self.retire(id)?;
        } else {
            self.deletion.get_mut().forget(id);
            self.retire_postponed(id);
        }
        self.delete_component(id);
        Ok(())
    }

    /// Owner and protection checks shared by both removal paths.
    pub(crate) fn check_removal(
        &self,
        owner: Entity,
        id: ComponentId,
        allow_protected: bool,
    ) -> Result<&ComponentEntry, StoreError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| StoreError::invalid(owner, Violation::AlreadyDeleted))?;

        if entry.owner != owner {
            return Err(StoreError::invalid(owner, Violation::OwnerMismatch));
        }

        if !allow_protected && self.registry.order_of(entry.index).is_protected() {
            warn!(
                entity = %owner,
                component = self.registry.name_of(entry.index),
                "tried to remove a protected component"
            );
            return Err(StoreError::invalid(owner, Violation::ProtectedComponent));
        }
        Ok(entry)
    }

    /// Shutdown (if running) and Remove, then fire Removed.
    ///
    /// The instance is flagged `PendingDeletion` for the duration, so a
    /// Removed handler that asks for a deferred removal of the same
    /// component gets a no-op. On failure the flag is cleared again.
    pub(crate) fn retire(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self.entry_or_invariant(id)?;
        entry.liveness.set(Liveness::PendingDeletion);

        if let Err(err) = self.shutdown_and_remove(entry, id) {
            entry.liveness.set(Liveness::Live);
            return Err(err);
        }

        self.counters.increment(CounterKind::Removed);
        self.emit(ComponentEventKind::Removed, entry.owner, id, entry.index);
        Ok(())
    }

    /// Run the Shutdown and Remove that a deferred removal skipped because
    /// the data was borrowed. No-op for instances already at `Removed`.
    ///
    /// The instance is deleted right after this either way, so a failing
    /// hook is logged rather than returned.
    pub(crate) fn retire_postponed(&self, id: ComponentId) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        if entry.stage() == LifeStage::Removed {
            return;
        }

        match self.shutdown_and_remove(entry, id) {
            Ok(()) => {
                self.counters.increment(CounterKind::Removed);
                self.emit(ComponentEventKind::Removed, entry.owner, id, entry.index);
            }
            Err(err) => error!(
                entity = %entry.owner,
                component = self.registry.name_of(entry.index),
                error = %err,
                "postponed teardown failed, deleting anyway"
            ),
        }
    }

    fn shutdown_and_remove(&self, entry: &ComponentEntry, id: ComponentId) -> Result<(), StoreError> {
        if entry.stage().is_running() {
            self.life_shutdown(id)?;
        }
        if entry.stage() != LifeStage::PreAdd {
            self.life_remove(id)?;
        }
        Ok(())
    }

    /// Final step: drop the instance from every index and the arena, then
    /// fire Deleted.
    pub(crate) fn delete_component(&mut self, id: ComponentId) {
        let Some((owner, idx)) = self.detach(id) else {
            return;
        };

        self.counters.increment(CounterKind::Deleted);
        if self.config.trace_lifecycle {
            trace!(entity = %owner, component = self.registry.name_of(idx), "component deleted");
        }
        self.emit(ComponentEventKind::Deleted, owner, id, idx);
    }

    /// Unfile an instance everywhere and free its slot. No events.
    pub(crate) fn detach(&mut self, id: ComponentId) -> Option<(Entity, CompIdx)> {
        let entry = self.components.remove(id)?;
        let owner = entry.owner;
        let registry = Arc::clone(&self.registry);
        let registration = registry.registration(entry.index)?;

        for &slot in registration.references() {
            let table = &mut self.tables[slot.slot()];
            if table.get(&owner) == Some(&id) {
                table.remove(&owner);
            }
        }

        if let Some(ids) = self.entity_index.get_mut(&owner) {
            ids.retain(|other| *other != id);
        }

        if let Some(net_id) = registration.net_id() {
            if let Some(net_set) = self.net_index.get_mut(&owner) {
                if net_set.get(&net_id) == Some(&id) {
                    net_set.remove(&net_id);
                }
                if net_set.is_empty() {
                    self.net_index.remove(&owner);
                }
            }
            self.dirty.get_mut().insert(owner);
        }

        Some((owner, entry.index))
    }

    /// Remove every component except metadata and transform, in teardown
    /// order.
    pub fn remove_all(&mut self, entity: Entity) -> Result<(), StoreError> {
        let ids = self.in_safe_order(self.component_ids(entity).to_vec(), false);
        for id in ids {
            let protected = self
                .entry(id)
                .map_or(true, |entry| self.registry.order_of(entry.index).is_protected());
            if !protected {
                self.remove_immediate(entity, id, false)?;
            }
        }
        Ok(())
    }

    /// Remove every component including the protected ones, in teardown
    /// order, and forget the entity in the per-entity index.
    ///
    /// Only for entities that are being destroyed.
    pub fn dispose_all(&mut self, entity: Entity) -> Result<(), StoreError> {
        let ids = self.in_safe_order(self.component_ids(entity).to_vec(), false);
        for id in ids {
            if self.index_of_component(id) == Some(CompIdx::METADATA) {
                // Metadata goes last; its own teardown sees the entity as gone.
                self.set_entity_stage(entity, EntityLifeStage::Deleted).ok();
            }
            self.remove_immediate(entity, id, true)?;
        }

        self.entity_index.remove(&entity);
        self.net_index.remove(&entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ecs::{
        CompIdx, Component, ComponentDescriptor, ComponentRegistry, LifecycleContext, Liveness,
        MetaData, StoreError, Transform, Violation, World,
    };

    #[derive(Debug, Default, PartialEq)]
    struct Health(u32);
    #[derive(Debug, Default, PartialEq)]
    struct Armor(u32);
    #[derive(Debug, Default, PartialEq)]
    struct Shield(u32);
    crate::define_component!(Health, Armor, Shield);

    /// Refuses to initialize.
    #[derive(Debug, Default)]
    struct Brittle;

    impl Component for Brittle {
        fn initialize(&mut self, _ctx: &LifecycleContext) -> anyhow::Result<()> {
            anyhow::bail!("cracked")
        }
    }

    fn world() -> World {
        let mut builder = ComponentRegistry::builder();
        let defense = builder.register_reference("Defense").unwrap();
        builder.register_type::<Health>().unwrap();
        builder.register_type::<Brittle>().unwrap();
        builder
            .register(ComponentDescriptor::of::<Armor>("Armor").references([defense]))
            .unwrap();
        builder
            .register(ComponentDescriptor::of::<Shield>("Shield").references([defense]))
            .unwrap();
        World::new(builder.build())
    }

    #[test]
    fn add_then_get_returns_the_component() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let id = world.add(entity, Health(10), false).unwrap();

        assert!(world.has::<Health>(entity));
        assert_eq!(*world.get::<Health>(entity).unwrap(), Health(10));
        assert_eq!(world.component_id::<Health>(entity), Some(id));
        assert_eq!(world.owner_of(id), Some(entity));
    }

    #[test]
    fn conflicting_add_is_rejected_without_overwrite() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let first = world.add(entity, Health(1), false).unwrap();

        let err = world.add(entity, Health(2), false).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { occupant, .. } if occupant == first));
        assert_eq!(*world.get::<Health>(entity).unwrap(), Health(1));

        let second = world.add(entity, Health(3), true).unwrap();
        assert!(world.is_deleted(first));
        assert_eq!(world.component_id::<Health>(entity), Some(second));
        assert_eq!(*world.get::<Health>(entity).unwrap(), Health(3));
    }

    #[test]
    fn reference_slots_conflict_across_types() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let defense = world.registry().by_name("Defense").unwrap();

        world.add(entity, Armor(5), false).unwrap();
        assert!(matches!(
            world.add(entity, Shield(5), false),
            Err(StoreError::Conflict { .. })
        ));

        world.add(entity, Shield(6), true).unwrap();
        assert!(!world.has::<Armor>(entity));
        assert!(world.has_index(entity, defense));
    }

    #[test]
    fn remove_detaches_everywhere() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let id = world.add(entity, Health(1), false).unwrap();

        assert!(world.remove::<Health>(entity).unwrap());
        assert!(!world.has::<Health>(entity));
        assert!(world.get::<Health>(entity).unwrap_err().is_not_found());
        assert!(world.is_deleted(id));
        assert!(!world.component_ids(entity).contains(&id));
        assert!(!world.remove::<Health>(entity).unwrap());
    }

    #[test]
    fn protected_components_stay() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();

        for result in [world.remove::<MetaData>(entity), world.remove::<Transform>(entity)] {
            assert!(matches!(
                result,
                Err(StoreError::InvalidOperation {
                    violation: Violation::ProtectedComponent,
                    ..
                })
            ));
        }
        assert!(world.has::<MetaData>(entity));
        assert!(world.has::<Transform>(entity));

        assert!(world.remove_protected(entity, CompIdx::TRANSFORM).unwrap());
        assert!(!world.has::<Transform>(entity));
        assert!(world.has::<MetaData>(entity));
    }

    #[test]
    fn owner_mismatch_is_rejected() {
        let mut world = world();
        let a = world.spawn_initialized("a").unwrap();
        let b = world.spawn_initialized("b").unwrap();
        let id = world.add(a, Health(1), false).unwrap();

        assert!(matches!(
            world.remove_component(b, id),
            Err(StoreError::InvalidOperation {
                violation: Violation::OwnerMismatch,
                ..
            })
        ));
        assert!(world.has::<Health>(a));
    }

    #[test]
    fn add_to_missing_entity_fails() {
        let mut world = world();
        let entity = world.spawn_initialized("gone").unwrap();
        world.delete_entity(entity).unwrap();

        assert!(matches!(
            world.add(entity, Health(1), false),
            Err(StoreError::InvalidOperation {
                violation: Violation::EntityMissing,
                ..
            })
        ));
    }

    #[test]
    fn pending_occupant_is_displaced() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let old = world.add(entity, Health(1), false).unwrap();
        world.remove_deferred::<Health>(entity).unwrap();
        assert_eq!(world.liveness(old), Some(Liveness::PendingDeletion));

        let new = world.add(entity, Health(2), false).unwrap();
        assert!(world.is_deleted(old));
        assert_eq!(world.pending_deletions(), 0);
        assert_eq!(world.component_id::<Health>(entity), Some(new));
        assert_eq!(world.cull(), 0);
    }

    #[test]
    fn remove_all_keeps_builtins_and_dispose_all_does_not() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        world.add(entity, Health(1), false).unwrap();
        world.add(entity, Armor(1), false).unwrap();

        world.remove_all(entity).unwrap();
        assert_eq!(world.component_ids(entity).len(), 2);
        assert!(world.has::<MetaData>(entity));

        world.dispose_all(entity).unwrap();
        assert!(world.component_ids(entity).is_empty());
        assert!(!world.has::<Transform>(entity));
    }

    #[test]
    fn ensure_reuses_live_components() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let first = world.ensure::<Health>(entity).unwrap();
        let again = world.ensure::<Health>(entity).unwrap();
        assert_eq!(first, again);
        assert_eq!(*world.get::<Health>(entity).unwrap(), Health(0));
    }

    #[test]
    fn add_boxed_checks_the_concrete_type() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let health = world.index_of::<Health>().unwrap();

        assert!(world.add_boxed(entity, health, Box::new(Armor(1)), false).is_err());
        assert!(world.add_boxed(entity, health, Box::new(Health(4)), false).is_ok());
        assert_eq!(*world.get::<Health>(entity).unwrap(), Health(4));
    }

    mod hook_failures {
        use super::*;
        use crate::ecs::{ComponentEvent, ComponentEventKind, EventFilter, HookKind, LifeStage};
        use std::cell::RefCell;
        use std::rc::Rc;
        use strata_metrics::CounterKind;

        #[cfg(not(feature = "exception-tolerance"))]
        #[test]
        fn failed_initialization_rolls_the_add_back() {
            let mut world = world();
            let entity = world.spawn_initialized("crate").unwrap();
            let before = world.component_count();

            let kinds = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&kinds);
            world.subscribe(EventFilter::ALL, move |_: &World, event: &ComponentEvent| {
                sink.borrow_mut().push(event.kind)
            });

            let err = world.add(entity, Brittle, false).unwrap_err();
            assert!(matches!(
                err,
                StoreError::Callback {
                    hook: HookKind::Initialize,
                    ..
                }
            ));
            assert!(!world.has::<Brittle>(entity));
            assert_eq!(world.component_count(), before);
            assert_eq!(world.component_ids(entity).len(), 2);
            assert_eq!(
                *kinds.borrow(),
                vec![
                    ComponentEventKind::Added,
                    ComponentEventKind::Removed,
                    ComponentEventKind::Deleted,
                ]
            );

            // Nothing left behind to conflict with.
            assert!(matches!(
                world.add(entity, Brittle, false),
                Err(StoreError::Callback { .. })
            ));
            #[cfg(feature = "metrics")]
            assert_eq!(world.counters().get(CounterKind::CallbackFailed), 2);
        }

        #[cfg(feature = "exception-tolerance")]
        #[test]
        fn failed_initialization_is_tolerated() {
            let mut world = world();
            let entity = world.spawn_initialized("crate").unwrap();

            let id = world.add(entity, Brittle, false).unwrap();
            assert!(world.has::<Brittle>(entity));
            assert_eq!(world.life_stage(id), Some(LifeStage::Running));
            #[cfg(feature = "metrics")]
            assert_eq!(world.counters().get(CounterKind::CallbackFailed), 1);
        }
    }
}
