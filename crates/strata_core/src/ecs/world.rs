// world.rs - Component store: entities, per-type indices and accessors
//
// Structural operations (add, remove, cull, spawn/delete) live in store.rs,
// lifecycle.rs and deletion.rs as further `impl World` blocks and take
// `&mut self`. Everything here is a read path or a `Cell`/`RefCell` update
// that is safe while queries are open.

use crate::config::WorldConfig;
use crate::ecs::deletion::DeletionQueue;
use crate::ecs::storage::{ComponentEntry, ComponentSlots, TypeTable};
use crate::ecs::{
    component, CompIdx, Component, ComponentEvent, ComponentEventKind, ComponentId,
    ComponentRegistry, Entity, EntityAllocator, EntityLifeStage, EventBus, EventFilter, LifeStage,
    Liveness, MetaData, NetId, StoreError, SubscriptionId, Transform, Violation,
};
use crate::time::{SimulationTick, SimulationTime};
use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use strata_metrics::LifecycleCounters;
use tracing::{debug, error};

/// Owns every entity and component instance of one simulation.
pub struct World {
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) config: WorldConfig,
    pub(crate) entities: EntityAllocator,
    pub(crate) components: ComponentSlots,
    /// One table per registry index, reference tags included.
    pub(crate) tables: Vec<TypeTable>,
    pub(crate) entity_index: HashMap<Entity, Vec<ComponentId>>,
    pub(crate) net_index: HashMap<Entity, BTreeMap<NetId, ComponentId>>,
    pub(crate) deletion: RefCell<DeletionQueue>,
    pub(crate) events: EventBus,
    pub(crate) dirty: RefCell<BTreeSet<Entity>>,
    pub(crate) time: SimulationTime,
    pub(crate) counters: LifecycleCounters,
}

impl World {
    /// Create an empty world over a frozen registry.
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::with_config(registry, WorldConfig::default())
    }

    pub fn with_config(registry: Arc<ComponentRegistry>, config: WorldConfig) -> Self {
        let tables = (0..registry.len()).map(|_| TypeTable::new()).collect();
        Self {
            entities: EntityAllocator::with_capacity(config.entity_capacity),
            components: ComponentSlots::with_capacity(config.component_capacity),
            tables,
            entity_index: HashMap::with_capacity(config.entity_capacity),
            net_index: HashMap::new(),
            deletion: RefCell::new(DeletionQueue::with_capacity(config.deletion_capacity)),
            events: EventBus::new(),
            dirty: RefCell::new(BTreeSet::new()),
            time: SimulationTime::new(),
            counters: LifecycleCounters::new(),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Allocate an entity and attach its uninitialized metadata and
    /// transform.
    ///
    /// The entity stays in [`EntityLifeStage::PreInit`] until
    /// [`initialize_entity`](Self::initialize_entity) is called, so further
    /// components can be added without triggering their init hooks.
    pub fn spawn_entity(&mut self, name: impl Into<String>) -> Result<Entity, StoreError> {
        let entity = self.entities.allocate();
        self.entity_index.insert(entity, Vec::new());

        let attached = self
            .add_internal(entity, CompIdx::METADATA, Box::new(MetaData::named(name)), false, true)
            .and_then(|_| {
                self.add_internal(entity, CompIdx::TRANSFORM, Box::new(Transform::default()), false, true)
            });

        if let Err(err) = attached {
            self.dispose_all(entity)?;
            self.entities.free(entity);
            return Err(err);
        }

        debug!(entity = %entity, "spawned entity");
        Ok(entity)
    }

    /// Spawn, initialize and start an entity with only its builtins.
    pub fn spawn_initialized(&mut self, name: impl Into<String>) -> Result<Entity, StoreError> {
        let entity = self.spawn_entity(name)?;
        self.initialize_entity(entity)?;
        self.start_entity(entity)?;
        Ok(entity)
    }

    /// Tear down every component on the entity in safe order and free its id.
    pub fn delete_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        if !self.entities.is_alive(entity) {
            return Err(StoreError::invalid(entity, Violation::EntityMissing));
        }

        self.set_entity_stage(entity, EntityLifeStage::Terminating)?;
        self.dispose_all(entity)?;
        self.entities.free(entity);
        debug!(entity = %entity, "deleted entity");
        Ok(())
    }

    #[inline]
    pub fn entity_exists(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter()
    }

    /// Stage recorded in the entity's metadata, `None` if it has none.
    pub fn entity_stage(&self, entity: Entity) -> Option<EntityLifeStage> {
        self.try_get::<MetaData>(entity).map(|meta| meta.entity_stage)
    }

    pub(crate) fn set_entity_stage(
        &self,
        entity: Entity,
        stage: EntityLifeStage,
    ) -> Result<(), StoreError> {
        let mut meta = self.get_mut::<MetaData>(entity)?;
        meta.entity_stage = stage;
        Ok(())
    }

    /// Pause or resume an entity. Paused entities drop out of queries that
    /// do not ask for them explicitly, starting with the next enumeration
    /// step.
    pub fn set_paused(&self, entity: Entity, paused: bool) -> Result<(), StoreError> {
        let mut meta = self.get_mut::<MetaData>(entity)?;
        meta.paused = paused;
        Ok(())
    }

    /// Entities without metadata count as paused.
    pub fn is_paused(&self, entity: Entity) -> bool {
        self.try_get::<MetaData>(entity).map_or(true, |meta| meta.paused)
    }

    // ------------------------------------------------------------------
    // Component lookup
    // ------------------------------------------------------------------

    /// Registry index of `T`.
    pub fn index_of<T: Component>(&self) -> Result<CompIdx, StoreError> {
        self.registry
            .index_of::<T>()
            .ok_or_else(|| StoreError::UnknownComponent {
                type_name: type_name::<T>().to_string(),
            })
    }

    #[inline]
    pub(crate) fn slot_of(&self, entity: Entity, idx: CompIdx) -> Option<ComponentId> {
        self.tables.get(idx.slot())?.get(&entity).copied()
    }

    #[inline]
    pub(crate) fn entry(&self, id: ComponentId) -> Option<&ComponentEntry> {
        self.components.get(id)
    }

    pub(crate) fn entry_or_invariant(&self, id: ComponentId) -> Result<&ComponentEntry, StoreError> {
        self.components
            .get(id)
            .ok_or_else(|| StoreError::InternalInvariant(format!("component {id} is not in the arena")))
    }

    fn not_found(&self, entity: Entity, idx: CompIdx) -> StoreError {
        StoreError::NotFound {
            entity,
            component: self.registry.name_of(idx).to_string(),
        }
    }

    /// Borrow the `T` on `entity`.
    ///
    /// Fails with [`StoreError::NotFound`] when nothing is indexed, and with
    /// [`Violation::Borrowed`] when the component is mutably borrowed.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Ref<'_, T>, StoreError> {
        let idx = self.index_of::<T>()?;
        let id = self
            .slot_of(entity, idx)
            .ok_or_else(|| self.not_found(entity, idx))?;
        self.borrow_typed(entity, id)
    }

    /// Like [`get`](Self::get) but reports every failure as `None`.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<Ref<'_, T>> {
        let id = self.slot_of(entity, self.registry.index_of::<T>()?)?;
        self.borrow_typed(entity, id).ok()
    }

    /// Mutably borrow the `T` on `entity`.
    ///
    /// The borrow is checked at runtime, so this works through `&World` and
    /// from inside a query.
    pub fn get_mut<T: Component>(&self, entity: Entity) -> Result<RefMut<'_, T>, StoreError> {
        let idx = self.index_of::<T>()?;
        let id = self
            .slot_of(entity, idx)
            .ok_or_else(|| self.not_found(entity, idx))?;
        self.borrow_typed_mut(entity, id)
    }

    pub fn try_get_mut<T: Component>(&self, entity: Entity) -> Option<RefMut<'_, T>> {
        let id = self.slot_of(entity, self.registry.index_of::<T>()?)?;
        self.borrow_typed_mut(entity, id).ok()
    }

    /// True if a `T` is indexed for `entity`. Unregistered types are never
    /// present.
    #[inline]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.registry
            .index_of::<T>()
            .map_or(false, |idx| self.has_index(entity, idx))
    }

    /// True if anything fills `idx` (a type or a reference tag) on `entity`.
    #[inline]
    pub fn has_index(&self, entity: Entity, idx: CompIdx) -> bool {
        self.slot_of(entity, idx)
            .map_or(false, |id| self.components.contains(id))
    }

    /// Untyped borrow through any index, reference tags included.
    pub fn get_by_index(
        &self,
        entity: Entity,
        idx: CompIdx,
    ) -> Result<Ref<'_, dyn Component>, StoreError> {
        let id = self
            .slot_of(entity, idx)
            .ok_or_else(|| self.not_found(entity, idx))?;
        self.borrow_dyn(entity, id)
    }

    pub fn try_get_by_index(&self, entity: Entity, idx: CompIdx) -> Option<Ref<'_, dyn Component>> {
        let id = self.slot_of(entity, idx)?;
        self.borrow_dyn(entity, id).ok()
    }

    /// Untyped borrow by handle. `None` once the instance is deleted.
    pub fn component(&self, id: ComponentId) -> Option<Ref<'_, dyn Component>> {
        let entry = self.entry(id)?;
        let data = entry.data.try_borrow().ok()?;
        Some(Ref::map(data, |boxed| &**boxed))
    }

    pub(crate) fn borrow_typed<T: Component>(
        &self,
        entity: Entity,
        id: ComponentId,
    ) -> Result<Ref<'_, T>, StoreError> {
        let entry = self.entry_or_invariant(id)?;
        let data = entry
            .data
            .try_borrow()
            .map_err(|_| StoreError::invalid(entity, Violation::Borrowed))?;
        Ref::filter_map(data, |boxed| component::downcast_ref::<T>(&**boxed))
            .map_err(|_| self.type_mismatch::<T>(id))
    }

    pub(crate) fn borrow_typed_mut<T: Component>(
        &self,
        entity: Entity,
        id: ComponentId,
    ) -> Result<RefMut<'_, T>, StoreError> {
        let entry = self.entry_or_invariant(id)?;
        let data = entry
            .data
            .try_borrow_mut()
            .map_err(|_| StoreError::invalid(entity, Violation::Borrowed))?;
        RefMut::filter_map(data, |boxed| component::downcast_mut::<T>(&mut **boxed))
            .map_err(|_| self.type_mismatch::<T>(id))
    }

    fn borrow_dyn(&self, entity: Entity, id: ComponentId) -> Result<Ref<'_, dyn Component>, StoreError> {
        let entry = self.entry_or_invariant(id)?;
        let data = entry
            .data
            .try_borrow()
            .map_err(|_| StoreError::invalid(entity, Violation::Borrowed))?;
        Ok(Ref::map(data, |boxed| &**boxed))
    }

    fn type_mismatch<T: Component>(&self, id: ComponentId) -> StoreError {
        StoreError::InternalInvariant(format!(
            "component {id} is indexed as '{}'",
            type_name::<T>()
        ))
    }

    /// Every component on `entity`, in attach order.
    ///
    /// The id list is copied when this is called; instances deleted before
    /// the iterator reaches them are skipped, and so are components that are
    /// mutably borrowed at that moment.
    pub fn get_all(
        &self,
        entity: Entity,
    ) -> impl Iterator<Item = (ComponentId, Ref<'_, dyn Component>)> + '_ {
        let snapshot = self.component_ids(entity).to_vec();
        snapshot.into_iter().filter_map(move |id| {
            let entry = self.entry(id)?;
            match entry.data.try_borrow() {
                Ok(data) => Some((id, Ref::map(data, |boxed| &**boxed))),
                Err(_) => {
                    error!(
                        entity = %entity,
                        component = self.registry.name_of(entry.index),
                        "component mutably borrowed, skipping"
                    );
                    None
                }
            }
        })
    }

    /// Handles of every component on `entity`, in attach order.
    pub fn component_ids(&self, entity: Entity) -> &[ComponentId] {
        self.entity_index
            .get(&entity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Handle of the `T` on `entity`.
    pub fn component_id<T: Component>(&self, entity: Entity) -> Option<ComponentId> {
        self.slot_of(entity, self.registry.index_of::<T>()?)
    }

    pub fn life_stage(&self, id: ComponentId) -> Option<LifeStage> {
        self.entry(id).map(ComponentEntry::stage)
    }

    pub fn liveness(&self, id: ComponentId) -> Option<Liveness> {
        self.entry(id).map(|entry| entry.liveness.get())
    }

    /// True once the instance has left every index.
    pub fn is_deleted(&self, id: ComponentId) -> bool {
        !self.components.contains(id)
    }

    pub fn owner_of(&self, id: ComponentId) -> Option<Entity> {
        self.entry(id).map(|entry| entry.owner)
    }

    /// Registry index the instance was added under.
    pub fn index_of_component(&self, id: ComponentId) -> Option<CompIdx> {
        self.entry(id).map(|entry| entry.index)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    // ------------------------------------------------------------------
    // Time, events, metrics
    // ------------------------------------------------------------------

    #[inline]
    pub fn tick(&self) -> SimulationTick {
        self.time.tick()
    }

    pub fn advance_tick(&mut self) -> SimulationTick {
        self.time.advance_tick()
    }

    pub fn time(&self) -> &SimulationTime {
        &self.time
    }

    pub fn counters(&self) -> &LifecycleCounters {
        &self.counters
    }

    /// Register a lifecycle event handler.
    pub fn subscribe<F>(&self, filter: EventFilter, callback: F) -> SubscriptionId
    where
        F: FnMut(&World, &ComponentEvent) + 'static,
    {
        self.events.subscribe(filter, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn emit(
        &self,
        kind: ComponentEventKind,
        entity: Entity,
        component: ComponentId,
        index: CompIdx,
    ) {
        self.events.emit(
            self,
            ComponentEvent {
                kind,
                entity,
                component,
                index,
            },
        );
    }

    /// Drop every entity and component at once.
    ///
    /// No hooks run and no events fire. Outstanding entity and component
    /// handles all go stale.
    pub fn clear(&mut self) {
        let alive: Vec<Entity> = self.entities.iter().collect();
        for entity in alive {
            self.entities.free(entity);
        }
        self.components.clear();
        for table in &mut self.tables {
            table.clear();
        }
        self.entity_index.clear();
        self.net_index.clear();
        self.deletion.get_mut().clear();
        self.dirty.get_mut().clear();
        debug!("world cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ComponentDescriptor;

    #[derive(Debug, Default, PartialEq)]
    struct Health(u32);
    crate::define_component!(Health);

    fn world() -> World {
        let mut builder = ComponentRegistry::builder();
        builder
            .register(ComponentDescriptor::of::<Health>("Health"))
            .unwrap();
        World::new(builder.build())
    }

    #[test]
    fn spawned_entities_carry_builtins() {
        let mut world = world();
        let entity = world.spawn_entity("crate").unwrap();

        assert!(world.entity_exists(entity));
        assert!(world.has::<MetaData>(entity));
        assert!(world.has::<Transform>(entity));
        assert_eq!(world.get::<MetaData>(entity).unwrap().name, "crate");
        assert_eq!(world.entity_stage(entity), Some(EntityLifeStage::PreInit));
        assert_eq!(world.component_ids(entity).len(), 2);
    }

    #[test]
    fn get_mut_through_shared_world() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        world.add(entity, Health(3), false).unwrap();

        world.get_mut::<Health>(entity).unwrap().0 = 7;
        assert_eq!(*world.get::<Health>(entity).unwrap(), Health(7));

        let held = world.get_mut::<Health>(entity).unwrap();
        assert!(matches!(
            world.get::<Health>(entity),
            Err(StoreError::InvalidOperation {
                violation: Violation::Borrowed,
                ..
            })
        ));
        drop(held);
    }

    #[test]
    fn missing_component_is_not_found() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        assert!(world.get::<Health>(entity).unwrap_err().is_not_found());
        assert!(world.try_get::<Health>(entity).is_none());
        assert!(!world.has::<Health>(entity));
    }

    #[test]
    fn unregistered_types_are_reported() {
        struct Stray;
        crate::define_component!(Stray);

        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        assert!(!world.has::<Stray>(entity));
        assert!(matches!(
            world.add(entity, Stray, false),
            Err(StoreError::UnknownComponent { .. })
        ));
    }

    #[test]
    fn get_all_is_a_snapshot() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let health = world.add(entity, Health(1), false).unwrap();

        let ids: Vec<ComponentId> = world.get_all(entity).map(|(id, _)| id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], health);

        let mut seen = 0;
        for id in world.get_all(entity).map(|(id, _)| id) {
            if id == health {
                assert!(world.remove_component_deferred(entity, id).unwrap());
            }
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert_eq!(world.pending_deletions(), 1);
    }

    #[test]
    fn get_all_skips_mutably_borrowed() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let health = world.add(entity, Health(1), false).unwrap();

        let held = world.get_mut::<Health>(entity).unwrap();
        let ids: Vec<ComponentId> = world.get_all(entity).map(|(id, _)| id).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&health));
        drop(held);

        assert_eq!(world.get_all(entity).count(), 3);
    }

    #[test]
    fn clear_invalidates_handles() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        let health = world.add(entity, Health(1), false).unwrap();

        world.clear();
        assert!(!world.entity_exists(entity));
        assert!(world.is_deleted(health));
        assert_eq!(world.component_count(), 0);
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn pause_flag_lives_in_metadata() {
        let mut world = world();
        let entity = world.spawn_initialized("crate").unwrap();
        assert!(!world.is_paused(entity));
        world.set_paused(entity, true).unwrap();
        assert!(world.is_paused(entity));
        assert!(world.get::<MetaData>(entity).unwrap().paused);
        assert!(world.is_paused(Entity::INVALID));
    }
}
