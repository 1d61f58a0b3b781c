// lifecycle.rs - Component life stage transitions and entity init/startup
//
// Stage changes go through `Cell`s, so every transition works through
// `&World`. A hook that fails leaves the instance at the stage it had before
// the transition started.

use crate::ecs::storage::ComponentEntry;
use crate::ecs::{
    Component, ComponentId, Entity, EntityLifeStage, HookKind, LifeStage, LifecycleContext,
    LifecycleOrder, StoreError, Violation, World,
};
use std::cell::RefMut;
use std::marker::PhantomData;
use strata_metrics::CounterKind;
use tracing::{debug, error, trace, warn};

impl World {
    // ------------------------------------------------------------------
    // Single-instance transitions
    // ------------------------------------------------------------------

    /// PreAdd -> Adding -> Added
    pub(crate) fn life_add(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self.entry_or_invariant(id)?;
        self.expect_stage(entry, LifeStage::PreAdd)?;
        self.transition(entry, LifeStage::Adding, HookKind::Add, LifeStage::Added)
    }

    /// Added -> Initializing -> Initialized
    pub(crate) fn life_initialize(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self.entry_or_invariant(id)?;
        self.expect_stage(entry, LifeStage::Added)?;
        self.transition(
            entry,
            LifeStage::Initializing,
            HookKind::Initialize,
            LifeStage::Initialized,
        )
    }

    /// Initialized -> Running
    pub(crate) fn life_startup(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self.entry_or_invariant(id)?;
        self.expect_stage(entry, LifeStage::Initialized)?;
        self.transition(entry, LifeStage::Initialized, HookKind::Startup, LifeStage::Running)
    }

    /// Running -> Shutdown
    pub(crate) fn life_shutdown(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self.entry_or_invariant(id)?;
        self.expect_stage(entry, LifeStage::Running)?;
        self.transition(entry, LifeStage::Running, HookKind::Shutdown, LifeStage::Shutdown)
    }

    /// Any attached stage -> Removed
    pub(crate) fn life_remove(&self, id: ComponentId) -> Result<(), StoreError> {
        let entry = self.entry_or_invariant(id)?;
        let stage = entry.stage();
        if matches!(stage, LifeStage::PreAdd | LifeStage::Removed) {
            debug_assert!(false, "remove from stage {stage:?}");
            return Err(StoreError::InternalInvariant(format!(
                "cannot remove component from stage {stage:?}"
            )));
        }
        self.transition(entry, stage, HookKind::Remove, LifeStage::Removed)
    }

    fn expect_stage(&self, entry: &ComponentEntry, expected: LifeStage) -> Result<(), StoreError> {
        let stage = entry.stage();
        if stage == expected {
            return Ok(());
        }
        debug_assert_eq!(stage, expected, "out of order lifecycle transition");
        Err(StoreError::InternalInvariant(format!(
            "'{}' on {} is {stage:?}, expected {expected:?}",
            self.registry.name_of(entry.index),
            entry.owner
        )))
    }

    fn transition(
        &self,
        entry: &ComponentEntry,
        via: LifeStage,
        hook: HookKind,
        to: LifeStage,
    ) -> Result<(), StoreError> {
        let previous = entry.stage();
        entry.stage.set(via);
        if let Err(err) = self.run_hook(entry, hook) {
            entry.stage.set(previous);
            return Err(err);
        }
        entry.stage.set(to);

        if self.config.trace_lifecycle {
            trace!(
                entity = %entry.owner,
                component = self.registry.name_of(entry.index),
                from = ?previous,
                to = ?to,
                "lifecycle transition"
            );
        }
        Ok(())
    }

    fn run_hook(&self, entry: &ComponentEntry, hook: HookKind) -> Result<(), StoreError> {
        let ctx = LifecycleContext {
            entity: entry.owner,
            index: entry.index,
            tick: self.tick(),
        };

        let result = {
            let mut data = entry
                .data
                .try_borrow_mut()
                .map_err(|_| StoreError::invalid(entry.owner, Violation::Borrowed))?;
            match hook {
                HookKind::Add => data.on_add(&ctx),
                HookKind::Initialize => data.initialize(&ctx),
                HookKind::Startup => data.startup(&ctx),
                HookKind::Shutdown => data.shutdown(&ctx),
                HookKind::Remove => data.on_remove(&ctx),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => self.hook_failed(entry, hook, err),
        }
    }

    fn hook_failed(
        &self,
        entry: &ComponentEntry,
        hook: HookKind,
        err: anyhow::Error,
    ) -> Result<(), StoreError> {
        self.counters.increment(CounterKind::CallbackFailed);
        let component = self.registry.name_of(entry.index);

        if cfg!(feature = "exception-tolerance") {
            error!(
                entity = %entry.owner,
                component,
                hook = ?hook,
                error = %format!("{err:#}"),
                "component hook failed, continuing"
            );
            Ok(())
        } else {
            Err(StoreError::Callback {
                entity: entry.owner,
                component: component.to_string(),
                hook,
                reason: format!("{err:#}"),
            })
        }
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Sort handles into creation order (metadata, transform, physics,
    /// everything else) or its exact reverse for teardown. Attach order is
    /// kept within a class. Deleted handles are dropped.
    pub(crate) fn in_safe_order<I>(&self, ids: I, for_creation: bool) -> Vec<ComponentId>
    where
        I: IntoIterator<Item = ComponentId>,
    {
        let mut ordered: Vec<(LifecycleOrder, ComponentId)> = ids
            .into_iter()
            .filter_map(|id| {
                let entry = self.entry(id)?;
                Some((self.registry.order_of(entry.index), id))
            })
            .collect();

        ordered.sort_by_key(|(order, _)| *order);
        if !for_creation {
            ordered.reverse();
        }
        ordered.into_iter().map(|(_, id)| id).collect()
    }

    // ------------------------------------------------------------------
    // Entity readiness
    // ------------------------------------------------------------------

    /// Initialize every component on a `PreInit` entity in creation order.
    ///
    /// Components already at or past `Initialized` are skipped.
    pub fn initialize_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        match self.entity_stage(entity) {
            None => return Err(StoreError::invalid(entity, Violation::EntityMissing)),
            Some(EntityLifeStage::PreInit) => {}
            Some(stage) => {
                warn!(entity = %entity, stage = ?stage, "entity is not awaiting initialization");
                return Err(StoreError::invalid(entity, Violation::WrongEntityStage));
            }
        }
        self.set_entity_stage(entity, EntityLifeStage::Initializing)?;

        let ids = self.in_safe_order(self.component_ids(entity).to_vec(), true);
        for id in ids {
            let pending = self
                .entry(id)
                .map_or(false, |entry| entry.is_live() && entry.stage() == LifeStage::Added);
            if pending {
                self.life_initialize(id)?;
            }
        }

        if cfg!(debug_assertions) {
            for &id in self.component_ids(entity) {
                if let Some(entry) = self.entry(id) {
                    debug_assert!(
                        !entry.is_live() || entry.stage().is_initialized(),
                        "'{}' was not initialized with its entity",
                        self.registry.name_of(entry.index)
                    );
                }
            }
        }

        self.set_entity_stage(entity, EntityLifeStage::Initialized)?;
        debug!(entity = %entity, "entity initialized");
        Ok(())
    }

    /// Start every initialized component on the entity in creation order.
    pub fn start_entity(&mut self, entity: Entity) -> Result<(), StoreError> {
        if !self.entity_exists(entity) {
            return Err(StoreError::invalid(entity, Violation::EntityMissing));
        }

        let ids = self.in_safe_order(self.component_ids(entity).to_vec(), true);
        for id in ids {
            let ready = self
                .entry(id)
                .map_or(false, |entry| entry.is_live() && entry.stage() == LifeStage::Initialized);
            if ready {
                self.life_startup(id)?;
            }
        }
        Ok(())
    }

    /// Bring a component up to its entity's readiness. Used by
    /// [`InitializeGuard`] and by `add` on already-initialized entities.
    pub(crate) fn complete_initialization(&self, id: ComponentId) -> Result<(), StoreError> {
        let Some(entry) = self.entry(id) else {
            return Ok(());
        };
        if !entry.is_live() {
            return Ok(());
        }

        let (initializing, initialized) = match self.entity_stage(entry.owner) {
            Some(EntityLifeStage::Initializing) => (true, false),
            Some(EntityLifeStage::Initialized | EntityLifeStage::Terminating) => (false, true),
            _ => return Ok(()),
        };

        if !entry.stage().is_initialized() {
            self.life_initialize(id)?;
        }
        if initialized && !entry.stage().is_running() {
            self.life_startup(id)?;
        }
        debug_assert!(initializing || initialized);
        Ok(())
    }

    /// Attach a component without running its init hooks yet.
    ///
    /// The returned guard brings the component up to the entity's readiness
    /// when it is finished or dropped, so components added while the entity
    /// is still being built are never initialized twice.
    pub fn add_uninitialized<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<InitializeGuard<'_, T>, StoreError> {
        let idx = self.index_of::<T>()?;
        let id = self.add_internal(entity, idx, Box::new(component), false, true)?;
        Ok(InitializeGuard {
            world: self,
            id,
            entity,
            finished: false,
            _marker: PhantomData,
        })
    }
}

/// Scoped initialization handle returned by
/// [`World::add_uninitialized`].
///
/// ```ignore
/// let mut guard = world.add_uninitialized(entity, Inventory::default())?;
/// guard.component_mut()?.slots = 12;
/// guard.finish()?; // or let it drop
/// ```
pub struct InitializeGuard<'w, T: Component> {
    world: &'w mut World,
    id: ComponentId,
    entity: Entity,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'w, T: Component> InitializeGuard<'w, T> {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Mutable access to the component before its init hooks run.
    pub fn component_mut(&self) -> Result<RefMut<'_, T>, StoreError> {
        self.world.borrow_typed_mut::<T>(self.entity, self.id)
    }

    pub fn world(&self) -> &World {
        self.world
    }

    /// Keep building the entity while the guard is open.
    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }

    /// Complete initialization now and surface any failure.
    pub fn finish(mut self) -> Result<ComponentId, StoreError> {
        self.finished = true;
        self.world.complete_initialization(self.id)?;
        Ok(self.id)
    }
}

impl<T: Component> Drop for InitializeGuard<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.world.complete_initialization(self.id) {
            error!(entity = %self.entity, component = %self.id, error = %err, "deferred initialization failed");
        }
    }
}
