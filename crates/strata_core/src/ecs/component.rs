// component.rs - Component trait, handles and lifecycle stages
//
// Component *types* are identified by small `CompIdx` values handed out by
// the registry, not Rust TypeIds. Component *instances* are identified by
// generational `ComponentId` handles into the world's slot arena.

use crate::ecs::Entity;
use crate::time::SimulationTick;
use std::any::Any;
use std::fmt;

/// Wire identifier for networked component types.
pub type NetId = u16;

/// Registry index of a component type or reference tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompIdx(u16);

impl CompIdx {
    /// Builtin metadata component. Every entity has exactly one.
    pub const METADATA: CompIdx = CompIdx(0);
    /// Builtin transform component. Every entity has exactly one.
    pub const TRANSFORM: CompIdx = CompIdx(1);
    /// Abstract tag referenced by physics-capable component types.
    pub const PHYSICS_BODY: CompIdx = CompIdx(2);

    pub(crate) const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub(crate) const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CompIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one component instance.
///
/// Handles stay cheap to copy and compare after the instance is gone; a
/// deleted instance's slot bumps its generation, so the handle simply stops
/// resolving.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    slot: u32,
    generation: u32,
}

impl ComponentId {
    pub(crate) const DANGLING: ComponentId = ComponentId {
        slot: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub fn slot(self) -> u32 {
        self.slot
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}v{}", self.slot, self.generation)
    }
}

/// Position of a component instance in its lifecycle.
///
/// Stages only move forward. Deletion is not a stage: a deleted instance
/// has left the arena and its handle no longer resolves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifeStage {
    PreAdd,
    Adding,
    Added,
    Initializing,
    Initialized,
    Running,
    Shutdown,
    Removed,
}

impl LifeStage {
    /// Initialized or any later stage.
    pub fn is_initialized(self) -> bool {
        self >= LifeStage::Initialized
    }

    pub fn is_running(self) -> bool {
        self == LifeStage::Running
    }
}

/// Removal protocol state.
///
/// `PendingDeletion` instances have been shut down and removed but are still
/// indexed until the next [`World::cull`](crate::ecs::World::cull).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Liveness {
    Live,
    PendingDeletion,
}

/// Which user hook is being invoked.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    Add,
    Initialize,
    Startup,
    Shutdown,
    Remove,
}

/// Passed to every lifecycle hook.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LifecycleContext {
    pub entity: Entity,
    pub index: CompIdx,
    pub tick: SimulationTick,
}

/// Object-safe access to the concrete type behind a `dyn Component`.
pub trait ComponentAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> ComponentAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A data + behavior unit attached to exactly one entity.
///
/// Every hook defaults to a no-op. Hooks run on the simulation thread while
/// the store is mid-transition; they only see their own data and the
/// [`LifecycleContext`]. Returning an error is treated as a bug in game
/// logic: with the `exception-tolerance` feature the store logs it and
/// carries on, otherwise the operation fails with
/// [`StoreError::Callback`](crate::ecs::StoreError::Callback).
///
/// # Example
/// ```ignore
/// struct Health { current: u32 }
///
/// impl Component for Health {
///     fn startup(&mut self, ctx: &LifecycleContext) -> anyhow::Result<()> {
///         tracing::debug!(entity = %ctx.entity, "health online");
///         Ok(())
///     }
/// }
/// ```
pub trait Component: ComponentAny {
    /// Runs once while the instance is being attached (Adding -> Added).
    fn on_add(&mut self, _ctx: &LifecycleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// One-time setup once the owning entity is initializing.
    fn initialize(&mut self, _ctx: &LifecycleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The owning entity has fully joined the simulation.
    fn startup(&mut self, _ctx: &LifecycleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// One-time teardown, only called on running instances.
    fn shutdown(&mut self, _ctx: &LifecycleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs while the instance is being detached (-> Removed).
    fn on_remove(&mut self, _ctx: &LifecycleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) fn downcast_ref<T: Component>(component: &dyn Component) -> Option<&T> {
    component.as_any().downcast_ref::<T>()
}

pub(crate) fn downcast_mut<T: Component>(component: &mut dyn Component) -> Option<&mut T> {
    component.as_any_mut().downcast_mut::<T>()
}

/// Implement [`Component`] with no lifecycle hooks.
///
/// # Example
/// ```ignore
/// #[derive(Default)]
/// struct Velocity { x: f32, y: f32 }
///
/// define_component!(Velocity);
/// ```
#[macro_export]
macro_rules! define_component {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::ecs::Component for $ty {}
        )+
    };
}
