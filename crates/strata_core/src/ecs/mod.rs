//! Component store and lifecycle engine.
//!
//! Component *types* are registered once in a [`ComponentRegistry`] and
//! addressed by small [`CompIdx`] values. The [`World`] keeps one table per
//! index, a per-entity component list and a network-id index, and drives
//! every instance through its [`LifeStage`]s:
//!
//! ```text
//! PreAdd -> Adding -> Added -> Initializing -> Initialized -> Running
//!        -> Shutdown -> Removed -> (deleted)
//! ```
//!
//! Creation runs metadata, transform, physics-capable components and then
//! everything else; teardown runs the exact reverse.
//!
//! Structural changes take `&mut World`. Reads, `get_mut`, queries and
//! deferred removal work through `&World`, so the borrow checker keeps
//! immediate removal out of open iterations.

mod builtin;
mod component;
mod deletion;
mod descriptor;
mod entity;
mod error;
mod events;
mod lifecycle;
mod net;
mod query;
mod registration_error;
mod registry;
mod storage;
mod store;
mod world;

pub use builtin::{EntityLifeStage, MetaData, Transform};
pub use component::{
    CompIdx, Component, ComponentAny, ComponentId, HookKind, LifeStage, LifecycleContext,
    Liveness, NetId,
};
pub use descriptor::ComponentDescriptor;
pub use entity::Entity;
pub(crate) use entity::EntityAllocator;
pub use error::{StoreError, Violation};
pub use events::{ComponentEvent, ComponentEventKind, EventBus, EventFilter, SubscriptionId};
pub use lifecycle::InitializeGuard;
pub use query::{
    ComponentLookup, IndexQuery, Query, QueryIter, QueryMut, QueryMutIter, QuerySet,
};
pub use registration_error::RegistrationError;
pub use registry::{ComponentRegistration, ComponentRegistry, LifecycleOrder, RegistryBuilder};
pub use world::World;
