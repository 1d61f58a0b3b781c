use crate::ecs::{CompIdx, ComponentId, Entity, HookKind};
use thiserror::Error;

/// Errors returned by component store operations.
///
/// Everything except `NotFound` and `Conflict` indicates a bug in the caller
/// or in the engine itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {entity} has no live '{component}' component")]
    NotFound { entity: Entity, component: String },

    #[error("entity {entity} already has {occupant} in slot '{slot}'")]
    Conflict {
        entity: Entity,
        slot: String,
        occupant: ComponentId,
    },

    #[error("invalid operation on entity {entity}: {violation}")]
    InvalidOperation { entity: Entity, violation: Violation },

    #[error("component type '{type_name}' is not registered")]
    UnknownComponent { type_name: String },

    #[error("{hook:?} hook of '{component}' on entity {entity} failed: {reason}")]
    Callback {
        entity: Entity,
        component: String,
        hook: HookKind,
        reason: String,
    },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl StoreError {
    pub(crate) fn invalid(entity: Entity, violation: Violation) -> Self {
        StoreError::InvalidOperation { entity, violation }
    }

    /// True for plain lookup misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// What made an operation invalid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("entity does not exist")]
    EntityMissing,
    #[error("component belongs to a different entity")]
    OwnerMismatch,
    #[error("component is already deleted")]
    AlreadyDeleted,
    #[error("metadata and transform only leave with their entity")]
    ProtectedComponent,
    #[error("component data is already borrowed")]
    Borrowed,
    #[error("entity is in the wrong stage")]
    WrongEntityStage,
    #[error("query names the same component type twice")]
    DuplicateQueryType,
    #[error("index {0} is a reference tag and cannot hold a component")]
    ReferenceTag(CompIdx),
}
