use crate::ecs::{CompIdx, Component, NetId};
use std::any::{type_name, TypeId};

/// Describes a component type before it is registered.
///
/// ```ignore
/// let body = ComponentDescriptor::of::<RigidBody>("RigidBody")
///     .physics_body()
///     .net_id(4);
/// let idx = builder.register(body)?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDescriptor {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    references: Vec<CompIdx>,
    net_id: Option<NetId>,
}

impl ComponentDescriptor {
    /// Create a new descriptor for `T` under the provided name.
    pub fn of<T: Component>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            references: Vec::new(),
            net_id: None,
        }
    }

    /// Replace the set of extra reference indices this type satisfies.
    ///
    /// The type's own index is always included on registration and does not
    /// need to be listed.
    pub fn references<I>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = CompIdx>,
    {
        self.references = Self::sanitize(references);
        self
    }

    /// Append a single reference index.
    pub fn add_reference(&mut self, reference: CompIdx) {
        self.references.push(reference);
        self.references = Self::sanitize(std::mem::take(&mut self.references));
    }

    /// Mark the type as physics-capable. It is then initialized after
    /// transforms and torn down before them.
    pub fn physics_body(mut self) -> Self {
        self.add_reference(CompIdx::PHYSICS_BODY);
        self
    }

    /// Give the type a network id so the store keeps it in the per-entity
    /// network index.
    pub fn net_id(mut self, net_id: NetId) -> Self {
        self.net_id = Some(net_id);
        self
    }

    /// Unique component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Extra reference indices, sorted and deduplicated.
    pub fn reference_indices(&self) -> &[CompIdx] {
        &self.references
    }

    pub fn network_id(&self) -> Option<NetId> {
        self.net_id
    }

    fn sanitize<I>(references: I) -> Vec<CompIdx>
    where
        I: IntoIterator<Item = CompIdx>,
    {
        let mut list: Vec<CompIdx> = references.into_iter().collect();
        list.sort_unstable();
        list.dedup();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Body;
    crate::define_component!(Body);

    #[test]
    fn references_are_sorted_and_deduplicated() {
        let descriptor = ComponentDescriptor::of::<Body>("Body")
            .references([CompIdx::new(7), CompIdx::new(4), CompIdx::new(7)])
            .physics_body();

        assert_eq!(
            descriptor.reference_indices(),
            &[CompIdx::PHYSICS_BODY, CompIdx::new(4), CompIdx::new(7)]
        );
        assert_eq!(descriptor.network_id(), None);
        assert_eq!(descriptor.type_id(), TypeId::of::<Body>());
    }
}
