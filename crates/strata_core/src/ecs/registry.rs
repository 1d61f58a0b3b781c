// registry.rs - Component type registry
//
// Assigns every component type (and every abstract reference tag) a stable
// small integer index. The world sizes its per-type tables from the registry
// once at construction, so the registry is frozen behind an `Arc` by
// `RegistryBuilder::build` and never changes afterwards.

use crate::ecs::{
    CompIdx, Component, ComponentDescriptor, MetaData, NetId, RegistrationError, Transform,
};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Creation/teardown class of a component type.
///
/// Creation walks these in ascending order, teardown in exact reverse.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleOrder {
    Metadata,
    Transform,
    Physics,
    General,
}

impl LifecycleOrder {
    fn classify(references: &[CompIdx]) -> Self {
        if references.contains(&CompIdx::METADATA) {
            LifecycleOrder::Metadata
        } else if references.contains(&CompIdx::TRANSFORM) {
            LifecycleOrder::Transform
        } else if references.contains(&CompIdx::PHYSICS_BODY) {
            LifecycleOrder::Physics
        } else {
            LifecycleOrder::General
        }
    }

    /// Metadata and transform can only leave with their entity.
    pub fn is_protected(self) -> bool {
        matches!(self, LifecycleOrder::Metadata | LifecycleOrder::Transform)
    }
}

/// Immutable per-type metadata.
#[derive(Clone, Debug)]
pub struct ComponentRegistration {
    idx: CompIdx,
    name: String,
    type_id: Option<TypeId>,
    references: Vec<CompIdx>,
    net_id: Option<NetId>,
    order: LifecycleOrder,
}

impl ComponentRegistration {
    pub fn idx(&self) -> CompIdx {
        self.idx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` for abstract reference tags.
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Every index an instance of this type is filed under, own index included.
    pub fn references(&self) -> &[CompIdx] {
        &self.references
    }

    pub fn net_id(&self) -> Option<NetId> {
        self.net_id
    }

    pub fn order(&self) -> LifecycleOrder {
        self.order
    }

    pub fn is_reference_tag(&self) -> bool {
        self.type_id.is_none()
    }
}

/// Frozen component registry.
#[derive(Debug)]
pub struct ComponentRegistry {
    registrations: Vec<ComponentRegistration>,
    by_type: HashMap<TypeId, CompIdx>,
    by_name: HashMap<String, CompIdx>,
    by_net_id: HashMap<NetId, CompIdx>,
}

impl ComponentRegistry {
    /// Start a registry with the builtin kinds already in place.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    #[inline]
    pub fn registration(&self, idx: CompIdx) -> Option<&ComponentRegistration> {
        self.registrations.get(idx.slot())
    }

    #[inline]
    pub fn index_of<T: Component>(&self) -> Option<CompIdx> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn index_of_type_id(&self, type_id: TypeId) -> Option<CompIdx> {
        self.by_type.get(&type_id).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<CompIdx> {
        self.by_name.get(name).copied()
    }

    pub fn by_net_id(&self, net_id: NetId) -> Option<CompIdx> {
        self.by_net_id.get(&net_id).copied()
    }

    /// Name for logs; unknown indices render as `<unknown>`.
    pub fn name_of(&self, idx: CompIdx) -> &str {
        self.registration(idx)
            .map(|registration| registration.name())
            .unwrap_or("<unknown>")
    }

    pub fn order_of(&self, idx: CompIdx) -> LifecycleOrder {
        self.registration(idx)
            .map(|registration| registration.order)
            .unwrap_or(LifecycleOrder::General)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentRegistration> {
        self.registrations.iter()
    }
}

/// Mutable registry under construction.
pub struct RegistryBuilder {
    registrations: Vec<ComponentRegistration>,
    by_type: HashMap<TypeId, CompIdx>,
    by_name: HashMap<String, CompIdx>,
    by_net_id: HashMap<NetId, CompIdx>,
}

impl RegistryBuilder {
    const MAX_INDICES: usize = u16::MAX as usize;

    fn new() -> Self {
        let mut builder = Self {
            registrations: Vec::new(),
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            by_net_id: HashMap::new(),
        };
        builder.push_builtin::<MetaData>("MetaData");
        builder.push_builtin::<Transform>("Transform");
        builder.push_tag("PhysicsBody");
        debug_assert_eq!(builder.by_name.get("MetaData"), Some(&CompIdx::METADATA));
        debug_assert_eq!(builder.by_name.get("Transform"), Some(&CompIdx::TRANSFORM));
        debug_assert_eq!(builder.by_name.get("PhysicsBody"), Some(&CompIdx::PHYSICS_BODY));
        builder
    }

    fn push_builtin<T: Component>(&mut self, name: &str) {
        let idx = CompIdx::new(self.registrations.len() as u16);
        self.by_type.insert(TypeId::of::<T>(), idx);
        self.by_name.insert(name.to_string(), idx);
        self.registrations.push(ComponentRegistration {
            idx,
            name: name.to_string(),
            type_id: Some(TypeId::of::<T>()),
            references: vec![idx],
            net_id: None,
            order: LifecycleOrder::classify(&[idx]),
        });
    }

    fn push_tag(&mut self, name: &str) -> CompIdx {
        let idx = CompIdx::new(self.registrations.len() as u16);
        self.by_name.insert(name.to_string(), idx);
        self.registrations.push(ComponentRegistration {
            idx,
            name: name.to_string(),
            type_id: None,
            references: vec![idx],
            net_id: None,
            order: LifecycleOrder::General,
        });
        idx
    }

    fn next_index(&self) -> Result<CompIdx, RegistrationError> {
        if self.registrations.len() >= Self::MAX_INDICES {
            return Err(RegistrationError::Full {
                limit: Self::MAX_INDICES,
            });
        }
        Ok(CompIdx::new(self.registrations.len() as u16))
    }

    /// Register a concrete component type.
    pub fn register(
        &mut self,
        descriptor: ComponentDescriptor,
    ) -> Result<CompIdx, RegistrationError> {
        if let Some(existing) = self.by_type.get(&descriptor.type_id()) {
            return Err(RegistrationError::DuplicateType {
                type_name: descriptor.type_name(),
                existing: self.registrations[existing.slot()].name.clone(),
            });
        }

        if self.by_name.contains_key(descriptor.name()) {
            return Err(RegistrationError::DuplicateName {
                name: descriptor.name().to_string(),
            });
        }

        if let Some(net_id) = descriptor.network_id() {
            if let Some(existing) = self.by_net_id.get(&net_id) {
                return Err(RegistrationError::DuplicateNetId {
                    net_id,
                    existing: self.registrations[existing.slot()].name.clone(),
                    requested: descriptor.name().to_string(),
                });
            }
        }

        for &reference in descriptor.reference_indices() {
            if reference.slot() >= self.registrations.len() {
                return Err(RegistrationError::UnknownReference {
                    name: descriptor.name().to_string(),
                    reference,
                });
            }
            if self.registrations[reference.slot()].type_id.is_some() {
                return Err(RegistrationError::NotATag {
                    name: descriptor.name().to_string(),
                    reference: self.registrations[reference.slot()].name.clone(),
                });
            }
        }

        let idx = self.next_index()?;
        let mut references = Vec::with_capacity(descriptor.reference_indices().len() + 1);
        references.push(idx);
        references.extend_from_slice(descriptor.reference_indices());

        self.by_type.insert(descriptor.type_id(), idx);
        self.by_name.insert(descriptor.name().to_string(), idx);
        if let Some(net_id) = descriptor.network_id() {
            self.by_net_id.insert(net_id, idx);
        }

        self.registrations.push(ComponentRegistration {
            idx,
            name: descriptor.name().to_string(),
            type_id: Some(descriptor.type_id()),
            order: LifecycleOrder::classify(&references),
            references,
            net_id: descriptor.network_id(),
        });

        Ok(idx)
    }

    /// Shorthand for `register(ComponentDescriptor::of::<T>(type_name))` with
    /// the unqualified Rust type name.
    pub fn register_type<T: Component>(&mut self) -> Result<CompIdx, RegistrationError> {
        let full = type_name::<T>();
        let short = full.rsplit("::").next().unwrap_or(full);
        self.register(ComponentDescriptor::of::<T>(short))
    }

    /// Register an abstract reference tag. Component types list it in their
    /// descriptor to become reachable through it.
    pub fn register_reference(
        &mut self,
        name: impl Into<String>,
    ) -> Result<CompIdx, RegistrationError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(RegistrationError::DuplicateName { name });
        }
        self.next_index()?;
        Ok(self.push_tag(&name))
    }

    /// Freeze the registry.
    pub fn build(self) -> Arc<ComponentRegistry> {
        Arc::new(ComponentRegistry {
            registrations: self.registrations,
            by_type: self.by_type,
            by_name: self.by_name,
            by_net_id: self.by_net_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health;
    struct RigidBody;
    struct Sprite;
    crate::define_component!(Health, RigidBody, Sprite);

    #[test]
    fn builtins_have_fixed_indices() {
        let registry = ComponentRegistry::builder().build();
        assert_eq!(registry.index_of::<MetaData>(), Some(CompIdx::METADATA));
        assert_eq!(registry.index_of::<Transform>(), Some(CompIdx::TRANSFORM));
        assert_eq!(registry.by_name("PhysicsBody"), Some(CompIdx::PHYSICS_BODY));
        assert!(registry
            .registration(CompIdx::PHYSICS_BODY)
            .map_or(false, |r| r.is_reference_tag()));
        assert!(registry.order_of(CompIdx::METADATA).is_protected());
        assert!(registry.order_of(CompIdx::TRANSFORM).is_protected());
    }

    #[test]
    fn registration_classifies_and_indexes() {
        let mut builder = ComponentRegistry::builder();
        let health = builder.register_type::<Health>().unwrap();
        let body = builder
            .register(ComponentDescriptor::of::<RigidBody>("RigidBody").physics_body().net_id(3))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.order_of(health), LifecycleOrder::General);
        assert_eq!(registry.order_of(body), LifecycleOrder::Physics);
        assert_eq!(registry.by_name("Health"), Some(health));
        assert_eq!(registry.by_net_id(3), Some(body));

        let registration = registry.registration(body).unwrap();
        assert_eq!(registration.references(), &[body, CompIdx::PHYSICS_BODY]);
        assert_eq!(registration.net_id(), Some(3));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut builder = ComponentRegistry::builder();
        builder
            .register(ComponentDescriptor::of::<Health>("Health").net_id(1))
            .unwrap();

        assert!(matches!(
            builder.register(ComponentDescriptor::of::<Health>("Other")),
            Err(RegistrationError::DuplicateType { .. })
        ));
        assert!(matches!(
            builder.register(ComponentDescriptor::of::<Sprite>("Health")),
            Err(RegistrationError::DuplicateName { .. })
        ));
        assert!(matches!(
            builder.register(ComponentDescriptor::of::<Sprite>("Sprite").net_id(1)),
            Err(RegistrationError::DuplicateNetId { net_id: 1, .. })
        ));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let mut builder = ComponentRegistry::builder();
        let result = builder
            .register(ComponentDescriptor::of::<Sprite>("Sprite").references([CompIdx::new(40)]));
        assert!(matches!(
            result,
            Err(RegistrationError::UnknownReference { .. })
        ));
    }

    #[test]
    fn concrete_types_cannot_be_referenced() {
        let mut builder = ComponentRegistry::builder();
        let health = builder.register_type::<Health>().unwrap();
        let result =
            builder.register(ComponentDescriptor::of::<Sprite>("Sprite").references([health]));
        assert!(matches!(result, Err(RegistrationError::NotATag { .. })));

        let result = builder
            .register(ComponentDescriptor::of::<RigidBody>("RigidBody").references([CompIdx::TRANSFORM]));
        assert!(matches!(result, Err(RegistrationError::NotATag { .. })));
    }

    #[test]
    fn reference_tags_can_be_shared() {
        let mut builder = ComponentRegistry::builder();
        let drawable = builder.register_reference("Drawable").unwrap();
        let sprite = builder
            .register(ComponentDescriptor::of::<Sprite>("Sprite").references([drawable]))
            .unwrap();
        let registry = builder.build();

        assert_eq!(
            registry.registration(sprite).unwrap().references(),
            &[sprite, drawable]
        );
        assert_eq!(registry.name_of(drawable), "Drawable");
    }
}
