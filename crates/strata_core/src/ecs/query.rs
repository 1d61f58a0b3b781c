//! Join queries over the per-type tables.
//!
//! A query names 1 to 4 component types as a tuple. The smallest of the
//! requested tables drives the enumeration and the others are checked per
//! candidate entity. Queries borrow the world shared, so the only removal
//! available while one is open is the deferred path.
//!
//! ```ignore
//! for (entity, (mut transform, velocity)) in world.query_mut::<(Transform, Velocity)>()? {
//!     transform.local_position += velocity.0;
//! }
//!
//! for (entity, fuse) in world.query::<(Fuse,)>()?.include_paused() {
//!     if fuse.remaining == 0 {
//!         world.remove_deferred::<Fuse>(entity)?;
//!     }
//! }
//! ```
//!
//! Paused entities are skipped unless the query asks for them. The check
//! runs per candidate while enumerating, so a pause issued mid-iteration
//! applies to entities not yet visited.

use crate::ecs::storage::TypeTable;
use crate::ecs::{
    component, CompIdx, Component, ComponentId, Entity, MetaData, StoreError, Violation, World,
};
use std::cell::{Ref, RefMut};
use std::collections::hash_map;
use std::marker::PhantomData;
use tracing::error;

const MAX_QUERY_LEN: usize = 4;

/// A tuple of component types a query can join on.
///
/// `(A,)` yields `Ref<A>`; wider tuples yield tuples of borrows.
pub trait QuerySet: 'static {
    const LEN: usize;
    type Item<'w>;
    type ItemMut<'w>;

    #[doc(hidden)]
    fn indices(world: &World) -> Result<Vec<CompIdx>, StoreError>;
    #[doc(hidden)]
    fn fetch<'w>(world: &'w World, ids: &[ComponentId]) -> Option<Self::Item<'w>>;
    #[doc(hidden)]
    fn fetch_mut<'w>(world: &'w World, ids: &[ComponentId]) -> Option<Self::ItemMut<'w>>;
}

/// A component the caller is still holding makes the whole item drop out.
fn fetch_ref<T: Component>(world: &World, id: ComponentId) -> Option<Ref<'_, T>> {
    let entry = world.entry(id)?;
    let Ok(data) = entry.data.try_borrow() else {
        skipped_borrowed(world, entry.owner, entry.index);
        return None;
    };
    Ref::filter_map(data, |boxed| component::downcast_ref::<T>(&**boxed)).ok()
}

fn fetch_mut<T: Component>(world: &World, id: ComponentId) -> Option<RefMut<'_, T>> {
    let entry = world.entry(id)?;
    let Ok(data) = entry.data.try_borrow_mut() else {
        skipped_borrowed(world, entry.owner, entry.index);
        return None;
    };
    RefMut::filter_map(data, |boxed| component::downcast_mut::<T>(&mut **boxed)).ok()
}

fn skipped_borrowed(world: &World, entity: Entity, idx: CompIdx) {
    error!(
        entity = %entity,
        component = world.registry().name_of(idx),
        "component already borrowed, skipping query item"
    );
}

impl<A: Component> QuerySet for (A,) {
    const LEN: usize = 1;
    type Item<'w> = Ref<'w, A>;
    type ItemMut<'w> = RefMut<'w, A>;

    fn indices(world: &World) -> Result<Vec<CompIdx>, StoreError> {
        Ok(vec![world.index_of::<A>()?])
    }

    fn fetch<'w>(world: &'w World, ids: &[ComponentId]) -> Option<Self::Item<'w>> {
        fetch_ref::<A>(world, ids[0])
    }

    fn fetch_mut<'w>(world: &'w World, ids: &[ComponentId]) -> Option<Self::ItemMut<'w>> {
        fetch_mut::<A>(world, ids[0])
    }
}

macro_rules! impl_query_set {
    ($len:literal; $($name:ident => $i:tt),+) => {
        impl<$($name: Component),+> QuerySet for ($($name,)+) {
            const LEN: usize = $len;
            type Item<'w> = ($(Ref<'w, $name>,)+);
            type ItemMut<'w> = ($(RefMut<'w, $name>,)+);

            fn indices(world: &World) -> Result<Vec<CompIdx>, StoreError> {
                Ok(vec![$(world.index_of::<$name>()?),+])
            }

            fn fetch<'w>(world: &'w World, ids: &[ComponentId]) -> Option<Self::Item<'w>> {
                Some(($(fetch_ref::<$name>(world, ids[$i])?,)+))
            }

            fn fetch_mut<'w>(world: &'w World, ids: &[ComponentId]) -> Option<Self::ItemMut<'w>> {
                Some(($(fetch_mut::<$name>(world, ids[$i])?,)+))
            }
        }
    };
}

impl_query_set!(2; A => 0, B => 1);
impl_query_set!(3; A => 0, B => 1, C => 2);
impl_query_set!(4; A => 0, B => 1, C => 2, D => 3);

// ----------------------------------------------------------------------------
// Candidate matching
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct JoinPlan {
    indices: [CompIdx; MAX_QUERY_LEN],
    len: usize,
    driver: CompIdx,
    include_paused: bool,
}

impl JoinPlan {
    fn new(world: &World, requested: &[CompIdx]) -> Result<Self, StoreError> {
        if requested.is_empty() || requested.len() > MAX_QUERY_LEN {
            return Err(StoreError::InternalInvariant(format!(
                "query over {} types",
                requested.len()
            )));
        }

        let mut indices = [CompIdx::METADATA; MAX_QUERY_LEN];
        indices[..requested.len()].copy_from_slice(requested);

        let driver = requested
            .iter()
            .copied()
            .min_by_key(|idx| world.tables[idx.slot()].len())
            .unwrap_or(requested[0]);

        Ok(Self {
            indices,
            len: requested.len(),
            driver,
            include_paused: false,
        })
    }

    fn has_duplicates(&self) -> bool {
        let indices = &self.indices[..self.len];
        indices
            .iter()
            .enumerate()
            .any(|(i, idx)| indices[i + 1..].contains(idx))
    }
}

/// Entities that pass the join, with the matching handles.
struct Matches<'w> {
    world: &'w World,
    driver: hash_map::Keys<'w, Entity, ComponentId>,
    plan: JoinPlan,
}

impl<'w> Matches<'w> {
    fn new(world: &'w World, plan: JoinPlan) -> Self {
        Self {
            world,
            driver: world.tables[plan.driver.slot()].keys(),
            plan,
        }
    }

    fn join(&self, entity: Entity) -> Option<[ComponentId; MAX_QUERY_LEN]> {
        let mut ids = [ComponentId::DANGLING; MAX_QUERY_LEN];
        for (slot, idx) in self.plan.indices[..self.plan.len].iter().enumerate() {
            let id = *self.world.tables[idx.slot()].get(&entity)?;
            if !self.world.components.contains(id) {
                return None;
            }
            ids[slot] = id;
        }

        if !self.plan.include_paused && self.world.excluded_as_paused(entity) {
            return None;
        }
        Some(ids)
    }
}

impl Iterator for Matches<'_> {
    type Item = (Entity, [ComponentId; MAX_QUERY_LEN]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entity = *self.driver.next()?;
            if let Some(ids) = self.join(entity) {
                return Some((entity, ids));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.driver.size_hint().1)
    }
}

impl World {
    /// Paused entities and entities without metadata drop out of queries.
    fn excluded_as_paused(&self, entity: Entity) -> bool {
        let Some(meta_id) = self.slot_of(entity, CompIdx::METADATA) else {
            return true;
        };
        let Some(entry) = self.entry(meta_id) else {
            return true;
        };
        // Metadata mutably borrowed by the caller counts as not paused.
        match entry.data.try_borrow() {
            Ok(data) => component::downcast_ref::<MetaData>(&**data).map_or(true, |meta| meta.paused),
            Err(_) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Typed queries
// ----------------------------------------------------------------------------

/// Shared-borrow join over `Q`.
pub struct Query<'w, Q: QuerySet> {
    world: &'w World,
    plan: JoinPlan,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QuerySet> Query<'w, Q> {
    /// Also yield paused entities.
    pub fn include_paused(mut self) -> Self {
        self.plan.include_paused = true;
        self
    }

    /// Fresh enumeration.
    pub fn iter(&self) -> QueryIter<'w, Q> {
        QueryIter {
            world: self.world,
            matches: Matches::new(self.world, self.plan.clone()),
            _marker: PhantomData,
        }
    }

    /// Matching entities without borrowing any component data.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + 'w {
        Matches::new(self.world, self.plan.clone()).map(|(entity, _)| entity)
    }

    pub fn count(&self) -> usize {
        Matches::new(self.world, self.plan.clone()).count()
    }

    pub fn is_empty(&self) -> bool {
        Matches::new(self.world, self.plan.clone()).next().is_none()
    }
}

impl<'w, Q: QuerySet> IntoIterator for Query<'w, Q> {
    type Item = (Entity, Q::Item<'w>);
    type IntoIter = QueryIter<'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'w, Q: QuerySet> IntoIterator for &Query<'w, Q> {
    type Item = (Entity, Q::Item<'w>);
    type IntoIter = QueryIter<'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct QueryIter<'w, Q: QuerySet> {
    world: &'w World,
    matches: Matches<'w>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QuerySet> Iterator for QueryIter<'w, Q> {
    type Item = (Entity, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (entity, ids) = self.matches.next()?;
            if let Some(item) = Q::fetch(self.world, &ids[..Q::LEN]) {
                return Some((entity, item));
            }
        }
    }
}

/// Mutable-borrow join over `Q`.
///
/// Each item holds `RefMut`s on one entity's components. Items for different
/// entities never alias, so collecting them is fine.
pub struct QueryMut<'w, Q: QuerySet> {
    world: &'w World,
    plan: JoinPlan,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QuerySet> QueryMut<'w, Q> {
    pub fn include_paused(mut self) -> Self {
        self.plan.include_paused = true;
        self
    }

    pub fn iter(&self) -> QueryMutIter<'w, Q> {
        QueryMutIter {
            world: self.world,
            matches: Matches::new(self.world, self.plan.clone()),
            _marker: PhantomData,
        }
    }

    pub fn count(&self) -> usize {
        Matches::new(self.world, self.plan.clone()).count()
    }
}

impl<'w, Q: QuerySet> IntoIterator for QueryMut<'w, Q> {
    type Item = (Entity, Q::ItemMut<'w>);
    type IntoIter = QueryMutIter<'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct QueryMutIter<'w, Q: QuerySet> {
    world: &'w World,
    matches: Matches<'w>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: QuerySet> Iterator for QueryMutIter<'w, Q> {
    type Item = (Entity, Q::ItemMut<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (entity, ids) = self.matches.next()?;
            if let Some(item) = Q::fetch_mut(self.world, &ids[..Q::LEN]) {
                return Some((entity, item));
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Untyped and single-type accessors
// ----------------------------------------------------------------------------

/// Everything filed under one registry index, reference tags included.
pub struct IndexQuery<'w> {
    world: &'w World,
    plan: JoinPlan,
}

impl<'w> IndexQuery<'w> {
    pub fn include_paused(mut self) -> Self {
        self.plan.include_paused = true;
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, ComponentId)> + 'w {
        Matches::new(self.world, self.plan.clone()).map(|(entity, ids)| (entity, ids[0]))
    }
}

/// Per-type accessor resolved once and reused for many lookups.
pub struct ComponentLookup<'w, T: Component> {
    world: &'w World,
    idx: CompIdx,
    table: &'w TypeTable,
    _marker: PhantomData<fn() -> T>,
}

impl<'w, T: Component> ComponentLookup<'w, T> {
    pub fn index(&self) -> CompIdx {
        self.idx
    }

    pub fn has(&self, entity: Entity) -> bool {
        self.table
            .get(&entity)
            .map_or(false, |id| self.world.components.contains(*id))
    }

    pub fn get(&self, entity: Entity) -> Result<Ref<'w, T>, StoreError> {
        let id = self.table.get(&entity).ok_or_else(|| StoreError::NotFound {
            entity,
            component: self.world.registry.name_of(self.idx).to_string(),
        })?;
        self.world.borrow_typed(entity, *id)
    }

    pub fn try_get(&self, entity: Entity) -> Option<Ref<'w, T>> {
        let id = self.table.get(&entity)?;
        self.world.borrow_typed(entity, *id).ok()
    }

    pub fn get_mut(&self, entity: Entity) -> Result<RefMut<'w, T>, StoreError> {
        let id = self.table.get(&entity).ok_or_else(|| StoreError::NotFound {
            entity,
            component: self.world.registry.name_of(self.idx).to_string(),
        })?;
        self.world.borrow_typed_mut(entity, *id)
    }

    pub fn try_get_mut(&self, entity: Entity) -> Option<RefMut<'w, T>> {
        let id = self.table.get(&entity)?;
        self.world.borrow_typed_mut(entity, *id).ok()
    }

    /// Like `try_get`, but logs a miss when `log_missing` is set.
    pub fn resolve(&self, entity: Entity, log_missing: bool) -> Option<Ref<'w, T>> {
        let found = self.try_get(entity);
        if found.is_none() && log_missing {
            error!(
                entity = %entity,
                component = self.world.registry.name_of(self.idx),
                "unable to resolve component"
            );
        }
        found
    }
}

impl World {
    /// Join over the component types in `Q`, skipping paused entities.
    pub fn query<Q: QuerySet>(&self) -> Result<Query<'_, Q>, StoreError> {
        let plan = JoinPlan::new(self, &Q::indices(self)?)?;
        Ok(Query {
            world: self,
            plan,
            _marker: PhantomData,
        })
    }

    /// Join yielding mutable borrows. Naming a type twice is rejected.
    pub fn query_mut<Q: QuerySet>(&self) -> Result<QueryMut<'_, Q>, StoreError> {
        let plan = JoinPlan::new(self, &Q::indices(self)?)?;
        if plan.has_duplicates() {
            return Err(StoreError::invalid(
                Entity::INVALID,
                Violation::DuplicateQueryType,
            ));
        }
        Ok(QueryMut {
            world: self,
            plan,
            _marker: PhantomData,
        })
    }

    /// Untyped enumeration of one registry index.
    pub fn query_index(&self, idx: CompIdx) -> Result<IndexQuery<'_>, StoreError> {
        if self.registry.registration(idx).is_none() {
            return Err(StoreError::UnknownComponent {
                type_name: format!("index {idx}"),
            });
        }
        Ok(IndexQuery {
            world: self,
            plan: JoinPlan::new(self, &[idx])?,
        })
    }

    pub fn lookup<T: Component>(&self) -> Result<ComponentLookup<'_, T>, StoreError> {
        let idx = self.index_of::<T>()?;
        Ok(ComponentLookup {
            world: self,
            idx,
            table: &self.tables[idx.slot()],
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{ComponentDescriptor, ComponentRegistry, Liveness, Transform};
    use std::collections::BTreeSet;

    #[derive(Debug, Default, PartialEq)]
    struct X(u32);
    #[derive(Debug, Default, PartialEq)]
    struct Y(u32);
    #[derive(Debug, Default, PartialEq)]
    struct Z(u32);
    crate::define_component!(X, Y, Z);

    fn world() -> World {
        let mut builder = ComponentRegistry::builder();
        builder.register_type::<X>().unwrap();
        builder.register_type::<Y>().unwrap();
        builder
            .register(ComponentDescriptor::of::<Z>("Z").physics_body())
            .unwrap();
        World::new(builder.build())
    }

    fn abc(world: &mut World) -> (Entity, Entity, Entity) {
        let a = world.spawn_initialized("a").unwrap();
        let b = world.spawn_initialized("b").unwrap();
        let c = world.spawn_initialized("c").unwrap();
        world.add(a, X(1), false).unwrap();
        world.add(a, Y(1), false).unwrap();
        world.add(b, X(2), false).unwrap();
        world.add(c, X(3), false).unwrap();
        world.add(c, Y(3), false).unwrap();
        world.add(c, Z(3), false).unwrap();
        (a, b, c)
    }

    #[test]
    fn joins_match_exactly() {
        let mut world = world();
        let (a, _b, c) = abc(&mut world);

        let xy: BTreeSet<Entity> = world
            .query::<(X, Y)>()
            .unwrap()
            .into_iter()
            .map(|(entity, _)| entity)
            .collect();
        assert_eq!(xy, BTreeSet::from([a, c]));

        let xyz: Vec<Entity> = world.query::<(X, Y, Z)>().unwrap().entities().collect();
        assert_eq!(xyz, vec![c]);

        for (entity, (x, y)) in &world.query::<(X, Y)>().unwrap() {
            assert_eq!(x.0, y.0, "{entity}");
        }
    }

    #[test]
    fn empty_queries_are_fine() {
        let world = world();
        assert!(world.query::<(X,)>().unwrap().is_empty());
        assert_eq!(world.query::<(X, Y, Z, Transform)>().unwrap().count(), 0);
    }

    #[test]
    fn paused_entities_are_skipped_by_default() {
        let mut world = world();
        let (a, _b, c) = abc(&mut world);
        world.set_paused(a, true).unwrap();

        let visible: Vec<Entity> = world.query::<(X, Y)>().unwrap().entities().collect();
        assert_eq!(visible, vec![c]);

        let all = world.query::<(X, Y)>().unwrap().include_paused().count();
        assert_eq!(all, 2);
    }

    #[test]
    fn query_mut_writes_through() {
        let mut world = world();
        abc(&mut world);

        for (_, (mut x, y)) in world.query_mut::<(X, Y)>().unwrap() {
            x.0 += y.0 * 10;
        }
        let mut values: Vec<u32> = world.query::<(X,)>().unwrap().into_iter().map(|(_, x)| x.0).collect();
        values.sort_unstable();
        assert_eq!(values, vec![2, 11, 33]);
    }

    #[test]
    fn duplicate_types_are_rejected_for_mutation() {
        let world = world();
        assert!(matches!(
            world.query_mut::<(X, X)>(),
            Err(StoreError::InvalidOperation {
                violation: Violation::DuplicateQueryType,
                ..
            })
        ));
        assert!(world.query::<(X, X)>().is_ok());
    }

    #[test]
    fn deferred_removal_during_iteration() {
        let mut world = world();
        abc(&mut world);

        let mut visited = 0;
        for (entity, x) in world.query::<(X,)>().unwrap() {
            assert!(world.remove_deferred::<X>(entity).unwrap());
            assert!(x.0 > 0);
            visited += 1;
        }
        assert_eq!(visited, 3);

        // Still indexed, but flagged.
        let pending: Vec<ComponentId> = world
            .query_index(world.index_of::<X>().unwrap())
            .unwrap()
            .iter()
            .map(|(_, id)| id)
            .collect();
        assert_eq!(pending.len(), 3);
        assert!(pending
            .iter()
            .all(|id| world.liveness(*id) == Some(Liveness::PendingDeletion)));

        assert_eq!(world.cull(), 3);
        assert!(world.query::<(X,)>().unwrap().is_empty());
    }

    #[test]
    fn borrowed_components_drop_out_of_queries() {
        let mut world = world();
        let (a, _b, c) = abc(&mut world);

        let held = world.get_mut::<Y>(a).unwrap();
        let visible: Vec<Entity> = world
            .query::<(X, Y)>()
            .unwrap()
            .into_iter()
            .map(|(entity, _)| entity)
            .collect();
        assert_eq!(visible, vec![c]);
        assert_eq!(world.query_mut::<(Y,)>().unwrap().into_iter().count(), 1);
        drop(held);

        let shared = world.get::<X>(c).unwrap();
        let writable: Vec<Entity> = world
            .query_mut::<(X,)>()
            .unwrap()
            .into_iter()
            .map(|(entity, _)| entity)
            .collect();
        assert_eq!(writable.len(), 2);
        assert!(!writable.contains(&c));
        assert_eq!(shared.0, 3);
    }

    #[test]
    fn index_query_sees_reference_tags() {
        let mut world = world();
        let (_, _, c) = abc(&mut world);
        let bodies: Vec<Entity> = world
            .query_index(CompIdx::PHYSICS_BODY)
            .unwrap()
            .iter()
            .map(|(entity, _)| entity)
            .collect();
        assert_eq!(bodies, vec![c]);
    }

    #[test]
    fn lookup_resolves_repeatedly() {
        let mut world = world();
        let (a, b, _) = abc(&mut world);
        let ys = world.lookup::<Y>().unwrap();

        assert!(ys.has(a));
        assert!(!ys.has(b));
        assert_eq!(ys.get(a).unwrap().0, 1);
        assert!(ys.resolve(b, false).is_none());
        assert!(ys.get(b).unwrap_err().is_not_found());
        ys.get_mut(a).unwrap().0 = 5;
        assert_eq!(ys.try_get(a).map(|y| y.0), Some(5));
    }
}
