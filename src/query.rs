//! Typed multi-component queries with composable filters.
//!
//! A query names a tuple of component types (arity 1–8) and lazily yields
//! `(Entity, (&T1, …, &Tk))` for every entity carrying all of them.
//! Iteration drives from the smallest dense pool among the queried and
//! `with`-required types; every other membership test is a presence-bit
//! lookup. Queries take `&World`, so a query started inside a system sees a
//! stable snapshot; all structural changes are buffered until a barrier.

use fixedbitset::FixedBitSet;

use crate::component::{component_id, Component, ComponentTypeId};
use crate::entity::Entity;
use crate::sparse_set::{ComponentPool, SparseSet};
use crate::world::World;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// An immutable, composable entity filter built with a fluent builder.
///
/// - [`with`](QueryFilter::with): entity must carry the type
/// - [`without`](QueryFilter::without): entity must lack the type
/// - [`with_any`](QueryFilter::with_any): entity must carry at least one
///   of the group; multiple groups combine as AND-of-ORs
/// - [`without_any`](QueryFilter::without_any): entity must lack every
///   type in the set
///
/// Filters resolve types against the process-wide registry, so the same
/// filter value can be reused across worlds.
///
/// # Example
///
/// ```ignore
/// let filter = QueryFilter::new()
///     .with::<Faction>()
///     .without::<Stunned>();
/// for (entity, (pos,)) in world.query_filtered::<(Position,)>(&filter) {
///     // ...
/// }
/// ```
#[derive(Clone, Default, Debug)]
pub struct QueryFilter {
    with: Vec<ComponentTypeId>,
    without: Vec<ComponentTypeId>,
    any_groups: Vec<Vec<ComponentTypeId>>,
    /// Set when a requirement can never be satisfied (e.g. `with` on a type
    /// that was never registered).
    impossible: bool,
}

impl QueryFilter {
    /// Creates an empty filter that matches every entity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the entity to carry `T`.
    pub fn with<T: Component>(self) -> Self {
        match component_id::<T>() {
            Some(id) => self.with_id(id),
            None => Self {
                impossible: true,
                ..self
            },
        }
    }

    /// Requires the entity to carry the type with the given id.
    pub fn with_id(mut self, id: ComponentTypeId) -> Self {
        self.with.push(id);
        self
    }

    /// Requires the entity to lack `T`. Unregistered types trivially pass.
    pub fn without<T: Component>(self) -> Self {
        match component_id::<T>() {
            Some(id) => self.without_id(id),
            None => self,
        }
    }

    /// Requires the entity to lack the type with the given id.
    pub fn without_id(mut self, id: ComponentTypeId) -> Self {
        self.without.push(id);
        self
    }

    /// Requires the entity to carry at least one of the given types.
    ///
    /// Each call adds one disjunction group; groups are ANDed together.
    pub fn with_any(mut self, ids: &[ComponentTypeId]) -> Self {
        if ids.is_empty() {
            self.impossible = true;
        } else {
            self.any_groups.push(ids.to_vec());
        }
        self
    }

    /// Requires the entity to lack every one of the given types.
    ///
    /// Shorthand for chaining [`without_id`](QueryFilter::without_id) over
    /// the set.
    pub fn without_any(mut self, ids: &[ComponentTypeId]) -> Self {
        self.without.extend_from_slice(ids);
        self
    }
}

/// A filter resolved against one world's pools.
pub(crate) enum FilterPlan<'w> {
    /// No filter, or a filter with no active clauses.
    Pass,
    /// A clause can never match; the query is empty.
    Impossible,
    /// Presence-bit tests to run per candidate.
    Active(ActiveFilter<'w>),
}

pub(crate) struct ActiveFilter<'w> {
    with: Vec<&'w FixedBitSet>,
    without: Vec<&'w FixedBitSet>,
    groups: Vec<Vec<&'w FixedBitSet>>,
    /// Dense entity list of the smallest `with` pool, offered as a driver.
    smallest_with: Option<&'w [Entity]>,
}

impl<'w> FilterPlan<'w> {
    pub(crate) fn resolve(world: &'w World, filter: Option<&QueryFilter>) -> Self {
        let Some(filter) = filter else {
            return FilterPlan::Pass;
        };
        if filter.impossible {
            return FilterPlan::Impossible;
        }

        let mut with = Vec::with_capacity(filter.with.len());
        let mut smallest_with: Option<&'w ComponentPool> = None;
        for &id in &filter.with {
            let Some(pool) = world.pool(id) else {
                return FilterPlan::Impossible;
            };
            if pool.is_empty() {
                return FilterPlan::Impossible;
            }
            if smallest_with.map_or(true, |best| pool.len() < best.len()) {
                smallest_with = Some(pool);
            }
            with.push(pool.presence());
        }

        let mut without = Vec::new();
        for &id in &filter.without {
            // A missing pool can exclude nothing.
            if let Some(pool) = world.pool(id) {
                without.push(pool.presence());
            }
        }

        let mut groups = Vec::with_capacity(filter.any_groups.len());
        for group in &filter.any_groups {
            let members: Vec<&FixedBitSet> = group
                .iter()
                .filter_map(|&id| world.pool(id))
                .filter(|pool| !pool.is_empty())
                .map(|pool| pool.presence())
                .collect();
            if members.is_empty() {
                return FilterPlan::Impossible;
            }
            groups.push(members);
        }

        if with.is_empty() && without.is_empty() && groups.is_empty() {
            return FilterPlan::Pass;
        }

        FilterPlan::Active(ActiveFilter {
            with,
            without,
            groups,
            smallest_with: smallest_with.map(|pool| pool.entities()),
        })
    }

    pub(crate) fn matches(&self, id: u32) -> bool {
        match self {
            FilterPlan::Pass => true,
            FilterPlan::Impossible => false,
            FilterPlan::Active(active) => {
                let idx = id as usize;
                let has = |bits: &FixedBitSet| idx < bits.len() && bits.contains(idx);
                active.with.iter().all(|bits| has(bits))
                    && !active.without.iter().any(|bits| has(bits))
                    && active
                        .groups
                        .iter()
                        .all(|group| group.iter().any(|bits| has(bits)))
            }
        }
    }

    fn smallest_with(&self) -> Option<&'w [Entity]> {
        match self {
            FilterPlan::Active(active) => active.smallest_with,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Query tuples
// ---------------------------------------------------------------------------

/// A tuple of component types usable as a query, arity 1–8.
///
/// Implemented for `(A,)` through `(A, …, H)` where each member is a
/// registered component type.
pub trait QueryTuple: 'static {
    /// The shared references yielded per entity.
    type Refs<'w>;
    /// Borrowed per-pool state, cheap to copy.
    type State<'w>: Copy;

    /// Borrows the pools; `None` when any queried type has no pool in this
    /// world (the query is then empty).
    fn init(world: &World) -> Option<Self::State<'_>>;

    /// Dense entity list of the smallest member pool.
    fn shortest<'w>(state: &Self::State<'w>) -> &'w [Entity];

    /// Fetches all members for an entity id, or `None` if any is missing.
    fn fetch<'w>(state: &Self::State<'w>, id: u32) -> Option<Self::Refs<'w>>;
}

macro_rules! impl_query_tuple {
    ($($name:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($name: Component),+> QueryTuple for ($($name,)+) {
            type Refs<'w> = ($(&'w $name,)+);
            type State<'w> = ($(&'w SparseSet<$name>,)+);

            fn init(world: &World) -> Option<Self::State<'_>> {
                Some(($(world.typed_pool::<$name>()?,)+))
            }

            fn shortest<'w>(state: &Self::State<'w>) -> &'w [Entity] {
                let ($($name,)+) = *state;
                let mut best: &'w [Entity] = &[];
                let mut best_len = usize::MAX;
                $(
                    if $name.len() < best_len {
                        best_len = $name.len();
                        best = $name.entities();
                    }
                )+
                best
            }

            fn fetch<'w>(state: &Self::State<'w>, id: u32) -> Option<Self::Refs<'w>> {
                let ($($name,)+) = *state;
                Some(($($name.get(id)?,)+))
            }
        }
    };
}

impl_query_tuple!(A);
impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);
impl_query_tuple!(A, B, C, D, E);
impl_query_tuple!(A, B, C, D, E, F);
impl_query_tuple!(A, B, C, D, E, F, G);
impl_query_tuple!(A, B, C, D, E, F, G, H);

/// Lazy iterator over entities matching a query and filter.
pub struct QueryIter<'w, Q: QueryTuple> {
    state: Option<Q::State<'w>>,
    entities: &'w [Entity],
    cursor: usize,
    filter: FilterPlan<'w>,
}

impl<'w, Q: QueryTuple> QueryIter<'w, Q> {
    pub(crate) fn new(world: &'w World, filter: Option<&QueryFilter>) -> Self {
        let plan = FilterPlan::resolve(world, filter);
        if matches!(plan, FilterPlan::Impossible) {
            return Self::empty(plan);
        }
        let Some(state) = Q::init(world) else {
            return Self::empty(plan);
        };

        // Drive from the smallest pool among queried and required types.
        let mut entities = Q::shortest(&state);
        if let Some(with_entities) = plan.smallest_with() {
            if with_entities.len() < entities.len() {
                entities = with_entities;
            }
        }

        Self {
            state: Some(state),
            entities,
            cursor: 0,
            filter: plan,
        }
    }

    fn empty(filter: FilterPlan<'w>) -> Self {
        Self {
            state: None,
            entities: &[],
            cursor: 0,
            filter,
        }
    }
}

impl<'w, Q: QueryTuple> Iterator for QueryIter<'w, Q> {
    type Item = (Entity, Q::Refs<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.state.as_ref()?;
        while self.cursor < self.entities.len() {
            let entity = self.entities[self.cursor];
            self.cursor += 1;
            if !self.filter.matches(entity.id()) {
                continue;
            }
            if let Some(refs) = Q::fetch(state, entity.id()) {
                return Some((entity, refs));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// World query surface
// ---------------------------------------------------------------------------

impl World {
    /// Iterates all entities carrying every type in `Q`.
    pub fn query<Q: QueryTuple>(&self) -> QueryIter<'_, Q> {
        QueryIter::new(self, None)
    }

    /// Iterates entities carrying every type in `Q` and matching `filter`.
    pub fn query_filtered<Q: QueryTuple>(&self, filter: &QueryFilter) -> QueryIter<'_, Q> {
        QueryIter::new(self, Some(filter))
    }

    /// Fills `dst` with entities matching the query, stopping at capacity.
    ///
    /// Returns the number of entities written. Allocates nothing.
    pub fn query_to_span<Q: QueryTuple>(
        &self,
        dst: &mut [Entity],
        filter: Option<&QueryFilter>,
    ) -> usize {
        let mut written = 0;
        for (entity, _) in QueryIter::<Q>::new(self, filter) {
            if written == dst.len() {
                break;
            }
            dst[written] = entity;
            written += 1;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Registration;

    #[derive(Clone, PartialEq, Debug)]
    struct Pos(f32);

    #[derive(Clone, PartialEq, Debug)]
    struct Vel(f32);

    #[derive(Clone, PartialEq, Debug)]
    struct Frozen;

    #[derive(Clone, PartialEq, Debug)]
    struct Burning;

    #[derive(Clone, PartialEq, Debug)]
    struct Shielded;

    fn register() {
        Registration::<Pos>::new("test.query.pos.v1").register().unwrap();
        Registration::<Vel>::new("test.query.vel.v1").register().unwrap();
        Registration::<Frozen>::new("test.query.frozen.v1").register().unwrap();
        Registration::<Burning>::new("test.query.burning.v1").register().unwrap();
        Registration::<Shielded>::new("test.query.shielded.v1").register().unwrap();
    }

    fn world() -> World {
        register();
        World::new()
    }

    #[test]
    fn query_over_empty_world_yields_nothing() {
        let world = world();
        assert_eq!(world.query::<(Pos,)>().count(), 0);
        assert_eq!(world.query::<(Pos, Vel)>().count(), 0);
    }

    #[test]
    fn join_yields_only_entities_with_all_types() {
        let mut world = world();
        let both = world.spawn();
        world.add_component(both, Pos(1.0)).unwrap();
        world.add_component(both, Vel(2.0)).unwrap();

        let pos_only = world.spawn();
        world.add_component(pos_only, Pos(3.0)).unwrap();

        let results: Vec<_> = world
            .query::<(Pos, Vel)>()
            .map(|(e, (pos, vel))| (e, pos.0, vel.0))
            .collect();
        assert_eq!(results, vec![(both, 1.0, 2.0)]);
    }

    #[test]
    fn without_filter_excludes() {
        let mut world = world();
        let frozen = world.spawn();
        world.add_component(frozen, Pos(1.0)).unwrap();
        world.add_component(frozen, Frozen).unwrap();

        let free = world.spawn();
        world.add_component(free, Pos(2.0)).unwrap();

        let filter = QueryFilter::new().without::<Frozen>();
        let hits: Vec<Entity> = world
            .query_filtered::<(Pos,)>(&filter)
            .map(|(e, _)| e)
            .collect();
        assert_eq!(hits, vec![free]);
    }

    #[test]
    fn with_filter_requires_presence() {
        let mut world = world();
        let tagged = world.spawn();
        world.add_component(tagged, Pos(1.0)).unwrap();
        world.add_component(tagged, Shielded).unwrap();

        let plain = world.spawn();
        world.add_component(plain, Pos(2.0)).unwrap();

        let filter = QueryFilter::new().with::<Shielded>();
        let hits: Vec<Entity> = world
            .query_filtered::<(Pos,)>(&filter)
            .map(|(e, _)| e)
            .collect();
        assert_eq!(hits, vec![tagged]);
    }

    #[test]
    fn with_any_groups_combine_as_and_of_ors() {
        let mut world = world();
        let frozen_id = crate::component::component_id::<Frozen>().unwrap();
        let burning_id = crate::component::component_id::<Burning>().unwrap();
        let shielded_id = crate::component::component_id::<Shielded>().unwrap();

        // burning + shielded: passes both groups.
        let a = world.spawn();
        world.add_component(a, Pos(1.0)).unwrap();
        world.add_component(a, Burning).unwrap();
        world.add_component(a, Shielded).unwrap();

        // burning only: fails the second group.
        let b = world.spawn();
        world.add_component(b, Pos(2.0)).unwrap();
        world.add_component(b, Burning).unwrap();

        // neither status effect: fails the first group.
        let c = world.spawn();
        world.add_component(c, Pos(3.0)).unwrap();
        world.add_component(c, Shielded).unwrap();

        let filter = QueryFilter::new()
            .with_any(&[frozen_id, burning_id])
            .with_any(&[shielded_id]);
        let hits: Vec<Entity> = world
            .query_filtered::<(Pos,)>(&filter)
            .map(|(e, _)| e)
            .collect();
        assert_eq!(hits, vec![a]);
    }

    #[test]
    fn without_any_excludes_every_listed_type() {
        let mut world = world();
        let frozen_id = crate::component::component_id::<Frozen>().unwrap();
        let burning_id = crate::component::component_id::<Burning>().unwrap();

        let clean = world.spawn();
        world.add_component(clean, Pos(1.0)).unwrap();

        let burning = world.spawn();
        world.add_component(burning, Pos(2.0)).unwrap();
        world.add_component(burning, Burning).unwrap();

        let filter = QueryFilter::new().without_any(&[frozen_id, burning_id]);
        let hits: Vec<Entity> = world
            .query_filtered::<(Pos,)>(&filter)
            .map(|(e, _)| e)
            .collect();
        assert_eq!(hits, vec![clean]);
    }

    #[test]
    fn span_query_respects_capacity_and_counts() {
        let mut world = world();
        for i in 0..5 {
            let e = world.spawn();
            world.add_component(e, Pos(i as f32)).unwrap();
        }

        let mut dst = [Entity::from_parts(0, 0); 3];
        let written = world.query_to_span::<(Pos,)>(&mut dst, None);
        assert_eq!(written, 3);
        assert!(dst.iter().all(|e| world.is_alive(*e)));

        let mut dst = [Entity::from_parts(0, 0); 8];
        let written = world.query_to_span::<(Pos,)>(&mut dst, None);
        assert_eq!(written, 5);
    }

    #[test]
    fn unregistered_with_requirement_matches_nothing() {
        #[derive(Clone)]
        struct NeverRegistered;

        let mut world = world();
        let e = world.spawn();
        world.add_component(e, Pos(1.0)).unwrap();

        let filter = QueryFilter::new().with::<NeverRegistered>();
        assert_eq!(world.query_filtered::<(Pos,)>(&filter).count(), 0);

        // An unregistered exclusion can exclude nothing.
        let filter = QueryFilter::new().without::<NeverRegistered>();
        assert_eq!(world.query_filtered::<(Pos,)>(&filter).count(), 1);
    }

    #[test]
    fn query_skips_destroyed_entities() {
        let mut world = world();
        let keep = world.spawn();
        world.add_component(keep, Pos(1.0)).unwrap();
        let gone = world.spawn();
        world.add_component(gone, Pos(2.0)).unwrap();
        world.despawn(gone).unwrap();

        let hits: Vec<Entity> = world.query::<(Pos,)>().map(|(e, _)| e).collect();
        assert_eq!(hits, vec![keep]);
    }

    #[test]
    fn process_skips_dead_and_missing() {
        let mut world = world();
        let with = world.spawn();
        world.add_component(with, Pos(1.0)).unwrap();
        let without = world.spawn();
        let dead = world.spawn();
        world.add_component(dead, Pos(5.0)).unwrap();
        world.despawn(dead).unwrap();

        let mut touched = Vec::new();
        world.process::<Pos>(&[with, without, dead], |entity, pos| {
            pos.0 += 10.0;
            touched.push(entity);
        });

        assert_eq!(touched, vec![with]);
        assert_eq!(world.try_read_component::<Pos>(with), Some(Pos(11.0)));
    }

    #[test]
    fn four_way_join() {
        let mut world = world();
        let full = world.spawn();
        world.add_component(full, Pos(1.0)).unwrap();
        world.add_component(full, Vel(2.0)).unwrap();
        world.add_component(full, Frozen).unwrap();
        world.add_component(full, Burning).unwrap();

        let partial = world.spawn();
        world.add_component(partial, Pos(1.0)).unwrap();
        world.add_component(partial, Vel(2.0)).unwrap();
        world.add_component(partial, Frozen).unwrap();

        let hits: Vec<Entity> = world
            .query::<(Pos, Vel, Frozen, Burning)>()
            .map(|(e, _)| e)
            .collect();
        assert_eq!(hits, vec![full]);
    }
}
