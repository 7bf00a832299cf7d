//! View-binding surface: per-entity contexts and delta binders.
//!
//! Contexts are opaque view-side handles registered against an entity.
//! Binders consume [`ComponentDelta`]s for the component types they
//! declare at attach time; the declared set is the binder's route table,
//! consulted on every delta for that entity. Binders read the world but
//! never write; they get `&World` only.

use std::any::TypeId;
use std::collections::HashMap;

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::sparse_set::BoxedValue;
use crate::world::World;

/// What happened to a component value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeltaKind {
    /// The component appeared on the entity.
    Added,
    /// The component's value was replaced.
    Changed,
    /// The component left the entity.
    Removed,
    /// A point-in-time re-emit of the current value; storage untouched.
    Snapshot,
}

/// A component change record routed to binders.
///
/// Old and new values are stored type-erased; use
/// [`old_value`](ComponentDelta::old_value) / [`new_value`](ComponentDelta::new_value)
/// to view them typed.
pub struct ComponentDelta {
    pub kind: DeltaKind,
    pub entity: Entity,
    pub type_id: ComponentTypeId,
    pub(crate) old: Option<BoxedValue>,
    pub(crate) new: Option<BoxedValue>,
}

impl ComponentDelta {
    /// The value before the change, if the kind carries one.
    pub fn old_value<T: 'static>(&self) -> Option<&T> {
        self.old.as_deref().and_then(|value| value.downcast_ref::<T>())
    }

    /// The value after the change, if the kind carries one.
    pub fn new_value<T: 'static>(&self) -> Option<&T> {
        self.new.as_deref().and_then(|value| value.downcast_ref::<T>())
    }
}

/// A per-entity view-side handle.
///
/// Lifecycle: [`attached`](BindingContext::attached) fires on registration
/// and re-initialization, [`detached`](BindingContext::detached) on removal,
/// re-initialization and entity destruction.
pub trait BindingContext: Send + Sync + 'static {
    fn attached(&mut self, _world: &World, _entity: Entity) {}
    fn detached(&mut self, _entity: Entity) {}
}

/// A consumer of component deltas for one entity.
///
/// [`observed_types`](Binder::observed_types) is called once at attach to
/// build the binder's route table; only deltas for those types reach
/// [`on_delta`](Binder::on_delta).
pub trait Binder: Send + Sync + 'static {
    /// Component types this binder wants routed to it.
    fn observed_types(&self) -> Vec<ComponentTypeId>;

    /// Receives a delta for an observed type on the bound entity.
    fn on_delta(&mut self, world: &World, delta: &ComponentDelta);

    fn attached(&mut self, _world: &World, _entity: Entity) {}
    fn detached(&mut self, _entity: Entity) {}
}

pub(crate) struct ContextSlot {
    pub type_id: TypeId,
    pub context: Box<dyn BindingContext>,
}

pub(crate) struct BinderSlot {
    pub type_id: TypeId,
    /// Route table captured once at attach.
    pub observed: Vec<ComponentTypeId>,
    pub binder: Box<dyn Binder>,
}

impl BinderSlot {
    pub fn observes(&self, type_id: ComponentTypeId) -> bool {
        self.observed.contains(&type_id)
    }
}

/// Per-world store of contexts and binders, keyed by entity id.
///
/// Entries only exist for alive entities; destruction detaches and drops
/// them before component teardown completes.
#[derive(Default)]
pub(crate) struct BindingRegistry {
    contexts: HashMap<u32, Vec<ContextSlot>>,
    binders: HashMap<u32, Vec<BinderSlot>>,
}

impl BindingRegistry {
    // ---- Contexts ----

    pub fn insert_context(&mut self, entity: Entity, slot: ContextSlot) {
        self.contexts.entry(entity.id()).or_default().push(slot);
    }

    pub fn has_context(&self, entity: Entity) -> bool {
        self.contexts
            .get(&entity.id())
            .is_some_and(|slots| !slots.is_empty())
    }

    pub fn has_context_of(&self, entity: Entity, type_id: TypeId) -> bool {
        self.contexts
            .get(&entity.id())
            .is_some_and(|slots| slots.iter().any(|slot| slot.type_id == type_id))
    }

    pub fn context_count(&self, entity: Entity) -> usize {
        self.contexts.get(&entity.id()).map_or(0, Vec::len)
    }

    pub fn context_slots(&self, entity: Entity) -> &[ContextSlot] {
        self.contexts
            .get(&entity.id())
            .map_or(&[], Vec::as_slice)
    }

    pub fn remove_context(&mut self, entity: Entity, type_id: TypeId) -> Option<ContextSlot> {
        let slots = self.contexts.get_mut(&entity.id())?;
        let idx = slots.iter().position(|slot| slot.type_id == type_id)?;
        let slot = slots.remove(idx);
        if slots.is_empty() {
            self.contexts.remove(&entity.id());
        }
        Some(slot)
    }

    pub fn take_contexts(&mut self, entity: Entity) -> Vec<ContextSlot> {
        self.contexts.remove(&entity.id()).unwrap_or_default()
    }

    // ---- Binders ----

    pub fn insert_binder(&mut self, entity: Entity, slot: BinderSlot) {
        self.binders.entry(entity.id()).or_default().push(slot);
    }

    pub fn has_binder(&self, entity: Entity, type_id: TypeId) -> bool {
        self.binders
            .get(&entity.id())
            .is_some_and(|slots| slots.iter().any(|slot| slot.type_id == type_id))
    }

    pub fn binder_count(&self, entity: Entity) -> usize {
        self.binders.get(&entity.id()).map_or(0, Vec::len)
    }

    pub fn binder_slots(&self, entity: Entity) -> &[BinderSlot] {
        self.binders
            .get(&entity.id())
            .map_or(&[], Vec::as_slice)
    }

    pub fn remove_binder(&mut self, entity: Entity, type_id: TypeId) -> Option<BinderSlot> {
        let slots = self.binders.get_mut(&entity.id())?;
        let idx = slots.iter().position(|slot| slot.type_id == type_id)?;
        let slot = slots.remove(idx);
        if slots.is_empty() {
            self.binders.remove(&entity.id());
        }
        Some(slot)
    }

    pub fn take_binders(&mut self, entity: Entity) -> Vec<BinderSlot> {
        self.binders.remove(&entity.id()).unwrap_or_default()
    }

    /// Whether any binder on the entity observes the component type.
    pub fn observes(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.binders
            .get(&entity.id())
            .is_some_and(|slots| slots.iter().any(|slot| slot.observes(type_id)))
    }

    /// Temporarily removes the binder list for delta dispatch.
    pub fn take_binders_for_dispatch(&mut self, entity_id: u32) -> Option<Vec<BinderSlot>> {
        self.binders.remove(&entity_id)
    }

    /// Restores a dispatched binder list.
    pub fn restore_binders(&mut self, entity_id: u32, slots: Vec<BinderSlot>) {
        if !slots.is_empty() {
            self.binders.insert(entity_id, slots);
        }
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
        self.binders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyContext;
    impl BindingContext for DummyContext {}

    struct DummyBinder(Vec<ComponentTypeId>);
    impl Binder for DummyBinder {
        fn observed_types(&self) -> Vec<ComponentTypeId> {
            self.0.clone()
        }
        fn on_delta(&mut self, _world: &World, _delta: &ComponentDelta) {}
    }

    fn entity(id: u32) -> Entity {
        Entity::from_parts(id, 1)
    }

    #[test]
    fn context_registry_round_trip() {
        let mut registry = BindingRegistry::default();
        assert!(!registry.has_context(entity(0)));

        registry.insert_context(
            entity(0),
            ContextSlot {
                type_id: TypeId::of::<DummyContext>(),
                context: Box::new(DummyContext),
            },
        );

        assert!(registry.has_context(entity(0)));
        assert!(registry.has_context_of(entity(0), TypeId::of::<DummyContext>()));
        assert!(!registry.has_context_of(entity(0), TypeId::of::<u32>()));
        assert_eq!(registry.context_count(entity(0)), 1);

        let removed = registry.remove_context(entity(0), TypeId::of::<DummyContext>());
        assert!(removed.is_some());
        assert!(!registry.has_context(entity(0)));
    }

    #[test]
    fn binder_route_table() {
        let slot = BinderSlot {
            type_id: TypeId::of::<DummyBinder>(),
            observed: vec![ComponentTypeId(1), ComponentTypeId(3)],
            binder: Box::new(DummyBinder(vec![])),
        };
        assert!(slot.observes(ComponentTypeId(1)));
        assert!(!slot.observes(ComponentTypeId(2)));
    }

    #[test]
    fn dispatch_take_restore() {
        let mut registry = BindingRegistry::default();
        registry.insert_binder(
            entity(5),
            BinderSlot {
                type_id: TypeId::of::<DummyBinder>(),
                observed: vec![ComponentTypeId(0)],
                binder: Box::new(DummyBinder(vec![ComponentTypeId(0)])),
            },
        );

        let taken = registry.take_binders_for_dispatch(5).unwrap();
        assert!(registry.take_binders_for_dispatch(5).is_none());
        registry.restore_binders(5, taken);
        assert!(registry.has_binder(entity(5), TypeId::of::<DummyBinder>()));
    }

    #[test]
    fn delta_typed_views() {
        let delta = ComponentDelta {
            kind: DeltaKind::Changed,
            entity: entity(1),
            type_id: ComponentTypeId(0),
            old: Some(Box::new(100u32)),
            new: Some(Box::new(88u32)),
        };
        assert_eq!(delta.old_value::<u32>(), Some(&100));
        assert_eq!(delta.new_value::<u32>(), Some(&88));
        assert_eq!(delta.new_value::<i64>(), None);
    }
}
