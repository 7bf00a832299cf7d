//! Singleton ownership bookkeeping.
//!
//! A component type marked as singleton at registration may have at most
//! one live owner per world. The command apply step consults this registry
//! before any singleton write; `set_singleton` without an owner allocates a
//! hidden entity carrying only the value.

use std::collections::BTreeMap;

use crate::component::ComponentTypeId;
use crate::entity::Entity;

/// Per-world map from singleton type to its current owner.
///
/// `BTreeMap` keeps enumeration deterministic by dense type id.
#[derive(Default)]
pub(crate) struct SingletonRegistry {
    owners: BTreeMap<ComponentTypeId, Entity>,
}

impl SingletonRegistry {
    /// The current owner of a singleton type, if any.
    pub fn owner(&self, type_id: ComponentTypeId) -> Option<Entity> {
        self.owners.get(&type_id).copied()
    }

    /// Records `entity` as the owner of `type_id`.
    pub fn record(&mut self, type_id: ComponentTypeId, entity: Entity) {
        self.owners.insert(type_id, entity);
    }

    /// Clears the owner record for a type.
    pub fn clear_type(&mut self, type_id: ComponentTypeId) {
        self.owners.remove(&type_id);
    }

    /// Drops every ownership record held by `entity`, returning the types
    /// it owned.
    pub fn clear_entity(&mut self, entity: Entity) -> Vec<ComponentTypeId> {
        let owned: Vec<ComponentTypeId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == entity)
            .map(|(type_id, _)| *type_id)
            .collect();
        for type_id in &owned {
            self.owners.remove(type_id);
        }
        owned
    }

    /// Whether `entity` is the recorded owner of any singleton type.
    pub fn owns_any(&self, entity: Entity) -> bool {
        self.owners.values().any(|owner| *owner == entity)
    }

    /// Enumerates `(type, owner)` pairs in ascending type-id order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentTypeId, Entity)> + '_ {
        self.owners.iter().map(|(type_id, owner)| (*type_id, *owner))
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }
}
