//! Permission hooks and value validators.
//!
//! Three per-world predicate channels gate component access:
//! read permission (evaluated by opt-in read paths), write permission
//! (evaluated per op at the apply barrier) and value validators (typed per
//! component type, plus untyped ones applied to every value write).
//! Every predicate in a channel must pass; a failing predicate rejects the
//! single op, never the whole buffer. All channels are cleared when the
//! world is disposed.

use std::any::Any;
use std::collections::HashMap;

use crate::component::ComponentTypeId;
use crate::entity::Entity;

type PermissionHook = Box<dyn Fn(Entity, ComponentTypeId) -> bool + Send + Sync>;
type ValueValidator = Box<dyn Fn(&dyn Any) -> bool + Send + Sync>;

#[derive(Default)]
pub(crate) struct Hooks {
    read: Vec<PermissionHook>,
    write: Vec<PermissionHook>,
    typed_validators: HashMap<ComponentTypeId, Vec<ValueValidator>>,
    untyped_validators: Vec<ValueValidator>,
}

impl Hooks {
    pub fn add_read(&mut self, hook: impl Fn(Entity, ComponentTypeId) -> bool + Send + Sync + 'static) {
        self.read.push(Box::new(hook));
    }

    pub fn add_write(&mut self, hook: impl Fn(Entity, ComponentTypeId) -> bool + Send + Sync + 'static) {
        self.write.push(Box::new(hook));
    }

    pub fn add_typed_validator(
        &mut self,
        type_id: ComponentTypeId,
        validator: impl Fn(&dyn Any) -> bool + Send + Sync + 'static,
    ) {
        self.typed_validators
            .entry(type_id)
            .or_default()
            .push(Box::new(validator));
    }

    pub fn add_untyped_validator(
        &mut self,
        validator: impl Fn(&dyn Any) -> bool + Send + Sync + 'static,
    ) {
        self.untyped_validators.push(Box::new(validator));
    }

    /// All read hooks must allow the pair.
    pub fn check_read(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.read.iter().all(|hook| hook(entity, type_id))
    }

    /// All write hooks must allow the pair.
    pub fn check_write(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.write.iter().all(|hook| hook(entity, type_id))
    }

    /// Runs the typed validators for `type_id` plus every untyped
    /// validator against the value.
    pub fn validate(&self, type_id: ComponentTypeId, value: &dyn Any) -> bool {
        if let Some(typed) = self.typed_validators.get(&type_id) {
            if !typed.iter().all(|v| v(value)) {
                return false;
            }
        }
        self.untyped_validators.iter().all(|v| v(value))
    }

    pub fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
        self.typed_validators.clear();
        self.untyped_validators.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Entity {
        Entity::from_parts(0, 1)
    }

    #[test]
    fn empty_channels_allow_everything() {
        let hooks = Hooks::default();
        assert!(hooks.check_read(entity(), ComponentTypeId(0)));
        assert!(hooks.check_write(entity(), ComponentTypeId(0)));
        assert!(hooks.validate(ComponentTypeId(0), &42u32));
    }

    #[test]
    fn write_hooks_are_anded() {
        let mut hooks = Hooks::default();
        hooks.add_write(|_, _| true);
        hooks.add_write(|_, type_id| type_id != ComponentTypeId(7));

        assert!(hooks.check_write(entity(), ComponentTypeId(0)));
        assert!(!hooks.check_write(entity(), ComponentTypeId(7)));
    }

    #[test]
    fn typed_validator_only_gates_its_type() {
        let mut hooks = Hooks::default();
        hooks.add_typed_validator(ComponentTypeId(1), |value| {
            value.downcast_ref::<u32>().is_some_and(|v| *v <= 100)
        });

        assert!(hooks.validate(ComponentTypeId(1), &50u32));
        assert!(!hooks.validate(ComponentTypeId(1), &200u32));
        // Other types are untouched by the typed channel.
        assert!(hooks.validate(ComponentTypeId(2), &200u32));
    }

    #[test]
    fn untyped_validator_sees_every_value() {
        let mut hooks = Hooks::default();
        hooks.add_untyped_validator(|value| value.downcast_ref::<i32>().is_none());

        assert!(!hooks.validate(ComponentTypeId(0), &1i32));
        assert!(hooks.validate(ComponentTypeId(0), &1u32));
    }

    #[test]
    fn clear_drops_all_channels() {
        let mut hooks = Hooks::default();
        hooks.add_read(|_, _| false);
        hooks.add_write(|_, _| false);
        hooks.add_untyped_validator(|_| false);
        hooks.clear();

        assert!(hooks.check_read(entity(), ComponentTypeId(0)));
        assert!(hooks.check_write(entity(), ComponentTypeId(0)));
        assert!(hooks.validate(ComponentTypeId(0), &0u8));
    }
}
