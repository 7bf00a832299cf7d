//! Deferred structural mutation: the command buffer.
//!
//! Systems never mutate a world directly. Every structural or value change
//! is recorded into a [`CommandBuffer`] and executed when the scheduler
//! reaches the next apply barrier (or when the caller applies explicitly).
//! Ops run in recorded order; `create_entity` hands out a real reserved
//! handle immediately, so later ops in the same buffer can refer to it.

use crate::component::{require_id, Component, ComponentTypeId};
use crate::entity::{reserve_from, AllocHandle, Entity};
use crate::error::EcsError;
use crate::sparse_set::BoxedValue;
use crate::world::World;

/// How an op refers to a component type. Recording never fails, so an
/// unregistered type is carried along and reported at apply time.
pub(crate) enum TypeRef {
    Id(ComponentTypeId),
    Unregistered(&'static str),
}

impl TypeRef {
    fn resolve<T: Component>() -> Self {
        match require_id::<T>() {
            Ok(id) => TypeRef::Id(id),
            Err(_) => TypeRef::Unregistered(std::any::type_name::<T>()),
        }
    }
}

/// Payload of one recorded operation.
pub(crate) enum OpData {
    CreateEntity {
        callback: Option<Box<dyn FnOnce(Entity) + Send>>,
    },
    DestroyEntity,
    DestroyAllEntities,
    AddComponent {
        type_ref: TypeRef,
        value: BoxedValue,
    },
    ReplaceComponent {
        type_ref: TypeRef,
        value: BoxedValue,
    },
    RemoveComponent {
        type_ref: TypeRef,
    },
    SetSingleton {
        type_ref: TypeRef,
        value: BoxedValue,
    },
    RemoveSingleton {
        type_ref: TypeRef,
    },
    /// An opaque op running against the world at the barrier. Used for
    /// `process` (mutate-in-place under the write barrier).
    Exec {
        run: Box<dyn FnOnce(&mut World) + Send>,
    },
}

pub(crate) struct Op {
    pub entity: Option<Entity>,
    pub data: OpData,
}

/// An ordered record of pending structural and value operations.
///
/// Obtained from [`World::begin_write`] (or [`World::write_scope`] for the
/// RAII variant). Recording is infallible; failures surface per op in the
/// [`ApplyReport`] when the buffer applies at a barrier. A buffer handed
/// out during a read-only presentation phase is rejected whole at apply.
pub struct CommandBuffer {
    pub(crate) ops: Vec<Op>,
    alloc: AllocHandle,
    /// Name of the read-only phase this buffer was opened in, if any.
    pub(crate) read_only_phase: Option<&'static str>,
}

impl CommandBuffer {
    pub(crate) fn new(alloc: AllocHandle, read_only_phase: Option<&'static str>) -> Self {
        Self {
            ops: Vec::new(),
            alloc,
            read_only_phase,
        }
    }

    /// Reserves a new entity handle and records its creation.
    ///
    /// The handle is real immediately, so subsequent ops in this buffer
    /// may use it, but the entity only becomes alive when the buffer
    /// applies.
    pub fn create_entity(&mut self) -> Entity {
        let entity = reserve_from(&self.alloc);
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::CreateEntity { callback: None },
        });
        entity
    }

    /// Batch variant of [`create_entity`](Self::create_entity).
    pub fn create_entities(&mut self, count: usize) -> Vec<Entity> {
        (0..count).map(|_| self.create_entity()).collect()
    }

    /// Reserves an entity and records a callback invoked with the handle
    /// when the creation applies. Used by the external command queue.
    pub fn create_entity_with(
        &mut self,
        callback: impl FnOnce(Entity) + Send + 'static,
    ) -> Entity {
        let entity = reserve_from(&self.alloc);
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::CreateEntity {
                callback: Some(Box::new(callback)),
            },
        });
        entity
    }

    /// Records an entity destruction.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::DestroyEntity,
        });
    }

    /// Records destruction of every alive entity, in ascending id order.
    pub fn destroy_all_entities(&mut self) {
        self.ops.push(Op {
            entity: None,
            data: OpData::DestroyAllEntities,
        });
    }

    /// Records a component addition; applying fails with `AlreadyPresent`
    /// if the entity already carries `T`.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::AddComponent {
                type_ref: TypeRef::resolve::<T>(),
                value: Box::new(value),
            },
        });
    }

    /// Records an add-or-update; applying emits an `Added` or `Changed`
    /// delta accordingly.
    pub fn replace_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::ReplaceComponent {
                type_ref: TypeRef::resolve::<T>(),
                value: Box::new(value),
            },
        });
    }

    /// Records a component removal; a no-op at apply if absent.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::RemoveComponent {
                type_ref: TypeRef::resolve::<T>(),
            },
        });
    }

    /// Records a singleton write: replaces the current owner's value, or
    /// allocates a hidden owner entity if none exists.
    pub fn set_singleton<T: Component>(&mut self, value: T) {
        self.ops.push(Op {
            entity: None,
            data: OpData::SetSingleton {
                type_ref: TypeRef::resolve::<T>(),
                value: Box::new(value),
            },
        });
    }

    /// Records a singleton removal; the hidden owner entity is destroyed
    /// if nothing else is attached to it.
    pub fn remove_singleton<T: Component>(&mut self) {
        self.ops.push(Op {
            entity: None,
            data: OpData::RemoveSingleton {
                type_ref: TypeRef::resolve::<T>(),
            },
        });
    }

    // ---- Boxed variants (external command drain) ----

    /// Boxed-by-id component addition.
    pub fn add_component_boxed(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
        value: BoxedValue,
    ) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::AddComponent {
                type_ref: TypeRef::Id(type_id),
                value,
            },
        });
    }

    /// Boxed-by-id add-or-update.
    pub fn replace_component_boxed(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
        value: BoxedValue,
    ) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::ReplaceComponent {
                type_ref: TypeRef::Id(type_id),
                value,
            },
        });
    }

    /// Boxed-by-id component removal.
    pub fn remove_component_boxed(&mut self, entity: Entity, type_id: ComponentTypeId) {
        self.ops.push(Op {
            entity: Some(entity),
            data: OpData::RemoveComponent {
                type_ref: TypeRef::Id(type_id),
            },
        });
    }

    /// Boxed-by-id singleton write.
    pub fn set_singleton_boxed(&mut self, type_id: ComponentTypeId, value: BoxedValue) {
        self.ops.push(Op {
            entity: None,
            data: OpData::SetSingleton {
                type_ref: TypeRef::Id(type_id),
                value,
            },
        });
    }

    /// Records a mutate-in-place pass over `entities` for component `T`,
    /// running at the apply barrier. Entities that are dead or lack `T`
    /// are skipped silently. Structural changes from inside the closure
    /// must go through another command buffer.
    pub fn process<T: Component>(
        &mut self,
        entities: Vec<Entity>,
        mut f: impl FnMut(Entity, &mut T) + Send + 'static,
    ) {
        self.ops.push(Op {
            entity: None,
            data: OpData::Exec {
                run: Box::new(move |world: &mut World| {
                    world.process::<T>(&entities, &mut f);
                }),
            },
        });
    }

    /// Records a message publication that lands in the world FIFO at the
    /// apply barrier, for delivery at the following message pump.
    pub fn publish<M: Send + Sync + 'static>(&mut self, message: M) {
        self.ops.push(Op {
            entity: None,
            data: OpData::Exec {
                run: Box::new(move |world: &mut World| {
                    world.publish(message);
                }),
            },
        });
    }

    /// Number of recorded ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether this buffer was opened during a read-only phase (its ops
    /// will be rejected at the barrier).
    pub fn is_read_only(&self) -> bool {
        self.read_only_phase.is_some()
    }
}

/// RAII wrapper that queues the buffer back to its world on drop.
///
/// Obtained from [`World::write_scope`]; the buffer applies at the next
/// barrier after the scope ends.
pub struct WriteScope<'w> {
    world: &'w World,
    buffer: Option<CommandBuffer>,
}

impl<'w> WriteScope<'w> {
    pub(crate) fn new(world: &'w World, buffer: CommandBuffer) -> Self {
        Self {
            world,
            buffer: Some(buffer),
        }
    }
}

impl std::ops::Deref for WriteScope<'_> {
    type Target = CommandBuffer;

    fn deref(&self) -> &CommandBuffer {
        self.buffer.as_ref().expect("buffer taken")
    }
}

impl std::ops::DerefMut for WriteScope<'_> {
    fn deref_mut(&mut self) -> &mut CommandBuffer {
        self.buffer.as_mut().expect("buffer taken")
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.world.end_write(buffer);
        }
    }
}

/// Outcome of applying one command buffer (or a barrier's worth of them).
///
/// Per-op failures do not stop the remaining ops; they are logged and
/// collected here.
#[derive(Default, Debug)]
pub struct ApplyReport {
    /// Ops that executed successfully.
    pub applied: usize,
    /// Per-op failures, in op order.
    pub failures: Vec<EcsError>,
}

impl ApplyReport {
    /// Whether every op applied.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.failures.extend(other.failures);
    }
}

/// A mutation submitted from outside the simulation loop.
///
/// Producers enqueue these through [`World::enqueue_command`] from any
/// thread; the world drains them into a fresh command buffer at the next
/// fixed-step barrier (or at [`World::run_scheduled_jobs`]). Payloads are
/// boxed values keyed by registered type id.
pub enum ExternalCommand {
    /// Create an entity; the optional callback receives the handle once
    /// the creation applies.
    CreateEntity(Option<Box<dyn FnOnce(Entity) + Send>>),
    /// Destroy an entity.
    DestroyEntity(Entity),
    /// Add a component; fails at apply if already present.
    AddComponent(Entity, ComponentTypeId, BoxedValue),
    /// Add-or-update a component.
    ReplaceComponent(Entity, ComponentTypeId, BoxedValue),
    /// Remove a component if present.
    RemoveComponent(Entity, ComponentTypeId),
    /// Write a singleton value.
    SetSingleton(ComponentTypeId, BoxedValue),
    /// Destroy every alive entity.
    DestroyAllEntities,
}
