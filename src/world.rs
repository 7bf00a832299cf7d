//! The world: one isolated simulation space.
//!
//! A world owns its entity table, one component pool per registered type,
//! the message bus, hook and validator registries, the binding surface,
//! the scheduler and the command plumbing. Reads take `&self`; every
//! structural or value mutation funnels through the command apply path,
//! which gates each op on write hooks and validators and emits lifecycle
//! events and component deltas synchronously as ops execute.
//!
//! Worlds are independent: nothing is shared between two worlds, and a
//! world may be stepped from any thread as long as only one thread touches
//! it at a time.

use std::any::{Any, TypeId};
use std::collections::VecDeque;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::binding::{
    Binder, BinderSlot, BindingContext, BindingRegistry, ComponentDelta, ContextSlot, DeltaKind,
};
use crate::commands::{
    ApplyReport, CommandBuffer, ExternalCommand, Op, OpData, TypeRef, WriteScope,
};
use crate::component::{self, Component, ComponentTypeId};
use crate::entity::{Entity, EntityTable};
use crate::error::EcsError;
use crate::events::{event_hub, LifecycleEvent, LifecycleObservers, ObserverId};
use crate::hooks::Hooks;
use crate::messages::{MessageBus, Subscription};
use crate::schedule::{sort_nodes, OrderingNode, PendingAdd, PendingChange, Scheduler};
use crate::singleton::SingletonRegistry;
use crate::snapshot::PostLoadMigration;
use crate::sparse_set::{BoxedValue, ComponentPool, SparseSet};
use crate::system::{System, SystemCtx, SystemGroup};

/// Stable 128-bit world identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(u128);

impl WorldId {
    /// Mints a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    /// The raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Default for WorldId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorldId({:032x})", self.0)
    }
}

/// An isolated simulation space.
pub struct World {
    id: WorldId,
    name: String,
    tags: Vec<String>,
    pub(crate) entities: EntityTable,
    /// Pools indexed by dense [`ComponentTypeId`]; `None` until first use.
    pools: Vec<Option<ComponentPool>>,
    singletons: SingletonRegistry,
    hooks: Hooks,
    bus: MessageBus,
    observers: LifecycleObservers,
    bindings: BindingRegistry,
    scheduler: Scheduler,
    migrations: Vec<Box<dyn PostLoadMigration>>,
    /// Buffers queued for the next barrier.
    scheduled: Mutex<Vec<CommandBuffer>>,
    /// Commands enqueued from outside the simulation loop.
    external: Mutex<VecDeque<ExternalCommand>>,
    frame_count: u64,
    tick: u64,
    paused: bool,
    disposing: bool,
}

impl World {
    /// Creates an empty world with a generated id.
    pub fn new() -> Self {
        Self::with_name("world")
    }

    /// Creates an empty world with the given name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            id: WorldId::new(),
            name: name.into(),
            tags: Vec::new(),
            entities: EntityTable::new(),
            pools: Vec::new(),
            singletons: SingletonRegistry::default(),
            hooks: Hooks::default(),
            bus: MessageBus::default(),
            observers: LifecycleObservers::default(),
            bindings: BindingRegistry::default(),
            scheduler: Scheduler::new(),
            migrations: Vec::new(),
            scheduled: Mutex::new(Vec::new()),
            external: Mutex::new(VecDeque::new()),
            frame_count: 0,
            tick: 0,
            paused: false,
            disposing: false,
        }
    }

    // ---- Identity & counters ----

    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    /// Variable-step frames begun so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Fixed-step ticks completed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pauses or resumes stepping. A paused world still answers queries
    /// and accepts external commands, but advances no counters and applies
    /// no buffers.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing
    }

    /// Residual fixed-step time debt in seconds.
    pub fn accumulator_seconds(&self) -> f64 {
        self.scheduler.accumulator
    }

    // ---- Entity reads ----

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Aliveness by raw parts.
    pub fn is_alive_at(&self, id: u32, generation: u32) -> bool {
        self.entities.is_alive(Entity::from_parts(id, generation))
    }

    /// The slot's current generation, or `None` for a never-used index.
    pub fn generation_of(&self, id: u32) -> Option<u32> {
        self.entities.generation_of(id)
    }

    pub fn alive_count(&self) -> u32 {
        self.entities.alive_count()
    }

    /// Snapshot copy of all alive entities in ascending id order.
    pub fn all_entities(&self) -> Vec<Entity> {
        self.entities.all_entities()
    }

    // ---- Pools ----

    pub(crate) fn pool(&self, type_id: ComponentTypeId) -> Option<&ComponentPool> {
        self.pools.get(type_id.0 as usize)?.as_ref()
    }

    /// Every pool that exists in this world, in ascending type-id order.
    pub(crate) fn pools_iter(&self) -> impl Iterator<Item = &ComponentPool> {
        self.pools.iter().flatten()
    }

    /// Buffers waiting for the next apply barrier.
    pub(crate) fn queued_buffer_count(&self) -> usize {
        self.scheduled.lock().len()
    }

    /// Systems currently effective across all groups.
    pub(crate) fn effective_system_count(&self) -> usize {
        self.scheduler.total_systems()
    }

    pub(crate) fn pool_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut ComponentPool> {
        self.pools.get_mut(type_id.0 as usize)?.as_mut()
    }

    /// The typed sparse set for `T`, if a pool exists in this world.
    pub(crate) fn typed_pool<T: Component>(&self) -> Option<&SparseSet<T>> {
        let id = component::component_id::<T>()?;
        Some(self.pool(id)?.typed::<T>())
    }

    /// Returns the pool for a type, creating it from the registry on first
    /// use.
    fn ensure_pool(&mut self, type_id: ComponentTypeId) -> Result<&mut ComponentPool, EcsError> {
        let idx = type_id.0 as usize;
        if idx >= self.pools.len() {
            self.pools.resize_with(idx + 1, || None);
        }
        if self.pools[idx].is_none() {
            let pool = component::new_pool(type_id).ok_or_else(|| EcsError::Registry {
                message: format!("no registry entry for component id #{}", type_id.0),
            })?;
            self.pools[idx] = Some(pool);
        }
        Ok(self.pools[idx].as_mut().expect("pool just ensured"))
    }

    pub(crate) fn install_pools(&mut self, pools: Vec<(ComponentTypeId, ComponentPool)>) {
        self.pools.clear();
        for (type_id, pool) in pools {
            let idx = type_id.0 as usize;
            if idx >= self.pools.len() {
                self.pools.resize_with(idx + 1, || None);
            }
            self.pools[idx] = Some(pool);
        }
    }

    // ---- Component reads ----

    /// Whether the entity is alive and carries `T`.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        component::component_id::<T>()
            .is_some_and(|id| self.has_component_id(entity, id))
    }

    /// Boxed variant of [`has_component`](Self::has_component).
    pub fn has_component_id(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.entities.is_alive(entity)
            && self.pool(type_id).is_some_and(|pool| pool.contains(entity.id()))
    }

    /// Borrowing read of a component value.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.typed_pool::<T>()?.get(entity.id())
    }

    /// Owned read of a component value.
    pub fn read_component<T: Component>(&self, entity: Entity) -> Result<T, EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        let id = component::require_id::<T>()?;
        self.pool(id)
            .and_then(|pool| pool.get::<T>(entity.id()))
            .cloned()
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                stable_id: component::stable_id_or_unknown(id),
            })
    }

    /// Non-failing owned read.
    pub fn try_read_component<T: Component>(&self, entity: Entity) -> Option<T> {
        self.get::<T>(entity).cloned()
    }

    /// Owned read gated by the read-permission hook channel.
    pub fn read_component_checked<T: Component>(&self, entity: Entity) -> Result<T, EcsError> {
        let id = component::require_id::<T>()?;
        if !self.hooks.check_read(entity, id) {
            return Err(EcsError::PermissionDenied {
                entity,
                stable_id: component::stable_id_or_unknown(id),
            });
        }
        self.read_component::<T>(entity)
    }

    /// Every component on an entity as `(type id, boxed clone)` pairs, in
    /// ascending type-id order. Empty for dead entities.
    pub fn get_all_components(&self, entity: Entity) -> Vec<(ComponentTypeId, BoxedValue)> {
        if !self.entities.is_alive(entity) {
            return Vec::new();
        }
        let mut components = Vec::new();
        for (idx, pool) in self.pools.iter().enumerate() {
            if let Some(pool) = pool {
                if let Some(value) = pool.clone_boxed(entity.id()) {
                    components.push((ComponentTypeId(idx as u32), value));
                }
            }
        }
        components
    }

    // ---- Immediate mutation (barrier context) ----
    //
    // These run the same gate-and-emit path the command apply uses. They
    // are intended for barrier contexts: command application itself,
    // message handlers, migrations and host code outside the frame step.
    // Systems must go through their command buffer instead.

    /// Creates an entity immediately.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.entities.reserve();
        self.entities.commit(entity);
        self.emit(LifecycleEvent::EntityCreated(entity));
        entity
    }

    /// Destroys an entity immediately, with the full teardown sequence:
    /// destroy-request event, binder and context detach, component
    /// removals, destroy event, generation bump.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        self.emit(LifecycleEvent::EntityDestroyRequested(entity));

        for slot in self.bindings.take_binders(entity) {
            let mut binder = slot.binder;
            binder.detached(entity);
        }
        for slot in self.bindings.take_contexts(entity) {
            let mut context = slot.context;
            context.detached(entity);
        }

        for idx in 0..self.pools.len() {
            let removed = self.pools[idx]
                .as_mut()
                .and_then(|pool| pool.remove_boxed(entity.id()));
            if removed.is_some() {
                self.emit(LifecycleEvent::ComponentRemoved(
                    entity,
                    ComponentTypeId(idx as u32),
                ));
            }
        }

        self.singletons.clear_entity(entity);
        self.emit(LifecycleEvent::EntityDestroyed(entity));
        if !self.entities.destroy(entity) {
            // The handle was alive at entry; a failed destroy means the
            // slot table no longer agrees with itself.
            self.mark_integrity_failure("entity teardown");
            return Err(EcsError::NoSuchEntity { entity });
        }
        Ok(())
    }

    /// Destroys every alive entity in ascending id order.
    pub fn despawn_all(&mut self) {
        for entity in self.entities.all_entities() {
            // The list is a snapshot; entries stay valid for the sweep.
            let _ = self.despawn(entity);
        }
    }

    /// Adds a component immediately; fails if already present.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        let id = component::require_id::<T>()?;
        self.apply_add(entity, id, Box::new(value))
    }

    /// Adds or updates a component immediately.
    pub fn replace_component<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), EcsError> {
        let id = component::require_id::<T>()?;
        self.apply_replace(entity, id, Box::new(value))
    }

    /// Removes a component immediately; `Ok(false)` when absent.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool, EcsError> {
        let id = component::require_id::<T>()?;
        self.apply_remove(entity, id)
    }

    /// Writes a singleton immediately, allocating a hidden owner entity
    /// when none exists. Returns the owner.
    pub fn set_singleton<T: Component>(&mut self, value: T) -> Result<Entity, EcsError> {
        let id = component::require_id::<T>()?;
        self.apply_set_singleton(id, Box::new(value))
    }

    /// Removes a singleton immediately; destroys the owner entity if
    /// nothing else is attached to it. `Ok(false)` when no owner exists.
    pub fn remove_singleton<T: Component>(&mut self) -> Result<bool, EcsError> {
        let id = component::require_id::<T>()?;
        self.apply_remove_singleton(id)
    }

    /// Calls `f` with mutable access to `T` for each listed entity that is
    /// alive and carries it, silently skipping the rest.
    ///
    /// This is the immediate form; [`CommandBuffer::process`] defers the
    /// same pass to the apply barrier.
    pub fn process<T: Component>(
        &mut self,
        entities: &[Entity],
        mut f: impl FnMut(Entity, &mut T),
    ) {
        let Some(id) = component::component_id::<T>() else {
            return;
        };
        for &entity in entities {
            if !self.entities.is_alive(entity) {
                continue;
            }
            if let Some(pool) = self.pool_mut(id) {
                if let Some(value) = pool.get_mut::<T>(entity.id()) {
                    f(entity, value);
                }
            }
        }
    }

    // ---- Singleton reads ----

    /// The live owner of a singleton type.
    pub fn singleton_owner(&self, type_id: ComponentTypeId) -> Option<Entity> {
        self.singletons
            .owner(type_id)
            .filter(|owner| self.entities.is_alive(*owner))
    }

    /// Whether `entity` is the recorded owner of any singleton type.
    pub fn has_singleton(&self, entity: Entity) -> bool {
        self.singletons.owns_any(entity)
    }

    /// Every `(type, owner)` pair in ascending type-id order.
    pub fn all_singletons(&self) -> Vec<(ComponentTypeId, Entity)> {
        self.singletons.iter().collect()
    }

    /// Owned read of a singleton value.
    pub fn try_read_singleton<T: Component>(&self) -> Option<T> {
        let id = component::component_id::<T>()?;
        let owner = self.singleton_owner(id)?;
        self.try_read_component::<T>(owner)
    }

    // ---- Hooks & validators ----

    /// Adds a read-permission predicate; all must pass for opt-in reads.
    pub fn add_read_hook(
        &mut self,
        hook: impl Fn(Entity, ComponentTypeId) -> bool + Send + Sync + 'static,
    ) {
        self.hooks.add_read(hook);
    }

    /// Adds a write-permission predicate; all must pass for any component
    /// op to apply.
    pub fn add_write_hook(
        &mut self,
        hook: impl Fn(Entity, ComponentTypeId) -> bool + Send + Sync + 'static,
    ) {
        self.hooks.add_write(hook);
    }

    /// Adds a typed value validator for `T`.
    pub fn add_validator<T: Component>(
        &mut self,
        validator: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Result<(), EcsError> {
        let id = component::require_id::<T>()?;
        self.hooks.add_typed_validator(id, move |value| {
            value.downcast_ref::<T>().map_or(true, &validator)
        });
        Ok(())
    }

    /// Adds an untyped validator applied to every value write.
    pub fn add_value_validator(
        &mut self,
        validator: impl Fn(&dyn Any) -> bool + Send + Sync + 'static,
    ) {
        self.hooks.add_untyped_validator(validator);
    }

    // ---- Messages ----

    /// Subscribes a handler for message type `M`; handlers run in
    /// subscription order at each delivery.
    pub fn subscribe<M: Send + Sync + 'static>(
        &mut self,
        handler: impl FnMut(&mut World, &M) + Send + 'static,
    ) -> Subscription {
        self.bus.subscribe(handler)
    }

    /// Drops a subscription. Deterministic: later deliveries skip the
    /// slot, and a pump already past it is unaffected for the current
    /// message.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.bus.unsubscribe(subscription);
    }

    /// Appends a message to the world FIFO for the next pump.
    pub fn publish<M: Send + Sync + 'static>(&mut self, message: M) {
        self.bus.publish(message);
    }

    /// Messages waiting for the next pump.
    pub fn pending_messages(&self) -> usize {
        self.bus.pending_count()
    }

    /// Delivers every queued message in FIFO order. Messages published by
    /// handlers during this pump are delivered at the next one. Handler
    /// panics propagate to the caller.
    pub fn pump_messages(&mut self) {
        let queue = self.bus.take_queue();
        for message in queue {
            let mut slots = self.bus.take_handlers(message.type_id);
            for slot in slots.iter_mut() {
                if self.bus.is_removed(slot.id) {
                    continue;
                }
                (slot.func)(self, message.payload.as_ref());
            }
            self.bus.restore_handlers(message.type_id, slots);
        }
    }

    // ---- Lifecycle observers ----

    /// Subscribes a diagnostic observer for lifecycle events. Observers
    /// get read-only world access and must not re-enter the world.
    pub fn observe_lifecycle(
        &mut self,
        observer: impl Fn(&World, &LifecycleEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Removes a lifecycle observer.
    pub fn remove_lifecycle_observer(&mut self, id: ObserverId) {
        self.observers.remove(id);
    }

    fn emit(&mut self, event: LifecycleEvent) {
        if !self.observers.is_empty() {
            let slots = self.observers.take();
            for (_, observer) in &slots {
                observer(self, &event);
            }
            self.observers.restore(slots);
        }
        event_hub().broadcast(self.id, &event);
    }

    // ---- Binding surface ----

    /// Registers a view-side context against an entity.
    pub fn register_context<C: BindingContext>(
        &mut self,
        entity: Entity,
        context: C,
    ) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        let mut context = context;
        context.attached(self, entity);
        self.bindings.insert_context(
            entity,
            ContextSlot {
                type_id: TypeId::of::<C>(),
                context: Box::new(context),
            },
        );
        Ok(())
    }

    /// Whether the entity has any context registered.
    pub fn has_context(&self, entity: Entity) -> bool {
        self.bindings.has_context(entity)
    }

    /// Whether the entity has a context of concrete type `C`.
    pub fn has_context_of<C: BindingContext>(&self, entity: Entity) -> bool {
        self.bindings.has_context_of(entity, TypeId::of::<C>())
    }

    /// Number of contexts registered on the entity.
    pub fn context_count(&self, entity: Entity) -> usize {
        self.bindings.context_count(entity)
    }

    /// Every context registered on the entity, in registration order.
    pub fn all_contexts(&self, entity: Entity) -> Vec<&dyn BindingContext> {
        self.bindings
            .context_slots(entity)
            .iter()
            .map(|slot| slot.context.as_ref())
            .collect()
    }

    /// Removes the context of type `C`, firing its detach hook.
    pub fn remove_context<C: BindingContext>(&mut self, entity: Entity) -> bool {
        match self.bindings.remove_context(entity, TypeId::of::<C>()) {
            Some(slot) => {
                let mut context = slot.context;
                context.detached(entity);
                true
            }
            None => false,
        }
    }

    /// Re-runs the attach lifecycle of the context of type `C`.
    pub fn reinitialize_context<C: BindingContext>(&mut self, entity: Entity) -> bool {
        match self.bindings.remove_context(entity, TypeId::of::<C>()) {
            Some(mut slot) => {
                slot.context.detached(entity);
                slot.context.attached(self, entity);
                self.bindings.insert_context(entity, slot);
                true
            }
            None => false,
        }
    }

    /// Attaches a binder to an entity, capturing its observed-type route
    /// table once.
    pub fn attach_binder<B: Binder>(&mut self, entity: Entity, binder: B) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        let mut binder = binder;
        let observed = binder.observed_types();
        binder.attached(self, entity);
        self.bindings.insert_binder(
            entity,
            BinderSlot {
                type_id: TypeId::of::<B>(),
                observed,
                binder: Box::new(binder),
            },
        );
        Ok(())
    }

    /// Whether the entity has a binder of concrete type `B`.
    pub fn has_binder<B: Binder>(&self, entity: Entity) -> bool {
        self.bindings.has_binder(entity, TypeId::of::<B>())
    }

    /// Number of binders attached to the entity.
    pub fn binder_count(&self, entity: Entity) -> usize {
        self.bindings.binder_count(entity)
    }

    /// Every binder attached to the entity, in attachment order.
    pub fn all_binders(&self, entity: Entity) -> Vec<&dyn Binder> {
        self.bindings
            .binder_slots(entity)
            .iter()
            .map(|slot| slot.binder.as_ref())
            .collect()
    }

    /// Detaches the binder of type `B`, firing its detach hook.
    pub fn detach_binder<B: Binder>(&mut self, entity: Entity) -> bool {
        self.detach_binder_by_type(entity, TypeId::of::<B>())
    }

    /// Detaches a binder by its concrete `TypeId`.
    pub fn detach_binder_by_type(&mut self, entity: Entity, type_id: TypeId) -> bool {
        match self.bindings.remove_binder(entity, type_id) {
            Some(slot) => {
                let mut binder = slot.binder;
                binder.detached(entity);
                true
            }
            None => false,
        }
    }

    /// Detaches every binder from the entity.
    pub fn detach_all_binders(&mut self, entity: Entity) {
        for slot in self.bindings.take_binders(entity) {
            let mut binder = slot.binder;
            binder.detached(entity);
        }
    }

    /// Re-emits the current value of `T` on `entity` as a `Snapshot`
    /// delta, without touching storage.
    pub fn snapshot_component<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        let id = component::require_id::<T>()?;
        self.snapshot_component_id(entity, id)
    }

    /// Boxed variant of [`snapshot_component`](Self::snapshot_component).
    pub fn snapshot_component_id(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        let value = self
            .pool(type_id)
            .and_then(|pool| pool.clone_boxed(entity.id()))
            .ok_or_else(|| EcsError::MissingComponent {
                entity,
                stable_id: component::stable_id_or_unknown(type_id),
            })?;
        self.dispatch_delta(ComponentDelta {
            kind: DeltaKind::Snapshot,
            entity,
            type_id,
            old: None,
            new: Some(value),
        });
        Ok(())
    }

    fn dispatch_delta(&mut self, delta: ComponentDelta) {
        let Some(mut slots) = self.bindings.take_binders_for_dispatch(delta.entity.id()) else {
            return;
        };
        for slot in slots.iter_mut() {
            if slot.observes(delta.type_id) {
                slot.binder.on_delta(self, &delta);
            }
        }
        self.bindings.restore_binders(delta.entity.id(), slots);
    }

    /// Whether any binder on the entity observes the type. Used to skip
    /// value clones when nobody is listening.
    fn delta_observed(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.bindings.observes(entity, type_id)
    }

    // ---- Command plumbing ----

    /// Opens a command buffer. During a read-only presentation phase the
    /// buffer is marked and will be rejected whole at the barrier.
    pub fn begin_write(&self) -> CommandBuffer {
        let read_only_phase = self
            .scheduler
            .current_phase
            .filter(SystemGroup::is_read_only)
            .map(|group| group.name());
        CommandBuffer::new(self.entities.alloc_handle(), read_only_phase)
    }

    /// Opens a command buffer that queues itself back on drop.
    pub fn write_scope(&self) -> WriteScope<'_> {
        WriteScope::new(self, self.begin_write())
    }

    /// Queues a buffer for the next apply barrier.
    pub fn end_write(&self, buffer: CommandBuffer) {
        self.scheduled.lock().push(buffer);
    }

    /// Enqueues an external command; callable from any thread, including
    /// while the world is paused.
    pub fn enqueue_command(&self, command: ExternalCommand) {
        self.external.lock().push_back(command);
    }

    /// Commands waiting in the external FIFO.
    pub fn pending_external_commands(&self) -> usize {
        self.external.lock().len()
    }

    /// Applies one buffer immediately. Per-op failures are logged,
    /// collected into the report and do not stop the remaining ops.
    pub fn apply(&mut self, buffer: CommandBuffer) -> ApplyReport {
        let mut report = ApplyReport::default();
        if let Some(phase) = buffer.read_only_phase {
            if !buffer.is_empty() {
                let err = EcsError::InvalidPhase { phase };
                log::warn!("world `{}`: {err}", self.name);
                report.failures.push(err);
            }
            return report;
        }
        for op in buffer.ops {
            match self.apply_op(op) {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    log::warn!("world `{}`: command rejected: {err}", self.name);
                    report.failures.push(err);
                }
            }
        }
        report
    }

    /// Drains the external FIFO and applies every queued buffer. The
    /// explicit barrier; no-op while paused or disposing.
    pub fn run_scheduled_jobs(&mut self) -> ApplyReport {
        if self.paused || self.disposing {
            return ApplyReport::default();
        }
        self.drain_external();
        self.apply_scheduled()
    }

    pub(crate) fn drain_external(&mut self) {
        let commands: Vec<ExternalCommand> = {
            let mut queue = self.external.lock();
            queue.drain(..).collect()
        };
        if commands.is_empty() {
            return;
        }
        let mut buffer = self.begin_write();
        for command in commands {
            match command {
                ExternalCommand::CreateEntity(Some(callback)) => {
                    buffer.create_entity_with(callback);
                }
                ExternalCommand::CreateEntity(None) => {
                    buffer.create_entity();
                }
                ExternalCommand::DestroyEntity(entity) => buffer.destroy_entity(entity),
                ExternalCommand::AddComponent(entity, type_id, value) => {
                    buffer.add_component_boxed(entity, type_id, value);
                }
                ExternalCommand::ReplaceComponent(entity, type_id, value) => {
                    buffer.replace_component_boxed(entity, type_id, value);
                }
                ExternalCommand::RemoveComponent(entity, type_id) => {
                    buffer.remove_component_boxed(entity, type_id);
                }
                ExternalCommand::SetSingleton(type_id, value) => {
                    buffer.set_singleton_boxed(type_id, value);
                }
                ExternalCommand::DestroyAllEntities => buffer.destroy_all_entities(),
            }
        }
        self.end_write(buffer);
    }

    pub(crate) fn apply_scheduled(&mut self) -> ApplyReport {
        const MAX_ROUNDS: u32 = 100;
        let mut report = ApplyReport::default();
        for round in 0.. {
            let buffers: Vec<CommandBuffer> = std::mem::take(&mut *self.scheduled.lock());
            if buffers.is_empty() {
                break;
            }
            if round == MAX_ROUNDS {
                log::warn!(
                    "world `{}`: barrier did not settle after {MAX_ROUNDS} rounds, \
                     leaving {} buffer(s) queued",
                    self.name,
                    buffers.len()
                );
                self.scheduled.lock().extend(buffers);
                break;
            }
            for buffer in buffers {
                report.merge(self.apply(buffer));
            }
        }
        report
    }

    fn apply_op(&mut self, op: Op) -> Result<(), EcsError> {
        fn op_entity(op_entity: Option<Entity>) -> Result<Entity, EcsError> {
            op_entity.ok_or_else(|| EcsError::Registry {
                message: "malformed op: missing entity".to_string(),
            })
        }
        fn resolve(type_ref: TypeRef) -> Result<ComponentTypeId, EcsError> {
            match type_ref {
                TypeRef::Id(id) => Ok(id),
                TypeRef::Unregistered(type_name) => Err(EcsError::Registry {
                    message: format!("component type `{type_name}` was never registered"),
                }),
            }
        }

        match op.data {
            OpData::CreateEntity { callback } => {
                let entity = op_entity(op.entity)?;
                self.entities.commit(entity);
                self.emit(LifecycleEvent::EntityCreated(entity));
                if let Some(callback) = callback {
                    callback(entity);
                }
                Ok(())
            }
            OpData::DestroyEntity => self.despawn(op_entity(op.entity)?),
            OpData::DestroyAllEntities => {
                self.despawn_all();
                Ok(())
            }
            OpData::AddComponent { type_ref, value } => {
                self.apply_add(op_entity(op.entity)?, resolve(type_ref)?, value)
            }
            OpData::ReplaceComponent { type_ref, value } => {
                self.apply_replace(op_entity(op.entity)?, resolve(type_ref)?, value)
            }
            OpData::RemoveComponent { type_ref } => {
                self.apply_remove(op_entity(op.entity)?, resolve(type_ref)?)
                    .map(|_| ())
            }
            OpData::SetSingleton { type_ref, value } => {
                self.apply_set_singleton(resolve(type_ref)?, value).map(|_| ())
            }
            OpData::RemoveSingleton { type_ref } => {
                self.apply_remove_singleton(resolve(type_ref)?).map(|_| ())
            }
            OpData::Exec { run } => {
                run(self);
                Ok(())
            }
        }
    }

    /// Common gate for value writes: write hooks, validators, singleton
    /// ownership.
    fn gate_value_write(
        &self,
        entity: Entity,
        type_id: ComponentTypeId,
        value: &dyn Any,
    ) -> Result<(), EcsError> {
        if !self.hooks.check_write(entity, type_id) {
            return Err(EcsError::PermissionDenied {
                entity,
                stable_id: component::stable_id_or_unknown(type_id),
            });
        }
        if !self.hooks.validate(type_id, value) {
            return Err(EcsError::ValidationFailed {
                entity,
                stable_id: component::stable_id_or_unknown(type_id),
            });
        }
        if component::is_singleton(type_id) {
            if let Some(owner) = self.singleton_owner(type_id) {
                if owner != entity {
                    return Err(EcsError::SingletonViolation {
                        owner,
                        stable_id: component::stable_id_or_unknown(type_id),
                    });
                }
            }
        }
        Ok(())
    }

    fn apply_add(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
        value: BoxedValue,
    ) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        self.gate_value_write(entity, type_id, &*value)?;

        let pool = self.ensure_pool(type_id)?;
        if pool.contains(entity.id()) {
            return Err(EcsError::AlreadyPresent {
                entity,
                stable_id: component::stable_id_or_unknown(type_id),
            });
        }
        pool.insert_boxed(entity, value)?;
        if component::is_singleton(type_id) {
            self.singletons.record(type_id, entity);
        }

        self.emit(LifecycleEvent::ComponentAdded(entity, type_id));
        if self.delta_observed(entity, type_id) {
            let new = self.pool(type_id).and_then(|pool| pool.clone_boxed(entity.id()));
            self.dispatch_delta(ComponentDelta {
                kind: DeltaKind::Added,
                entity,
                type_id,
                old: None,
                new,
            });
        }
        Ok(())
    }

    fn apply_replace(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
        value: BoxedValue,
    ) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        self.gate_value_write(entity, type_id, &*value)?;

        let pool = self.ensure_pool(type_id)?;
        let old = pool.insert_boxed(entity, value)?;
        if component::is_singleton(type_id) {
            self.singletons.record(type_id, entity);
        }

        let added = old.is_none();
        if added {
            self.emit(LifecycleEvent::ComponentAdded(entity, type_id));
        }
        if self.delta_observed(entity, type_id) {
            let new = self.pool(type_id).and_then(|pool| pool.clone_boxed(entity.id()));
            self.dispatch_delta(ComponentDelta {
                kind: if added { DeltaKind::Added } else { DeltaKind::Changed },
                entity,
                type_id,
                old,
                new,
            });
        }
        Ok(())
    }

    fn apply_remove(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Result<bool, EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NoSuchEntity { entity });
        }
        if !self.hooks.check_write(entity, type_id) {
            return Err(EcsError::PermissionDenied {
                entity,
                stable_id: component::stable_id_or_unknown(type_id),
            });
        }

        let Some(old) = self
            .pool_mut(type_id)
            .and_then(|pool| pool.remove_boxed(entity.id()))
        else {
            return Ok(false);
        };
        if self.singletons.owner(type_id) == Some(entity) {
            self.singletons.clear_type(type_id);
        }

        self.emit(LifecycleEvent::ComponentRemoved(entity, type_id));
        if self.delta_observed(entity, type_id) {
            self.dispatch_delta(ComponentDelta {
                kind: DeltaKind::Removed,
                entity,
                type_id,
                old: Some(old),
                new: None,
            });
        }
        Ok(true)
    }

    fn apply_set_singleton(
        &mut self,
        type_id: ComponentTypeId,
        value: BoxedValue,
    ) -> Result<Entity, EcsError> {
        if !component::is_singleton(type_id) {
            return Err(EcsError::Registry {
                message: format!(
                    "`{}` is not registered as a singleton",
                    component::stable_id_or_unknown(type_id)
                ),
            });
        }
        match self.singleton_owner(type_id) {
            Some(owner) => {
                self.apply_replace(owner, type_id, value)?;
                Ok(owner)
            }
            None => {
                let owner = self.spawn();
                match self.apply_add(owner, type_id, value) {
                    Ok(()) => Ok(owner),
                    Err(err) => {
                        // Roll the hidden entity back so a rejected write
                        // leaves nothing behind.
                        let _ = self.despawn(owner);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Number of components on an alive entity, without cloning any.
    fn component_count(&self, entity: Entity) -> usize {
        self.pools
            .iter()
            .flatten()
            .filter(|pool| pool.contains(entity.id()))
            .count()
    }

    fn apply_remove_singleton(&mut self, type_id: ComponentTypeId) -> Result<bool, EcsError> {
        let Some(owner) = self.singleton_owner(type_id) else {
            return Ok(false);
        };
        let removed = self.apply_remove(owner, type_id)?;
        if removed && self.component_count(owner) == 0 {
            self.despawn(owner)?;
        }
        Ok(removed)
    }

    // ---- System management ----

    /// Queues a system addition, effective at the next `begin_frame`.
    ///
    /// Ordering constraints are validated against the group's projected
    /// membership immediately; a cycle fails here, not later.
    pub fn add_system<S: System>(&mut self, system: S) -> Result<(), EcsError> {
        let type_id = TypeId::of::<S>();
        let type_name = std::any::type_name::<S>();
        if self.scheduler.is_known(type_id) {
            return Err(EcsError::DuplicateSystem { type_name });
        }

        let boxed: Box<dyn System> = Box::new(system);
        let group = boxed.group();
        let decl = boxed.order();
        let mut nodes = self.scheduler.projected_nodes(group);
        nodes.push(OrderingNode {
            type_id,
            type_name,
            priority: boxed.priority(),
            before: decl.before,
            after: decl.after,
        });
        sort_nodes(&nodes)?;

        self.scheduler.pending.push(PendingChange::Add(PendingAdd {
            system: boxed,
            type_id,
            type_name,
        }));
        Ok(())
    }

    /// Queues a system removal, effective at the next `begin_frame`.
    pub fn remove_system<S: System>(&mut self) {
        self.scheduler
            .pending
            .push(PendingChange::Remove(TypeId::of::<S>()));
    }

    /// Queues an enabled-flag change; disabled systems are skipped by the
    /// runner without being removed.
    pub fn set_system_enabled<S: System>(&mut self, enabled: bool) {
        self.scheduler
            .pending
            .push(PendingChange::SetEnabled(TypeId::of::<S>(), enabled));
    }

    fn apply_pending_system_changes(&mut self) {
        let pending = std::mem::take(&mut self.scheduler.pending);
        for change in pending {
            match change {
                PendingChange::Add(add) => {
                    let mut system = add.system;
                    let group = system.group();
                    let priority = system.priority();
                    system.initialize(self);
                    self.scheduler.set_mut(group).add(crate::schedule::StoredSystem {
                        system,
                        type_id: add.type_id,
                        type_name: add.type_name,
                        priority,
                        enabled: true,
                    });
                }
                PendingChange::Remove(type_id) => {
                    if let Some(group) = self.scheduler.group_of(type_id) {
                        if let Some(mut stored) = self.scheduler.set_mut(group).remove(type_id) {
                            stored.system.shutdown(self);
                        }
                    }
                }
                PendingChange::SetEnabled(type_id, enabled) => {
                    if let Some(group) = self.scheduler.group_of(type_id) {
                        self.scheduler.set_mut(group).set_enabled(type_id, enabled);
                    }
                }
            }
        }
    }

    // ---- Stepping ----

    fn run_group(&mut self, group: SystemGroup, dt: f64, alpha: f64) -> Result<(), EcsError> {
        self.scheduler.current_phase = Some(group);
        let mut set = self.scheduler.take_set(group);

        let ordering = set.ensure_order();
        if ordering.is_ok() {
            let order: Vec<usize> = set.ordered_indices().to_vec();
            for idx in order {
                let stored = &mut set.systems[idx];
                if !stored.enabled {
                    continue;
                }
                let mut buffer = self.begin_write();
                let mut ctx = SystemCtx {
                    world: self,
                    commands: &mut buffer,
                    dt,
                    alpha,
                    group,
                };
                stored.system.run(&mut ctx);
                self.end_write(buffer);
            }
        }

        // Phase state is restored before any error propagates.
        self.scheduler.restore_set(group, set);
        self.scheduler.current_phase = None;
        ordering?;

        // Phase barrier.
        self.apply_scheduled();
        Ok(())
    }

    /// Begins a variable-step frame: drains the external FIFO, applies
    /// pending system changes, runs `FrameInput` and `FrameSync` with a
    /// barrier after each, then delivers queued messages.
    pub fn begin_frame(&mut self, dt: f64) -> Result<(), EcsError> {
        if self.paused || self.disposing {
            return Ok(());
        }
        self.frame_count += 1;
        self.drain_external();
        self.apply_pending_system_changes();
        for group in SystemGroup::FRAME_BEGIN {
            self.run_group(group, dt, 0.0)?;
        }
        self.pump_messages();
        Ok(())
    }

    /// Runs one deterministic fixed step: the four fixed phases with a
    /// barrier after each, then `tick += 1`.
    pub fn fixed_step(&mut self, fixed_dt: f64) -> Result<(), EcsError> {
        if self.paused || self.disposing {
            return Ok(());
        }
        self.drain_external();
        self.apply_scheduled();
        for group in SystemGroup::FIXED {
            self.run_group(group, fixed_dt, 0.0)?;
        }
        self.tick += 1;
        Ok(())
    }

    /// Runs the read-only presentation phases with the given
    /// interpolation factor.
    pub fn late_frame(&mut self, alpha: f64) -> Result<(), EcsError> {
        if self.paused || self.disposing {
            return Ok(());
        }
        for group in SystemGroup::FRAME_LATE {
            self.run_group(group, 0.0, alpha)?;
        }
        Ok(())
    }

    /// The composed per-frame entry point. Returns the number of fixed
    /// steps executed; the residual stays in the accumulator and feeds
    /// the late-frame alpha.
    pub fn pump_and_late_frame(
        &mut self,
        dt: f64,
        fixed_dt: f64,
        max_sub_steps: u32,
    ) -> Result<u32, EcsError> {
        if self.paused || self.disposing {
            return Ok(0);
        }
        self.begin_frame(dt)?;
        self.scheduler.accumulator += dt;
        let mut steps = 0u32;
        while fixed_dt > 0.0 && self.scheduler.accumulator >= fixed_dt && steps < max_sub_steps {
            self.fixed_step(fixed_dt)?;
            self.scheduler.accumulator -= fixed_dt;
            steps += 1;
        }
        let alpha = if fixed_dt > 0.0 {
            self.scheduler.accumulator / fixed_dt
        } else {
            0.0
        };
        self.late_frame(alpha)?;
        Ok(steps)
    }

    // ---- Migrations ----

    /// Registers a post-load migration, run after every snapshot load in
    /// `(order, registration order)`.
    pub fn add_post_load_migration(&mut self, migration: impl PostLoadMigration + 'static) {
        self.migrations.push(Box::new(migration));
    }

    pub(crate) fn run_post_load_migrations(&mut self) -> Result<(), EcsError> {
        let mut migrations = std::mem::take(&mut self.migrations);
        // Stable sort keeps registration order inside each order value.
        migrations.sort_by_key(|m| m.order());
        let mut result = Ok(());
        for migration in &mut migrations {
            if let Err(err) = migration.migrate(self) {
                result = Err(err);
                break;
            }
        }
        self.migrations = migrations;
        result
    }

    // ---- Reset & dispose ----

    /// Clears all entities, components and singleton records while
    /// keeping `tick` and `frame_count` untouched. Systems are shut down
    /// and re-initialized; subscriptions and hooks survive, queued
    /// messages and pending buffers do not. With `keep_capacity` the
    /// backing allocations are retained.
    pub fn reset(&mut self, keep_capacity: bool) {
        self.entities.reset(keep_capacity);
        if keep_capacity {
            for pool in self.pools.iter_mut().flatten() {
                pool.clear(true);
            }
        } else {
            self.pools.clear();
        }
        self.singletons.clear();
        self.bindings.clear();
        self.bus.clear_queue();
        self.scheduled.lock().clear();
        self.external.lock().clear();
        self.scheduler.accumulator = 0.0;

        for group in SystemGroup::ALL {
            let mut set = self.scheduler.take_set(group);
            for stored in &mut set.systems {
                stored.system.shutdown(self);
                stored.system.initialize(self);
            }
            self.scheduler.restore_set(group, set);
        }
    }

    /// Marks the world disposing, shuts systems down and clears every
    /// registry. Stepping on a disposing world is a no-op.
    pub fn dispose(&mut self) {
        if self.disposing {
            return;
        }
        self.disposing = true;
        log::debug!("world `{}` disposing", self.name);

        let systems = self.scheduler.drain_all();
        for mut stored in systems {
            stored.system.shutdown(self);
        }
        self.hooks.clear();
        self.bindings.clear();
        self.bus.clear();
        self.observers.clear();
        self.scheduled.lock().clear();
        self.external.lock().clear();
    }

    // ---- Snapshot load support ----

    /// Clears per-entity state ahead of a snapshot swap-in. Pending
    /// buffers reference entities about to disappear and are dropped;
    /// the external FIFO, subscriptions, hooks and migrations survive.
    pub(crate) fn prepare_for_load(&mut self) {
        self.bindings.clear();
        self.singletons.clear();
        self.scheduled.lock().clear();
    }

    /// Replaces the entity table from restored snapshot state.
    pub(crate) fn restore_entity_table(
        &mut self,
        generations: &[u32],
        alive: &[bool],
        free: &[u32],
        next_id: u32,
    ) {
        self.entities.restore(generations, alive, free, next_id);
    }

    /// Re-derives singleton ownership from pool contents after a load.
    pub(crate) fn rebuild_singleton_owners(&mut self) {
        self.singletons.clear();
        for idx in 0..self.pools.len() {
            let type_id = ComponentTypeId(idx as u32);
            if !component::is_singleton(type_id) {
                continue;
            }
            if let Some(pool) = self.pool(type_id) {
                if let Some(&owner) = pool.entities().first() {
                    self.singletons.record(type_id, owner);
                }
            }
        }
    }

    // ---- Internal state marks ----

    /// Marks the world disposing after a fatal integrity failure.
    pub(crate) fn mark_integrity_failure(&mut self, context: &str) {
        log::warn!(
            "world `{}`: fatal integrity failure in {context}; marking disposing",
            self.name
        );
        self.disposing = true;
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
