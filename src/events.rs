//! Entity and component lifecycle notifications.
//!
//! Each world owns its own observer list; the process-level [`EventHub`]
//! is a thin fan-out layered on top, tagging each notification with the
//! originating [`WorldId`]. Both surfaces are diagnostic: handlers get
//! read-only world access and must not re-enter the emitting world.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::world::{World, WorldId};

/// A structural lifecycle notification.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifecycleEvent {
    /// An entity became alive.
    EntityCreated(Entity),
    /// An entity's destruction began; it is still alive.
    EntityDestroyRequested(Entity),
    /// An entity finished dying; its generation has been bumped.
    EntityDestroyed(Entity),
    /// A component was added to an entity.
    ComponentAdded(Entity, ComponentTypeId),
    /// A component was removed from an entity.
    ComponentRemoved(Entity, ComponentTypeId),
}

impl LifecycleEvent {
    /// The entity the event refers to.
    pub fn entity(&self) -> Entity {
        match self {
            Self::EntityCreated(e)
            | Self::EntityDestroyRequested(e)
            | Self::EntityDestroyed(e)
            | Self::ComponentAdded(e, _)
            | Self::ComponentRemoved(e, _) => *e,
        }
    }

    /// The component type involved, for component events.
    pub fn component(&self) -> Option<ComponentTypeId> {
        match self {
            Self::ComponentAdded(_, type_id) | Self::ComponentRemoved(_, type_id) => Some(*type_id),
            _ => None,
        }
    }
}

type LifecycleObserver = Box<dyn Fn(&World, &LifecycleEvent) + Send + Sync>;

/// Handle for removing a world-level lifecycle observer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ObserverId(u64);

/// Per-world observer list, invoked synchronously as ops apply.
#[derive(Default)]
pub(crate) struct LifecycleObservers {
    slots: Vec<(u64, LifecycleObserver)>,
    next_id: u64,
}

impl LifecycleObservers {
    pub fn subscribe(
        &mut self,
        observer: impl Fn(&World, &LifecycleEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push((id, Box::new(observer)));
        ObserverId(id)
    }

    pub fn remove(&mut self, id: ObserverId) {
        self.slots.retain(|(slot_id, _)| *slot_id != id.0);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Takes the slots out so handlers can receive `&World` while the
    /// world is otherwise mutably borrowed.
    pub fn take(&mut self) -> Vec<(u64, LifecycleObserver)> {
        std::mem::take(&mut self.slots)
    }

    /// Restores taken slots, keeping observers registered in between.
    pub fn restore(&mut self, mut slots: Vec<(u64, LifecycleObserver)>) {
        slots.append(&mut self.slots);
        self.slots = slots;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

// ---------------------------------------------------------------------------
// Process-level hub
// ---------------------------------------------------------------------------

type HubListener = Arc<dyn Fn(WorldId, &LifecycleEvent) + Send + Sync>;

/// Handle for removing a hub listener.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HubSubscription(u64);

/// Process-wide fan-out of lifecycle events from every world.
pub struct EventHub {
    listeners: Mutex<Vec<(u64, HubListener)>>,
    next_id: AtomicU64,
}

static HUB: Lazy<EventHub> = Lazy::new(|| EventHub {
    listeners: Mutex::new(Vec::new()),
    next_id: AtomicU64::new(0),
});

/// The process-wide event hub.
pub fn event_hub() -> &'static EventHub {
    &HUB
}

impl EventHub {
    /// Adds a listener receiving every lifecycle event of every world.
    pub fn subscribe(
        &self,
        listener: impl Fn(WorldId, &LifecycleEvent) + Send + Sync + 'static,
    ) -> HubSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        HubSubscription(id)
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, subscription: HubSubscription) {
        self.listeners
            .lock()
            .retain(|(id, _)| *id != subscription.0);
    }

    /// Fans an event out to all listeners. The listener list is snapshot
    /// first so listeners may themselves subscribe or unsubscribe.
    pub(crate) fn broadcast(&self, world_id: WorldId, event: &LifecycleEvent) {
        let snapshot: Vec<HubListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(world_id, event);
        }
    }
}
