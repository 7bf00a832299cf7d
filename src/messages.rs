//! Per-world message bus.
//!
//! Messages are plain values published into a single world-wide FIFO and
//! delivered at frame barriers (the message point of `begin_frame`, or an
//! explicit [`World::pump_messages`](crate::World::pump_messages)).
//! Handlers run in subscription order per message and receive `&mut World`,
//! so their writes land synchronously at the delivery barrier.
//! Each world owns its own bus; nothing crosses worlds.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::world::World;

type Handler = Box<dyn FnMut(&mut World, &dyn Any) + Send>;

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Subscription {
    pub(crate) id: u64,
    pub(crate) type_id: TypeId,
}

pub(crate) struct HandlerSlot {
    pub id: u64,
    pub func: Handler,
}

pub(crate) struct QueuedMessage {
    pub type_id: TypeId,
    pub payload: Box<dyn Any + Send>,
}

/// FIFO queue plus per-type handler lists.
///
/// Delivery itself lives on `World` (handlers need `&mut World`); the bus
/// only owns the data. The `removed` set makes mid-delivery unsubscription
/// deterministic while a handler list is temporarily taken out.
#[derive(Default)]
pub(crate) struct MessageBus {
    handlers: HashMap<TypeId, Vec<HandlerSlot>>,
    queue: VecDeque<QueuedMessage>,
    removed: HashSet<u64>,
    next_id: u64,
}

impl MessageBus {
    pub fn subscribe<M: Send + Sync + 'static>(
        &mut self,
        mut handler: impl FnMut(&mut World, &M) + Send + 'static,
    ) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        let type_id = TypeId::of::<M>();
        self.handlers.entry(type_id).or_default().push(HandlerSlot {
            id,
            func: Box::new(move |world, payload| {
                // The bus keys payloads by TypeId, so this downcast holds.
                if let Some(message) = payload.downcast_ref::<M>() {
                    handler(world, message);
                }
            }),
        });
        Subscription { id, type_id }
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) {
        if let Some(slots) = self.handlers.get_mut(&subscription.type_id) {
            let before = slots.len();
            slots.retain(|slot| slot.id != subscription.id);
            if slots.len() != before {
                return;
            }
        }
        // The slot may be taken out for delivery right now; leave a
        // tombstone that the delivery loop checks and the restore consumes.
        self.removed.insert(subscription.id);
    }

    pub fn publish<M: Send + Sync + 'static>(&mut self, message: M) {
        self.queue.push_back(QueuedMessage {
            type_id: TypeId::of::<M>(),
            payload: Box::new(message),
        });
    }

    /// Takes the whole pending queue; newly published messages land in a
    /// fresh queue and wait for the next pump.
    pub fn take_queue(&mut self) -> VecDeque<QueuedMessage> {
        std::mem::take(&mut self.queue)
    }

    /// Temporarily removes the handler list for a message type.
    pub fn take_handlers(&mut self, type_id: TypeId) -> Vec<HandlerSlot> {
        self.handlers.remove(&type_id).unwrap_or_default()
    }

    /// Restores a taken handler list, dropping slots unsubscribed in the
    /// meantime and keeping handlers subscribed mid-delivery after them.
    pub fn restore_handlers(&mut self, type_id: TypeId, mut slots: Vec<HandlerSlot>) {
        slots.retain(|slot| !self.removed.remove(&slot.id));
        if let Some(new_slots) = self.handlers.remove(&type_id) {
            slots.extend(new_slots);
        }
        if !slots.is_empty() {
            self.handlers.insert(type_id, slots);
        }
    }

    pub fn is_removed(&self, id: u64) -> bool {
        self.removed.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.queue.clear();
        self.removed.clear();
    }
}
