//! Entity handles and the per-world slot table.
//!
//! Entities are a 32-bit slot index plus a 32-bit generation packed into one
//! `u64`. The generation disambiguates recycled slots: a handle is alive only
//! while its generation matches the slot's. Generation 0 is a sentinel that
//! no live handle ever carries, so the all-zero `u64` doubles as "no entity".

use std::sync::Arc;

use parking_lot::Mutex;

/// A lightweight entity identifier with generational index.
///
/// Compared by both id and generation; a handle whose generation lags the
/// slot's current one is stale and fails every aliveness check.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    bits: u64,
}

impl Entity {
    /// Builds a handle from raw parts. Intended for snapshot restore and
    /// tests; handles minted this way are only meaningful against the world
    /// that produced the parts.
    pub fn from_parts(id: u32, generation: u32) -> Self {
        Self {
            bits: (generation as u64) << 32 | id as u64,
        }
    }

    /// Returns the slot index portion of the handle.
    pub fn id(&self) -> u32 {
        self.bits as u32
    }

    /// Returns the generation portion of the handle.
    pub fn generation(&self) -> u32 {
        (self.bits >> 32) as u32
    }

    /// Returns the packed 64-bit representation.
    pub fn to_bits(&self) -> u64 {
        self.bits
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}:{})", self.id(), self.generation())
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}:{})", self.id(), self.generation())
    }
}

/// Advances a generation, wrapping `u32::MAX → 1` so the 0 sentinel is
/// never re-entered.
pub(crate) fn bump_generation(generation: u32) -> u32 {
    if generation == u32::MAX {
        1
    } else {
        generation + 1
    }
}

/// A recyclable slot parked on the free list, carrying the generation the
/// next occupant will be handed.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FreeSlot {
    pub id: u32,
    pub generation: u32,
}

/// Allocation state shared between the table and in-flight command buffers.
///
/// Buffered `create_entity` must mint a real handle from `&World`, so the
/// free list and the fresh-id cursor live behind a mutex that both the
/// table (on destroy) and command buffers (on reserve) reach.
#[derive(Default)]
pub(crate) struct AllocState {
    /// LIFO stack of recyclable slots.
    free: Vec<FreeSlot>,
    /// First never-used slot index.
    next_id: u32,
}

/// Shared handle to the allocation state, cloned into command buffers.
pub(crate) type AllocHandle = Arc<Mutex<AllocState>>;

/// One slot of the entity table.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Slot {
    pub generation: u32,
    pub alive: bool,
}

/// Per-world entity table: slot array, LIFO free list, alive bookkeeping.
///
/// Handles are *reserved* (possibly from `&self`, via the shared allocation
/// state) and later *committed* when the owning command buffer applies.
/// A reserved handle is not alive until committed.
pub(crate) struct EntityTable {
    slots: Vec<Slot>,
    alive_count: u32,
    alloc: AllocHandle,
}

impl EntityTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            alive_count: 0,
            alloc: Arc::new(Mutex::new(AllocState::default())),
        }
    }

    /// Returns the shared allocation handle for command buffers.
    pub fn alloc_handle(&self) -> AllocHandle {
        Arc::clone(&self.alloc)
    }

    /// Reserves a handle without making it alive.
    ///
    /// Pops the free list (most recently freed slot first) or takes a fresh
    /// index at generation 1.
    pub fn reserve(&self) -> Entity {
        reserve_from(&self.alloc)
    }

    /// Commits a previously reserved handle, making the slot alive.
    pub fn commit(&mut self, entity: Entity) {
        let idx = entity.id() as usize;
        if idx >= self.slots.len() {
            self.slots.resize(
                idx + 1,
                Slot {
                    generation: 0,
                    alive: false,
                },
            );
        }
        let slot = &mut self.slots[idx];
        debug_assert!(!slot.alive, "commit of an already-alive slot");
        slot.generation = entity.generation();
        slot.alive = true;
        self.alive_count += 1;
    }

    /// Kills an entity: clears the alive flag, bumps the generation and
    /// pushes the slot onto the free list. Returns `false` on a stale or
    /// unknown handle.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let idx = entity.id() as usize;
        let Some(slot) = self.slots.get_mut(idx) else {
            return false;
        };
        if !slot.alive || slot.generation != entity.generation() {
            return false;
        }

        slot.alive = false;
        slot.generation = bump_generation(slot.generation);
        self.alive_count -= 1;
        self.alloc.lock().free.push(FreeSlot {
            id: entity.id(),
            generation: slot.generation,
        });
        true
    }

    /// Returns whether the handle is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        if entity.generation() == 0 {
            return false;
        }
        let idx = entity.id() as usize;
        self.slots.get(idx).is_some_and(|slot| {
            slot.alive && slot.generation == entity.generation()
        })
    }

    /// Returns the slot's current generation, or `None` for an index that
    /// was never allocated.
    pub fn generation_of(&self, id: u32) -> Option<u32> {
        self.slots.get(id as usize).map(|slot| slot.generation)
    }

    /// Number of alive entities.
    pub fn alive_count(&self) -> u32 {
        self.alive_count
    }

    /// Number of slots ever allocated (the next fresh id).
    pub fn slot_count(&self) -> u32 {
        self.alloc.lock().next_id
    }

    /// Iterates alive entities in ascending id order.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive)
            .map(|(idx, slot)| Entity::from_parts(idx as u32, slot.generation))
    }

    /// Snapshot copy of all alive entities, ascending by id.
    pub fn all_entities(&self) -> Vec<Entity> {
        self.iter_alive().collect()
    }

    /// Clears every slot. With `keep_capacity` the backing vectors keep
    /// their allocations.
    pub fn reset(&mut self, keep_capacity: bool) {
        if keep_capacity {
            self.slots.clear();
        } else {
            self.slots = Vec::new();
        }
        self.alive_count = 0;
        let mut alloc = self.alloc.lock();
        alloc.free.clear();
        if !keep_capacity {
            alloc.free = Vec::new();
        }
        alloc.next_id = 0;
    }

    // ---- Snapshot support ----

    /// Raw view of the slot array for snapshot writing.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The free list in stack order (bottom first) for snapshot writing.
    pub fn free_list(&self) -> Vec<u32> {
        self.alloc.lock().free.iter().map(|f| f.id).collect()
    }

    /// Replaces the whole table from restored snapshot state.
    ///
    /// `generations` covers every slot, `alive` flags them, and `free`
    /// lists recyclable ids bottom-of-stack first.
    pub fn restore(&mut self, generations: &[u32], alive: &[bool], free: &[u32], next_id: u32) {
        self.slots.clear();
        self.alive_count = 0;
        for (idx, &generation) in generations.iter().enumerate() {
            let is_alive = alive.get(idx).copied().unwrap_or(false);
            if is_alive {
                self.alive_count += 1;
            }
            self.slots.push(Slot {
                generation,
                alive: is_alive,
            });
        }
        let mut alloc = self.alloc.lock();
        alloc.next_id = next_id;
        alloc.free = free
            .iter()
            .map(|&id| FreeSlot {
                id,
                generation: generations.get(id as usize).copied().unwrap_or(1),
            })
            .collect();
    }
}

/// Reserves a handle against shared allocation state.
pub(crate) fn reserve_from(alloc: &AllocHandle) -> Entity {
    let mut state = alloc.lock();
    if let Some(free) = state.free.pop() {
        Entity::from_parts(free.id, free.generation)
    } else {
        let id = state.next_id;
        state.next_id += 1;
        Entity::from_parts(id, 1)
    }
}
