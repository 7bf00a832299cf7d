//! Runtime diagnostics: point-in-time world statistics.
//!
//! [`World::stats`] collects a cheap snapshot of a world's occupancy and
//! queue depths for logging, overlays and tests. Collection is read-only
//! and allocation is proportional to the number of non-empty pools; the
//! report's `Display` renders a compact multi-line summary.

use std::fmt;

use crate::component::{stable_id_or_unknown, ComponentTypeId};
use crate::world::World;

/// Occupancy of one component pool.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolStats {
    /// Dense id of the component type.
    pub type_id: ComponentTypeId,
    /// Stable string id of the component type.
    pub stable_id: String,
    /// Number of stored components.
    pub len: usize,
}

/// A point-in-time statistical snapshot of one world.
///
/// # Example
///
/// ```ignore
/// let stats = world.stats();
/// log::debug!("{stats}");
/// assert_eq!(stats.alive_entities, 2);
/// ```
#[derive(Clone, Debug)]
pub struct WorldStats {
    /// World name at collection time.
    pub name: String,
    /// Alive entities.
    pub alive_entities: u32,
    /// Entity slots ever allocated (alive, dead and reserved).
    pub entity_slots: u32,
    /// Per-pool occupancy for every non-empty pool, ascending by type id.
    pub pools: Vec<PoolStats>,
    /// Singleton types with a recorded owner.
    pub singletons: usize,
    /// Effective systems across all groups.
    pub systems: usize,
    /// Command buffers queued for the next barrier.
    pub queued_buffers: usize,
    /// External commands waiting to be drained.
    pub pending_external: usize,
    /// Messages waiting for the next pump.
    pub pending_messages: usize,
    /// Fixed-step ticks completed.
    pub tick: u64,
    /// Variable-step frames begun.
    pub frame_count: u64,
    /// Residual fixed-step time debt in seconds.
    pub accumulator_seconds: f64,
    /// Whether the world is paused.
    pub paused: bool,
}

impl WorldStats {
    /// Total components stored across every pool.
    pub fn total_components(&self) -> usize {
        self.pools.iter().map(|pool| pool.len).sum()
    }
}

impl fmt::Display for WorldStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "world `{}`: {} alive / {} slots, tick {}, frame {}{}",
            self.name,
            self.alive_entities,
            self.entity_slots,
            self.tick,
            self.frame_count,
            if self.paused { " (paused)" } else { "" },
        )?;
        writeln!(
            f,
            "  queues: {} buffer(s), {} external, {} message(s); {} system(s)",
            self.queued_buffers, self.pending_external, self.pending_messages, self.systems,
        )?;
        for pool in &self.pools {
            writeln!(f, "  pool `{}`: {}", pool.stable_id, pool.len)?;
        }
        if self.singletons > 0 {
            writeln!(f, "  singletons: {}", self.singletons)?;
        }
        Ok(())
    }
}

impl World {
    /// Collects a statistical snapshot of this world.
    pub fn stats(&self) -> WorldStats {
        let pools = self
            .pools_iter()
            .filter(|pool| !pool.is_empty())
            .map(|pool| PoolStats {
                type_id: pool.type_id(),
                stable_id: stable_id_or_unknown(pool.type_id()),
                len: pool.len(),
            })
            .collect();

        WorldStats {
            name: self.name().to_string(),
            alive_entities: self.alive_count(),
            entity_slots: self.entities.slot_count(),
            pools,
            singletons: self.all_singletons().len(),
            systems: self.effective_system_count(),
            queued_buffers: self.queued_buffer_count(),
            pending_external: self.pending_external_commands(),
            pending_messages: self.pending_messages(),
            tick: self.tick(),
            frame_count: self.frame_count(),
            accumulator_seconds: self.accumulator_seconds(),
            paused: self.is_paused(),
        }
    }
}
