//! # zen-ecs
//!
//! A deterministic multi-world Entity-Component-System runtime kernel.
//!
//! ## Core Types
//!
//! - [`Entity`]: packed generational entity handle
//! - [`World`]: one isolated simulation space: entities, pools, bus,
//!   scheduler, hooks and bindings
//! - [`Kernel`]: thread-safe world registry with current-world selection
//!   and aggregate counters
//! - [`Registration`]: explicit startup registration of component types
//!   under stable string ids
//!
//! ## Mutation Model
//!
//! - [`CommandBuffer`]: ordered record of deferred structural and value
//!   ops, applied at scheduler barriers
//! - [`ExternalCommand`]: thread-safe FIFO for producers outside the
//!   simulation loop
//! - [`ApplyReport`]: per-op failure collection from a barrier
//!
//! ## Queries & Scheduling
//!
//! - [`QueryFilter`] / [`QueryIter`]: typed 1–8 arity iteration with
//!   with/without/any-of filters over presence bitsets
//! - [`System`] / [`SystemGroup`] / [`SystemCtx`]: phase-grouped systems
//!   with deterministic topological ordering
//!
//! ## I/O & Observation
//!
//! - [`SnapshotOptions`] / [`PoolFormatter`] / [`PostLoadMigration`]:
//!   portable little-endian world snapshots with versioned codecs
//! - [`Subscription`]: per-world FIFO message bus
//! - [`Binder`] / [`BindingContext`] / [`ComponentDelta`]: read-only
//!   view-binding surface fed by component deltas
//! - [`LifecycleEvent`] / [`event_hub`]: per-world lifecycle observers
//!   with a process-level fan-out
//! - [`WorldStats`]: point-in-time occupancy and queue-depth snapshot
//!
//! See `DESIGN.md` in this crate for architecture decisions.

mod binding;
mod commands;
mod component;
mod diagnostics;
mod entity;
mod error;
mod events;
mod hooks;
mod kernel;
mod messages;
mod query;
mod schedule;
mod singleton;
mod snapshot;
mod sparse_set;
mod system;
mod world;

pub use binding::{Binder, BindingContext, ComponentDelta, DeltaKind};
pub use commands::{ApplyReport, CommandBuffer, ExternalCommand, WriteScope};
pub use component::{
    component_id, component_id_by_stable, registered_count, stable_id_of, Component,
    ComponentTypeId, Registration,
};
pub use diagnostics::{PoolStats, WorldStats};
pub use entity::Entity;
pub use error::EcsError;
pub use events::{event_hub, EventHub, HubSubscription, LifecycleEvent, ObserverId};
pub use kernel::{Kernel, WorldConfig, WorldHandle};
pub use messages::Subscription;
pub use query::{QueryFilter, QueryIter, QueryTuple};
pub use snapshot::{
    stream_error, ComponentFormatter, PoolFormatter, PoolLoad, PoolView, PostLoadMigration,
    SnapshotOptions,
};
pub use sparse_set::{BoxedValue, SparseSet};
pub use system::{System, SystemCtx, SystemGroup, SystemOrder};
pub use world::{World, WorldId};
