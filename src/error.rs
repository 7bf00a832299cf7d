//! Structured error type shared across the runtime.
//!
//! Every fallible public operation returns [`EcsError`]. Variants carry the
//! affected entity and the component's stable id where one applies, so
//! callers (and logs) can always answer "which entity, which type".

use thiserror::Error;

use crate::entity::Entity;

/// The error type of the runtime kernel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EcsError {
    /// The entity handle's generation does not match the live slot,
    /// or its id is out of range.
    #[error("entity {entity} is not alive")]
    NoSuchEntity {
        /// The stale or unknown handle.
        entity: Entity,
    },

    /// A read was attempted for a component the entity does not carry.
    #[error("entity {entity} has no `{stable_id}` component")]
    MissingComponent {
        /// The entity that was read.
        entity: Entity,
        /// Stable id of the missing component type.
        stable_id: String,
    },

    /// `add_component` was applied against a type the entity already has.
    #[error("entity {entity} already has a `{stable_id}` component")]
    AlreadyPresent {
        /// The entity that already carries the component.
        entity: Entity,
        /// Stable id of the duplicated component type.
        stable_id: String,
    },

    /// A singleton component would have gained a second owner.
    #[error("singleton `{stable_id}` is already owned by {owner}")]
    SingletonViolation {
        /// The current owner entity.
        owner: Entity,
        /// Stable id of the singleton type.
        stable_id: String,
    },

    /// A permission hook rejected the operation.
    #[error("permission denied for `{stable_id}` on {entity}")]
    PermissionDenied {
        /// The entity the operation targeted.
        entity: Entity,
        /// Stable id of the component type involved.
        stable_id: String,
    },

    /// A value validator rejected the written value.
    #[error("validation failed for `{stable_id}` on {entity}")]
    ValidationFailed {
        /// The entity the value was written to.
        entity: Entity,
        /// Stable id of the component type involved.
        stable_id: String,
    },

    /// A write was attempted from a read-only presentation phase.
    #[error("structural write attempted during read-only phase `{phase}`")]
    InvalidPhase {
        /// Name of the offending phase.
        phase: &'static str,
    },

    /// The snapshot stream is malformed: bad magic, unsupported version,
    /// truncation, or an integrity violation inside a chunk.
    #[error("snapshot format error: {message}")]
    SnapshotFormat {
        /// Human-readable description of the defect.
        message: String,
    },

    /// A snapshot chunk names a stable id no registered type claims.
    #[error("snapshot chunk references unknown component type `{stable_id}`")]
    UnknownComponentType {
        /// The unrecognized stable id.
        stable_id: String,
    },

    /// System ordering constraints are unsatisfiable.
    #[error("system ordering cycle among: {}", involved.join(", "))]
    OrderingCycle {
        /// Type names of the systems participating in the cycle.
        involved: Vec<String>,
    },

    /// A system of the same type is already registered with this world.
    #[error("system `{type_name}` is already registered")]
    DuplicateSystem {
        /// Type name of the duplicated system.
        type_name: &'static str,
    },

    /// A component type was used before being registered, or a stable id
    /// conflicts with an earlier registration.
    #[error("component registry error: {message}")]
    Registry {
        /// Human-readable description of the defect.
        message: String,
    },
}

impl EcsError {
    /// Returns the entity this error refers to, if any.
    pub fn entity(&self) -> Option<Entity> {
        match self {
            Self::NoSuchEntity { entity }
            | Self::MissingComponent { entity, .. }
            | Self::AlreadyPresent { entity, .. }
            | Self::PermissionDenied { entity, .. }
            | Self::ValidationFailed { entity, .. } => Some(*entity),
            Self::SingletonViolation { owner, .. } => Some(*owner),
            _ => None,
        }
    }

    /// Returns the stable id of the component type this error refers to,
    /// if any.
    pub fn stable_id(&self) -> Option<&str> {
        match self {
            Self::MissingComponent { stable_id, .. }
            | Self::AlreadyPresent { stable_id, .. }
            | Self::SingletonViolation { stable_id, .. }
            | Self::PermissionDenied { stable_id, .. }
            | Self::ValidationFailed { stable_id, .. }
            | Self::UnknownComponentType { stable_id } => Some(stable_id),
            _ => None,
        }
    }
}
