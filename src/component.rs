//! Component types and the process-wide registry.
//!
//! Component types are plain values (`Clone + Send + Sync + 'static`)
//! registered once at startup under a stable string id such as
//! `"com.zen.position.v1"`. The registry is a closed set built by explicit
//! calls; there is no runtime reflection or attribute scanning. Each
//! registered type gets a dense [`ComponentTypeId`] used everywhere the
//! runtime keys by type: pools, filters, hooks, deltas and snapshot chunks.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::EcsError;
use crate::snapshot::PoolFormatter;
use crate::sparse_set::ComponentPool;

/// Marker trait for component value types.
///
/// Blanket-implemented; being a `Component` only says the type *could* be
/// stored. It still has to be registered before a world will accept it.
pub trait Component: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Component for T {}

/// Dense index of a registered component type.
///
/// Ids are assigned in registration order and are stable for the lifetime
/// of the process. Ordering by `ComponentTypeId` is the deterministic
/// iteration order used for snapshots and teardown.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Returns the dense index value.
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Registry record for one component type.
pub(crate) struct ComponentInfo {
    pub type_id: TypeId,
    pub stable_id: String,
    pub type_name: &'static str,
    pub singleton: bool,
    pub new_pool: fn(ComponentTypeId) -> ComponentPool,
    /// Formatters keyed by version; at most one is the latest.
    pub formatters: Vec<(u16, Arc<dyn PoolFormatter>)>,
    pub latest_version: Option<u16>,
}

#[derive(Default)]
struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_stable_id: HashMap<String, ComponentTypeId>,
}

static REGISTRY: Lazy<RwLock<ComponentRegistry>> =
    Lazy::new(|| RwLock::new(ComponentRegistry::default()));

/// Builder for registering a component type with the process-wide registry.
///
/// Registration is idempotent for the same `(type, stable id)` pair, which
/// lets independent startup paths (and tests) register the same closed set
/// without coordination. Conflicts are rejected: a second stable id for
/// the same type, a stable id claimed by another type, or a second latest
/// formatter with a different version.
///
/// # Example
///
/// ```
/// use zen_ecs::Registration;
///
/// #[derive(Clone)]
/// struct Position { x: f32, y: f32 }
///
/// let id = Registration::<Position>::new("com.zen.position.v1")
///     .register()
///     .unwrap();
/// assert_eq!(zen_ecs::component_id::<Position>(), Some(id));
/// ```
pub struct Registration<T: Component> {
    stable_id: String,
    singleton: bool,
    latest: Option<Arc<dyn PoolFormatter>>,
    legacy: Vec<Arc<dyn PoolFormatter>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> Registration<T> {
    /// Starts a registration under the given stable id.
    pub fn new(stable_id: impl Into<String>) -> Self {
        Self {
            stable_id: stable_id.into(),
            singleton: false,
            latest: None,
            legacy: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Marks the type as a singleton: at most one owner per world.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Sets the latest snapshot formatter for this type.
    pub fn latest_formatter(mut self, formatter: impl PoolFormatter + 'static) -> Self {
        self.latest = Some(Arc::new(formatter));
        self
    }

    /// Adds a legacy snapshot formatter for reading old chunk versions.
    pub fn legacy_formatter(mut self, formatter: impl PoolFormatter + 'static) -> Self {
        self.legacy.push(Arc::new(formatter));
        self
    }

    /// Commits the registration, returning the dense type id.
    pub fn register(self) -> Result<ComponentTypeId, EcsError> {
        let mut registry = REGISTRY.write();
        let type_id = TypeId::of::<T>();

        let id = match registry.by_type.get(&type_id) {
            Some(&existing) => {
                let info = &registry.infos[existing.0 as usize];
                if info.stable_id != self.stable_id {
                    return Err(EcsError::Registry {
                        message: format!(
                            "type `{}` already registered as `{}`, refusing `{}`",
                            info.type_name, info.stable_id, self.stable_id
                        ),
                    });
                }
                existing
            }
            None => {
                if let Some(&taken) = registry.by_stable_id.get(&self.stable_id) {
                    let owner = registry.infos[taken.0 as usize].type_name;
                    return Err(EcsError::Registry {
                        message: format!(
                            "stable id `{}` already claimed by `{owner}`",
                            self.stable_id
                        ),
                    });
                }
                let id = ComponentTypeId(registry.infos.len() as u32);
                registry.infos.push(ComponentInfo {
                    type_id,
                    stable_id: self.stable_id.clone(),
                    type_name: std::any::type_name::<T>(),
                    singleton: false,
                    new_pool: ComponentPool::new::<T>,
                    formatters: Vec::new(),
                    latest_version: None,
                });
                registry.by_type.insert(type_id, id);
                registry.by_stable_id.insert(self.stable_id.clone(), id);
                id
            }
        };

        let info = &mut registry.infos[id.0 as usize];
        info.singleton |= self.singleton;

        if let Some(latest) = self.latest {
            let version = latest.version();
            match info.latest_version {
                Some(current) if current != version => {
                    return Err(EcsError::Registry {
                        message: format!(
                            "`{}` already has latest formatter v{current}, refusing v{version}",
                            info.stable_id
                        ),
                    });
                }
                _ => {
                    info.latest_version = Some(version);
                    info.formatters.retain(|(v, _)| *v != version);
                    info.formatters.push((version, latest));
                }
            }
        }
        for legacy in self.legacy {
            let version = legacy.version();
            if info.latest_version == Some(version) {
                return Err(EcsError::Registry {
                    message: format!(
                        "legacy formatter v{version} for `{}` collides with the latest",
                        info.stable_id
                    ),
                });
            }
            info.formatters.retain(|(v, _)| *v != version);
            info.formatters.push((version, legacy));
        }

        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// Returns the dense id of a registered component type.
pub fn component_id<T: Component>() -> Option<ComponentTypeId> {
    REGISTRY.read().by_type.get(&TypeId::of::<T>()).copied()
}

/// Resolves a stable string id to the dense type id.
pub fn component_id_by_stable(stable_id: &str) -> Option<ComponentTypeId> {
    REGISTRY.read().by_stable_id.get(stable_id).copied()
}

/// Returns the stable string id of a registered type.
pub fn stable_id_of(id: ComponentTypeId) -> Option<String> {
    REGISTRY
        .read()
        .infos
        .get(id.0 as usize)
        .map(|info| info.stable_id.clone())
}

/// Returns the number of registered component types.
pub fn registered_count() -> u32 {
    REGISTRY.read().infos.len() as u32
}

/// Resolves a type id to a stable id for error reporting, tolerating
/// unregistered ids.
pub(crate) fn stable_id_or_unknown(id: ComponentTypeId) -> String {
    stable_id_of(id).unwrap_or_else(|| format!("<unregistered #{}>", id.0))
}

pub(crate) fn is_singleton(id: ComponentTypeId) -> bool {
    REGISTRY
        .read()
        .infos
        .get(id.0 as usize)
        .is_some_and(|info| info.singleton)
}

/// Builds a fresh pool for the given registered type.
pub(crate) fn new_pool(id: ComponentTypeId) -> Option<ComponentPool> {
    let ctor = REGISTRY.read().infos.get(id.0 as usize).map(|i| i.new_pool)?;
    Some(ctor(id))
}

/// Returns the formatter registered for `(id, version)`, if any.
pub(crate) fn formatter_for(
    id: ComponentTypeId,
    version: u16,
) -> Option<Arc<dyn PoolFormatter>> {
    REGISTRY
        .read()
        .infos
        .get(id.0 as usize)
        .and_then(|info| {
            info.formatters
                .iter()
                .find(|(v, _)| *v == version)
                .map(|(_, f)| Arc::clone(f))
        })
}

/// Returns the latest formatter and its version for a type, if one exists.
pub(crate) fn latest_formatter(
    id: ComponentTypeId,
) -> Option<(u16, Arc<dyn PoolFormatter>)> {
    let registry = REGISTRY.read();
    let info = registry.infos.get(id.0 as usize)?;
    let version = info.latest_version?;
    info.formatters
        .iter()
        .find(|(v, _)| *v == version)
        .map(|(_, f)| (version, Arc::clone(f)))
}

/// Looks up the dense id for a `T`, failing with a registry error naming
/// the type when it was never registered.
pub(crate) fn require_id<T: Component>() -> Result<ComponentTypeId, EcsError> {
    component_id::<T>().ok_or_else(|| EcsError::Registry {
        message: format!(
            "component type `{}` was never registered",
            std::any::type_name::<T>()
        ),
    })
}
