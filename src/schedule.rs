//! Multi-phase scheduler: system containers, deterministic ordering and
//! the frame / fixed-step / late-frame stepping entry points.
//!
//! Within a group, execution order is a topological sort of the systems'
//! declared constraints (Kahn's algorithm) with a stable tiebreak by
//! `(priority, type name)`. Cycles are rejected when the offending system
//! is registered, not when the phase runs. System add/remove/enable
//! requests queue up and become effective at the next `begin_frame`.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use crate::error::EcsError;
use crate::system::{System, SystemGroup};

pub(crate) struct StoredSystem {
    pub system: Box<dyn System>,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub priority: i32,
    pub enabled: bool,
}

/// Lightweight view of one system's ordering inputs, used both for cached
/// order computation and for validating a registration before it queues.
pub(crate) struct OrderingNode {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub priority: i32,
    pub before: Vec<TypeId>,
    pub after: Vec<TypeId>,
}

/// Kahn's topological sort with a deterministic tiebreak.
///
/// Among ready nodes the one with the smallest `(priority, type name)`
/// runs first. Returns the execution order as indices into `nodes`, or
/// the cycle members on failure.
pub(crate) fn sort_nodes(nodes: &[OrderingNode]) -> Result<Vec<usize>, EcsError> {
    let n = nodes.len();
    let idx_of: HashMap<TypeId, usize> = nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| (node.type_id, idx))
        .collect();

    // Collect unique edges; constraints naming unregistered systems are
    // inert rather than errors.
    let mut edge_set: HashSet<(usize, usize)> = HashSet::new();
    for (idx, node) in nodes.iter().enumerate() {
        for target in &node.before {
            if let Some(&to) = idx_of.get(target) {
                if to != idx {
                    edge_set.insert((idx, to));
                }
            }
        }
        for target in &node.after {
            if let Some(&from) = idx_of.get(target) {
                if from != idx {
                    edge_set.insert((from, idx));
                }
            }
        }
    }

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degrees = vec![0usize; n];
    for (from, to) in edge_set {
        edges[from].push(to);
        in_degrees[to] += 1;
    }

    let mut ready: Vec<usize> = (0..n).filter(|&idx| in_degrees[idx] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !ready.is_empty() {
        let pos = ready
            .iter()
            .enumerate()
            .min_by_key(|(_, &idx)| (nodes[idx].priority, nodes[idx].type_name, idx))
            .map(|(pos, _)| pos)
            .unwrap_or(0);
        let node = ready.swap_remove(pos);
        order.push(node);
        for &next in &edges[node] {
            in_degrees[next] -= 1;
            if in_degrees[next] == 0 {
                ready.push(next);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        let involved = in_degrees
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg > 0)
            .map(|(idx, _)| nodes[idx].type_name.to_string())
            .collect();
        Err(EcsError::OrderingCycle { involved })
    }
}

/// The systems of one group plus their cached execution order.
#[derive(Default)]
pub(crate) struct SystemSet {
    pub systems: Vec<StoredSystem>,
    order: Vec<usize>,
    dirty: bool,
}

impl SystemSet {
    pub fn add(&mut self, stored: StoredSystem) {
        self.systems.push(stored);
        self.dirty = true;
    }

    pub fn remove(&mut self, type_id: TypeId) -> Option<StoredSystem> {
        let idx = self.systems.iter().position(|s| s.type_id == type_id)?;
        self.dirty = true;
        Some(self.systems.remove(idx))
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.systems.iter().any(|s| s.type_id == type_id)
    }

    pub fn set_enabled(&mut self, type_id: TypeId, enabled: bool) -> bool {
        if let Some(stored) = self.systems.iter_mut().find(|s| s.type_id == type_id) {
            stored.enabled = enabled;
            true
        } else {
            false
        }
    }

    pub fn nodes(&self) -> Vec<OrderingNode> {
        self.systems
            .iter()
            .map(|stored| {
                let decl = stored.system.order();
                OrderingNode {
                    type_id: stored.type_id,
                    type_name: stored.type_name,
                    priority: stored.priority,
                    before: decl.before,
                    after: decl.after,
                }
            })
            .collect()
    }

    /// Recomputes the cached order if anything changed since last run.
    pub fn ensure_order(&mut self) -> Result<(), EcsError> {
        if self.dirty {
            self.order = sort_nodes(&self.nodes())?;
            self.dirty = false;
        }
        Ok(())
    }

    pub fn ordered_indices(&self) -> &[usize] {
        &self.order
    }
}

/// A queued system addition carrying the concrete type recovered at the
/// generic registration call, since the box erases it.
pub(crate) struct PendingAdd {
    pub system: Box<dyn System>,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

pub(crate) enum PendingChange {
    Add(PendingAdd),
    Remove(TypeId),
    SetEnabled(TypeId, bool),
}

/// Per-world scheduler state.
pub(crate) struct Scheduler {
    sets: HashMap<SystemGroup, SystemSet>,
    pub pending: Vec<PendingChange>,
    /// Fixed-step time debt in seconds.
    pub accumulator: f64,
    /// The phase currently executing, if any; late phases make freshly
    /// opened command buffers read-only.
    pub current_phase: Option<SystemGroup>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
            pending: Vec::new(),
            accumulator: 0.0,
            current_phase: None,
        }
    }

    pub fn take_set(&mut self, group: SystemGroup) -> SystemSet {
        self.sets.remove(&group).unwrap_or_default()
    }

    pub fn restore_set(&mut self, group: SystemGroup, set: SystemSet) {
        if !set.systems.is_empty() {
            self.sets.insert(group, set);
        }
    }

    pub fn set_mut(&mut self, group: SystemGroup) -> &mut SystemSet {
        self.sets.entry(group).or_default()
    }

    /// The group currently holding a system of this type, considering
    /// already-effective systems only.
    pub fn group_of(&self, type_id: TypeId) -> Option<SystemGroup> {
        self.sets
            .iter()
            .find(|(_, set)| set.contains(type_id))
            .map(|(group, _)| *group)
    }

    /// Whether a system type is registered or queued for addition.
    pub fn is_known(&self, type_id: TypeId) -> bool {
        let mut known = self.group_of(type_id).is_some();
        for change in &self.pending {
            match change {
                PendingChange::Add(add) => {
                    if add.type_id == type_id {
                        known = true;
                    }
                }
                PendingChange::Remove(removed) => {
                    if *removed == type_id {
                        known = false;
                    }
                }
                PendingChange::SetEnabled(..) => {}
            }
        }
        known
    }

    /// Ordering nodes the group would contain once pending changes apply.
    pub fn projected_nodes(&self, group: SystemGroup) -> Vec<OrderingNode> {
        let mut nodes = self
            .sets
            .get(&group)
            .map(SystemSet::nodes)
            .unwrap_or_default();
        for change in &self.pending {
            match change {
                PendingChange::Add(add) => {
                    if add.system.group() == group {
                        let decl = add.system.order();
                        nodes.push(OrderingNode {
                            type_id: add.type_id,
                            type_name: add.type_name,
                            priority: add.system.priority(),
                            before: decl.before,
                            after: decl.after,
                        });
                    }
                }
                PendingChange::Remove(type_id) => {
                    nodes.retain(|node| node.type_id != *type_id);
                }
                PendingChange::SetEnabled(..) => {}
            }
        }
        nodes
    }

    /// Number of effective systems across every group.
    pub fn total_systems(&self) -> usize {
        self.sets.values().map(|set| set.systems.len()).sum()
    }

    /// Every stored system, drained for shutdown.
    pub fn drain_all(&mut self) -> Vec<StoredSystem> {
        self.pending.clear();
        let mut all = Vec::new();
        for (_, set) in self.sets.drain() {
            all.extend(set.systems);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node<S: 'static>(priority: i32, name: &'static str) -> OrderingNode {
        OrderingNode {
            type_id: TypeId::of::<S>(),
            type_name: name,
            priority,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    struct A;
    struct B;
    struct C;

    #[test]
    fn unconstrained_order_is_priority_then_name() {
        let nodes = vec![
            node::<A>(5, "zeta"),
            node::<B>(0, "beta"),
            node::<C>(0, "alpha"),
        ];
        let order = sort_nodes(&nodes).unwrap();
        // priority 0 first (alpha before beta lexicographically), then 5.
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn before_constraint_wins_over_priority() {
        let mut low = node::<A>(0, "a_runs_late");
        low.after = vec![TypeId::of::<B>()];
        let high = node::<B>(100, "b_runs_first");
        let order = sort_nodes(&[low, high]).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn chain_is_respected() {
        let mut a = node::<A>(0, "a");
        a.before = vec![TypeId::of::<B>()];
        let mut b = node::<B>(0, "b");
        b.before = vec![TypeId::of::<C>()];
        let c = node::<C>(0, "c");
        let order = sort_nodes(&[c, b, a]).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn cycle_is_detected_with_members() {
        let mut a = node::<A>(0, "sys_a");
        a.before = vec![TypeId::of::<B>()];
        let mut b = node::<B>(0, "sys_b");
        b.before = vec![TypeId::of::<A>()];
        let err = sort_nodes(&[a, b]).unwrap_err();
        match err {
            EcsError::OrderingCycle { involved } => {
                assert_eq!(involved.len(), 2);
                assert!(involved.contains(&"sys_a".to_string()));
                assert!(involved.contains(&"sys_b".to_string()));
            }
            other => panic!("expected OrderingCycle, got {other:?}"),
        }
    }

    #[test]
    fn constraints_on_unknown_systems_are_inert() {
        let mut a = node::<A>(0, "a");
        a.before = vec![TypeId::of::<C>()]; // C not present
        let b = node::<B>(0, "b");
        let order = sort_nodes(&[a, b]).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn duplicate_edges_do_not_inflate_degrees() {
        let mut a = node::<A>(0, "a");
        a.before = vec![TypeId::of::<B>(), TypeId::of::<B>()];
        let mut b = node::<B>(0, "b");
        b.after = vec![TypeId::of::<A>()]; // same edge a third time
        let order = sort_nodes(&[a, b]).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn self_constraint_is_ignored() {
        let mut a = node::<A>(0, "a");
        a.before = vec![TypeId::of::<A>()];
        let order = sort_nodes(&[a]).unwrap();
        assert_eq!(order, vec![0]);
    }
}
