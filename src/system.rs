//! The system trait and its execution context.
//!
//! A system belongs to exactly one [`SystemGroup`] and runs once per phase
//! execution with a [`SystemCtx`] giving read access to the world, the
//! system's own command buffer, and frame timing. Systems declare ordering
//! constraints against other system types; the scheduler turns those into
//! a deterministic order per group.

use std::any::TypeId;

use crate::commands::CommandBuffer;
use crate::world::World;

/// The phase a system runs in.
///
/// `Fixed*` groups run during deterministic fixed-step ticks, `FrameInput`
/// and `FrameSync` during the variable-step begin-frame pass, and
/// `FrameView` / `FrameUI` during the read-only late pass (command buffers
/// recorded there are rejected at the barrier). `Unknown` systems are
/// registered but never scheduled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SystemGroup {
    FixedInput,
    FixedDecision,
    FixedSimulation,
    FixedPost,
    FrameInput,
    FrameSync,
    FrameView,
    FrameUI,
    Unknown,
}

impl SystemGroup {
    /// Fixed-step phases in execution order.
    pub(crate) const FIXED: [SystemGroup; 4] = [
        SystemGroup::FixedInput,
        SystemGroup::FixedDecision,
        SystemGroup::FixedSimulation,
        SystemGroup::FixedPost,
    ];

    /// Begin-frame phases in execution order.
    pub(crate) const FRAME_BEGIN: [SystemGroup; 2] =
        [SystemGroup::FrameInput, SystemGroup::FrameSync];

    /// Late-frame (presentation) phases in execution order.
    pub(crate) const FRAME_LATE: [SystemGroup; 2] = [SystemGroup::FrameView, SystemGroup::FrameUI];

    /// Every group, scheduled ones first.
    pub(crate) const ALL: [SystemGroup; 9] = [
        SystemGroup::FixedInput,
        SystemGroup::FixedDecision,
        SystemGroup::FixedSimulation,
        SystemGroup::FixedPost,
        SystemGroup::FrameInput,
        SystemGroup::FrameSync,
        SystemGroup::FrameView,
        SystemGroup::FrameUI,
        SystemGroup::Unknown,
    ];

    /// Whether writes are forbidden while this phase runs.
    pub fn is_read_only(&self) -> bool {
        matches!(self, SystemGroup::FrameView | SystemGroup::FrameUI)
    }

    /// Stable phase name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            SystemGroup::FixedInput => "FixedInput",
            SystemGroup::FixedDecision => "FixedDecision",
            SystemGroup::FixedSimulation => "FixedSimulation",
            SystemGroup::FixedPost => "FixedPost",
            SystemGroup::FrameInput => "FrameInput",
            SystemGroup::FrameSync => "FrameSync",
            SystemGroup::FrameView => "FrameView",
            SystemGroup::FrameUI => "FrameUI",
            SystemGroup::Unknown => "Unknown",
        }
    }
}

/// Ordering constraints a system declares against other system types
/// within the same group.
///
/// # Example
///
/// ```ignore
/// fn order(&self) -> SystemOrder {
///     SystemOrder::new().after::<InputSystem>().before::<RenderPrepSystem>()
/// }
/// ```
#[derive(Default)]
pub struct SystemOrder {
    pub(crate) before: Vec<TypeId>,
    pub(crate) after: Vec<TypeId>,
}

impl SystemOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// This system must run before `S`.
    pub fn before<S: 'static>(mut self) -> Self {
        self.before.push(TypeId::of::<S>());
        self
    }

    /// This system must run after `S`.
    pub fn after<S: 'static>(mut self) -> Self {
        self.after.push(TypeId::of::<S>());
        self
    }
}

/// Execution context handed to [`System::run`].
///
/// Gives read-only world access plus the system's command buffer; all
/// structural and value mutation goes through the buffer and lands at the
/// phase barrier.
pub struct SystemCtx<'a> {
    pub(crate) world: &'a World,
    pub(crate) commands: &'a mut CommandBuffer,
    pub(crate) dt: f64,
    pub(crate) alpha: f64,
    pub(crate) group: SystemGroup,
}

impl SystemCtx<'_> {
    /// Read-only access to the world.
    pub fn world(&self) -> &World {
        self.world
    }

    /// The system's command buffer, applied at the next barrier.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        self.commands
    }

    /// Step delta in seconds: the fixed timestep during fixed phases, the
    /// frame delta otherwise.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Interpolation factor for late-frame phases (`accumulator / fixed_dt`).
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The phase currently executing.
    pub fn group(&self) -> SystemGroup {
        self.group
    }

    /// The world's fixed-step tick counter.
    pub fn tick(&self) -> u64 {
        self.world.tick()
    }
}

/// A simulation system.
///
/// Lifecycle: [`initialize`](System::initialize) fires when the add becomes
/// effective at a `begin_frame` boundary, [`shutdown`](System::shutdown) on
/// effective removal or world dispose. Disabled systems stay registered but
/// are skipped by the runner.
pub trait System: Send + 'static {
    /// The group this system belongs to.
    fn group(&self) -> SystemGroup {
        SystemGroup::Unknown
    }

    /// Tiebreak priority inside the group; lower runs earlier among
    /// unconstrained peers.
    fn priority(&self) -> i32 {
        0
    }

    /// Ordering constraints against other systems of the same group.
    fn order(&self) -> SystemOrder {
        SystemOrder::new()
    }

    /// Called once when the system becomes effective.
    fn initialize(&mut self, _world: &mut World) {}

    /// Called on effective removal or world dispose.
    fn shutdown(&mut self, _world: &mut World) {}

    /// Runs the system for one phase execution.
    fn run(&mut self, ctx: &mut SystemCtx<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_groups() {
        assert!(SystemGroup::FrameView.is_read_only());
        assert!(SystemGroup::FrameUI.is_read_only());
        assert!(!SystemGroup::FixedSimulation.is_read_only());
        assert!(!SystemGroup::FrameInput.is_read_only());
    }

    #[test]
    fn phase_lists_cover_flow() {
        assert_eq!(SystemGroup::FIXED.len(), 4);
        assert_eq!(SystemGroup::FRAME_BEGIN.len(), 2);
        assert_eq!(SystemGroup::FRAME_LATE.len(), 2);
        assert!(SystemGroup::FRAME_LATE.iter().all(|g| g.is_read_only()));
    }

    #[test]
    fn order_builder_collects_edges() {
        struct A;
        struct B;
        let order = SystemOrder::new().before::<A>().after::<B>();
        assert_eq!(order.before, vec![TypeId::of::<A>()]);
        assert_eq!(order.after, vec![TypeId::of::<B>()]);
    }
}
