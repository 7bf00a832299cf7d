//! The kernel: owner and driver of every world.
//!
//! The kernel keeps a thread-safe registry of worlds keyed by [`WorldId`],
//! an optional "current" world, world presets, and aggregate counters.
//! Stepping entry points fan out to every registered world in registration
//! order, holding one world lock at a time; each world may also be stepped
//! directly through its handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::EcsError;
use crate::world::{World, WorldId};

/// Shared handle to a registered world. Lock it to read, mutate or step;
/// only one thread may hold a world at a time.
pub type WorldHandle = Arc<Mutex<World>>;

type PresetFn = Arc<dyn Fn(&mut World) + Send + Sync>;
type CurrentChangedFn = Arc<dyn Fn(Option<WorldId>) + Send + Sync>;
type DisposedFn = Arc<dyn Fn() + Send + Sync>;

/// Configuration for [`Kernel::create_world`].
#[derive(Default)]
pub struct WorldConfig {
    name: Option<String>,
    tags: Vec<String>,
    preset: Option<String>,
    set_current: bool,
}

impl WorldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Applies a preset registered with
    /// [`register_preset`](Kernel::register_preset) after construction.
    pub fn preset(mut self, preset_id: impl Into<String>) -> Self {
        self.preset = Some(preset_id.into());
        self
    }

    /// Makes the new world the kernel's current world.
    pub fn make_current(mut self) -> Self {
        self.set_current = true;
        self
    }
}

#[derive(Default)]
struct KernelCounters {
    frame_count: u64,
    fixed_frame_count: u64,
    total_simulated_seconds: f64,
    accumulator_seconds: f64,
}

/// Owner and coordinator of one or more worlds.
pub struct Kernel {
    /// Registration-ordered world list; the ordering makes fan-out
    /// stepping deterministic.
    worlds: RwLock<Vec<(WorldId, WorldHandle)>>,
    current: Mutex<Option<WorldId>>,
    presets: Mutex<HashMap<String, PresetFn>>,
    current_changed: Mutex<Vec<(u64, CurrentChangedFn)>>,
    disposed_listeners: Mutex<Vec<DisposedFn>>,
    next_listener_id: AtomicU64,
    paused: AtomicBool,
    disposed: AtomicBool,
    counters: Mutex<KernelCounters>,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            worlds: RwLock::new(Vec::new()),
            current: Mutex::new(None),
            presets: Mutex::new(HashMap::new()),
            current_changed: Mutex::new(Vec::new()),
            disposed_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            counters: Mutex::new(KernelCounters::default()),
        }
    }

    // ---- World registry ----

    /// Registers a setup preset worlds can opt into at creation.
    pub fn register_preset(
        &self,
        preset_id: impl Into<String>,
        setup: impl Fn(&mut World) + Send + Sync + 'static,
    ) {
        self.presets.lock().insert(preset_id.into(), Arc::new(setup));
    }

    /// Creates and registers a world.
    pub fn create_world(&self, config: WorldConfig) -> Result<WorldHandle, EcsError> {
        let mut world = match config.name {
            Some(name) => World::with_name(name),
            None => World::new(),
        };
        world.set_tags(config.tags);

        if let Some(preset_id) = &config.preset {
            let preset = self.presets.lock().get(preset_id).cloned();
            match preset {
                Some(setup) => setup(&mut world),
                None => {
                    return Err(EcsError::Registry {
                        message: format!("unknown world preset `{preset_id}`"),
                    });
                }
            }
        }

        let id = world.id();
        let handle: WorldHandle = Arc::new(Mutex::new(world));
        self.worlds.write().push((id, Arc::clone(&handle)));
        if config.set_current {
            self.set_current_world(id);
        }
        Ok(handle)
    }

    /// Removes a world from the registry and disposes it. Returns whether
    /// it was registered.
    pub fn destroy_world(&self, id: WorldId) -> bool {
        let handle = {
            let mut worlds = self.worlds.write();
            worlds
                .iter()
                .position(|(world_id, _)| *world_id == id)
                .map(|idx| worlds.remove(idx).1)
        };
        let Some(handle) = handle else {
            return false;
        };

        let was_current = {
            let mut current = self.current.lock();
            if *current == Some(id) {
                *current = None;
                true
            } else {
                false
            }
        };
        if was_current {
            self.notify_current_changed(None);
        }

        // Dispose outside the registry lock.
        handle.lock().dispose();
        true
    }

    /// Fetches a world by id.
    pub fn try_get(&self, id: WorldId) -> Option<WorldHandle> {
        self.worlds
            .read()
            .iter()
            .find(|(world_id, _)| *world_id == id)
            .map(|(_, handle)| Arc::clone(handle))
    }

    /// All worlds with the given name.
    pub fn find_by_name(&self, name: &str) -> Vec<WorldHandle> {
        self.worlds
            .read()
            .iter()
            .filter(|(_, handle)| handle.lock().name() == name)
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    /// All worlds carrying the tag.
    pub fn find_by_tag(&self, tag: &str) -> Vec<WorldHandle> {
        self.find_by_any_tag(&[tag])
    }

    /// All worlds carrying at least one of the tags.
    pub fn find_by_any_tag(&self, tags: &[&str]) -> Vec<WorldHandle> {
        self.worlds
            .read()
            .iter()
            .filter(|(_, handle)| {
                let world = handle.lock();
                tags.iter().any(|tag| world.tags().iter().any(|t| t == tag))
            })
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    /// Snapshot of every registered world, in registration order.
    pub fn all_worlds(&self) -> Vec<WorldHandle> {
        self.worlds
            .read()
            .iter()
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    pub fn world_count(&self) -> usize {
        self.worlds.read().len()
    }

    // ---- Current world ----

    /// Selects the current world. Returns `false` for an unregistered id.
    pub fn set_current_world(&self, id: WorldId) -> bool {
        if self.try_get(id).is_none() {
            return false;
        }
        let changed = {
            let mut current = self.current.lock();
            if *current == Some(id) {
                false
            } else {
                *current = Some(id);
                true
            }
        };
        if changed {
            self.notify_current_changed(Some(id));
        }
        true
    }

    /// Clears the current-world selection.
    pub fn clear_current_world(&self) {
        let changed = {
            let mut current = self.current.lock();
            current.take().is_some()
        };
        if changed {
            self.notify_current_changed(None);
        }
    }

    pub fn current_world_id(&self) -> Option<WorldId> {
        *self.current.lock()
    }

    pub fn current_world(&self) -> Option<WorldHandle> {
        let id = self.current_world_id()?;
        self.try_get(id)
    }

    /// Subscribes to current-world changes.
    pub fn on_current_world_changed(
        &self,
        listener: impl Fn(Option<WorldId>) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.current_changed.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes a current-world listener by the id returned at subscribe.
    pub fn remove_current_world_listener(&self, listener_id: u64) {
        self.current_changed
            .lock()
            .retain(|(id, _)| *id != listener_id);
    }

    fn notify_current_changed(&self, id: Option<WorldId>) {
        let snapshot: Vec<CurrentChangedFn> = self
            .current_changed
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(id);
        }
    }

    // ---- Pause ----

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Pauses every stepping entry point; worlds keep answering queries
    /// and accepting external commands.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn toggle_pause(&self) -> bool {
        let paused = !self.is_paused();
        self.paused.store(paused, Ordering::Relaxed);
        paused
    }

    pub fn is_running(&self) -> bool {
        !self.disposed.load(Ordering::Relaxed)
    }

    // ---- Stepping ----

    fn steppable(&self) -> bool {
        !self.is_paused() && self.is_running()
    }

    /// Begins a frame on every registered world.
    pub fn begin_frame(&self, dt: f64) -> Result<(), EcsError> {
        if !self.steppable() {
            return Ok(());
        }
        self.counters.lock().frame_count += 1;
        for handle in self.all_worlds() {
            handle.lock().begin_frame(dt)?;
        }
        Ok(())
    }

    /// Runs one fixed step on every registered world.
    pub fn fixed_step(&self, fixed_dt: f64) -> Result<(), EcsError> {
        if !self.steppable() {
            return Ok(());
        }
        {
            let mut counters = self.counters.lock();
            counters.fixed_frame_count += 1;
            counters.total_simulated_seconds += fixed_dt;
        }
        for handle in self.all_worlds() {
            handle.lock().fixed_step(fixed_dt)?;
        }
        Ok(())
    }

    /// Runs the late phases on every registered world.
    pub fn late_frame(&self, alpha: f64) -> Result<(), EcsError> {
        if !self.steppable() {
            return Ok(());
        }
        for handle in self.all_worlds() {
            handle.lock().late_frame(alpha)?;
        }
        Ok(())
    }

    /// The composed frame entry point across every world. Returns the
    /// maximum number of fixed steps any world executed this frame.
    pub fn pump_and_late_frame(
        &self,
        dt: f64,
        fixed_dt: f64,
        max_sub_steps: u32,
    ) -> Result<u32, EcsError> {
        if !self.steppable() {
            return Ok(0);
        }
        let mut ticks = 0u32;
        for handle in self.all_worlds() {
            ticks = ticks.max(handle.lock().pump_and_late_frame(dt, fixed_dt, max_sub_steps)?);
        }

        let mut counters = self.counters.lock();
        counters.frame_count += 1;
        counters.fixed_frame_count += ticks as u64;
        counters.total_simulated_seconds += ticks as f64 * fixed_dt;
        counters.accumulator_seconds =
            (counters.accumulator_seconds + dt - ticks as f64 * fixed_dt).max(0.0);
        Ok(ticks)
    }

    // ---- Counters ----

    /// Frames begun through the kernel.
    pub fn frame_count(&self) -> u64 {
        self.counters.lock().frame_count
    }

    /// Fixed steps executed through the kernel.
    pub fn fixed_frame_count(&self) -> u64 {
        self.counters.lock().fixed_frame_count
    }

    /// Total simulated time in seconds (fixed steps × fixed dt).
    pub fn total_simulated_seconds(&self) -> f64 {
        self.counters.lock().total_simulated_seconds
    }

    /// Unconsumed frame time carried between frames.
    pub fn accumulator_seconds(&self) -> f64 {
        self.counters.lock().accumulator_seconds
    }

    // ---- Dispose ----

    /// Subscribes to kernel disposal.
    pub fn on_disposed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.disposed_listeners.lock().push(Arc::new(listener));
    }

    /// Disposes every world, clears the registry and fires the disposed
    /// listeners. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }
        let worlds: Vec<(WorldId, WorldHandle)> = std::mem::take(&mut *self.worlds.write());
        for (_, handle) in &worlds {
            handle.lock().dispose();
        }
        self.clear_current_world();

        let listeners: Vec<DisposedFn> = self.disposed_listeners.lock().drain(..).collect();
        for listener in listeners {
            listener();
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn create_and_find_worlds() {
        let kernel = Kernel::new();
        let a = kernel
            .create_world(WorldConfig::new().name("alpha").tag("sim"))
            .unwrap();
        let _b = kernel
            .create_world(WorldConfig::new().name("beta").tag("sim").tag("ui"))
            .unwrap();

        assert_eq!(kernel.world_count(), 2);
        assert_eq!(kernel.find_by_name("alpha").len(), 1);
        assert_eq!(kernel.find_by_tag("sim").len(), 2);
        assert_eq!(kernel.find_by_tag("ui").len(), 1);
        assert_eq!(kernel.find_by_any_tag(&["ui", "net"]).len(), 1);

        let id = a.lock().id();
        assert!(kernel.try_get(id).is_some());
    }

    #[test]
    fn destroy_world_unregisters_and_disposes() {
        let kernel = Kernel::new();
        let handle = kernel.create_world(WorldConfig::new().name("doomed")).unwrap();
        let id = handle.lock().id();

        assert!(kernel.destroy_world(id));
        assert!(kernel.try_get(id).is_none());
        assert!(!kernel.destroy_world(id));
        assert!(handle.lock().is_disposing());
    }

    #[test]
    fn current_world_selection_and_event() {
        let kernel = Kernel::new();
        let changes = Arc::new(AtomicU32::new(0));
        let changes_clone = Arc::clone(&changes);
        kernel.on_current_world_changed(move |_| {
            changes_clone.fetch_add(1, Ordering::SeqCst);
        });

        let handle = kernel
            .create_world(WorldConfig::new().name("main").make_current())
            .unwrap();
        let id = handle.lock().id();

        assert_eq!(kernel.current_world_id(), Some(id));
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        // Re-selecting the same world is not a change.
        kernel.set_current_world(id);
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        kernel.clear_current_world();
        assert_eq!(kernel.current_world_id(), None);
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn set_current_rejects_unknown_id() {
        let kernel = Kernel::new();
        assert!(!kernel.set_current_world(WorldId::new()));
        assert_eq!(kernel.current_world_id(), None);
    }

    #[test]
    fn preset_runs_at_creation() {
        let kernel = Kernel::new();
        kernel.register_preset("warmed", |world| {
            world.spawn();
            world.spawn();
        });

        let handle = kernel
            .create_world(WorldConfig::new().preset("warmed"))
            .unwrap();
        assert_eq!(handle.lock().alive_count(), 2);

        let err = kernel.create_world(WorldConfig::new().preset("missing"));
        assert!(matches!(err, Err(EcsError::Registry { .. })));
    }

    #[test]
    fn paused_kernel_does_not_step() {
        let kernel = Kernel::new();
        let handle = kernel.create_world(WorldConfig::new()).unwrap();

        kernel.pause();
        assert!(kernel.is_paused());
        let ticks = kernel.pump_and_late_frame(1.0, 1.0 / 60.0, 4).unwrap();
        assert_eq!(ticks, 0);
        assert_eq!(kernel.frame_count(), 0);
        assert_eq!(handle.lock().frame_count(), 0);

        kernel.resume();
        let ticks = kernel.pump_and_late_frame(2.0 / 60.0, 1.0 / 60.0, 4).unwrap();
        assert_eq!(ticks, 2);
        assert_eq!(kernel.frame_count(), 1);
        assert_eq!(handle.lock().frame_count(), 1);
    }

    #[test]
    fn counters_track_fixed_steps() {
        let kernel = Kernel::new();
        let _handle = kernel.create_world(WorldConfig::new()).unwrap();

        let fixed_dt = 1.0 / 60.0;
        let ticks = kernel.pump_and_late_frame(3.0 * fixed_dt, fixed_dt, 8).unwrap();
        assert_eq!(ticks, 3);
        assert_eq!(kernel.fixed_frame_count(), 3);
        assert!((kernel.total_simulated_seconds() - 3.0 * fixed_dt).abs() < 1e-9);
        assert!(kernel.accumulator_seconds() < fixed_dt);
    }

    #[test]
    fn dispose_fires_listeners_once() {
        let kernel = Kernel::new();
        let handle = kernel.create_world(WorldConfig::new()).unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);
        kernel.on_disposed(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        kernel.dispose();
        kernel.dispose();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.world_count(), 0);
        assert!(handle.lock().is_disposing());
        assert!(!kernel.is_running());
    }
}
