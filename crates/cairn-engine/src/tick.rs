//! Fixed-timestep tick loop.
//!
//! The [`TickLoop`] drives a [`World`] forward. Each tick:
//!
//! 1. All registered systems run in registration order, each with mutable
//!    access to the world. Entity creation and destruction requested by a
//!    system is queued, not applied.
//! 2. The world's lifecycle queue is drained with
//!    [`World::process_commands`], which dispatches the entity events.
//! 3. The tick counter advances.
//!
//! Systems run in a fixed order and the lifecycle queue is FIFO, so the same
//! initial world, systems and seeds produce the same sequence of handles.
//!
//! # Example
//!
//! ```
//! use cairn_engine::tick::{TickConfig, TickLoop};
//! use cairn_ecs::prelude::*;
//!
//! let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
//! tick_loop.add_system("spawner", |world| {
//!     world.create_entity().unwrap();
//! });
//!
//! tick_loop.run_ticks(10);
//! assert_eq!(tick_loop.tick_count(), 10);
//! assert_eq!(tick_loop.world().entity_count(), 10);
//! ```

use std::time::{Duration, Instant};

use cairn_ecs::config::WorldConfig;
use cairn_ecs::entity::DrainReport;
use cairn_ecs::world::World;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::EngineError;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the tick loop and the world it builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Limits for the world created by [`TickLoop::from_config`].
    pub world: WorldConfig,
}

impl Default for TickConfig {
    /// 60 Hz with default world limits.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            world: WorldConfig::default(),
        }
    }
}

impl TickConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// ```
    /// use cairn_engine::tick::TickConfig;
    ///
    /// let config = TickConfig::from_json_str(r#"{"fixed_dt": 0.5, "world": {"cache_size": 4}}"#).unwrap();
    /// assert_eq!(config.world.cache_size, 4);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: TickConfig =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(EngineError::InvalidConfig {
                details: format!("fixed_dt must be positive and finite, got {}", self.fixed_dt),
            });
        }
        self.world.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing and lifecycle diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(String, Duration)>,
    /// Total time for the tick (systems + drain).
    pub total_time: Duration,
    /// Time spent draining the lifecycle queue.
    pub drain_time: Duration,
    /// What the drain did.
    pub drain: DrainReport,
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// A system run once per tick.
pub type SystemFn = fn(&mut World);

#[derive(Debug)]
struct RegisteredSystem {
    name: String,
    func: SystemFn,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The fixed-timestep tick loop.
pub struct TickLoop {
    world: World,
    systems: Vec<RegisteredSystem>,
    tick_counter: u64,
    fixed_dt: f64,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    /// Create a tick loop around an existing world.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite. The world
    /// section of `config` is ignored; the world keeps its own limits.
    pub fn new(world: World, config: TickConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        Self {
            world,
            systems: Vec::new(),
            tick_counter: 0,
            fixed_dt: config.fixed_dt,
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// Validate `config` and build a fresh world from it.
    pub fn from_config(config: TickConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let world = World::with_config(config.world.clone())?;
        Ok(Self::new(world, config))
    }

    /// Register a system. Systems run in registration order.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    pub fn add_system(&mut self, name: &str, func: SystemFn) {
        assert!(
            !self.systems.iter().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );
        debug!(system = name, order = self.systems.len(), "system registered");
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
        });
    }

    /// Execute one tick and return the drain report.
    pub fn tick(&mut self) -> DrainReport {
        let tick_start = Instant::now();
        let mut system_times = Vec::with_capacity(self.systems.len());

        for system in &self.systems {
            let sys_start = Instant::now();
            (system.func)(&mut self.world);
            system_times.push((system.name.clone(), sys_start.elapsed()));
        }

        let drain_start = Instant::now();
        let drain = self.world.process_commands();
        let drain_time = drain_start.elapsed();

        self.tick_counter += 1;
        trace!(
            tick = self.tick_counter,
            created = drain.created,
            destroyed = drain.destroyed,
            vetoed = drain.vetoed,
            live = self.world.entity_count(),
            "tick complete"
        );

        self.last_diagnostics = TickDiagnostics {
            system_times,
            total_time: tick_start.elapsed(),
            drain_time,
            drain: drain.clone(),
        };
        drain
    }

    /// Run `count` ticks. Returns the number of lifecycle commands processed
    /// across all of them.
    pub fn run_ticks(&mut self, count: u64) -> u64 {
        let mut total_commands = 0u64;
        for _ in 0..count {
            total_commands += self.tick().processed() as u64;
        }
        total_commands
    }

    // -- accessors ----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulation time in seconds, computed as `tick_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for setup between ticks.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Tear down the loop and hand back its world.
    pub fn into_world(self) -> World {
        self.world
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The names of all registered systems, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_ecs::prelude::*;

    #[derive(Debug, Default)]
    struct Counter(u64);

    impl Component for Counter {}

    #[derive(Debug, Default)]
    struct Banned;

    impl Component for Banned {}

    const PENDING_MARK: u64 = 100;

    fn spawn_counted(world: &mut World) {
        let e = world.create_entity().unwrap();
        world.create::<Counter>(e);
    }

    fn spawn_banned(world: &mut World) {
        let e = world.create_entity().unwrap();
        world.create::<Banned>(e);
    }

    fn bump_counters(world: &mut World) {
        for (_, counter) in world.pool::<Counter>().iter_mut() {
            counter.0 += 1;
        }
    }

    fn mark_pending(world: &mut World) {
        let pending: Vec<Handle> = world
            .get_pool::<Counter>()
            .into_iter()
            .flat_map(|pool| pool.iter())
            .map(|(e, _)| e)
            .filter(|e| !world.is_entity_created(*e))
            .collect();
        for e in pending {
            if let Some(counter) = world.lookup_mut::<Counter>(e) {
                counter.0 = PENDING_MARK;
            }
        }
    }

    fn cull_created(world: &mut World) {
        let created: Vec<Handle> = world
            .get_pool::<Counter>()
            .into_iter()
            .flat_map(|pool| pool.iter())
            .map(|(e, _)| e)
            .filter(|e| world.is_entity_created(*e))
            .collect();
        for e in created {
            world.destroy_entity(e);
        }
    }

    fn banning_world() -> World {
        let mut world = World::new();
        world.subscribe_entity_create(
            |world: &mut World, e: Handle| world.lookup::<Banned>(e).is_none(),
            Priority::Front,
        );
        world
    }

    // -- 1. Construction and config -----------------------------------------

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn zero_dt_panics() {
        let _ = TickLoop::new(
            World::new(),
            TickConfig {
                fixed_dt: 0.0,
                ..Default::default()
            },
        );
    }

    #[test]
    fn from_config_rejects_bad_values() {
        let bad_dt = TickConfig {
            fixed_dt: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            TickLoop::from_config(bad_dt),
            Err(EngineError::InvalidConfig { .. })
        ));

        let bad_world = TickConfig::from_json_str(r#"{"world": {"max_generation": 0}}"#);
        assert!(matches!(bad_world, Err(EngineError::Ecs(EcsError::InvalidConfig { .. }))));
    }

    #[test]
    fn from_config_applies_world_limits() {
        let config = TickConfig::from_json_str(r#"{"world": {"cache_size": 2}}"#).unwrap();
        let tick_loop = TickLoop::from_config(config).unwrap();
        assert_eq!(tick_loop.world().config().cache_size, 2);
    }

    #[test]
    #[should_panic(expected = "entity command drain exceeded 2 batches")]
    fn drain_ceiling_from_config_is_fatal_inside_a_tick() {
        let config =
            TickConfig::from_json_str(r#"{"world": {"max_drain_iterations": 2}}"#).unwrap();
        let mut tick_loop = TickLoop::from_config(config).unwrap();
        tick_loop.world_mut().subscribe_entity_create(
            |world: &mut World, _e: Handle| {
                world.create_entity().unwrap();
                true
            },
            Priority::Back,
        );
        tick_loop.add_system("seed", |world| {
            world.create_entity().unwrap();
        });
        tick_loop.tick();
    }

    // -- 2. System registration ---------------------------------------------

    #[test]
    fn add_systems_in_order() {
        let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
        tick_loop.add_system("alpha", |_w| {});
        tick_loop.add_system("beta", |_w| {});
        tick_loop.add_system("gamma", |_w| {});
        assert_eq!(tick_loop.system_names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    #[should_panic(expected = "duplicate system name")]
    fn duplicate_system_name_panics() {
        let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
        tick_loop.add_system("spawner", |_w| {});
        tick_loop.add_system("spawner", |_w| {});
    }

    // -- 3. Lifecycle is drained at the end of each tick --------------------

    #[test]
    fn later_systems_see_creations_still_pending() {
        let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
        tick_loop.add_system("spawn", spawn_counted);
        tick_loop.add_system("mark", mark_pending);

        let report = tick_loop.tick();
        assert_eq!(report.created, 1);
        let world = tick_loop.world();
        let (e, counter) = world.get_pool::<Counter>().unwrap().iter().next().unwrap();
        assert_eq!(counter.0, PENDING_MARK);
        assert!(world.is_entity_created(e));
    }

    #[test]
    fn entities_created_by_systems_exist_after_tick() {
        let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
        tick_loop.add_system("spawn", spawn_counted);
        tick_loop.add_system("bump", bump_counters);

        let report = tick_loop.tick();
        assert_eq!(report.created, 1);
        assert_eq!(tick_loop.last_diagnostics().drain, report);
        assert_eq!(tick_loop.last_diagnostics().system_times.len(), 2);

        tick_loop.run_ticks(2);
        let world = tick_loop.world();
        let mut values: Vec<u64> = world
            .get_pool::<Counter>()
            .unwrap()
            .iter()
            .map(|(_, c)| c.0)
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(world
            .get_pool::<Counter>()
            .unwrap()
            .iter()
            .all(|(e, _)| world.is_entity_created(e)));
    }

    #[test]
    fn vetoed_create_shows_in_tick_diagnostics() {
        let mut tick_loop = TickLoop::new(banning_world(), TickConfig::default());
        tick_loop.add_system("spawn", spawn_counted);
        tick_loop.add_system("spawn_banned", spawn_banned);

        let report = tick_loop.tick();
        assert_eq!(report.created, 1);
        assert_eq!(report.vetoed, 1);
        assert_eq!(tick_loop.last_diagnostics().drain.vetoed, 1);
        assert_eq!(tick_loop.world().entity_count(), 1);
        assert!(tick_loop.world().get_pool::<Banned>().unwrap().is_empty());
    }

    #[test]
    fn destroys_requested_by_systems_drain_before_new_creates() {
        let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
        tick_loop.add_system("cull", cull_created);
        tick_loop.add_system("spawn", spawn_counted);

        let first = tick_loop.tick();
        assert_eq!((first.created, first.destroyed), (1, 0));

        let second = tick_loop.tick();
        assert_eq!((second.destroyed, second.created), (1, 1));
        assert_eq!(second.batches, 1);
        assert_eq!(tick_loop.last_diagnostics().drain, second);
        assert_eq!(tick_loop.world().entity_count(), 1);
        assert_eq!(tick_loop.world().get_pool::<Counter>().unwrap().len(), 1);
    }

    #[test]
    fn run_ticks_counts_processed_commands() {
        let mut tick_loop = TickLoop::new(World::new(), TickConfig::default());
        tick_loop.add_system("cull", cull_created);
        tick_loop.add_system("spawn", spawn_counted);
        // One create on the first tick, then one destroy and one create per tick.
        assert_eq!(tick_loop.run_ticks(5), 9);
        assert_eq!(tick_loop.tick_count(), 5);
        assert_eq!(tick_loop.world().entity_count(), 1);
    }
}
