//! Fixed-timestep tick loop for lockstep simulation.
//!
//! The [`TickLoop`] drives a [`World`] forward. Each tick:
//!
//! 1. Every queued command is routed, controllers in ascending order and
//!    commands FIFO within a controller.
//! 2. The world runs its phases: `simulate`, `late_simulate`,
//!    `process_deactivations`, `visualize`, `late_visualize`.
//! 3. The tick counter advances and the state digest is taken.
//!
//! Peers that queue the same commands for the same ticks compute the same
//! digest every tick. A mismatch means the simulations have diverged.
//!
//! # Example
//!
//! ```
//! use lockstep_engine::prelude::*;
//!
//! let catalog = AgentCatalog::from_json(r#"{ "scout": { "kind": "unit" } }"#).unwrap();
//! let mut world = World::new(catalog, WorldConfig::default());
//! let red = world.create_controller("red", Allegiance::Enemy).unwrap();
//! world.create_agent_facing_right(red, "scout", Vec2Fixed::ZERO).unwrap();
//!
//! let mut tick_loop = TickLoop::new(world, TickConfig::default());
//! tick_loop.queue_command(Command::new(red, CommandAction::Stop).with_selection([0]));
//!
//! let report = tick_loop.tick();
//! assert_eq!(report.commands.len(), 1);
//! assert_eq!(tick_loop.tick_count(), 1);
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lockstep_core::command::Command;
use lockstep_core::controller::ControllerId;
use lockstep_core::event::SimEvent;
use lockstep_core::world::World;
use serde::{Deserialize, Serialize};
use tracing::{debug_span, trace, warn};

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Loop-level settings. Simulation settings (tick rate, seed, pooling) live
/// in [`WorldConfig`](lockstep_core::world::WorldConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Headless mode: skip per-phase timing, tick as fast as possible.
    pub headless: bool,
    /// Ticks between digest checkpoints when recording a replay.
    /// 0 disables automatic checkpoints.
    pub checkpoint_interval: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            headless: false,
            checkpoint_interval: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick. Never read by the simulation.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per phase, in execution order. Empty when headless.
    pub phase_times: Vec<(&'static str, Duration)>,
    /// Total time for the tick (routing + phases + digest).
    pub total_time: Duration,
    /// Commands routed this tick, rejected ones included.
    pub commands_routed: usize,
    /// Commands the world rejected (unknown controller).
    pub commands_rejected: usize,
    /// State digest after the tick.
    pub digest: i32,
}

// ---------------------------------------------------------------------------
// TickReport
// ---------------------------------------------------------------------------

/// What one tick consumed and produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Index of the tick that ran (the tick count before it ran).
    pub tick: u64,
    /// Commands routed this tick, in routing order.
    pub commands: Vec<Command>,
    /// Events the world emitted during the tick.
    pub events: Vec<SimEvent>,
    /// State digest after the tick.
    pub digest: i32,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The deterministic fixed-timestep tick loop.
///
/// # Determinism Guarantee
///
/// Given the same initial [`World`] and the same commands queued before the
/// same ticks, every peer computes the same digest sequence:
///
/// - commands are routed in a fixed order (controller ID, then FIFO);
/// - world phases always run in the same order;
/// - the world uses fixed-point math and a seeded RNG only.
pub struct TickLoop {
    world: World,
    /// Commands waiting for the next tick, per controller.
    pending: BTreeMap<ControllerId, Vec<Command>>,
    tick_counter: u64,
    config: TickConfig,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    /// Create a tick loop around an already populated world. The tick
    /// counter starts at 0.
    pub fn new(world: World, config: TickConfig) -> Self {
        Self {
            world,
            pending: BTreeMap::new(),
            tick_counter: 0,
            config,
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// Queue a command for the next tick.
    pub fn queue_command(&mut self, command: Command) {
        self.pending
            .entry(command.controller)
            .or_default()
            .push(command);
    }

    pub fn queue_commands(&mut self, commands: impl IntoIterator<Item = Command>) {
        for command in commands {
            self.queue_command(command);
        }
    }

    /// Remove and return every queued command, in routing order.
    pub fn take_pending(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending)
            .into_values()
            .flatten()
            .collect()
    }

    /// Queued commands in the order the next tick will route them.
    pub fn pending_commands(&self) -> Vec<Command> {
        self.pending.values().flatten().cloned().collect()
    }

    /// Execute one tick and report what it consumed and produced.
    pub fn tick(&mut self) -> TickReport {
        let span = debug_span!("tick", tick = self.tick_counter);
        let _guard = span.enter();

        let tick_start = Instant::now();
        let timed = !self.config.headless;
        let mut phase_times = Vec::new();

        // Phase 1: route commands.
        let phase_start = Instant::now();
        let commands = self.take_pending();
        let mut commands_rejected = 0;
        for command in &commands {
            if let Err(err) = self.world.execute(command) {
                warn!(controller = %command.controller, %err, "command rejected");
                commands_rejected += 1;
            }
        }
        if timed {
            phase_times.push(("route", phase_start.elapsed()));
        }

        // Phase 2: world phases.
        let phases: [(&'static str, fn(&mut World)); 5] = [
            ("simulate", World::simulate),
            ("late_simulate", World::late_simulate),
            ("process_deactivations", World::process_deactivations),
            ("visualize", World::visualize),
            ("late_visualize", World::late_visualize),
        ];
        for (name, phase) in phases {
            let phase_start = Instant::now();
            phase(&mut self.world);
            if timed {
                phase_times.push((name, phase_start.elapsed()));
            }
        }

        // Phase 3: advance and checksum.
        let tick = self.tick_counter;
        self.tick_counter += 1;
        let digest = self.world.state_digest();
        let events = self.world.drain_events();
        trace!(digest, events = events.len(), "tick finished");

        self.last_diagnostics = TickDiagnostics {
            phase_times,
            total_time: tick_start.elapsed(),
            commands_routed: commands.len(),
            commands_rejected,
            digest,
        };

        TickReport {
            tick,
            commands,
            events,
            digest,
        }
    }

    /// Run `count` ticks and return the digest after each.
    pub fn run_ticks(&mut self, count: u64) -> Vec<i32> {
        (0..count).map(|_| self.tick().digest).collect()
    }

    // -- accessors ----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for setup and tests. Changes made here
    /// bypass the command stream and are not recorded by replays.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    pub fn is_headless(&self) -> bool {
        self.config.headless
    }

    pub fn set_headless(&mut self, headless: bool) {
        self.config.headless = headless;
    }

    pub fn state_digest(&self) -> i32 {
        self.world.state_digest()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::prelude::*;

    const CATALOG: &str = r#"{
        "walker": { "kind": "unit", "mover": { "speed": "4" } }
    }"#;

    fn setup_loop(config: TickConfig) -> (TickLoop, ControllerId, ControllerId) {
        let catalog = AgentCatalog::from_json(CATALOG).unwrap();
        let mut world = World::new(catalog, WorldConfig::default());
        let red = world.create_controller("red", Allegiance::Enemy).unwrap();
        let blue = world.create_controller("blue", Allegiance::Enemy).unwrap();
        world
            .create_agent_facing_right(red, "walker", Vec2Fixed::ZERO)
            .unwrap();
        world.drain_events();
        (TickLoop::new(world, config), red, blue)
    }

    // -- 1. Construction and defaults ---------------------------------------

    #[test]
    fn new_tick_loop_starts_at_zero() {
        let (tick_loop, _, _) = setup_loop(TickConfig::default());
        assert_eq!(tick_loop.tick_count(), 0);
        assert!(tick_loop.pending_commands().is_empty());
        assert!(!tick_loop.is_headless());
    }

    #[test]
    fn default_config_checkpoints_once_per_second() {
        let config = TickConfig::default();
        assert_eq!(config.checkpoint_interval, 32);
        let parsed: TickConfig = serde_json::from_str(r#"{ "headless": true }"#).unwrap();
        assert!(parsed.headless);
        assert_eq!(parsed.checkpoint_interval, 32);
    }

    // -- 2. Command routing -------------------------------------------------

    #[test]
    fn commands_route_in_controller_then_fifo_order() {
        let (mut tick_loop, red, blue) = setup_loop(TickConfig::default());
        let blue_stop = Command::new(blue, CommandAction::Stop);
        let red_first = Command::new(red, CommandAction::Stop).with_selection([0]);
        let red_second = Command::new(red, CommandAction::Stop);
        tick_loop.queue_command(blue_stop.clone());
        tick_loop.queue_command(red_first.clone());
        tick_loop.queue_command(red_second.clone());

        let expected = vec![red_first, red_second, blue_stop];
        assert_eq!(tick_loop.pending_commands(), expected);

        let report = tick_loop.tick();
        assert_eq!(report.tick, 0);
        assert_eq!(report.commands, expected);
        assert!(tick_loop.pending_commands().is_empty());
        assert_eq!(tick_loop.last_diagnostics().commands_routed, 3);
    }

    #[test]
    fn rejected_commands_do_not_stop_the_tick() {
        let (mut tick_loop, red, _) = setup_loop(TickConfig::default());
        tick_loop.queue_command(Command::new(ControllerId(9), CommandAction::Stop));
        tick_loop.queue_command(Command::new(red, CommandAction::Stop));

        let report = tick_loop.tick();
        assert_eq!(report.commands.len(), 2);
        assert_eq!(tick_loop.last_diagnostics().commands_rejected, 1);
        assert_eq!(tick_loop.tick_count(), 1);
    }

    // -- 3. Phases and digest -----------------------------------------------

    #[test]
    fn report_digest_matches_world() {
        let (mut tick_loop, _, _) = setup_loop(TickConfig::default());
        let walker = tick_loop.world().registry().active_handles()[0];
        tick_loop
            .world_mut()
            .agent_mut(walker)
            .unwrap()
            .mover
            .as_mut()
            .unwrap()
            .start_move(Vec2Fixed::from_num(3, 0));

        let digests = tick_loop.run_ticks(4);
        assert_eq!(digests.len(), 4);
        assert_eq!(digests[3], tick_loop.state_digest());
        assert_eq!(tick_loop.last_diagnostics().digest, digests[3]);
        assert_ne!(digests[0], digests[3]);
    }

    #[test]
    fn diagnostics_record_every_phase() {
        let (mut tick_loop, _, _) = setup_loop(TickConfig::default());
        tick_loop.tick();
        let names: Vec<&str> = tick_loop
            .last_diagnostics()
            .phase_times
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(
            names,
            vec![
                "route",
                "simulate",
                "late_simulate",
                "process_deactivations",
                "visualize",
                "late_visualize"
            ]
        );
    }

    #[test]
    fn headless_skips_phase_timing_only() {
        let (mut timed, _, _) = setup_loop(TickConfig::default());
        let (mut headless, _, _) = setup_loop(TickConfig {
            headless: true,
            ..TickConfig::default()
        });

        assert_eq!(timed.run_ticks(10), headless.run_ticks(10));
        assert!(headless.last_diagnostics().phase_times.is_empty());

        headless.set_headless(false);
        headless.tick();
        assert_eq!(headless.last_diagnostics().phase_times.len(), 6);
    }

    #[test]
    fn events_are_reported_per_tick() {
        let (mut tick_loop, _, _) = setup_loop(TickConfig::default());
        let walker = tick_loop.world().registry().active_handles()[0];
        tick_loop.world_mut().request_deactivate(walker, true);
        let report = tick_loop.tick();
        assert_eq!(
            report.events,
            vec![SimEvent::AgentDeactivated {
                agent: walker,
                immediate: true,
            }]
        );
        assert!(tick_loop.tick().events.is_empty());
    }
}
