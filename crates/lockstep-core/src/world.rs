//! The [`World`] is the top-level simulation container. It owns the agent
//! registry, the template catalog, construct groups, the event queue and the
//! seeded RNG, and exposes the per-tick phases.
//!
//! ```
//! use lockstep_core::prelude::*;
//!
//! let catalog = AgentCatalog::from_json(r#"{
//!     "worker": { "kind": "unit", "mover": { "speed": "4" } }
//! }"#).unwrap();
//! let mut world = World::new(catalog, WorldConfig::default());
//! let red = world.create_controller("red", Allegiance::Enemy).unwrap();
//! let worker = world
//!     .create_agent_facing_right(red, "worker", Vec2Fixed::from_num(1, 1))
//!     .unwrap();
//!
//! world.advance();
//! assert!(world.agent(worker).is_some());
//! assert_eq!(world.registry().active_count(), 1);
//! ```
//!
//! Phase order within a tick is fixed: `simulate` (construct groups first,
//! then every agent in global-ID order), `late_simulate`,
//! `process_deactivations`, `visualize`, `late_visualize`. Only command
//! routing and explicit creation calls add agents; only
//! `process_deactivations` removes them.

use crate::agent::Agent;
use crate::catalog::{AgentCatalog, AgentCodeId};
use crate::controller::{Allegiance, ControllerId};
use crate::entity::AgentHandle;
use crate::event::{EventQueue, SimEvent};
use crate::group::ConstructGroups;
use crate::math::{Fixed, Vec2Fixed};
use crate::registry::{AgentRegistry, UNREGISTERED_TYPE_INDEX};
use crate::CoreError;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

// ---------------------------------------------------------------------------
// WorldConfig
// ---------------------------------------------------------------------------

/// Construction-time settings of a [`World`]. Every peer must use the same.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Seed of the world's PCG stream.
    pub seed: u64,
    /// Park torn-down agents of pooled codes for reuse.
    pub pooling_enabled: bool,
    /// Ticks per simulated second. Default: 32.
    pub frame_rate: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            pooling_enabled: true,
            frame_rate: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// TickContext
// ---------------------------------------------------------------------------

/// Everything an agent hook may touch besides the agent itself.
///
/// The agent running the hook has been taken out of `agents` for the
/// duration, so lookups of its own handle return `None`.
pub struct TickContext<'w> {
    pub agents: &'w mut AgentRegistry,
    pub groups: &'w mut ConstructGroups,
    pub events: &'w mut EventQueue,
    pub rng: &'w mut Pcg32,
    /// Simulated time per tick.
    pub delta: Fixed,
    pub frame_rate: u32,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    catalog: AgentCatalog,
    registry: AgentRegistry,
    groups: ConstructGroups,
    events: EventQueue,
    rng: Pcg32,
    delta: Fixed,
}

impl World {
    /// # Panics
    ///
    /// Panics if `config.frame_rate` is zero.
    pub fn new(catalog: AgentCatalog, config: WorldConfig) -> Self {
        assert!(config.frame_rate > 0, "frame_rate must be positive");
        let delta = Fixed::ONE / i64::from(config.frame_rate);
        Self {
            rng: Pcg32::seed_from_u64(config.seed),
            config,
            catalog,
            registry: AgentRegistry::new(),
            groups: ConstructGroups::new(),
            events: EventQueue::new(),
            delta,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    pub fn groups(&self) -> &ConstructGroups {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut ConstructGroups {
        &mut self.groups
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub(crate) fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Take every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.events.drain()
    }

    /// Simulated time per tick.
    pub fn delta(&self) -> Fixed {
        self.delta
    }

    pub fn agent(&self, handle: AgentHandle) -> Option<&Agent> {
        self.registry.get(handle)
    }

    pub fn agent_mut(&mut self, handle: AgentHandle) -> Option<&mut Agent> {
        self.registry.get_mut(handle)
    }

    pub fn state_digest(&self) -> i32 {
        self.registry.state_digest()
    }

    // -- controllers and agents ---------------------------------------------

    pub fn create_controller(
        &mut self,
        name: &str,
        default_allegiance: Allegiance,
    ) -> Result<ControllerId, CoreError> {
        self.registry.create_controller(name, default_allegiance)
    }

    /// Create an agent of `code` under `controller`, reusing a pooled one
    /// when available.
    ///
    /// # Panics
    ///
    /// Panics if the controller's local IDs or the world's global IDs are
    /// exhausted. Capacity is part of the lockstep protocol; running out is a
    /// configuration error, not a gameplay condition.
    pub fn create_agent(
        &mut self,
        controller: ControllerId,
        code: &str,
        position: Vec2Fixed,
        rotation: Vec2Fixed,
    ) -> Result<AgentHandle, CoreError> {
        let code_id = self.catalog.lookup(code)?;
        self.prepare_creation(controller, code)?;

        let handle = self.create_raw(code_id);
        self.attach(handle, controller, code);
        self.with_agent(handle, |agent, ctx| agent.initialize(position, rotation, ctx));
        self.events.push(SimEvent::AgentCreated {
            agent: handle,
            code: code_id,
        });
        debug!(agent = %handle, code, %controller, "agent created");
        Ok(handle)
    }

    pub fn create_agent_facing_right(
        &mut self,
        controller: ControllerId,
        code: &str,
        position: Vec2Fixed,
    ) -> Result<AgentHandle, CoreError> {
        self.create_agent(controller, code, position, Vec2Fixed::RIGHT)
    }

    /// Queue a teardown, applied in the next [`process_deactivations`].
    ///
    /// [`process_deactivations`]: Self::process_deactivations
    pub fn request_deactivate(&mut self, handle: AgentHandle, immediate: bool) {
        self.registry.request_deactivate(handle, immediate);
    }

    /// See [`AgentRegistry::change_ownership`].
    pub fn change_ownership(
        &mut self,
        handle: AgentHandle,
        new_controller: Option<ControllerId>,
    ) -> Result<(), CoreError> {
        self.registry.change_ownership(handle, new_controller)
    }

    /// Validate a creation request up front. Unknown controllers are an
    /// error; exhausted capacity is fatal.
    pub(crate) fn prepare_creation(&self, controller: ControllerId, code: &str) -> Result<(), CoreError> {
        match self.registry.check_capacity(controller) {
            Ok(()) => Ok(()),
            Err(err @ CoreError::CapacityExhausted { .. }) => {
                error!(%controller, code, %err, "agent capacity exhausted");
                panic!("cannot create '{code}' for {controller}: {err}");
            }
            Err(err) => Err(err),
        }
    }

    /// Build an agent object (or take one from the pool) without giving it
    /// IDs.
    pub(crate) fn create_raw(&mut self, code: AgentCodeId) -> AgentHandle {
        let template = self.catalog.template(code);
        if self.config.pooling_enabled && template.pooled {
            if let Some(handle) = self.registry.unpark(code) {
                trace!(agent = %handle, "agent reused from pool");
                return handle;
            }
        }
        let mut agent = Agent::from_template(code, template);
        agent.setup();
        self.registry.instantiate(agent, template.pooled)
    }

    /// Undo [`create_raw`](Self::create_raw) for an agent that never got IDs.
    pub(crate) fn recycle_raw(&mut self, slot: u32) {
        self.registry.set_type_active(slot, false);
        self.end_life(slot);
    }

    pub(crate) fn attach(&mut self, handle: AgentHandle, controller: ControllerId, code: &str) {
        if let Err(err) = self.registry.add_to_controller(handle.slot(), controller) {
            error!(%controller, code, %err, "agent could not be attached");
            panic!("cannot attach '{code}' to {controller}: {err}");
        }
    }

    fn context(&mut self) -> TickContext<'_> {
        TickContext {
            agents: &mut self.registry,
            groups: &mut self.groups,
            events: &mut self.events,
            rng: &mut self.rng,
            delta: self.delta,
            frame_rate: self.config.frame_rate,
        }
    }

    /// Run `f` on the agent in `slot` with the rest of the world as context.
    fn with_slot<R>(&mut self, slot: u32, f: impl FnOnce(&mut Agent, &mut TickContext<'_>) -> R) -> Option<R> {
        let mut agent = self.registry.take(slot)?;
        let result = f(&mut agent, &mut self.context());
        self.registry.restore(slot, agent);
        Some(result)
    }

    /// Like `with_slot`, addressed by handle. Only active agents qualify.
    pub(crate) fn with_agent<R>(
        &mut self,
        handle: AgentHandle,
        f: impl FnOnce(&mut Agent, &mut TickContext<'_>) -> R,
    ) -> Option<R> {
        let slot = self.registry.active_slot_of(handle)?;
        self.with_slot(slot, f)
    }

    // -- phases -------------------------------------------------------------

    /// Run one full tick of phases (no command routing).
    pub fn advance(&mut self) {
        self.simulate();
        self.late_simulate();
        self.process_deactivations();
        self.visualize();
        self.late_visualize();
    }

    pub fn simulate(&mut self) {
        self.process_construct_groups();
        let mut global_id = 0;
        while global_id < self.registry.peak_global_id() {
            if let Some(slot) = self.registry.active_slot(global_id) {
                self.with_slot(slot, |agent, ctx| agent.simulate(ctx));
            }
            global_id += 1;
        }
    }

    pub fn late_simulate(&mut self) {
        for global_id in 0..self.registry.peak_global_id() {
            if let Some(slot) = self.registry.active_slot(global_id) {
                if let Some(agent) = self.registry.slot_agent_mut(slot) {
                    agent.late_simulate();
                }
            }
        }
    }

    pub fn visualize(&mut self) {
        for slot in self.presented_slots() {
            if let Some(agent) = self.registry.slot_agent_mut(slot) {
                agent.visualize();
            }
        }
    }

    /// Presentation pass. Also counts down dying agents and ends the life of
    /// those whose linger is over.
    pub fn late_visualize(&mut self) {
        for slot in self.presented_slots() {
            if let Some(agent) = self.registry.slot_agent_mut(slot) {
                agent.late_visualize();
            }
        }
        for slot in self.registry.tick_dying() {
            self.end_life(slot);
        }
    }

    /// Live agents in global-ID order, then dying agents in teardown order.
    fn presented_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = (0..self.registry.peak_global_id())
            .filter_map(|global_id| self.registry.active_slot(global_id))
            .filter(|&slot| self.registry.slot_agent(slot).is_some_and(Agent::is_live))
            .collect();
        slots.extend(self.registry.dying_slots());
        slots
    }

    /// Apply every buffered teardown request, in request order.
    ///
    /// Requests for agents that are no longer active (already torn down,
    /// stale handles, duplicates) are ignored.
    pub fn process_deactivations(&mut self) {
        let requests = self.registry.take_deactivations();
        for request in &requests {
            let Some(slot) = self.registry.active_slot_of(request.agent) else {
                trace!(agent = %request.agent, "deactivation of inactive agent ignored");
                continue;
            };
            self.with_slot(slot, |agent, ctx| agent.deactivate(request.immediate, ctx));
            self.registry.release_ownership(slot);
            self.registry.set_type_active(slot, false);
            self.events.push(SimEvent::AgentDeactivated {
                agent: request.agent,
                immediate: request.immediate,
            });
            debug!(agent = %request.agent, immediate = request.immediate, "agent deactivated");

            let death_ticks = self
                .registry
                .slot_agent(slot)
                .map_or(0, |a| a.stats.death_ticks);
            if request.immediate || death_ticks == 0 {
                self.end_life(slot);
            } else {
                self.registry.push_dying(slot, death_ticks);
            }
        }
        self.registry.return_deactivation_buffer(requests);
    }

    /// Park the agent in `slot` if its code is pooled, otherwise drop it.
    fn end_life(&mut self, slot: u32) {
        let pooling = self.config.pooling_enabled;
        let Some(agent) = self.registry.slot_agent_mut(slot) else {
            return;
        };
        agent.end_life();
        if pooling && agent.type_index() != UNREGISTERED_TYPE_INDEX {
            self.registry.park(slot);
        } else {
            self.registry.discard(slot);
        }
    }

    /// Walk every construct group: drop finished or stale projects from the
    /// front of its queue, hand the front project to members that have none
    /// (or whose project is finished or gone), forget members that are no
    /// longer active, and dissolve the group once it has no members.
    fn process_construct_groups(&mut self) {
        for id in self.groups.ids() {
            while let Some(front) = self.groups.get(id).and_then(|g| g.front()) {
                if self.project_is_open(front) {
                    break;
                }
                self.groups.pop_front(id);
            }

            let Some(group) = self.groups.get(id) else {
                continue;
            };
            let front = group.front();
            let members = group.members().to_vec();
            for member in members {
                let Some(agent) = self.registry.get(member) else {
                    self.groups.remove_member(id, member);
                    continue;
                };
                let Some(project) = front else {
                    continue;
                };
                let needs_project = agent
                    .construct()
                    .is_some_and(|c| c.project().map_or(true, |p| !self.project_is_open(p)));
                if !needs_project {
                    continue;
                }
                let radius = self
                    .registry
                    .get(project)
                    .map_or(Fixed::ZERO, |t| t.body.radius);
                if let Some(agent) = self.registry.get_mut(member) {
                    agent.assign_construct_project(project, radius);
                }
            }

            if self.groups.get(id).is_some_and(|g| g.members().is_empty()) {
                trace!(group = ?id, "construct group dissolved");
                self.groups.dissolve(id);
            }
        }
    }

    fn project_is_open(&self, project: AgentHandle) -> bool {
        self.registry
            .get(project)
            .and_then(|t| t.structure.as_ref())
            .is_some_and(|s| s.needs_construction())
    }

    // -- session ------------------------------------------------------------

    /// Immediately tear down every active agent and end every linger.
    pub fn deactivate_all(&mut self) {
        for handle in self.registry.active_handles() {
            self.registry.request_deactivate(handle, true);
        }
        self.process_deactivations();
        for slot in self.registry.take_all_dying() {
            self.end_life(slot);
        }
        info!("all agents deactivated");
    }

    /// End the session: tear everything down, then forget controllers,
    /// global IDs and groups. Pooled agents stay parked for the next session.
    pub fn reset_session(&mut self) {
        self.deactivate_all();
        self.registry.reset_session();
        self.groups.clear();
        info!("session reset");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandAction};

    const CATALOG: &str = r#"{
        "worker": {
            "kind": "unit",
            "action_range": "2",
            "mover": { "speed": "4" },
            "construct": {}
        },
        "site": {
            "kind": "structure",
            "structure": { "max_build_points": "3" }
        },
        "corpse": {
            "kind": "unit",
            "death_ticks": 2
        },
        "rock": {
            "kind": "unit",
            "pooled": false
        }
    }"#;

    fn world() -> (World, ControllerId) {
        let catalog = AgentCatalog::from_json(CATALOG).unwrap();
        let mut world = World::new(catalog, WorldConfig::default());
        let red = world.create_controller("red", Allegiance::Enemy).unwrap();
        (world, red)
    }

    fn spawn(world: &mut World, controller: ControllerId, code: &str, x: i32) -> AgentHandle {
        world
            .create_agent_facing_right(controller, code, Vec2Fixed::from_num(x, 0))
            .unwrap()
    }

    // -- configuration ------------------------------------------------------

    #[test]
    fn delta_follows_frame_rate() {
        let (world, _) = world();
        assert_eq!(world.delta(), Fixed::from_num(0.03125));

        let config = WorldConfig {
            frame_rate: 16,
            ..WorldConfig::default()
        };
        let world = World::new(AgentCatalog::new(), config);
        assert_eq!(world.delta(), Fixed::from_num(0.0625));
    }

    #[test]
    #[should_panic(expected = "frame_rate")]
    fn zero_frame_rate_is_rejected() {
        let config = WorldConfig {
            frame_rate: 0,
            ..WorldConfig::default()
        };
        let _ = World::new(AgentCatalog::new(), config);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: WorldConfig = serde_json::from_str(r#"{ "seed": 7 }"#).unwrap();
        assert_eq!(config.seed, 7);
        assert!(config.pooling_enabled);
        assert_eq!(config.frame_rate, 32);
    }

    // -- creation -----------------------------------------------------------

    #[test]
    fn create_agent_binds_ids_and_emits_event() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "worker", 1);
        let b = spawn(&mut world, red, "site", 2);

        let agent = world.agent(b).unwrap();
        assert_eq!(agent.controller(), Some(red));
        assert_eq!(agent.local_id(), Some(1));
        assert_eq!(agent.global_id(), Some(1));
        assert_eq!(agent.body.position, Vec2Fixed::from_num(2, 0));
        assert!(agent.is_live());

        let events = world.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SimEvent::AgentCreated { agent, .. } if agent == a));
    }

    #[test]
    fn unknown_code_and_controller_are_errors() {
        let (mut world, red) = world();
        let err = world
            .create_agent_facing_right(red, "dragon", Vec2Fixed::ZERO)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownAgentCode { .. }));

        let err = world
            .create_agent_facing_right(ControllerId(9), "worker", Vec2Fixed::ZERO)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownController { id: 9, .. }));
        assert_eq!(world.registry().active_count(), 0);
    }

    // -- deactivation -------------------------------------------------------

    #[test]
    fn deactivation_waits_for_processing() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "worker", 0);

        world.request_deactivate(a, true);
        world.simulate();
        world.late_simulate();
        assert!(world.agent(a).is_some());

        world.process_deactivations();
        assert!(world.agent(a).is_none());
        assert_eq!(world.registry().active_count(), 0);
    }

    #[test]
    fn duplicate_requests_tear_down_once() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "worker", 0);
        world.drain_events();

        world.request_deactivate(a, false);
        world.request_deactivate(a, true);
        world.advance();

        let teardowns = world
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SimEvent::AgentDeactivated { .. }))
            .count();
        assert_eq!(teardowns, 1);
    }

    #[test]
    fn pooled_agents_are_reused_with_new_version() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "worker", 0);
        world.request_deactivate(a, true);
        world.advance();

        let worker = world.catalog().lookup("worker").unwrap();
        assert_eq!(world.registry().pool_len(worker), 1);

        let b = spawn(&mut world, red, "worker", 3);
        assert_eq!(b.slot(), a.slot());
        assert_ne!(b.version(), a.version());
        assert!(world.agent(a).is_none());
        assert_eq!(world.registry().pool_len(worker), 0);
        assert_eq!(world.registry().roster_len(worker), 1);
    }

    #[test]
    fn unpooled_agents_are_discarded() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "rock", 0);
        world.request_deactivate(a, true);
        world.advance();

        let rock = world.catalog().lookup("rock").unwrap();
        assert_eq!(world.registry().pool_len(rock), 0);
        assert!(world.registry().get_any(a).is_none());
    }

    #[test]
    fn pooling_can_be_disabled() {
        let catalog = AgentCatalog::from_json(CATALOG).unwrap();
        let config = WorldConfig {
            pooling_enabled: false,
            ..WorldConfig::default()
        };
        let mut world = World::new(catalog, config);
        let red = world.create_controller("red", Allegiance::Enemy).unwrap();
        let a = spawn(&mut world, red, "worker", 0);
        world.request_deactivate(a, true);
        world.advance();

        let worker = world.catalog().lookup("worker").unwrap();
        assert_eq!(world.registry().pool_len(worker), 0);
        assert!(world.registry().get_any(a).is_none());
    }

    #[test]
    fn death_linger_keeps_agent_visualized() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "corpse", 0);
        world.request_deactivate(a, false);

        world.advance();
        assert!(world.agent(a).is_none());
        assert!(world.registry().get_any(a).is_some_and(Agent::is_live));
        assert_eq!(world.registry().dying_count(), 1);

        world.advance();
        assert_eq!(world.registry().dying_count(), 0);
        let corpse = world.catalog().lookup("corpse").unwrap();
        assert_eq!(world.registry().pool_len(corpse), 1);
    }

    // -- phases -------------------------------------------------------------

    #[test]
    fn late_simulate_tracks_position_changes() {
        let (mut world, red) = world();
        let a = spawn(&mut world, red, "worker", 0);
        world
            .agent_mut(a)
            .unwrap()
            .mover
            .as_mut()
            .unwrap()
            .start_move(Vec2Fixed::from_num(10, 0));

        world.advance();
        let agent = world.agent(a).unwrap();
        assert!(agent.body.position_changed_buffer());
        assert_eq!(
            agent.body.position,
            Vec2Fixed::new(Fixed::from_num(0.125), Fixed::ZERO)
        );
        assert_eq!(agent.visual.position, agent.body.position);
    }

    #[test]
    fn groups_dissolve_once_members_leave() {
        let (mut world, red) = world();
        spawn(&mut world, red, "worker", 0);
        let site = spawn(&mut world, red, "site", 1);
        let site_id = world.agent(site).unwrap().global_id().unwrap();

        let command = Command::new(red, CommandAction::Construct { projects: vec![site_id] })
            .with_selection([0]);
        world.execute(&command).unwrap();
        assert_eq!(world.groups().len(), 1);

        let stop = Command::new(red, CommandAction::Stop).with_selection([0]);
        world.execute(&stop).unwrap();
        world.advance();
        assert!(world.groups().is_empty());
    }

    // -- session ------------------------------------------------------------

    #[test]
    fn reset_session_clears_everything_but_pools() {
        let (mut world, red) = world();
        spawn(&mut world, red, "worker", 0);
        spawn(&mut world, red, "corpse", 1);
        world.advance();

        world.reset_session();
        assert_eq!(world.registry().active_count(), 0);
        assert_eq!(world.registry().peak_global_id(), 0);
        assert!(world.registry().controllers().is_empty());
        assert!(world.groups().is_empty());
        assert_eq!(world.state_digest(), 33);

        let worker = world.catalog().lookup("worker").unwrap();
        assert_eq!(world.registry().pool_len(worker), 1);

        let blue = world.create_controller("blue", Allegiance::Enemy).unwrap();
        let again = spawn(&mut world, blue, "worker", 5);
        assert_eq!(world.agent(again).unwrap().global_id(), Some(0));
    }
}
