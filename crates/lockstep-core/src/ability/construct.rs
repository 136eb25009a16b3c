//! The Construct ability: walk to a structure and build it up.
//!
//! A builder receives a `Construct` command, joins the construct group the
//! command created and waits. The group hands it a project
//! ([`Construct::on_group_processed`]) and from then on, each tick while the
//! agent carries the `Builder` tag:
//!
//! 1. Charge grows by one tick's worth of time, capped at
//!    `construction_speed`.
//! 2. If the project is gone, stale (its spawn version no longer matches the
//!    cached handle) or finished with nothing left in the group queue, the
//!    builder stops.
//! 3. Out of range, the builder moves toward the project. Repaths are
//!    throttled by a timer with per-agent jitter.
//! 4. In range, the builder faces the project (when its attack profile
//!    tracks facing) and, once fully charged, winds up.
//! 5. When the windup elapses it discharges: `construct_amount` build points
//!    land on the project and the charge resets.
//!
//! Range checks compare squared distances against the squared interaction
//! range cached when the project was assigned.

use crate::ability::Ability;
use crate::agent::{Agent, AgentTag, AnimState};
use crate::catalog::{AgentKind, ConstructConfig};
use crate::command::CommandAction;
use crate::entity::{AgentHandle, GlobalId};
use crate::event::SimEvent;
use crate::group::GroupId;
use crate::math::{Fixed, Vec2Fixed};
use crate::persist::{read_bool, read_fixed, read_u16, write_fixed, FieldMap};
use crate::registry::AgentRegistry;
use crate::timer::FrameTimer;
use crate::world::TickContext;
use crate::CoreError;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

pub const ABILITY_NAME: &str = "Construct";

/// Minimum distance the project must drift from the current destination
/// before a repath is issued.
pub const REPATH_DISTANCE: Fixed = Fixed::from_bits(2 << 16);

const KEY_BUILD_MOVING: &str = "BuildMoving";
const KEY_PROJECT_ID: &str = "currentProjectId";
const KEY_FOCUSED: &str = "Focused";
const KEY_IN_RANGE: &str = "InRange";
const KEY_CONSTRUCT_COUNT: &str = "ConstructCount";
const KEY_FAST_RANGE: &str = "FastRangeToTarget";

/// Fields read from a save, applied at the next initialize.
#[derive(Debug, Clone, PartialEq)]
struct LoadedState {
    build_moving: bool,
    project_id: Option<GlobalId>,
    focused: bool,
    in_range: bool,
    construct_count: Fixed,
    fast_range_to_target: Fixed,
}

#[derive(Debug, Clone)]
pub struct Construct {
    config: ConstructConfig,
    base_priority: i32,
    repath_timer: FrameTimer,
    repath_random: u32,
    construct_count: Fixed,
    windup_count: Fixed,
    fast_range_to_target: Fixed,
    target_direction: Vec2Fixed,
    fast_magnitude: Fixed,
    project: Option<AgentHandle>,
    group: Option<GroupId>,
    focused: bool,
    build_moving: bool,
    in_range: bool,
    winding_up: bool,
    casting: bool,
    loaded: Option<LoadedState>,
}

impl Construct {
    pub fn new(config: ConstructConfig) -> Self {
        Self {
            config,
            base_priority: 0,
            repath_timer: FrameTimer::default(),
            repath_random: 0,
            construct_count: Fixed::ZERO,
            windup_count: Fixed::ZERO,
            fast_range_to_target: Fixed::ZERO,
            target_direction: Vec2Fixed::ZERO,
            fast_magnitude: Fixed::ZERO,
            project: None,
            group: None,
            focused: false,
            build_moving: false,
            in_range: false,
            winding_up: false,
            casting: false,
            loaded: None,
        }
    }

    pub fn config(&self) -> &ConstructConfig {
        &self.config
    }

    /// The structure being built. The handle carries the spawn version seen
    /// at assignment.
    pub fn project(&self) -> Option<AgentHandle> {
        self.project
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn is_build_moving(&self) -> bool {
        self.build_moving
    }

    pub fn in_range(&self) -> bool {
        self.in_range
    }

    pub fn is_winding_up(&self) -> bool {
        self.winding_up
    }

    pub fn construct_count(&self) -> Fixed {
        self.construct_count
    }

    pub fn windup_count(&self) -> Fixed {
        self.windup_count
    }

    pub fn fast_range_to_target(&self) -> Fixed {
        self.fast_range_to_target
    }

    pub fn repath_jitter(&self) -> u32 {
        self.repath_random
    }

    // -- group callback -----------------------------------------------------

    /// Take `project` as the current assignment.
    pub(crate) fn on_group_processed(
        &mut self,
        agent: &mut Agent,
        project: AgentHandle,
        project_radius: Fixed,
    ) {
        agent.tag = AgentTag::Builder;
        self.project = Some(project);
        self.focused = true;
        self.build_moving = false;
        self.in_range = false;
        self.winding_up = false;
        self.windup_count = Fixed::ZERO;
        let range = agent.stats.action_range + project_radius + agent.body.radius;
        self.fast_range_to_target = range * range;
        debug!(builder = %agent.handle(), %project, "construct project assigned");
    }

    // -- per-tick behaviour -------------------------------------------------

    fn check_range(&mut self, agent: &Agent, target_position: Vec2Fixed) -> bool {
        self.target_direction = target_position - agent.body.position;
        self.fast_magnitude = self.target_direction.fast_magnitude();
        self.fast_magnitude <= self.fast_range_to_target
    }

    fn behave_with_target(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        let Some(project) = self.project else {
            self.stop_construction(agent, ctx, false);
            return;
        };
        let target = ctx.agents.get(project).and_then(|t| {
            t.structure.as_ref().map(|s| {
                (
                    t.body.position,
                    t.body.position_changed_buffer(),
                    s.needs_construction(),
                )
            })
        });
        let Some((target_position, target_moved, needs_construction)) = target else {
            debug!(builder = %agent.handle(), %project, "construct project gone");
            self.stop_construction(agent, ctx, false);
            return;
        };
        let queue_empty = self.group.map_or(true, |g| ctx.groups.queue_len(g) == 0);
        if !needs_construction && queue_empty {
            self.stop_construction(agent, ctx, false);
            return;
        }

        if !self.winding_up {
            if self.check_range(agent, target_position) {
                self.approach_finished(agent, ctx, project);
            } else {
                self.approach(agent, ctx, target_position, target_moved);
                self.in_range = false;
            }
        }

        if self.winding_up {
            self.windup_count += ctx.delta;
            if let Some(turner) = agent.turner.as_mut() {
                turner.start_turn_vector(target_position - agent.body.position);
            }
            if self.windup_count >= self.config.windup {
                self.windup_count = Fixed::ZERO;
                self.discharge(agent, ctx, project);
                self.reset_charge();
                self.winding_up = false;
            }
        } else {
            self.windup_count = Fixed::ZERO;
        }

        if self.in_range {
            if let Some(mover) = agent.mover.as_mut() {
                mover.pause_auto_stop();
                mover.pause_collision_stop();
            }
        }
    }

    /// In range this tick: settle, face the project, wind up when charged.
    fn approach_finished(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, project: AgentHandle) {
        if !self.in_range {
            if agent.mover.as_mut().is_some_and(|m| m.arrive()) {
                self.arrived();
            }
            self.in_range = true;
        }
        agent.anim = AnimState::Constructing;

        if let Some(target) = ctx.agents.get_mut(project) {
            let first = target
                .structure
                .as_mut()
                .is_some_and(|s| s.start_construction());
            if first {
                target.anim = AnimState::Building;
                ctx.events.push(SimEvent::ConstructionStarted {
                    builder: agent.handle(),
                    structure: project,
                });
                debug!(builder = %agent.handle(), %project, "construction started");
            }
        }

        let (direction, magnitude) = self.target_direction.normalize();
        let forward = agent.body.forward();
        let within_turn = match &agent.stats.attack {
            Some(attack) if attack.track_attack_angle => {
                self.fast_magnitude != Fixed::ZERO
                    && forward.dot(direction) > Fixed::ZERO
                    && forward.cross(direction).abs() <= attack.attack_angle
            }
            _ => true,
        };
        // A builder that cannot turn works from whatever facing it has.
        let need_turn = magnitude != Fixed::ZERO && !within_turn;
        if need_turn && agent.can_turn() {
            if let Some(turner) = agent.turner.as_mut() {
                turner.start_turn_direction(direction);
            }
        } else if self.construct_count >= self.config.construction_speed {
            self.winding_up = true;
        }
    }

    /// Out of range this tick: keep the mover pointed at the project.
    fn approach(
        &mut self,
        agent: &mut Agent,
        ctx: &mut TickContext<'_>,
        target_position: Vec2Fixed,
        target_moved: bool,
    ) {
        let Some(mover) = agent.mover.as_mut() else {
            return;
        };
        mover.pause_auto_stop();
        mover.pause_collision_stop();
        if !mover.is_moving() && !mover.move_on_group_processed {
            self.start_construct_move(agent, ctx, target_position);
            agent.body.priority = self.base_priority;
        } else if self.in_range {
            mover.set_destination(target_position);
        } else if self.repath_timer.advance_frame() {
            let drift = target_position.fast_distance(mover.destination());
            if target_moved && drift >= REPATH_DISTANCE * REPATH_DISTANCE {
                self.start_construct_move(agent, ctx, target_position);
                self.repath_timer.advance_frames(self.repath_random);
            }
        }
    }

    fn start_construct_move(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, destination: Vec2Fixed) {
        let Some(mover) = agent.mover.as_mut() else {
            return;
        };
        self.build_moving = true;
        self.focused = false;
        mover.start_move(destination);
        ctx.events.push(SimEvent::MoveOrdered {
            agent: agent.handle(),
            destination,
        });
        debug!(builder = %agent.handle(), ?destination, "construct move issued");
    }

    fn arrived(&mut self) {
        if self.build_moving {
            self.build_moving = false;
            self.focused = true;
        }
    }

    fn discharge(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, project: AgentHandle) {
        if let Some(mover) = agent.mover.as_mut() {
            mover.stop_move();
        }
        self.build_moving = false;
        if self.config.increase_priority {
            agent.body.priority = self.base_priority + 1;
        }

        let amount = self.config.construct_amount;
        let progress = ctx
            .agents
            .get_mut(project)
            .and_then(|t| t.structure.as_mut())
            .filter(|s| s.needs_construction())
            .map(|s| (s.build_up(amount), !s.needs_construction()));
        let Some((build_points, completed)) = progress else {
            self.stop_construction(agent, ctx, false);
            return;
        };

        ctx.events.push(SimEvent::BuildProgress {
            builder: agent.handle(),
            structure: project,
            build_points,
        });
        debug!(builder = %agent.handle(), %project, %build_points, "construct discharge");
        if completed {
            ctx.events.push(SimEvent::ConstructionCompleted {
                builder: agent.handle(),
                structure: project,
            });
        }
    }

    /// Spend one discharge worth of charge and credit the windup time.
    ///
    /// The remainder is taken modulo `construction_speed` and the result is
    /// clamped to the cap, so a windup longer than the charge time never
    /// banks more than one discharge.
    fn reset_charge(&mut self) {
        let speed = self.config.construction_speed;
        if speed <= Fixed::ZERO {
            self.construct_count = Fixed::ZERO;
            return;
        }
        let remainder = self.construct_count % speed;
        self.construct_count = (remainder + self.config.windup).min(speed);
    }

    /// Leave the current project.
    ///
    /// A `complete` stop (deactivation, explicit cast stop) always leaves the
    /// group and clears the builder tag. An interrupted stop leaves the group
    /// only when its queue is empty, and clears the tag only then; a builder
    /// that is waiting on a non-empty queue stays tagged for its next project.
    pub(crate) fn stop_construction(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, complete: bool) {
        let engaged = self.project.is_some() || self.group.is_some() || self.casting;
        let had_project = self.project.is_some();

        self.in_range = false;
        self.focused = false;
        self.build_moving = false;
        self.winding_up = false;
        self.windup_count = Fixed::ZERO;

        let released = match self.group {
            Some(group) if complete || ctx.groups.queue_len(group) == 0 => {
                ctx.groups.remove_member(group, agent.handle());
                self.group = None;
                true
            }
            Some(_) => false,
            None => true,
        };
        if released {
            agent.tag = AgentTag::None;
        }
        if !complete && had_project {
            if let Some(mover) = agent.mover.as_mut() {
                mover.stop_move();
            }
        }

        self.project = None;
        self.casting = false;
        agent.body.priority = self.base_priority;
        if agent.anim == AnimState::Constructing {
            agent.anim = AnimState::Idle;
        }

        if engaged {
            ctx.events.push(SimEvent::ConstructStopped {
                builder: agent.handle(),
                complete,
            });
            debug!(builder = %agent.handle(), complete, released, "construct stopped");
        }
    }

    fn apply_loaded(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, loaded: LoadedState) {
        self.construct_count = loaded.construct_count;
        self.fast_range_to_target = loaded.fast_range_to_target;

        let Some(project_id) = loaded.project_id else {
            return;
        };
        let project = ctx
            .agents
            .handle_for_global_id(project_id)
            .filter(|&h| {
                ctx.agents
                    .get(h)
                    .is_some_and(|t| t.kind() == AgentKind::Structure && t.structure.is_some())
            });
        match project {
            Some(project) => {
                self.project = Some(project);
                self.focused = loaded.focused;
                self.build_moving = loaded.build_moving;
                self.in_range = loaded.in_range;
                self.casting = true;
                agent.tag = AgentTag::Builder;
            }
            None => warn!(
                builder = %agent.handle(),
                project_id,
                "saved construct project does not resolve to a structure, dropping"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Ability hooks
// ---------------------------------------------------------------------------

impl Ability for Construct {
    fn name(&self) -> &'static str {
        ABILITY_NAME
    }

    fn setup(&mut self, agent: &mut Agent) {
        self.base_priority = agent.stats.base_priority;
    }

    fn initialize(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        self.construct_count = Fixed::ZERO;
        self.windup_count = Fixed::ZERO;
        self.fast_range_to_target = Fixed::ZERO;
        self.target_direction = Vec2Fixed::ZERO;
        self.fast_magnitude = Fixed::ZERO;
        self.project = None;
        self.group = None;
        self.focused = false;
        self.build_moving = false;
        self.in_range = false;
        self.winding_up = false;
        self.casting = false;

        let repath_interval = ctx.frame_rate * 2;
        self.repath_timer.reset(repath_interval);
        self.repath_random = ctx.rng.gen_range(0..repath_interval);

        if let Some(loaded) = self.loaded.take() {
            self.apply_loaded(agent, ctx, loaded);
        }
    }

    fn simulate(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        if agent.tag != AgentTag::Builder {
            return;
        }
        self.construct_count = (self.construct_count + ctx.delta).min(self.config.construction_speed);

        if self.project.is_none() && self.group.is_some_and(|g| ctx.groups.queue_len(g) == 0) {
            // Nothing left for the group to hand out.
            self.stop_construction(agent, ctx, false);
            return;
        }
        if self.focused || self.build_moving {
            self.behave_with_target(agent, ctx);
        }
        if self.build_moving {
            if let Some(mover) = agent.mover.as_mut() {
                mover.start_looking_for_stop_pause();
            }
        }
    }

    fn accepts(&self, action: &CommandAction) -> bool {
        matches!(action, CommandAction::Construct { .. })
    }

    /// Join the construct group created by the command being routed.
    fn execute(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, action: &CommandAction) {
        if !self.accepts(action) {
            return;
        }
        if self.project.is_some() || self.group.is_some() {
            self.stop_construction(agent, ctx, true);
        }
        match ctx.groups.last_created() {
            Some(group) => {
                ctx.groups.add_member(group, agent.handle());
                self.group = Some(group);
                self.casting = true;
                debug!(builder = %agent.handle(), ?group, "joined construct group");
            }
            None => warn!(builder = %agent.handle(), "no construct group to join"),
        }
    }

    fn on_arrive(&mut self, _agent: &mut Agent) {
        self.arrived();
    }

    fn is_casting(&self) -> bool {
        self.casting
    }

    fn stop_cast(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        self.stop_construction(agent, ctx, true);
    }

    fn deactivate(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>) {
        self.stop_construction(agent, ctx, true);
    }

    fn save(&self, _agent: &Agent, agents: &AgentRegistry) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(KEY_BUILD_MOVING.to_owned(), Value::from(self.build_moving));
        let project_id = self
            .project
            .and_then(|p| agents.get(p))
            .filter(|t| t.structure.is_some())
            .and_then(Agent::global_id);
        if let Some(project_id) = project_id {
            fields.insert(KEY_PROJECT_ID.to_owned(), Value::from(project_id));
        }
        fields.insert(KEY_FOCUSED.to_owned(), Value::from(self.focused));
        fields.insert(KEY_IN_RANGE.to_owned(), Value::from(self.in_range));
        write_fixed(&mut fields, KEY_CONSTRUCT_COUNT, self.construct_count);
        write_fixed(&mut fields, KEY_FAST_RANGE, self.fast_range_to_target);
        fields
    }

    fn load(&mut self, fields: &FieldMap) -> Result<(), CoreError> {
        let loaded = LoadedState {
            build_moving: read_bool(fields, ABILITY_NAME, KEY_BUILD_MOVING)?.unwrap_or(false),
            project_id: read_u16(fields, ABILITY_NAME, KEY_PROJECT_ID)?,
            focused: read_bool(fields, ABILITY_NAME, KEY_FOCUSED)?.unwrap_or(false),
            in_range: read_bool(fields, ABILITY_NAME, KEY_IN_RANGE)?.unwrap_or(false),
            construct_count: read_fixed(fields, ABILITY_NAME, KEY_CONSTRUCT_COUNT)?
                .unwrap_or(Fixed::ZERO),
            fast_range_to_target: read_fixed(fields, ABILITY_NAME, KEY_FAST_RANGE)?
                .unwrap_or(Fixed::ZERO),
        };
        self.loaded = Some(loaded);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
