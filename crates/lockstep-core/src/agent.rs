//! Simulated agents and their per-phase hooks.
//!
//! An [`Agent`] is one unit or structure. It owns its physical [`Body`], the
//! optional capabilities its template grants (movement, facing, build
//! points) and an ordered list of abilities. The world drives it through
//! the lifecycle hooks below; agents never run themselves.
//!
//! | Hook              | When                                          |
//! |-------------------|-----------------------------------------------|
//! | `setup`           | once, when the agent object is first created  |
//! | `initialize`      | every time the agent (re)enters the world     |
//! | `simulate`        | every tick, in global-ID order                |
//! | `late_simulate`   | every tick, after all agents simulated        |
//! | `visualize`       | every tick, presentation only                 |
//! | `late_visualize`  | every tick, presentation only                 |
//! | `deactivate`      | when the world processes its teardown request |

use crate::ability::AbilityKind;
use crate::catalog::{AgentCodeId, AgentKind, AgentTemplate, AttackProfile};
use crate::command::CommandAction;
use crate::controller::ControllerId;
use crate::entity::{AgentHandle, GlobalId, LocalId};
use crate::math::{Fixed, Vec2Fixed};
use crate::movement::{Mover, Turner};
use crate::persist::FieldMap;
use crate::registry::{AgentRegistry, UNREGISTERED_TYPE_INDEX};
use crate::structure::Structure;
use crate::world::TickContext;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Role marker that gates per-tick ability work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentTag {
    #[default]
    None,
    Builder,
}

/// Animation state requested by the simulation for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnimState {
    #[default]
    Idle,
    Moving,
    Constructing,
    Building,
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// Physical state of an agent. Position and rotation feed the state digest.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub position: Vec2Fixed,
    /// Unit facing vector.
    pub rotation: Vec2Fixed,
    pub radius: Fixed,
    pub priority: i32,
    last_position: Vec2Fixed,
    position_changed_buffer: bool,
}

impl Body {
    pub fn new(position: Vec2Fixed, rotation: Vec2Fixed, radius: Fixed, priority: i32) -> Self {
        Self {
            position,
            rotation,
            radius,
            priority,
            last_position: position,
            position_changed_buffer: false,
        }
    }

    /// Whether the position moved during the last completed tick.
    pub fn position_changed_buffer(&self) -> bool {
        self.position_changed_buffer
    }

    pub fn forward(&self) -> Vec2Fixed {
        self.rotation
    }

    fn late_simulate(&mut self) {
        self.position_changed_buffer = self.position != self.last_position;
        self.last_position = self.position;
    }
}

/// Template-derived numbers abilities read but never mutate.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStats {
    pub action_range: Fixed,
    pub base_priority: i32,
    pub attack: Option<AttackProfile>,
    pub death_ticks: u32,
}

/// What the presentation layer last saw.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisualState {
    pub position: Vec2Fixed,
    pub rotation: Vec2Fixed,
    pub anim: AnimState,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Agent {
    handle: AgentHandle,
    code: AgentCodeId,
    kind: AgentKind,
    type_index: u16,
    controller: Option<ControllerId>,
    local_id: Option<LocalId>,
    global_id: Option<GlobalId>,
    live: bool,
    pub tag: AgentTag,
    pub anim: AnimState,
    pub body: Body,
    pub stats: AgentStats,
    pub mover: Option<Mover>,
    pub turner: Option<Turner>,
    pub structure: Option<Structure>,
    pub visual: VisualState,
    abilities: Vec<AbilityKind>,
}

impl Agent {
    pub(crate) fn from_template(code: AgentCodeId, template: &AgentTemplate) -> Self {
        let abilities = AbilityKind::for_template(template);
        Self {
            handle: AgentHandle::new(0, 0),
            code,
            kind: template.kind,
            type_index: UNREGISTERED_TYPE_INDEX,
            controller: None,
            local_id: None,
            global_id: None,
            live: false,
            tag: AgentTag::None,
            anim: AnimState::Idle,
            body: Body::new(Vec2Fixed::ZERO, Vec2Fixed::RIGHT, template.radius, template.priority),
            stats: AgentStats {
                action_range: template.action_range,
                base_priority: template.priority,
                attack: template.attack.clone(),
                death_ticks: template.death_ticks,
            },
            mover: template.mover.as_ref().map(Mover::new),
            turner: template.turner.as_ref().map(Turner::new),
            structure: template.structure.as_ref().map(Structure::new),
            visual: VisualState::default(),
            abilities,
        }
    }

    // -- identity -----------------------------------------------------------

    pub fn handle(&self) -> AgentHandle {
        self.handle
    }

    pub fn code(&self) -> AgentCodeId {
        self.code
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Index within the per-code pooling roster, or
    /// [`UNREGISTERED_TYPE_INDEX`] for agents that are never pooled.
    pub fn type_index(&self) -> u16 {
        self.type_index
    }

    pub fn controller(&self) -> Option<ControllerId> {
        self.controller
    }

    pub fn local_id(&self) -> Option<LocalId> {
        self.local_id
    }

    pub fn global_id(&self) -> Option<GlobalId> {
        self.global_id
    }

    /// Owned by a controller and taking part in the tick.
    pub fn is_active(&self) -> bool {
        self.global_id.is_some()
    }

    /// Still being presented. Stays true through the death linger of a
    /// non-immediate teardown.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn can_move(&self) -> bool {
        self.mover.is_some()
    }

    pub fn can_turn(&self) -> bool {
        self.turner.is_some()
    }

    pub fn abilities(&self) -> &[AbilityKind] {
        &self.abilities
    }

    pub fn construct(&self) -> Option<&crate::ability::construct::Construct> {
        self.abilities.iter().find_map(AbilityKind::as_construct)
    }

    pub fn construct_mut(&mut self) -> Option<&mut crate::ability::construct::Construct> {
        self.abilities.iter_mut().find_map(AbilityKind::as_construct_mut)
    }

    pub(crate) fn set_handle(&mut self, handle: AgentHandle) {
        self.handle = handle;
    }

    pub(crate) fn set_type_index(&mut self, type_index: u16) {
        self.type_index = type_index;
    }

    pub(crate) fn set_ownership(&mut self, ownership: Option<(ControllerId, LocalId, GlobalId)>) {
        match ownership {
            Some((controller, local_id, global_id)) => {
                self.controller = Some(controller);
                self.local_id = Some(local_id);
                self.global_id = Some(global_id);
            }
            None => {
                self.controller = None;
                self.local_id = None;
                self.global_id = None;
            }
        }
    }

    /// Run `f` with the ability list moved out, so abilities can take the
    /// agent mutably.
    fn with_abilities<R>(&mut self, f: impl FnOnce(&mut [AbilityKind], &mut Agent) -> R) -> R {
        let mut abilities = std::mem::take(&mut self.abilities);
        let result = f(&mut abilities, self);
        self.abilities = abilities;
        result
    }

    // -- lifecycle hooks ----------------------------------------------------

    pub(crate) fn setup(&mut self) {
        self.with_abilities(|abilities, agent| {
            for ability in abilities.iter_mut() {
                ability.as_dyn_mut().setup(agent);
            }
        });
    }

    pub(crate) fn initialize(
        &mut self,
        position: Vec2Fixed,
        rotation: Vec2Fixed,
        ctx: &mut TickContext<'_>,
    ) {
        self.live = true;
        self.tag = AgentTag::None;
        self.anim = AnimState::Idle;
        self.visual = VisualState::default();
        self.body = Body::new(position, rotation, self.body.radius, self.stats.base_priority);
        if let Some(mover) = self.mover.as_mut() {
            mover.reset();
        }
        if let Some(turner) = self.turner.as_mut() {
            turner.reset();
        }
        if let Some(structure) = self.structure.as_mut() {
            structure.reset();
        }
        self.with_abilities(|abilities, agent| {
            for ability in abilities.iter_mut() {
                ability.as_dyn_mut().initialize(agent, ctx);
            }
        });
    }

    pub(crate) fn simulate(&mut self, ctx: &mut TickContext<'_>) {
        let arrived = match self.mover.as_mut() {
            Some(mover) => mover.step(&mut self.body, ctx.delta),
            None => false,
        };
        if let Some(turner) = self.turner.as_mut() {
            turner.step(&mut self.body);
        }
        if self.mover.as_ref().is_some_and(Mover::is_moving) {
            self.anim = AnimState::Moving;
        } else if self.anim == AnimState::Moving {
            self.anim = AnimState::Idle;
        }

        self.with_abilities(|abilities, agent| {
            if arrived {
                for ability in abilities.iter_mut() {
                    ability.as_dyn_mut().on_arrive(agent);
                }
            }
            for ability in abilities.iter_mut() {
                ability.as_dyn_mut().simulate(agent, ctx);
            }
        });
    }

    pub(crate) fn late_simulate(&mut self) {
        self.body.late_simulate();
    }

    pub(crate) fn visualize(&mut self) {
        self.visual.position = self.body.position;
        self.visual.rotation = self.body.rotation;
    }

    pub(crate) fn late_visualize(&mut self) {
        self.visual.anim = self.anim;
    }

    /// Route an action to the first ability that accepts it, stopping every
    /// other ability that is mid-cast. `Stop` halts them all.
    pub(crate) fn execute(&mut self, action: &CommandAction, ctx: &mut TickContext<'_>) {
        self.with_abilities(|abilities, agent| {
            let chosen = abilities.iter().position(|a| a.as_dyn().accepts(action));
            for (index, ability) in abilities.iter_mut().enumerate() {
                if Some(index) != chosen && ability.as_dyn().is_casting() {
                    ability.as_dyn_mut().stop_cast(agent, ctx);
                }
            }
            match chosen {
                Some(index) => abilities[index].as_dyn_mut().execute(agent, ctx, action),
                None if matches!(action, CommandAction::Stop) => {
                    if let Some(mover) = agent.mover.as_mut() {
                        mover.stop_move();
                    }
                }
                None => warn!(agent = %agent.handle, ?action, "no ability accepts action"),
            }
        });
    }

    /// Group callback: hand `project` to the Construct ability.
    pub(crate) fn assign_construct_project(&mut self, project: AgentHandle, project_radius: Fixed) {
        self.with_abilities(|abilities, agent| {
            for ability in abilities.iter_mut() {
                if let Some(construct) = ability.as_construct_mut() {
                    construct.on_group_processed(agent, project, project_radius);
                }
            }
        });
    }

    pub(crate) fn deactivate(&mut self, immediate: bool, ctx: &mut TickContext<'_>) {
        self.with_abilities(|abilities, agent| {
            for ability in abilities.iter_mut() {
                ability.as_dyn_mut().deactivate(agent, ctx);
            }
        });
        if let Some(mover) = self.mover.as_mut() {
            mover.stop_move();
        }
        if let Some(turner) = self.turner.as_mut() {
            turner.stop_turn();
        }
        if immediate {
            self.live = false;
        }
    }

    pub(crate) fn end_life(&mut self) {
        self.live = false;
        self.tag = AgentTag::None;
    }

    // -- persistence --------------------------------------------------------

    pub(crate) fn save_abilities(&self, agents: &AgentRegistry) -> BTreeMap<String, FieldMap> {
        self.abilities
            .iter()
            .map(|a| {
                let ability = a.as_dyn();
                (ability.name().to_owned(), ability.save(self, agents))
            })
            .collect()
    }

    pub(crate) fn load_abilities(
        &mut self,
        saved: &BTreeMap<String, FieldMap>,
    ) -> Result<(), CoreError> {
        for name in saved.keys() {
            if !self.abilities.iter().any(|a| a.as_dyn().name() == name) {
                warn!(agent = %self.handle, ability = %name, "saved ability not present on agent, ignoring");
            }
        }
        for ability in self.abilities.iter_mut() {
            let ability = ability.as_dyn_mut();
            if let Some(fields) = saved.get(ability.name()) {
                ability.load(fields)?;
            }
        }
        Ok(())
    }
}
