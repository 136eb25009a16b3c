//! Abilities: the behaviours an agent can be commanded to perform.
//!
//! Every ability implements [`Ability`], a set of explicit lifecycle hooks
//! called by its owning [`Agent`]. Agents store abilities as the closed enum
//! [`AbilityKind`] and dispatch through [`AbilityKind::as_dyn_mut`].
//!
//! While a hook runs, the ability list is moved out of the agent. The hook
//! therefore gets the owning agent and the [`TickContext`] (registry, groups,
//! events, RNG) mutably at the same time.

pub mod construct;

use crate::agent::Agent;
use crate::catalog::AgentTemplate;
use crate::command::CommandAction;
use crate::persist::FieldMap;
use crate::registry::AgentRegistry;
use crate::world::TickContext;
use crate::CoreError;

use construct::Construct;

pub trait Ability {
    /// Key under which the ability's fields are persisted.
    fn name(&self) -> &'static str;

    /// Once per agent object, right after it is built from its template.
    fn setup(&mut self, _agent: &mut Agent) {}

    /// Every time the agent enters the world, fresh or reused from a pool.
    fn initialize(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>);

    fn simulate(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>);

    fn accepts(&self, action: &CommandAction) -> bool;

    fn execute(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>, action: &CommandAction);

    /// The agent's mover reached its destination this tick.
    fn on_arrive(&mut self, _agent: &mut Agent) {}

    fn is_casting(&self) -> bool;

    fn stop_cast(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>);

    fn deactivate(&mut self, agent: &mut Agent, ctx: &mut TickContext<'_>);

    fn save(&self, agent: &Agent, agents: &AgentRegistry) -> FieldMap;

    /// Restore persisted fields. Must leave the ability untouched on error.
    fn load(&mut self, fields: &FieldMap) -> Result<(), CoreError>;
}

#[derive(Debug, Clone)]
pub enum AbilityKind {
    Construct(Construct),
}

impl AbilityKind {
    /// The abilities an agent built from `template` carries, in hook order.
    pub(crate) fn for_template(template: &AgentTemplate) -> Vec<AbilityKind> {
        let mut abilities = Vec::new();
        if let Some(config) = &template.construct {
            abilities.push(AbilityKind::Construct(Construct::new(config.clone())));
        }
        abilities
    }

    pub fn as_dyn(&self) -> &dyn Ability {
        match self {
            AbilityKind::Construct(c) => c,
        }
    }

    pub fn as_dyn_mut(&mut self) -> &mut dyn Ability {
        match self {
            AbilityKind::Construct(c) => c,
        }
    }

    pub fn as_construct(&self) -> Option<&Construct> {
        match self {
            AbilityKind::Construct(c) => Some(c),
        }
    }

    pub fn as_construct_mut(&mut self) -> Option<&mut Construct> {
        match self {
            AbilityKind::Construct(c) => Some(c),
        }
    }
}
