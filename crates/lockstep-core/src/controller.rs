//! Controllers: the players (human, AI or neutral) that own agents.
//!
//! Each controller keeps its own local-ID space. Commands name agents by
//! local ID, so a controller's local table is what the command router
//! consults. Diplomacy between controllers is a dense allegiance table that
//! is updated whenever a controller joins.

use crate::command::Selection;
use crate::entity::{AgentHandle, IdStack, LocalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Upper bound on agents per controller, and the size of each local table.
pub const MAX_AGENTS: usize = 16_384;

/// Upper bound on controllers per world.
pub const MAX_CONTROLLERS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControllerId(pub u8);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

/// How one controller regards another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Allegiance {
    Friendly,
    #[default]
    Neutral,
    Enemy,
}

#[derive(Debug)]
pub struct Controller {
    id: ControllerId,
    name: String,
    default_allegiance: Allegiance,
    diplomacy: Vec<Allegiance>,
    local_agents: Box<[Option<AgentHandle>]>,
    local_active: Box<[bool]>,
    open_local_ids: IdStack,
    previous_selection: Selection,
    /// Agents picked by the player. Presentation state only; commands carry
    /// their own selection.
    selected_agents: BTreeSet<AgentHandle>,
}

impl Controller {
    pub(crate) fn new(id: ControllerId, name: &str, default_allegiance: Allegiance) -> Self {
        Self {
            id,
            name: name.to_owned(),
            default_allegiance,
            diplomacy: Vec::new(),
            local_agents: vec![None; MAX_AGENTS].into_boxed_slice(),
            local_active: vec![false; MAX_AGENTS].into_boxed_slice(),
            open_local_ids: IdStack::with_capacity(MAX_AGENTS as u32),
            previous_selection: Selection::default(),
            selected_agents: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_allegiance(&self) -> Allegiance {
        self.default_allegiance
    }

    /// How this controller regards `other`. Unknown controllers are neutral.
    pub fn allegiance(&self, other: ControllerId) -> Allegiance {
        self.diplomacy
            .get(other.0 as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_allegiance(&mut self, other: ControllerId, allegiance: Allegiance) {
        let index = other.0 as usize;
        if self.diplomacy.len() <= index {
            self.diplomacy.resize(index + 1, Allegiance::Neutral);
        }
        self.diplomacy[index] = allegiance;
    }

    /// The agent holding `local_id`, if that ID is currently active.
    pub fn agent(&self, local_id: LocalId) -> Option<AgentHandle> {
        let index = local_id as usize;
        if *self.local_active.get(index)? {
            self.local_agents[index]
        } else {
            None
        }
    }

    pub fn is_local_active(&self, local_id: LocalId) -> bool {
        self.local_active
            .get(local_id as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Number of agents this controller currently owns.
    pub fn agent_count(&self) -> usize {
        self.open_local_ids.in_use()
    }

    /// Active local IDs in ascending order.
    pub fn active_local_ids(&self) -> impl Iterator<Item = LocalId> + '_ {
        (0..self.open_local_ids.peak())
            .filter(|&id| self.local_active[id as usize])
            .map(|id| id as LocalId)
    }

    /// The selection the last command from this controller acted on.
    pub fn previous_selection(&self) -> &Selection {
        &self.previous_selection
    }

    pub(crate) fn set_previous_selection(&mut self, selection: Selection) {
        self.previous_selection = selection;
    }

    /// Add one of this controller's agents to the selected set. Returns
    /// false if the agent is not owned by this controller or already
    /// selected.
    pub fn add_to_selection(&mut self, agent: AgentHandle) -> bool {
        let owned = self.local_agents.iter().any(|&a| a == Some(agent));
        owned && self.selected_agents.insert(agent)
    }

    pub fn remove_from_selection(&mut self, agent: AgentHandle) -> bool {
        self.selected_agents.remove(&agent)
    }

    pub fn clear_selection(&mut self) {
        self.selected_agents.clear();
    }

    /// Selected agents in handle order.
    pub fn selected_agents(&self) -> impl Iterator<Item = AgentHandle> + '_ {
        self.selected_agents.iter().copied()
    }

    pub(crate) fn can_allocate(&self) -> bool {
        self.open_local_ids.can_generate()
    }

    pub(crate) fn generate_local_id(&mut self) -> Option<LocalId> {
        self.open_local_ids.generate()
    }

    pub(crate) fn bind(&mut self, local_id: LocalId, agent: AgentHandle) {
        self.local_agents[local_id as usize] = Some(agent);
        self.local_active[local_id as usize] = true;
    }

    pub(crate) fn release(&mut self, local_id: LocalId) {
        let index = local_id as usize;
        if let Some(agent) = self.local_agents[index].take() {
            self.selected_agents.remove(&agent);
        }
        self.local_active[index] = false;
        self.open_local_ids.release(local_id);
    }

    pub(crate) fn clear_agents(&mut self) {
        self.local_agents.fill(None);
        self.local_active.fill(false);
        self.open_local_ids.clear();
        self.previous_selection = Selection::default();
        self.selected_agents.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
