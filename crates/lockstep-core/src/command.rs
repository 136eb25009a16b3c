//! Player commands and their routing onto agents.
//!
//! Commands are the only thing peers exchange. Each names the issuing
//! controller, optionally a new [`Selection`] of that controller's agents,
//! optionally a [`Directive`] singling out one agent, and the
//! [`CommandAction`] to perform. Routing happens at the start of a tick,
//! before any agent simulates:
//!
//! 1. A command that carries a selection different from the controller's
//!    stored one replaces it. A command without one reuses the stored one.
//! 2. The action's behaviour helper runs once per command. For
//!    [`CommandAction::Construct`] that creates a construct group from the
//!    listed projects.
//! 3. The action is delivered to the directive's agent if there is one,
//!    otherwise to every active agent in the selection, in selection order.
//!
//! Unknown or inactive local IDs are skipped with a warning. An unknown
//! controller rejects the whole command before anything changes.

use crate::catalog::AgentKind;
use crate::controller::ControllerId;
use crate::entity::{AgentHandle, GlobalId, LocalId};
use crate::world::World;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Selection / Directive
// ---------------------------------------------------------------------------

/// An ordered, duplicate-free list of local IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    local_ids: Vec<LocalId>,
}

impl Selection {
    /// Build a selection, dropping repeated IDs but keeping first-seen order.
    pub fn new(ids: impl IntoIterator<Item = LocalId>) -> Self {
        let mut local_ids: Vec<LocalId> = Vec::new();
        for id in ids {
            if !local_ids.contains(&id) {
                local_ids.push(id);
            }
        }
        Self { local_ids }
    }

    pub fn local_ids(&self) -> &[LocalId] {
        &self.local_ids
    }

    pub fn len(&self) -> usize {
        self.local_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_ids.is_empty()
    }
}

/// Addresses a single agent of the issuing controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub local_id: LocalId,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandAction {
    /// Build the listed structures, named by global ID, front first.
    Construct { projects: Vec<GlobalId> },
    /// Abandon whatever the agents are doing.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub controller: ControllerId,
    pub selection: Option<Selection>,
    pub directive: Option<Directive>,
    pub action: CommandAction,
}

impl Command {
    pub fn new(controller: ControllerId, action: CommandAction) -> Self {
        Self {
            controller,
            selection: None,
            directive: None,
            action,
        }
    }

    pub fn with_selection(mut self, ids: impl IntoIterator<Item = LocalId>) -> Self {
        self.selection = Some(Selection::new(ids));
        self
    }

    pub fn with_directive(mut self, local_id: LocalId) -> Self {
        self.directive = Some(Directive { local_id });
        self
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

impl World {
    /// Route one command onto the issuing controller's agents.
    pub fn execute(&mut self, command: &Command) -> Result<(), CoreError> {
        let controller = self.registry().controller(command.controller)?;

        let selection = match &command.selection {
            Some(selection) if selection != controller.previous_selection() => {
                let selection = selection.clone();
                self.registry_mut()
                    .controller_mut(command.controller)?
                    .set_previous_selection(selection.clone());
                selection
            }
            Some(selection) => selection.clone(),
            None => controller.previous_selection().clone(),
        };

        self.run_behaviour_helper(&command.action);

        let controller = self.registry().controller(command.controller)?;
        let targets: Vec<AgentHandle> = match command.directive {
            Some(directive) => match controller.agent(directive.local_id) {
                Some(agent) => vec![agent],
                None => {
                    warn!(
                        controller = %command.controller,
                        local_id = directive.local_id,
                        "directive names an inactive agent, skipping"
                    );
                    Vec::new()
                }
            },
            None => selection
                .local_ids()
                .iter()
                .filter_map(|&local_id| {
                    let agent = controller.agent(local_id);
                    if agent.is_none() {
                        warn!(
                            controller = %command.controller,
                            local_id,
                            "selection names an inactive agent, skipping"
                        );
                    }
                    agent
                })
                .collect(),
        };

        debug!(
            controller = %command.controller,
            action = ?command.action,
            agents = targets.len(),
            "routing command"
        );
        for agent in targets {
            self.with_agent(agent, |agent, ctx| agent.execute(&command.action, ctx));
        }
        Ok(())
    }

    fn run_behaviour_helper(&mut self, action: &CommandAction) {
        match action {
            CommandAction::Construct { projects } => {
                let registry = self.registry();
                let resolved: Vec<AgentHandle> = projects
                    .iter()
                    .filter_map(|&global_id| {
                        let handle = registry.handle_for_global_id(global_id)?;
                        let agent = registry.get(handle)?;
                        let buildable = agent.kind() == AgentKind::Structure
                            && agent.structure.as_ref().is_some_and(|s| s.needs_construction());
                        if !buildable {
                            warn!(global_id, "construct project is not an unfinished structure, skipping");
                        }
                        buildable.then_some(handle)
                    })
                    .collect();
                if resolved.is_empty() {
                    warn!("construct command names no buildable project");
                    self.groups_mut().clear_last_created();
                } else {
                    self.groups_mut().create(resolved);
                }
            }
            CommandAction::Stop => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
