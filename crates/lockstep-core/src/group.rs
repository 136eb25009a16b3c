//! Construct groups: a shared queue of projects worked by a set of builders.
//!
//! A `Construct` command creates one group holding the commanded projects in
//! order. Every builder that accepts the command joins the most recently
//! created group. At the start of each simulate phase the world walks the
//! groups: finished or stale projects are dropped from the front of the
//! queue, the front project is handed to every member whose own project is
//! missing, finished or gone, and groups without members dissolve.

use crate::entity::AgentHandle;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone)]
pub struct ConstructGroup {
    id: GroupId,
    members: Vec<AgentHandle>,
    queue: VecDeque<AgentHandle>,
}

impl ConstructGroup {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn members(&self) -> &[AgentHandle] {
        &self.members
    }

    pub fn front(&self) -> Option<AgentHandle> {
        self.queue.front().copied()
    }

    pub fn queue(&self) -> impl Iterator<Item = AgentHandle> + '_ {
        self.queue.iter().copied()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

#[derive(Debug, Default)]
pub struct ConstructGroups {
    groups: BTreeMap<GroupId, ConstructGroup>,
    next_id: u32,
    last_created: Option<GroupId>,
}

impl ConstructGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group over `projects` and make it the last-created group.
    pub fn create(&mut self, projects: impl IntoIterator<Item = AgentHandle>) -> GroupId {
        let id = GroupId(self.next_id);
        self.next_id += 1;
        self.groups.insert(
            id,
            ConstructGroup {
                id,
                members: Vec::new(),
                queue: projects.into_iter().collect(),
            },
        );
        self.last_created = Some(id);
        id
    }

    /// The group the latest `Construct` command created, if it still exists.
    pub fn last_created(&self) -> Option<GroupId> {
        self.last_created.filter(|id| self.groups.contains_key(id))
    }

    pub(crate) fn clear_last_created(&mut self) {
        self.last_created = None;
    }

    pub fn get(&self, id: GroupId) -> Option<&ConstructGroup> {
        self.groups.get(&id)
    }

    pub fn ids(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Remaining projects in a group. Missing groups count as empty.
    pub fn queue_len(&self, id: GroupId) -> usize {
        self.groups.get(&id).map_or(0, ConstructGroup::queue_len)
    }

    pub fn add_member(&mut self, id: GroupId, agent: AgentHandle) -> bool {
        match self.groups.get_mut(&id) {
            Some(group) => {
                if !group.members.contains(&agent) {
                    group.members.push(agent);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&mut self, id: GroupId, agent: AgentHandle) {
        if let Some(group) = self.groups.get_mut(&id) {
            group.members.retain(|&m| m != agent);
        }
    }

    pub(crate) fn pop_front(&mut self, id: GroupId) -> Option<AgentHandle> {
        self.groups.get_mut(&id)?.queue.pop_front()
    }

    pub(crate) fn dissolve(&mut self, id: GroupId) {
        self.groups.remove(&id);
        if self.last_created == Some(id) {
            self.last_created = None;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.groups.clear();
        self.last_created = None;
    }
}
