//! The agent registry: slot arena, ID tables, pools and the state digest.
//!
//! Agents live in an arena of slots addressed by [`AgentHandle`]. On top of
//! the arena the registry keeps the two ID spaces the simulation reasons
//! about:
//!
//! - a **global** table (`global_active` / `global_agents`) shared by every
//!   controller, scanned in ascending global-ID order up to the peak by each
//!   phase of the tick;
//! - a **local** table per [`Controller`], addressed by commands.
//!
//! Both tables are fixed-size and allocated once. IDs come from [`IdStack`]s,
//! so which ID an agent receives depends only on the allocate/release
//! history, never on memory layout.
//!
//! Teardown is deferred: [`AgentRegistry::request_deactivate`] only records
//! the request. The world drains the buffer once per tick after
//! `late_simulate`.

use crate::agent::Agent;
use crate::catalog::AgentCodeId;
use crate::controller::{Allegiance, Controller, ControllerId, MAX_AGENTS, MAX_CONTROLLERS};
use crate::entity::{AgentHandle, GlobalId, IdStack, LocalId};
use crate::{CoreError, IdSpace};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Size of the global ID space.
pub const MAX_GLOBAL_AGENTS: usize = MAX_AGENTS * 4;

/// Type index of agents whose code is not pooled.
pub const UNREGISTERED_TYPE_INDEX: u16 = u16::MAX;

const DIGEST_SEED: i32 = 33;

/// A buffered teardown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactivationRequest {
    pub agent: AgentHandle,
    pub immediate: bool,
}

#[derive(Debug, Default)]
struct TypeRoster {
    slots: Vec<u32>,
    active: Vec<bool>,
}

#[derive(Debug, Clone, Copy)]
struct Dying {
    slot: u32,
    remaining: u32,
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AgentRegistry {
    slots: Vec<Option<Agent>>,
    versions: Vec<u32>,
    free_slots: Vec<u32>,
    global_active: Box<[bool]>,
    global_agents: Box<[Option<u32>]>,
    open_global_ids: IdStack,
    controllers: Vec<Controller>,
    deactivation_buffer: Vec<DeactivationRequest>,
    pools: BTreeMap<AgentCodeId, Vec<u32>>,
    rosters: BTreeMap<AgentCodeId, TypeRoster>,
    dying: Vec<Dying>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            versions: Vec::new(),
            free_slots: Vec::new(),
            global_active: vec![false; MAX_GLOBAL_AGENTS].into_boxed_slice(),
            global_agents: vec![None; MAX_GLOBAL_AGENTS].into_boxed_slice(),
            open_global_ids: IdStack::with_capacity(MAX_GLOBAL_AGENTS as u32),
            controllers: Vec::new(),
            deactivation_buffer: Vec::new(),
            pools: BTreeMap::new(),
            rosters: BTreeMap::new(),
            dying: Vec::new(),
        }
    }

    // -- controllers --------------------------------------------------------

    /// Add a controller and fold it into the diplomacy table.
    ///
    /// Existing controllers regard the newcomer with their own default
    /// allegiance. The newcomer regards each existing controller as neutral
    /// if that controller defaults to neutral, and with its own default
    /// otherwise. A controller is always friendly to itself.
    pub fn create_controller(
        &mut self,
        name: &str,
        default_allegiance: Allegiance,
    ) -> Result<ControllerId, CoreError> {
        if self.controllers.len() >= MAX_CONTROLLERS {
            return Err(CoreError::TooManyControllers {
                max: MAX_CONTROLLERS,
            });
        }
        let id = ControllerId(self.controllers.len() as u8);
        let mut controller = Controller::new(id, name, default_allegiance);
        for other in self.controllers.iter_mut() {
            other.set_allegiance(id, other.default_allegiance());
            let toward_other = if other.default_allegiance() == Allegiance::Neutral {
                Allegiance::Neutral
            } else {
                default_allegiance
            };
            controller.set_allegiance(other.id(), toward_other);
        }
        controller.set_allegiance(id, Allegiance::Friendly);
        self.controllers.push(controller);
        info!(controller = %id, name, ?default_allegiance, "controller created");
        Ok(id)
    }

    pub fn controller(&self, id: ControllerId) -> Result<&Controller, CoreError> {
        self.controllers
            .get(id.0 as usize)
            .ok_or(CoreError::UnknownController {
                id: id.0,
                count: self.controllers.len(),
            })
    }

    pub fn controller_mut(&mut self, id: ControllerId) -> Result<&mut Controller, CoreError> {
        let count = self.controllers.len();
        self.controllers
            .get_mut(id.0 as usize)
            .ok_or(CoreError::UnknownController { id: id.0, count })
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    /// How `from` regards `to`.
    pub fn allegiance(&self, from: ControllerId, to: ControllerId) -> Result<Allegiance, CoreError> {
        Ok(self.controller(from)?.allegiance(to))
    }

    // -- lookups ------------------------------------------------------------

    fn slot_of(&self, handle: AgentHandle) -> Option<usize> {
        let slot = handle.slot() as usize;
        (self.versions.get(slot) == Some(&handle.version()) && self.slots[slot].is_some())
            .then_some(slot)
    }

    /// The agent behind `handle`, if it is current and active.
    pub fn get(&self, handle: AgentHandle) -> Option<&Agent> {
        let slot = self.slot_of(handle)?;
        self.slots[slot].as_ref().filter(|a| a.is_active())
    }

    pub fn get_mut(&mut self, handle: AgentHandle) -> Option<&mut Agent> {
        let slot = self.slot_of(handle)?;
        self.slots[slot].as_mut().filter(|a| a.is_active())
    }

    /// The agent behind `handle` even if it is not active (dying, parked or
    /// orphaned), as long as the handle is current.
    pub fn get_any(&self, handle: AgentHandle) -> Option<&Agent> {
        let slot = self.slot_of(handle)?;
        self.slots[slot].as_ref()
    }

    pub fn is_active(&self, handle: AgentHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn handle_for_global_id(&self, global_id: GlobalId) -> Option<AgentHandle> {
        let index = global_id as usize;
        if !self.global_active[index] {
            return None;
        }
        let slot = self.global_agents[index]?;
        Some(AgentHandle::new(slot, self.versions[slot as usize]))
    }

    pub fn try_get_by_global_id(&self, global_id: GlobalId) -> Option<&Agent> {
        self.get(self.handle_for_global_id(global_id)?)
    }

    pub fn get_by_local(&self, controller: ControllerId, local_id: LocalId) -> Option<&Agent> {
        let handle = self.controllers.get(controller.0 as usize)?.agent(local_id)?;
        self.get(handle)
    }

    /// One past the highest global ID ever issued this session.
    pub fn peak_global_id(&self) -> usize {
        self.open_global_ids.peak() as usize
    }

    pub fn active_count(&self) -> usize {
        self.open_global_ids.in_use()
    }

    /// Handles of every active agent, in global-ID order.
    pub fn active_handles(&self) -> Vec<AgentHandle> {
        (0..self.peak_global_id())
            .filter_map(|global_id| self.handle_for_global_id(global_id as GlobalId))
            .collect()
    }

    /// Parked agents available for reuse under `code`.
    pub fn pool_len(&self, code: AgentCodeId) -> usize {
        self.pools.get(&code).map_or(0, Vec::len)
    }

    /// Agent objects ever built for `code` under pooling.
    pub fn roster_len(&self, code: AgentCodeId) -> usize {
        self.rosters.get(&code).map_or(0, |r| r.slots.len())
    }

    /// Pooled agents of `code` currently in play.
    pub fn type_active_count(&self, code: AgentCodeId) -> usize {
        self.rosters
            .get(&code)
            .map_or(0, |r| r.active.iter().filter(|&&a| a).count())
    }

    /// Agents lingering in their death animation.
    pub fn dying_count(&self) -> usize {
        self.dying.len()
    }

    // -- state digest -------------------------------------------------------

    /// Fold every active agent's transform into one checksum.
    ///
    /// Agents are visited in global-ID order. The combining operator cycles
    /// XOR, wrapping add; the third arm (XOR with thrice the value) belongs to
    /// the checksum definition even though the two-step cycle never reaches
    /// it.
    pub fn state_digest(&self) -> i32 {
        let mut hash = DIGEST_SEED;
        let mut toggle = 0u8;
        for global_id in 0..self.peak_global_id() {
            if !self.global_active[global_id] {
                continue;
            }
            let Some(agent) = self.global_agents[global_id]
                .and_then(|slot| self.slots[slot as usize].as_ref())
            else {
                continue;
            };
            let n1 = agent
                .body
                .position
                .state_hash()
                .wrapping_add(agent.body.rotation.state_hash());
            match toggle {
                0 => hash ^= n1,
                1 => hash = hash.wrapping_add(n1),
                _ => hash ^= n1.wrapping_mul(3),
            }
            toggle += 1;
            if toggle == 2 {
                toggle = 0;
            }
        }
        hash
    }

    // -- deactivation -------------------------------------------------------

    /// Queue a teardown. Never fails and changes nothing until the world
    /// processes the buffer.
    pub fn request_deactivate(&mut self, agent: AgentHandle, immediate: bool) {
        self.deactivation_buffer
            .push(DeactivationRequest { agent, immediate });
    }

    pub fn pending_deactivations(&self) -> &[DeactivationRequest] {
        &self.deactivation_buffer
    }

    pub(crate) fn take_deactivations(&mut self) -> Vec<DeactivationRequest> {
        std::mem::take(&mut self.deactivation_buffer)
    }

    /// Hand back a drained buffer so its allocation is reused.
    pub(crate) fn return_deactivation_buffer(&mut self, mut buffer: Vec<DeactivationRequest>) {
        if self.deactivation_buffer.is_empty() {
            buffer.clear();
            self.deactivation_buffer = buffer;
        }
    }

    // -- ownership ----------------------------------------------------------

    /// Move an agent to another controller, or orphan it with `None`.
    ///
    /// The old local and global IDs go back on their stacks first, then fresh
    /// IDs are drawn under the new controller. Because the global stack is
    /// LIFO, a transfer hands the agent back the global ID it just released.
    /// An orphaned agent keeps its slot and handle but takes no part in the
    /// tick until it is given a controller again. Agents that were torn down
    /// (dying, parked or discarded) are reported as stale.
    pub fn change_ownership(
        &mut self,
        handle: AgentHandle,
        new_controller: Option<ControllerId>,
    ) -> Result<(), CoreError> {
        let slot = self
            .slot_of(handle)
            .filter(|&slot| !self.dying.iter().any(|d| d.slot as usize == slot))
            .ok_or(CoreError::StaleAgent { agent: handle })?;
        let current = self.slots[slot].as_ref().and_then(Agent::controller);
        if let Some(target) = new_controller {
            let controller = self.controller(target)?;
            if current != Some(target) && !controller.can_allocate() {
                return Err(CoreError::CapacityExhausted {
                    space: IdSpace::Local,
                    capacity: MAX_AGENTS,
                });
            }
            if current.is_none() && !self.open_global_ids.can_generate() {
                return Err(CoreError::CapacityExhausted {
                    space: IdSpace::Global,
                    capacity: MAX_GLOBAL_AGENTS,
                });
            }
        }

        self.release_ownership(slot as u32);
        if let Some(target) = new_controller {
            self.add_to_controller(slot as u32, target)?;
        }
        debug!(agent = %handle, from = ?current, to = ?new_controller, "ownership changed");
        Ok(())
    }

    /// Fails with [`CoreError::CapacityExhausted`] if `controller` could not
    /// take one more agent right now.
    pub(crate) fn check_capacity(&self, controller: ControllerId) -> Result<(), CoreError> {
        if !self.controller(controller)?.can_allocate() {
            return Err(CoreError::CapacityExhausted {
                space: IdSpace::Local,
                capacity: MAX_AGENTS,
            });
        }
        if !self.open_global_ids.can_generate() {
            return Err(CoreError::CapacityExhausted {
                space: IdSpace::Global,
                capacity: MAX_GLOBAL_AGENTS,
            });
        }
        Ok(())
    }

    /// Draw a local ID then a global ID for the agent in `slot` and bind it
    /// into both tables. Capacity is checked before anything changes.
    pub(crate) fn add_to_controller(
        &mut self,
        slot: u32,
        controller: ControllerId,
    ) -> Result<(LocalId, GlobalId), CoreError> {
        self.check_capacity(controller)?;
        let handle = AgentHandle::new(slot, self.versions[slot as usize]);
        let owner = &mut self.controllers[controller.0 as usize];
        let local_id = owner.generate_local_id().ok_or(CoreError::CapacityExhausted {
            space: IdSpace::Local,
            capacity: MAX_AGENTS,
        })?;
        let global_id = self
            .open_global_ids
            .generate()
            .ok_or(CoreError::CapacityExhausted {
                space: IdSpace::Global,
                capacity: MAX_GLOBAL_AGENTS,
            })?;
        owner.bind(local_id, handle);
        self.global_active[global_id as usize] = true;
        self.global_agents[global_id as usize] = Some(slot);
        if let Some(agent) = self.slots[slot as usize].as_mut() {
            agent.set_ownership(Some((controller, local_id, global_id)));
        }
        Ok((local_id, global_id))
    }

    /// Reverse of [`add_to_controller`](Self::add_to_controller). A no-op for
    /// agents that own no IDs.
    pub(crate) fn release_ownership(&mut self, slot: u32) {
        let Some(agent) = self.slots[slot as usize].as_mut() else {
            return;
        };
        let (Some(controller), Some(local_id), Some(global_id)) =
            (agent.controller(), agent.local_id(), agent.global_id())
        else {
            return;
        };
        agent.set_ownership(None);
        self.controllers[controller.0 as usize].release(local_id);
        self.global_active[global_id as usize] = false;
        self.global_agents[global_id as usize] = None;
        self.open_global_ids.release(global_id);
    }

    // -- slots, pools and rosters --------------------------------------------

    /// Place a freshly built agent into a slot and return its handle.
    pub(crate) fn instantiate(&mut self, mut agent: Agent, pooled: bool) -> AgentHandle {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.versions.push(0);
                (self.slots.len() - 1) as u32
            }
        };
        let handle = AgentHandle::new(slot, self.versions[slot as usize]);
        agent.set_handle(handle);
        if pooled {
            let roster = self.rosters.entry(agent.code()).or_default();
            let type_index = roster.slots.len() as u16;
            roster.slots.push(slot);
            roster.active.push(true);
            agent.set_type_index(type_index);
        }
        self.slots[slot as usize] = Some(agent);
        handle
    }

    /// Reuse a parked agent of `code` under the spawn version it was parked
    /// with.
    pub(crate) fn unpark(&mut self, code: AgentCodeId) -> Option<AgentHandle> {
        let slot = self.pools.get_mut(&code)?.pop()?;
        let handle = AgentHandle::new(slot, self.versions[slot as usize]);
        let agent = self.slots[slot as usize].as_mut()?;
        agent.set_handle(handle);
        self.set_type_active(slot, true);
        Some(handle)
    }

    /// Keep the agent in `slot` for reuse. Its spawn version is bumped here,
    /// so handles from the life that just ended go stale at once.
    pub(crate) fn park(&mut self, slot: u32) {
        let Some(agent) = self.slots[slot as usize].as_ref() else {
            return;
        };
        self.pools.entry(agent.code()).or_default().push(slot);
        let version = &mut self.versions[slot as usize];
        *version = version.wrapping_add(1);
    }

    /// Drop the agent in `slot` for good. Outstanding handles go stale.
    pub(crate) fn discard(&mut self, slot: u32) {
        self.slots[slot as usize] = None;
        let version = &mut self.versions[slot as usize];
        *version = version.wrapping_add(1);
        self.free_slots.push(slot);
    }

    pub(crate) fn set_type_active(&mut self, slot: u32, active: bool) {
        let Some(agent) = self.slots[slot as usize].as_ref() else {
            return;
        };
        let type_index = agent.type_index();
        if type_index == UNREGISTERED_TYPE_INDEX {
            return;
        }
        if let Some(flag) = self
            .rosters
            .get_mut(&agent.code())
            .and_then(|r| r.active.get_mut(type_index as usize))
        {
            *flag = active;
        }
    }

    /// Slot of the agent currently bound to `global_id`.
    pub(crate) fn active_slot(&self, global_id: usize) -> Option<u32> {
        if self.global_active[global_id] {
            self.global_agents[global_id]
        } else {
            None
        }
    }

    /// Slot of `handle` if it is current and its agent is active.
    pub(crate) fn active_slot_of(&self, handle: AgentHandle) -> Option<u32> {
        let slot = self.slot_of(handle)?;
        self.slots[slot]
            .as_ref()
            .filter(|a| a.is_active())
            .map(|_| slot as u32)
    }

    pub(crate) fn take(&mut self, slot: u32) -> Option<Agent> {
        self.slots.get_mut(slot as usize)?.take()
    }

    pub(crate) fn restore(&mut self, slot: u32, agent: Agent) {
        self.slots[slot as usize] = Some(agent);
    }

    pub(crate) fn slot_agent(&self, slot: u32) -> Option<&Agent> {
        self.slots.get(slot as usize)?.as_ref()
    }

    pub(crate) fn slot_agent_mut(&mut self, slot: u32) -> Option<&mut Agent> {
        self.slots.get_mut(slot as usize)?.as_mut()
    }

    // -- dying agents -------------------------------------------------------

    pub(crate) fn push_dying(&mut self, slot: u32, ticks: u32) {
        self.dying.push(Dying {
            slot,
            remaining: ticks,
        });
    }

    pub(crate) fn dying_slots(&self) -> Vec<u32> {
        self.dying.iter().map(|d| d.slot).collect()
    }

    /// Count down every dying agent and return the slots whose linger ended.
    pub(crate) fn tick_dying(&mut self) -> Vec<u32> {
        let mut expired = Vec::new();
        self.dying.retain_mut(|d| {
            d.remaining = d.remaining.saturating_sub(1);
            if d.remaining == 0 {
                expired.push(d.slot);
                false
            } else {
                true
            }
        });
        expired
    }

    pub(crate) fn take_all_dying(&mut self) -> Vec<u32> {
        self.dying.drain(..).map(|d| d.slot).collect()
    }

    // -- session ------------------------------------------------------------

    /// Forget controllers and the global ID space. Parked agents stay parked.
    pub(crate) fn reset_session(&mut self) {
        self.controllers.clear();
        self.global_active.fill(false);
        self.global_agents.fill(None);
        self.open_global_ids.clear();
        self.deactivation_buffer.clear();
        self.dying.clear();
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AgentKind, AgentTemplate};

    fn unit(registry: &mut AgentRegistry) -> AgentHandle {
        let agent = Agent::from_template(AgentCodeId(0), &AgentTemplate::new(AgentKind::Unit));
        registry.instantiate(agent, true)
    }

    #[test]
    fn diplomacy_follows_defaults() {
        let mut registry = AgentRegistry::new();
        let neutral = registry
            .create_controller("creeps", Allegiance::Neutral)
            .unwrap();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let blue = registry.create_controller("blue", Allegiance::Enemy).unwrap();

        assert_eq!(registry.allegiance(red, red).unwrap(), Allegiance::Friendly);
        assert_eq!(registry.allegiance(red, neutral).unwrap(), Allegiance::Neutral);
        assert_eq!(registry.allegiance(neutral, red).unwrap(), Allegiance::Neutral);
        assert_eq!(registry.allegiance(red, blue).unwrap(), Allegiance::Enemy);
        assert_eq!(registry.allegiance(blue, red).unwrap(), Allegiance::Enemy);
    }

    #[test]
    fn controller_limit_is_enforced() {
        let mut registry = AgentRegistry::new();
        for i in 0..MAX_CONTROLLERS {
            registry
                .create_controller(&format!("c{i}"), Allegiance::Enemy)
                .unwrap();
        }
        let err = registry
            .create_controller("one too many", Allegiance::Enemy)
            .unwrap_err();
        assert!(matches!(err, CoreError::TooManyControllers { max: 256 }));
    }

    #[test]
    fn unknown_controller_is_an_error() {
        let registry = AgentRegistry::new();
        let err = registry.controller(ControllerId(3)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownController { id: 3, count: 0 }));
    }

    #[test]
    fn add_draws_local_then_global_ids() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let blue = registry.create_controller("blue", Allegiance::Enemy).unwrap();

        let a = unit(&mut registry);
        let b = unit(&mut registry);
        assert_eq!(registry.add_to_controller(a.slot(), red).unwrap(), (0, 0));
        assert_eq!(registry.add_to_controller(b.slot(), blue).unwrap(), (0, 1));

        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.peak_global_id(), 2);
        assert_eq!(registry.handle_for_global_id(1), Some(b));
        assert_eq!(registry.get_by_local(blue, 0).unwrap().handle(), b);
        assert_eq!(registry.active_handles(), vec![a, b]);
    }

    #[test]
    fn release_returns_ids_for_lifo_reuse() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let handles: Vec<_> = (0..3).map(|_| unit(&mut registry)).collect();
        for h in &handles {
            registry.add_to_controller(h.slot(), red).unwrap();
        }

        registry.release_ownership(handles[1].slot());
        assert!(!registry.is_active(handles[1]));
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.handle_for_global_id(1), None);

        let fresh = unit(&mut registry);
        assert_eq!(registry.add_to_controller(fresh.slot(), red).unwrap(), (1, 1));
        assert_eq!(registry.peak_global_id(), 3);
    }

    #[test]
    fn transfer_frees_old_local_id() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let blue = registry.create_controller("blue", Allegiance::Enemy).unwrap();
        let a = unit(&mut registry);
        registry.add_to_controller(a.slot(), red).unwrap();

        registry.change_ownership(a, Some(blue)).unwrap();
        let agent = registry.get(a).unwrap();
        assert_eq!(agent.controller(), Some(blue));
        assert_eq!(agent.global_id(), Some(0));
        assert!(registry.get_by_local(red, 0).is_none());
        assert_eq!(registry.get_by_local(blue, 0).unwrap().handle(), a);
        assert_eq!(registry.controller(red).unwrap().agent_count(), 0);
    }

    #[test]
    fn orphaning_frees_both_ids() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let a = unit(&mut registry);
        registry.add_to_controller(a.slot(), red).unwrap();

        registry.change_ownership(a, None).unwrap();
        assert!(!registry.is_active(a));
        assert!(registry.get_any(a).is_some());
        assert_eq!(registry.active_count(), 0);

        let b = unit(&mut registry);
        assert_eq!(registry.add_to_controller(b.slot(), red).unwrap(), (0, 0));

        // The orphan can be adopted again under fresh IDs.
        registry.change_ownership(a, Some(red)).unwrap();
        assert_eq!(registry.get(a).unwrap().global_id(), Some(1));
    }

    #[test]
    fn stale_handle_cannot_change_ownership() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let a = unit(&mut registry);
        registry.discard(a.slot());
        let err = registry.change_ownership(a, Some(red)).unwrap_err();
        assert!(matches!(err, CoreError::StaleAgent { .. }));
    }

    #[test]
    fn reuse_bumps_spawn_version() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let a = unit(&mut registry);
        registry.add_to_controller(a.slot(), red).unwrap();
        registry.release_ownership(a.slot());
        registry.set_type_active(a.slot(), false);
        registry.park(a.slot());
        assert_eq!(registry.pool_len(AgentCodeId(0)), 1);
        assert_eq!(registry.type_active_count(AgentCodeId(0)), 0);
        assert!(registry.get_any(a).is_none());

        let b = registry.unpark(AgentCodeId(0)).unwrap();
        assert_eq!(b.slot(), a.slot());
        assert_eq!(b.version(), a.version() + 1);
        assert_eq!(registry.type_active_count(AgentCodeId(0)), 1);

        registry.add_to_controller(b.slot(), red).unwrap();
        assert!(registry.get(a).is_none());
        assert!(registry.get(b).is_some());
    }

    #[test]
    fn discard_bumps_version_before_the_slot_is_reused() {
        let mut registry = AgentRegistry::new();
        let a = unit(&mut registry);
        registry.discard(a.slot());

        // The old handle is stale while the slot sits empty.
        assert!(registry.get_any(a).is_none());

        let b = unit(&mut registry);
        assert_eq!(b.slot(), a.slot());
        assert_eq!(b.version(), a.version() + 1);
        assert!(registry.get_any(a).is_none());
        assert!(registry.get_any(b).is_some());
    }

    #[test]
    fn dying_agents_cannot_change_ownership() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let a = unit(&mut registry);
        registry.add_to_controller(a.slot(), red).unwrap();
        registry.release_ownership(a.slot());
        registry.push_dying(a.slot(), 5);

        let err = registry.change_ownership(a, Some(red)).unwrap_err();
        assert!(matches!(err, CoreError::StaleAgent { .. }));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn deactivation_requests_are_buffered() {
        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let a = unit(&mut registry);
        registry.add_to_controller(a.slot(), red).unwrap();

        registry.request_deactivate(a, false);
        registry.request_deactivate(a, true);
        assert!(registry.is_active(a));
        assert_eq!(registry.pending_deactivations().len(), 2);
        assert_eq!(registry.take_deactivations().len(), 2);
        assert!(registry.pending_deactivations().is_empty());
    }

    #[test]
    fn empty_registry_digest_is_seed() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.state_digest(), DIGEST_SEED);
    }

    #[test]
    fn digest_alternates_xor_and_add() {
        use crate::math::Vec2Fixed;

        let mut registry = AgentRegistry::new();
        let red = registry.create_controller("red", Allegiance::Enemy).unwrap();
        let positions = [
            Vec2Fixed::from_num(1, 2),
            Vec2Fixed::from_num(-3, 4),
            Vec2Fixed::from_num(5, 0),
        ];
        for position in positions {
            let h = unit(&mut registry);
            registry.add_to_controller(h.slot(), red).unwrap();
            registry.get_mut(h).unwrap().body.position = position;
        }

        let rotation = Vec2Fixed::RIGHT.state_hash();
        let n: Vec<i32> = positions
            .iter()
            .map(|p| p.state_hash().wrapping_add(rotation))
            .collect();
        let mut expected = DIGEST_SEED;
        expected ^= n[0];
        expected = expected.wrapping_add(n[1]);
        expected ^= n[2];
        assert_eq!(registry.state_digest(), expected);
    }

    #[test]
    fn dying_agents_count_down() {
        let mut registry = AgentRegistry::new();
        registry.push_dying(4, 2);
        registry.push_dying(7, 1);
        assert_eq!(registry.tick_dying(), vec![7]);
        assert_eq!(registry.dying_slots(), vec![4]);
        assert_eq!(registry.tick_dying(), vec![4]);
        assert_eq!(registry.dying_count(), 0);
    }
}
