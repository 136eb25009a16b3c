//! Lockstep Core -- deterministic simulation core for lockstep RTS games.
//!
//! Every peer in a lockstep session runs the same [`World`](world::World)
//! over the same command stream and must arrive at bit-identical state. This
//! crate provides the pieces that make that possible:
//!
//! - fixed-point math ([`math`]) instead of floats;
//! - an agent registry with stack-allocated global and per-controller local
//!   IDs, deferred teardown, pooling and a state digest ([`registry`]);
//! - a fixed phase order per tick ([`world`]);
//! - command routing onto controllers' agents ([`command`]);
//! - the Construct ability ([`ability::construct`]).
//!
//! # Quick Start
//!
//! ```
//! use lockstep_core::prelude::*;
//!
//! let catalog = AgentCatalog::from_json(r#"{
//!     "worker": {
//!         "kind": "unit",
//!         "action_range": "2",
//!         "mover": { "speed": "4" },
//!         "construct": {}
//!     },
//!     "site": { "kind": "structure", "structure": { "max_build_points": "1" } }
//! }"#).unwrap();
//!
//! let mut world = World::new(catalog, WorldConfig::default());
//! let red = world.create_controller("red", Allegiance::Enemy).unwrap();
//! world.create_agent_facing_right(red, "worker", Vec2Fixed::ZERO).unwrap();
//! let site = world
//!     .create_agent_facing_right(red, "site", Vec2Fixed::from_num(1, 0))
//!     .unwrap();
//!
//! let site_id = world.agent(site).unwrap().global_id().unwrap();
//! let build = Command::new(red, CommandAction::Construct { projects: vec![site_id] })
//!     .with_selection([0]);
//! world.execute(&build).unwrap();
//! for _ in 0..64 {
//!     world.advance();
//! }
//!
//! let structure = world.agent(site).unwrap().structure.as_ref().unwrap();
//! assert!(!structure.needs_construction());
//! ```
//!
//! Nothing in this crate reads the clock, iterates a hash map or draws from
//! an unseeded RNG. All ordering comes from IDs, `Vec`s and `BTreeMap`s, and
//! the only randomness is the world's seeded PCG stream.

#![deny(unsafe_code)]

pub mod ability;
pub mod agent;
pub mod catalog;
pub mod command;
pub mod controller;
pub mod entity;
pub mod event;
pub mod group;
pub mod math;
pub mod movement;
pub mod persist;
pub mod registry;
pub mod structure;
pub mod timer;
pub mod world;

use std::fmt;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Which ID space ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    /// A controller's local IDs.
    Local,
    /// The world's global IDs.
    Global,
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpace::Local => f.write_str("local"),
            IdSpace::Global => f.write_str("global"),
        }
    }
}

/// Errors produced by simulation operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An agent code that the catalog does not know.
    #[error("unknown agent code '{code}'. Known codes: [{known}]")]
    UnknownAgentCode { code: String, known: String },

    /// A controller index past the end of the controller list.
    #[error("controller #{id} does not exist ({count} controllers)")]
    UnknownController { id: u8, count: usize },

    /// An ID stack has nothing left to hand out.
    #[error("{space} agent IDs exhausted (capacity {capacity})")]
    CapacityExhausted { space: IdSpace, capacity: usize },

    #[error("controller limit of {max} reached")]
    TooManyControllers { max: usize },

    /// The handle's slot was reused or freed.
    #[error("agent {agent} is stale or was never created")]
    StaleAgent { agent: entity::AgentHandle },

    /// A saved ability field has the wrong shape.
    #[error("failed to load field '{field}' of ability '{ability}': {details}")]
    Persistence {
        ability: String,
        field: String,
        details: String,
    },

    #[error("invalid agent catalog: {details}")]
    InvalidCatalog { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::ability::construct::Construct;
    pub use crate::ability::{Ability, AbilityKind};
    pub use crate::agent::{Agent, AgentTag, AnimState, Body};
    pub use crate::catalog::{AgentCatalog, AgentCodeId, AgentKind, AgentTemplate};
    pub use crate::command::{Command, CommandAction, Directive, Selection};
    pub use crate::controller::{Allegiance, Controller, ControllerId};
    pub use crate::entity::{AgentHandle, GlobalId, LocalId};
    pub use crate::event::{EventQueue, SimEvent};
    pub use crate::group::{ConstructGroup, ConstructGroups, GroupId};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::persist::AgentSave;
    pub use crate::registry::AgentRegistry;
    pub use crate::world::{TickContext, World, WorldConfig};
    pub use crate::{CoreError, IdSpace};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
