//! Agent templates and the catalog that maps agent codes to them.
//!
//! A template describes what an agent *is*: its kind, footprint and which
//! capabilities it carries. Templates are plain data, normally loaded from a
//! JSON document keyed by agent code:
//!
//! ```
//! use lockstep_core::catalog::AgentCatalog;
//!
//! let catalog = AgentCatalog::from_json(r#"{
//!     "worker": {
//!         "kind": "unit",
//!         "radius": "0.5",
//!         "action_range": "2",
//!         "mover": { "speed": "4" },
//!         "construct": { "windup": "0.125" }
//!     },
//!     "barracks": {
//!         "kind": "structure",
//!         "radius": "1",
//!         "structure": { "max_build_points": "10" }
//!     }
//! }"#).unwrap();
//!
//! assert!(catalog.is_valid_code("worker"));
//! assert!(!catalog.is_valid_code("dragon"));
//! ```
//!
//! Codes are assigned [`AgentCodeId`]s in lexicographic order, so two peers
//! loading the same document agree on every ID.

use crate::math::{decimal, Fixed};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dense index of an agent code inside an [`AgentCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentCodeId(pub u16);

/// Broad category of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Unit,
    Structure,
}

// ---------------------------------------------------------------------------
// Capability configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverConfig {
    /// Distance covered per second of simulated time.
    #[serde(with = "decimal")]
    pub speed: Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnerConfig {
    /// Fraction of the remaining turn applied each tick, in `(0, 1]`.
    #[serde(with = "decimal")]
    pub turn_rate: Fixed,
}

/// Facing constraint shared by abilities that act on a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackProfile {
    #[serde(default)]
    pub track_attack_angle: bool,
    /// Maximum |cross(forward, direction)| that still counts as facing.
    #[serde(with = "decimal", default)]
    pub attack_angle: Fixed,
}

/// Tunables of the Construct ability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructConfig {
    /// Build points applied per discharge.
    #[serde(with = "decimal")]
    pub construct_amount: Fixed,
    /// Charge needed for one discharge, in seconds.
    #[serde(with = "decimal")]
    pub construction_speed: Fixed,
    /// Delay between a full charge and the discharge, in seconds.
    #[serde(with = "decimal")]
    pub windup: Fixed,
    /// Raise the builder's movement priority while it is building.
    pub increase_priority: bool,
    /// Agent codes this builder may construct. Informational.
    pub build_actions: Vec<String>,
}

impl Default for ConstructConfig {
    fn default() -> Self {
        Self {
            construct_amount: Fixed::ONE,
            construction_speed: Fixed::ONE,
            windup: Fixed::ZERO,
            increase_priority: true,
            build_actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureConfig {
    #[serde(with = "decimal")]
    pub max_build_points: Fixed,
}

// ---------------------------------------------------------------------------
// AgentTemplate
// ---------------------------------------------------------------------------

fn default_pooled() -> bool {
    true
}

/// Everything needed to instantiate an agent of one code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub kind: AgentKind,
    #[serde(with = "decimal", default)]
    pub radius: Fixed,
    #[serde(default)]
    pub priority: i32,
    #[serde(with = "decimal", default)]
    pub action_range: Fixed,
    #[serde(default)]
    pub mover: Option<MoverConfig>,
    #[serde(default)]
    pub turner: Option<TurnerConfig>,
    #[serde(default)]
    pub attack: Option<AttackProfile>,
    #[serde(default)]
    pub construct: Option<ConstructConfig>,
    #[serde(default)]
    pub structure: Option<StructureConfig>,
    /// Whether torn-down agents of this code are parked for reuse.
    #[serde(default = "default_pooled")]
    pub pooled: bool,
    /// Ticks a deactivated agent keeps being visualized before its life ends.
    #[serde(default)]
    pub death_ticks: u32,
}

impl AgentTemplate {
    /// A bare template of the given kind with every capability absent.
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            radius: Fixed::ZERO,
            priority: 0,
            action_range: Fixed::ZERO,
            mover: None,
            turner: None,
            attack: None,
            construct: None,
            structure: None,
            pooled: true,
            death_ticks: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentCatalog
// ---------------------------------------------------------------------------

/// Registry of agent templates keyed by code.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    ids: BTreeMap<String, AgentCodeId>,
    entries: Vec<(String, AgentTemplate)>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping agent codes to templates.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let templates: BTreeMap<String, AgentTemplate> =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidCatalog {
                details: e.to_string(),
            })?;
        let mut catalog = Self::new();
        for (code, template) in templates {
            catalog.register(&code, template);
        }
        Ok(catalog)
    }

    /// Register (or replace) the template for `code`.
    pub fn register(&mut self, code: &str, template: AgentTemplate) -> AgentCodeId {
        if let Some(&id) = self.ids.get(code) {
            self.entries[id.0 as usize].1 = template;
            return id;
        }
        let id = AgentCodeId(self.entries.len() as u16);
        self.ids.insert(code.to_owned(), id);
        self.entries.push((code.to_owned(), template));
        id
    }

    pub fn is_valid_code(&self, code: &str) -> bool {
        self.ids.contains_key(code)
    }

    /// Resolve a code, failing with [`CoreError::UnknownAgentCode`].
    pub fn lookup(&self, code: &str) -> Result<AgentCodeId, CoreError> {
        self.ids
            .get(code)
            .copied()
            .ok_or_else(|| CoreError::UnknownAgentCode {
                code: code.to_owned(),
                known: self.ids.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    /// The template for a resolved code.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this catalog.
    pub fn template(&self, id: AgentCodeId) -> &AgentTemplate {
        &self.entries[id.0 as usize].1
    }

    pub fn code_name(&self, id: AgentCodeId) -> &str {
        &self.entries[id.0 as usize].0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
