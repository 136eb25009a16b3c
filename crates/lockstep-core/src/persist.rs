//! Saving and loading individual agents.
//!
//! An [`AgentSave`] records an agent's code, transform and one field map per
//! ability. Field maps are `serde_json` objects; fixed-point values are
//! stored as their raw 64-bit integers so a save round-trips bit for bit.

use crate::agent::Agent;
use crate::controller::ControllerId;
use crate::entity::AgentHandle;
use crate::event::SimEvent;
use crate::math::{Fixed, Vec2Fixed};
use crate::world::World;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Key/value record written by an ability.
pub type FieldMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSave {
    pub code: String,
    pub position: Vec2Fixed,
    pub rotation: Vec2Fixed,
    #[serde(default)]
    pub abilities: BTreeMap<String, FieldMap>,
}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

fn malformed(ability: &str, field: &str, expected: &str, value: &Value) -> CoreError {
    CoreError::Persistence {
        ability: ability.to_owned(),
        field: field.to_owned(),
        details: format!("expected {expected}, found {value}"),
    }
}

pub(crate) fn read_bool(fields: &FieldMap, ability: &str, key: &str) -> Result<Option<bool>, CoreError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| malformed(ability, key, "a boolean", value)),
    }
}

pub(crate) fn read_fixed(fields: &FieldMap, ability: &str, key: &str) -> Result<Option<Fixed>, CoreError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(|bits| Some(Fixed::from_bits(bits)))
            .ok_or_else(|| malformed(ability, key, "raw fixed-point bits", value)),
    }
}

pub(crate) fn read_u16(fields: &FieldMap, ability: &str, key: &str) -> Result<Option<u16>, CoreError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| malformed(ability, key, "an id in 0..=65535", value)),
    }
}

pub(crate) fn write_fixed(fields: &mut FieldMap, key: &str, value: Fixed) {
    fields.insert(key.to_owned(), Value::from(value.to_bits()));
}

// ---------------------------------------------------------------------------
// World save / load
// ---------------------------------------------------------------------------

impl World {
    pub fn save_agent(&self, handle: AgentHandle) -> Result<AgentSave, CoreError> {
        let agent: &Agent = self
            .registry()
            .get(handle)
            .ok_or(CoreError::StaleAgent { agent: handle })?;
        Ok(AgentSave {
            code: self.catalog().code_name(agent.code()).to_owned(),
            position: agent.body.position,
            rotation: agent.body.rotation,
            abilities: agent.save_abilities(self.registry()),
        })
    }

    /// Recreate an agent from a save under `controller`.
    ///
    /// Ability fields are loaded before the agent is initialized, so
    /// references to other agents resolve once the controller is attached.
    pub fn load_agent(
        &mut self,
        controller: ControllerId,
        save: &AgentSave,
    ) -> Result<AgentHandle, CoreError> {
        let code = self.catalog().lookup(&save.code)?;
        self.prepare_creation(controller, &save.code)?;

        let handle = self.create_raw(code);
        let loaded = match self.registry_mut().slot_agent_mut(handle.slot()) {
            Some(agent) => agent.load_abilities(&save.abilities),
            None => Ok(()),
        };
        if let Err(err) = loaded {
            self.recycle_raw(handle.slot());
            return Err(err);
        }

        self.attach(handle, controller, &save.code);
        self.with_agent(handle, |agent, ctx| {
            agent.initialize(save.position, save.rotation, ctx)
        });
        self.events_mut().push(SimEvent::AgentCreated {
            agent: handle,
            code,
        });
        debug!(agent = %handle, code = %save.code, %controller, "agent loaded");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_and_null_fields_read_as_none() {
        let f = fields(json!({ "Focused": null }));
        assert_eq!(read_bool(&f, "Construct", "Focused").unwrap(), None);
        assert_eq!(read_fixed(&f, "Construct", "ConstructCount").unwrap(), None);
    }

    #[test]
    fn fixed_fields_are_raw_bits() {
        let mut f = FieldMap::new();
        write_fixed(&mut f, "ConstructCount", Fixed::from_bits(1 << 15));
        assert_eq!(f["ConstructCount"], json!(32768));
        assert_eq!(
            read_fixed(&f, "Construct", "ConstructCount").unwrap(),
            Some(Fixed::from_bits(1 << 15))
        );
    }

    #[test]
    fn wrong_types_are_persistence_errors() {
        let f = fields(json!({ "Focused": "yes", "currentProjectId": 70000 }));
        let err = read_bool(&f, "Construct", "Focused").unwrap_err();
        assert!(err.to_string().contains("Focused"));
        let err = read_u16(&f, "Construct", "currentProjectId").unwrap_err();
        assert!(matches!(err, CoreError::Persistence { .. }));
    }

    #[test]
    fn agent_save_round_trips_through_json() {
        let mut abilities = BTreeMap::new();
        abilities.insert("Construct".to_owned(), fields(json!({ "Focused": true })));
        let save = AgentSave {
            code: "worker".to_owned(),
            position: Vec2Fixed::from_num(3, -1),
            rotation: Vec2Fixed::RIGHT,
            abilities,
        };
        let json = serde_json::to_string(&save).unwrap();
        let back: AgentSave = serde_json::from_str(&json).unwrap();
        assert_eq!(back, save);
    }
}
