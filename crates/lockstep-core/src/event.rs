//! Simulation events for observers (UI, logs, tests).
//!
//! Events are emitted during the tick and drained by the caller afterwards.
//! They never feed back into the simulation.

use crate::catalog::AgentCodeId;
use crate::entity::AgentHandle;
use crate::math::{raw_bits, Fixed, Vec2Fixed};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    AgentCreated {
        agent: AgentHandle,
        code: AgentCodeId,
    },
    AgentDeactivated {
        agent: AgentHandle,
        immediate: bool,
    },
    MoveOrdered {
        agent: AgentHandle,
        destination: Vec2Fixed,
    },
    ConstructionStarted {
        builder: AgentHandle,
        structure: AgentHandle,
    },
    BuildProgress {
        builder: AgentHandle,
        structure: AgentHandle,
        #[serde(with = "raw_bits")]
        build_points: Fixed,
    },
    ConstructionCompleted {
        builder: AgentHandle,
        structure: AgentHandle,
    },
    ConstructStopped {
        builder: AgentHandle,
        complete: bool,
    },
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<SimEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every pending event, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }
}
