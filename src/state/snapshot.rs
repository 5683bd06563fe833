use crate::geo::LatLng;
use crate::state::EntityState;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Read-only view of every entity state, replaced wholesale on each tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateSnapshot {
    states: HashMap<String, EntityState>,
}

impl StateSnapshot {
    pub fn new(states: HashMap<String, EntityState>) -> Self {
        Self { states }
    }

    /// Parse a host state map `{ "<entity_id>": { "state": .., "attributes": {..} } }`.
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: HashMap<String, EntityState> =
            serde_json::from_value(value).context("Failed to parse state snapshot")?;
        let states = raw
            .into_iter()
            .map(|(id, mut state)| {
                if state.entity_id.is_empty() {
                    state.entity_id = id.clone();
                }
                (id, state)
            })
            .collect();
        Ok(Self { states })
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.states.get(entity_id)
    }

    pub fn insert(&mut self, state: EntityState) {
        self.states.insert(state.entity_id.clone(), state);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Position of an entity: its own coordinates, else the first
    /// sub-tracker that has coordinates.
    pub fn position_of(&self, entity_id: &str) -> Option<LatLng> {
        let state = self.get(entity_id)?;
        if let Some(position) = state.coordinates() {
            return Some(position);
        }
        state
            .device_trackers()
            .iter()
            .filter_map(|tracker| self.get(tracker))
            .find_map(EntityState::coordinates)
    }
}

/// Value pushed by a linked entity, numeric when the raw state parses as one
#[derive(Clone, Debug, PartialEq)]
pub enum LinkedState {
    Number(f64),
    Text(String),
}

impl LinkedState {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => LinkedState::Number(n),
            _ => LinkedState::Text(raw.to_string()),
        }
    }

    /// Text used when building a date expression. Numbers are truncated
    /// to whole units.
    pub fn to_expression_value(&self) -> String {
        match self {
            LinkedState::Number(n) => (n.trunc() as i64).to_string(),
            LinkedState::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for LinkedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkedState::Number(n) => write!(f, "{}", n),
            LinkedState::Text(s) => write!(f, "{}", s),
        }
    }
}
