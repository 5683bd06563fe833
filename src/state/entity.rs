use crate::geo::LatLng;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entity as published by the host's state store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity identifier (e.g., "person.alice", "device_tracker.phone")
    #[serde(default)]
    pub entity_id: String,

    /// Raw state value
    #[serde(default)]
    pub state: String,

    /// Attribute map (coordinates, friendly name, icon, ...)
    #[serde(default)]
    pub attributes: Map<String, Value>,

    /// Last update timestamp
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    pub fn new(entity_id: &str, state: &str, attributes: Map<String, Value>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes,
            last_updated: Utc::now(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }

    /// Numeric attribute; numeric strings are accepted too.
    pub fn attribute_f64(&self, name: &str) -> Option<f64> {
        match self.attribute(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attribute(name)?.as_str().filter(|s| !s.is_empty())
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attribute_str("friendly_name")
    }

    pub fn icon(&self) -> Option<&str> {
        self.attribute_str("icon")
    }

    pub fn entity_picture(&self) -> Option<&str> {
        self.attribute_str("entity_picture")
    }

    /// Sub-trackers this entity can delegate its position to.
    pub fn device_trackers(&self) -> Vec<String> {
        match self.attribute("device_trackers") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Direct coordinates, present only if both latitude and longitude are.
    pub fn coordinates(&self) -> Option<LatLng> {
        let lat = self.attribute_f64("latitude")?;
        let lng = self.attribute_f64("longitude")?;
        Some(LatLng::new(lat, lng))
    }

    /// State as displayed to a user (value plus unit when known).
    pub fn formatted_state(&self) -> String {
        match self.attribute_str("unit_of_measurement") {
            Some(unit) => format!("{} {}", self.state, unit),
            None => self.state.clone(),
        }
    }

    /// Attribute value as displayed to a user.
    pub fn formatted_attribute(&self, name: &str) -> Option<String> {
        let formatted = match self.attribute(name)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        };
        Some(formatted)
    }
}

/// State change message broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateUpdate {
    pub entity_id: String,
    pub old_state: Option<String>,
    pub new_state: EntityState,
    pub timestamp: DateTime<Utc>,
}
