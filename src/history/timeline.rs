use crate::geo::LatLng;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// One accepted history sample
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    /// Entity the subscription was opened for
    pub original_entity_id: String,
    /// Tracker that produced the sample; differs when following sub-trackers
    pub entity_id: String,
    pub state: Option<String>,
    pub position: LatLng,
    pub attributes: Map<String, Value>,
}

impl TimelineEntry {
    pub fn new(
        original_entity_id: &str,
        entity_id: &str,
        timestamp: DateTime<Utc>,
        position: LatLng,
    ) -> Self {
        Self {
            timestamp,
            original_entity_id: original_entity_id.to_string(),
            entity_id: entity_id.to_string(),
            state: None,
            position,
            attributes: Map::new(),
        }
    }
}
