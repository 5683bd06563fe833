//! Wire messages exchanged with the host's websocket API.

use crate::date::to_iso_millis;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Client → Host: stream history for a set of entities
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "history/stream")]
pub struct HistoryStreamRequest {
    pub entity_ids: Vec<String>,
    pub significant_changes_only: bool,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl HistoryStreamRequest {
    pub fn new(
        entity_ids: Vec<String>,
        significant_changes_only: bool,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            entity_ids,
            significant_changes_only,
            start_time: to_iso_millis(start),
            end_time: end.map(to_iso_millis),
        }
    }
}

/// Client → Host: stream state changes of a set of entities
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "subscribe_entities")]
pub struct SubscribeEntitiesRequest {
    pub entity_ids: Vec<String>,
}

impl SubscribeEntitiesRequest {
    pub fn single(entity_id: &str) -> Self {
        Self {
            entity_ids: vec![entity_id.to_string()],
        }
    }
}

/// Serialize a request for [`crate::host::HostConnection::subscribe_message`].
pub fn to_request<T: Serialize>(request: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(request)?)
}

/// Host → Client: one batch of history samples, keyed by entity id.
/// Keys keep the order the host sent them in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStreamMessage {
    #[serde(default)]
    pub states: IndexMap<String, Vec<CompressedHistoryState>>,
}

/// One history sample: state, attributes, last updated (epoch seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct CompressedHistoryState {
    #[serde(default)]
    pub s: Option<Value>,
    #[serde(default)]
    pub a: Map<String, Value>,
    pub lu: f64,
}

impl CompressedHistoryState {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis((self.lu * 1000.0).round() as i64)
    }

    pub fn state(&self) -> Option<String> {
        self.s.as_ref().map(value_to_text)
    }

    pub fn coordinate(&self, name: &str) -> Option<f64> {
        self.a.get(name).and_then(Value::as_f64).filter(|v| v.is_finite())
    }
}

/// Host → Client: entity states, full (`a`) or changed (`c`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntitiesMessage {
    #[serde(default)]
    pub a: HashMap<String, CompressedState>,
    #[serde(default)]
    pub c: HashMap<String, CompressedStateDiff>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompressedState {
    #[serde(default)]
    pub s: Option<Value>,
    #[serde(default)]
    pub a: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompressedStateDiff {
    #[serde(rename = "+", default)]
    pub additions: Option<CompressedState>,
}

impl EntitiesMessage {
    /// Raw state text of `entity_id`, if this message carries one.
    pub fn state_of(&self, entity_id: &str) -> Option<String> {
        if let Some(state) = self.a.get(entity_id).and_then(|s| s.s.as_ref()) {
            return Some(value_to_text(state));
        }
        self.c
            .get(entity_id)
            .and_then(|diff| diff.additions.as_ref())
            .and_then(|s| s.s.as_ref())
            .map(value_to_text)
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
