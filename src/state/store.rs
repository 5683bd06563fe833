use crate::state::entity::{EntityState, StateUpdate};
use crate::state::StateSnapshot;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// In-memory entity state store with change broadcasting
pub struct StateStore {
    /// Lock-free concurrent map for fast reads
    pub(crate) entities: Arc<DashMap<String, EntityState>>,

    /// Broadcast channel for state change events
    state_tx: broadcast::Sender<StateUpdate>,
}

impl StateStore {
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(1000);

        Self {
            entities: Arc::new(DashMap::new()),
            state_tx,
        }
    }

    /// Seed the store from a snapshot without broadcasting.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        let store = Self::new();
        for state in snapshot.iter() {
            store.entities.insert(state.entity_id.clone(), state.clone());
        }
        store
    }

    /// Replace an entity's state and attributes
    pub fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Map<String, Value>,
    ) -> StateUpdate {
        let now = Utc::now();
        let new_state = EntityState {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes,
            last_updated: now,
        };

        let old_state = self
            .entities
            .insert(entity_id.to_string(), new_state.clone())
            .map(|old| old.state);

        let update = StateUpdate {
            entity_id: entity_id.to_string(),
            old_state,
            new_state,
            timestamp: now,
        };

        // No subscribers is fine
        let _ = self.state_tx.send(update.clone());
        debug!(entity_id = %entity_id, state = %state, "State updated");

        update
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    pub fn remove(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.remove(entity_id).map(|(_, state)| state)
    }

    /// Copy of every state, as the host hands it to the card each tick
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(
            self.entities
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.state_tx.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
