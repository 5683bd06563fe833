use crate::host::{MapSurface, OverlayId};
use crate::state::StateSnapshot;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use tracing::{debug, warn};

static STATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{\s*states\(['"]([^'"]+)['"]\)\s*\}\}"#).expect("state token pattern is valid")
});

/// Entity ids referenced by `{{ states('...') }}` tokens, in order of first use
pub fn referenced_entities(template: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for captures in STATE_TOKEN.captures_iter(template) {
        let id = &captures[1];
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Resolves state tokens in layer URLs and keeps every drawn layer's URL
/// current when a referenced entity changes.
#[derive(Default)]
pub struct UrlResolver {
    /// Latest pushed state per entity; wins over the tick snapshot
    latest: DashMap<String, String>,
    templates: DashMap<OverlayId, String>,
    bindings: DashMap<String, BTreeSet<OverlayId>>,
}

impl UrlResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every token with the entity's state. Unknown entities
    /// resolve to an empty string.
    pub fn resolve(&self, template: &str, snapshot: &StateSnapshot) -> String {
        STATE_TOKEN
            .replace_all(template, |captures: &Captures| {
                let entity_id = &captures[1];
                let state = self
                    .latest
                    .get(entity_id)
                    .map(|s| s.value().clone())
                    .or_else(|| snapshot.get(entity_id).map(|s| s.state.clone()));
                match state {
                    Some(state) => {
                        debug!(entity_id = %entity_id, state = %state, "Resolved URL token");
                        state
                    }
                    None => {
                        warn!(entity_id = %entity_id, "URL token references unknown entity");
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    /// Bind a drawn layer to the entities its template references.
    /// Templates without tokens are not bound.
    pub fn register(&self, overlay: OverlayId, template: &str) {
        let ids = referenced_entities(template);
        if ids.is_empty() {
            return;
        }
        self.templates.insert(overlay, template.to_string());
        for id in ids {
            self.bindings.entry(id).or_default().insert(overlay);
        }
    }

    pub fn deregister(&self, overlay: OverlayId) {
        if self.templates.remove(&overlay).is_none() {
            return;
        }
        self.bindings.retain(|_, overlays| {
            overlays.remove(&overlay);
            !overlays.is_empty()
        });
    }

    /// Record a pushed state and re-set the URL of every layer that
    /// references it. Returns how many layers were updated.
    pub fn refresh(
        &self,
        entity_id: &str,
        state: &str,
        snapshot: &StateSnapshot,
        surface: &dyn MapSurface,
    ) -> usize {
        self.latest.insert(entity_id.to_string(), state.to_string());

        let overlays: Vec<OverlayId> = self
            .bindings
            .get(entity_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for overlay in &overlays {
            let template = self.templates.get(overlay).map(|t| t.value().clone());
            if let Some(template) = template {
                surface.set_layer_url(*overlay, &self.resolve(&template, snapshot));
            }
        }
        overlays.len()
    }

    pub fn bound_layers(&self, entity_id: &str) -> usize {
        self.bindings.get(entity_id).map_or(0, |set| set.len())
    }

    pub fn is_registered(&self, overlay: OverlayId) -> bool {
        self.templates.contains_key(&overlay)
    }
}
