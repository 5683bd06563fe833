use crate::card::{EventTarget, Services};
use crate::config::LayerConfig;
use crate::error::MapCardError;
use crate::host::{DateRange, OverlayId};
use crate::layer::{referenced_entities, LayerDriver, LayerReconciler, UrlResolver};
use crate::render::{range_listener, unwatch, watch};
use crate::state::{LinkedState, StateSnapshot};
use crate::subscription::ListenerHandle;
use std::sync::Arc;
use tracing::warn;

/// Base, tile and WMS layers of the card, plus the URL token bindings
/// they share.
pub struct TileLayersRenderService {
    layers: Vec<LayerReconciler>,
    resolver: Arc<UrlResolver>,
    handles: Vec<ListenerHandle>,
}

impl TileLayersRenderService {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            resolver: Arc::new(UrlResolver::new()),
            handles: Vec::new(),
        }
    }

    pub async fn setup<'a>(
        &mut self,
        configs: impl IntoIterator<Item = &'a LayerConfig>,
        services: &Services,
        snapshot: &StateSnapshot,
    ) {
        let broadcast_available = services.date_range.is_some();
        let mut token_entities: Vec<String> = Vec::new();

        for (index, config) in configs.into_iter().enumerate() {
            for id in referenced_entities(&config.url) {
                if !token_entities.contains(&id) {
                    token_entities.push(id);
                }
            }
            let mut layer = LayerReconciler::new(index, config.clone(), broadcast_available);
            layer.render(services, &self.resolver, snapshot);
            self.layers.push(layer);
        }

        for index in 0..self.layers.len() {
            let target = EventTarget::Layer(index);
            let driver = match self.layers[index].as_history() {
                Some(layer) => layer.driver().clone(),
                None => continue,
            };
            match driver {
                LayerDriver::Linked { entity_id, .. } => {
                    if let Some(handle) = watch(services, target, &entity_id).await {
                        self.handles.push(handle);
                    }
                }
                LayerDriver::Broadcast => {
                    if let Some(broadcaster) = &services.date_range {
                        broadcaster.on_date_range_change(range_listener(services, target));
                    }
                }
                LayerDriver::Fixed(_) | LayerDriver::Unresolved => {}
            }
        }

        for entity_id in token_entities {
            if let Some(handle) = watch(services, EventTarget::LayerUrls, &entity_id).await {
                self.handles.push(handle);
            }
        }
    }

    pub fn on_linked_state(
        &mut self,
        index: usize,
        entity_id: &str,
        state: &LinkedState,
        services: &Services,
        snapshot: &StateSnapshot,
    ) -> Result<(), MapCardError> {
        match self.layers.get_mut(index).and_then(LayerReconciler::as_history_mut) {
            Some(layer) => layer.on_linked_state(entity_id, state, services, &self.resolver, snapshot),
            None => Ok(()),
        }
    }

    pub fn on_date_range(
        &mut self,
        index: usize,
        range: &DateRange,
        services: &Services,
        snapshot: &StateSnapshot,
    ) {
        if let Some(layer) = self.layers.get_mut(index).and_then(LayerReconciler::as_history_mut) {
            layer.on_date_range(range, services, &self.resolver, snapshot);
        }
    }

    /// A URL token entity changed: re-set the URL of every layer using it.
    pub fn on_token_state(
        &self,
        entity_id: &str,
        state: &LinkedState,
        services: &Services,
        snapshot: &StateSnapshot,
    ) -> usize {
        self.resolver.refresh(
            entity_id,
            &state.to_string(),
            snapshot,
            services.surface.as_ref(),
        )
    }

    pub fn on_loaded(&mut self, index: usize, overlay: OverlayId, services: &Services) {
        match self.layers.get_mut(index).and_then(LayerReconciler::as_history_mut) {
            Some(layer) => {
                layer.on_loaded(overlay, services.surface.as_ref(), &self.resolver);
            }
            None => warn!(layer = index, "Load event for a layer without history"),
        }
    }

    pub fn layers(&self) -> &[LayerReconciler] {
        &self.layers
    }

    pub fn resolver(&self) -> &UrlResolver {
        &self.resolver
    }

    pub async fn teardown(&mut self, services: &Services) {
        unwatch(services, std::mem::take(&mut self.handles)).await;
        for mut layer in self.layers.drain(..) {
            layer.teardown(services.surface.as_ref(), &self.resolver);
        }
    }
}

impl Default for TileLayersRenderService {
    fn default() -> Self {
        Self::new()
    }
}
