//! Tile and WMS overlays, static or stamped with a history date.

pub mod url_resolver;

pub use url_resolver::{referenced_entities, UrlResolver};

use crate::card::{CardEvent, Services};
use crate::config::{BoundSource, LayerConfig, LayerHistoryConfig, LayerHistorySource};
use crate::date;
use crate::error::MapCardError;
use crate::host::{DateRange, LoadCallback, MapSurface, OverlayId, TileLayerSpec};
use crate::state::{LinkedState, StateSnapshot};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};


/// What a dated layer follows
#[derive(Debug, Clone, PartialEq)]
pub enum LayerDriver {
    /// The shared date range selector; its start is stamped
    Broadcast,
    Linked {
        entity_id: String,
        suffix: Option<String>,
    },
    Fixed(DateTime<Utc>),
    /// Nothing usable; drawn once without a date
    Unresolved,
}

impl LayerDriver {
    /// Broadcaster first, then the configured entity, then a fixed start.
    pub fn resolve(history: &LayerHistoryConfig, broadcast_available: bool) -> Self {
        match &history.source {
            LayerHistorySource::Auto { .. } if broadcast_available => LayerDriver::Broadcast,
            LayerHistorySource::Auto { fallback } => match fallback {
                Some(BoundSource::Linked { entity_id, suffix }) => LayerDriver::Linked {
                    entity_id: entity_id.clone(),
                    suffix: suffix.clone(),
                },
                Some(BoundSource::Fixed(Some(start))) => LayerDriver::Fixed(*start),
                _ => LayerDriver::Unresolved,
            },
            LayerHistorySource::Entity { entity_id, suffix } => LayerDriver::Linked {
                entity_id: entity_id.clone(),
                suffix: suffix.clone(),
            },
        }
    }

    pub fn linked_entity(&self) -> Option<&str> {
        match self {
            LayerDriver::Linked { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }
}

/// Plain overlay: drawn once, never touched again.
pub struct Layer {
    config: LayerConfig,
    overlay: Option<OverlayId>,
}

impl Layer {
    pub fn new(config: LayerConfig) -> Self {
        Self { config, overlay: None }
    }

    pub fn render(&mut self, surface: &dyn MapSurface, resolver: &UrlResolver, snapshot: &StateSnapshot) {
        debug!(kind = self.config.kind.as_str(), "Setting up layer");
        let spec = TileLayerSpec {
            kind: self.config.kind,
            url: resolver.resolve(&self.config.url, snapshot),
            options: self.config.options.clone(),
        };
        let overlay = surface.add_tile_layer(&spec, None);
        resolver.register(overlay, &self.config.url);
        self.overlay = Some(overlay);
    }

    pub fn overlay(&self) -> Option<OverlayId> {
        self.overlay
    }

    pub fn teardown(&mut self, surface: &dyn MapSurface, resolver: &UrlResolver) {
        if let Some(overlay) = self.overlay.take() {
            resolver.deregister(overlay);
            surface.remove(overlay);
        }
    }
}

/// Overlay with a date stamped into one of its options.
///
/// Each new date draws a new layer on top of the current one. The current
/// one is removed only once the new one reports it has loaded, so the map
/// never shows a partial tile set.
pub struct LayerWithHistory {
    index: usize,
    config: LayerConfig,
    history: LayerHistoryConfig,
    driver: LayerDriver,
    current: Option<OverlayId>,
    pending: Option<OverlayId>,
    stamp: Option<String>,
}

impl LayerWithHistory {
    pub fn new(index: usize, config: LayerConfig, history: LayerHistoryConfig, broadcast_available: bool) -> Self {
        let driver = LayerDriver::resolve(&history, broadcast_available);
        Self {
            index,
            config,
            history,
            driver,
            current: None,
            pending: None,
            stamp: None,
        }
    }

    pub fn driver(&self) -> &LayerDriver {
        &self.driver
    }

    pub fn current(&self) -> Option<OverlayId> {
        self.current
    }

    pub fn pending(&self) -> Option<OverlayId> {
        self.pending
    }

    /// Value last stamped into the history property
    pub fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    /// Draw what can be drawn right away: a fixed date, or nothing dated.
    /// Linked and broadcast layers wait for their first event.
    pub fn render(&mut self, services: &Services, resolver: &UrlResolver, snapshot: &StateSnapshot) {
        match self.driver.clone() {
            LayerDriver::Fixed(start) => {
                debug!(start = %start, "Layer set with fixed history_start");
                self.update_layer(Some(start), services, resolver, snapshot);
            }
            LayerDriver::Unresolved => {
                warn!(
                    property = %self.history.property,
                    "Layer history has no date source; drawing it undated"
                );
                self.update_layer(None, services, resolver, snapshot);
            }
            LayerDriver::Broadcast => debug!("Layer linked to date range"),
            LayerDriver::Linked { entity_id, .. } => {
                debug!(entity_id = %entity_id, "Layer linked to entity");
            }
        }
    }

    /// A linked entity changed. Ignored unless it drives this layer.
    pub fn on_linked_state(
        &mut self,
        entity_id: &str,
        state: &LinkedState,
        services: &Services,
        resolver: &UrlResolver,
        snapshot: &StateSnapshot,
    ) -> Result<(), MapCardError> {
        let suffix = match &self.driver {
            LayerDriver::Linked {
                entity_id: linked,
                suffix,
            } if linked == entity_id => suffix.clone(),
            _ => return Ok(()),
        };
        let at = date::derive_from_state(state, suffix.as_deref())?.unwrap_or_else(Utc::now);
        self.update_layer(Some(at), services, resolver, snapshot);
        Ok(())
    }

    pub fn on_date_range(
        &mut self,
        range: &DateRange,
        services: &Services,
        resolver: &UrlResolver,
        snapshot: &StateSnapshot,
    ) {
        if self.driver == LayerDriver::Broadcast {
            self.update_layer(Some(range.start), services, resolver, snapshot);
        }
    }

    /// Draw a replacement layer stamped with `at`. A replacement still loading
    /// is dropped in favour of the newer one.
    pub fn update_layer(
        &mut self,
        at: Option<DateTime<Utc>>,
        services: &Services,
        resolver: &UrlResolver,
        snapshot: &StateSnapshot,
    ) {
        let surface = services.surface.as_ref();
        let mut options = self.config.options.clone();
        let at = match at {
            Some(at) if self.history.force_midnight => Some(date::truncate_to_midnight(at)),
            other => other,
        };
        self.stamp = at.map(date::to_iso_millis);
        if let Some(stamp) = &self.stamp {
            options.insert(self.history.property.clone(), Value::String(stamp.clone()));
        }

        if let Some(stale) = self.pending.take() {
            surface.remove(stale);
        }

        let spec = TileLayerSpec {
            kind: self.config.kind,
            url: resolver.resolve(&self.config.url, snapshot),
            options,
        };
        let overlay = surface.add_tile_layer(&spec, Some(load_callback(self.index, services.events.clone())));
        self.pending = Some(overlay);

        services.logger.debug(
            "LayerWithHistory",
            format!(
                "Layer refreshed with {}={}",
                self.history.property,
                self.stamp.as_deref().unwrap_or("none")
            ),
        );
    }

    /// The layer `overlay` finished loading. Swap it in if it is still the
    /// newest replacement.
    pub fn on_loaded(&mut self, overlay: OverlayId, surface: &dyn MapSurface, resolver: &UrlResolver) -> bool {
        if self.pending != Some(overlay) {
            return false;
        }
        self.pending = None;
        if let Some(previous) = self.current.replace(overlay) {
            resolver.deregister(previous);
            surface.remove(previous);
        }
        resolver.register(overlay, &self.config.url);
        true
    }

    pub fn teardown(&mut self, surface: &dyn MapSurface, resolver: &UrlResolver) {
        for overlay in [self.pending.take(), self.current.take()].into_iter().flatten() {
            resolver.deregister(overlay);
            surface.remove(overlay);
        }
    }
}

fn load_callback(index: usize, events: mpsc::UnboundedSender<CardEvent>) -> LoadCallback {
    Box::new(move |overlay: OverlayId| {
        // The card may already be gone
        let _ = events.send(CardEvent::LayerLoaded { layer: index, overlay });
    })
}

/// One configured overlay
pub enum LayerReconciler {
    Static(Layer),
    History(LayerWithHistory),
}

impl LayerReconciler {
    pub fn new(index: usize, config: LayerConfig, broadcast_available: bool) -> Self {
        match config.history.clone() {
            Some(history) => {
                LayerReconciler::History(LayerWithHistory::new(index, config, history, broadcast_available))
            }
            None => LayerReconciler::Static(Layer::new(config)),
        }
    }

    pub fn config(&self) -> &LayerConfig {
        match self {
            LayerReconciler::Static(layer) => &layer.config,
            LayerReconciler::History(layer) => &layer.config,
        }
    }

    pub fn render(&mut self, services: &Services, resolver: &UrlResolver, snapshot: &StateSnapshot) {
        match self {
            LayerReconciler::Static(layer) => layer.render(services.surface.as_ref(), resolver, snapshot),
            LayerReconciler::History(layer) => layer.render(services, resolver, snapshot),
        }
    }

    pub fn as_history(&self) -> Option<&LayerWithHistory> {
        match self {
            LayerReconciler::History(layer) => Some(layer),
            LayerReconciler::Static(_) => None,
        }
    }

    pub fn as_history_mut(&mut self) -> Option<&mut LayerWithHistory> {
        match self {
            LayerReconciler::History(layer) => Some(layer),
            LayerReconciler::Static(_) => None,
        }
    }

    pub fn teardown(&mut self, surface: &dyn MapSurface, resolver: &UrlResolver) {
        match self {
            LayerReconciler::Static(layer) => layer.teardown(surface, resolver),
            LayerReconciler::History(layer) => layer.teardown(surface, resolver),
        }
    }
}
