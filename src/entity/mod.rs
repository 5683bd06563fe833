//! One tracked entity on the map: marker, history path and circle.

pub mod circle;
pub mod display;

pub use circle::{resolve_radius, CircleEngine};
pub use display::{abbreviate, appearance, display_name, MarkerAppearance};

use crate::card::Services;
use crate::config::EntityConfig;
use crate::error::MapCardError;
use crate::geo::LatLng;
use crate::history::{EntityHistoryManager, WindowChange};
use crate::host::{MarkerSpec, OverlayId};
use crate::state::StateSnapshot;
use tracing::warn;

#[cfg(test)]
mod tests;

/// Resolve where an entity is drawn.
///
/// Order: fixed override, the entity's own coordinates, the first
/// sub-tracker with coordinates, the configured fallback.
pub fn resolve_position(config: &EntityConfig, snapshot: &StateSnapshot) -> Result<LatLng, MapCardError> {
    if let Some(fixed) = config.fixed_position {
        return Ok(fixed);
    }
    if let Some(position) = snapshot.position_of(&config.id) {
        return Ok(position);
    }
    warn!(entity_id = %config.id, "Entity has no latitude & longitude");
    config
        .fallback_position
        .ok_or_else(|| MapCardError::MissingPosition(config.id.clone()))
}

/// Owns the marker lifecycle of one entity and composes its history
/// manager and circle.
pub struct EntityController {
    config: EntityConfig,
    marker: Option<OverlayId>,
    appearance: MarkerAppearance,
    position: LatLng,
    history: EntityHistoryManager,
    circle: CircleEngine,
}

impl EntityController {
    /// Draw the marker, open the history subscription and draw the circle.
    ///
    /// Fails when the entity is unknown or has no position; a failing
    /// history subscription only leaves the path empty.
    pub async fn setup(
        config: EntityConfig,
        services: &Services,
        snapshot: &StateSnapshot,
    ) -> Result<Self, MapCardError> {
        let state = snapshot.get(&config.id);
        if state.is_none() && config.fixed_position.is_none() {
            return Err(MapCardError::EntityNotFound(config.id.clone()));
        }
        let position = resolve_position(&config, snapshot)?;

        let surface = services.surface.as_ref();
        let appearance = appearance(&config, state);
        services.logger.debug(
            "EntityController",
            format!("Creating marker for {} with display mode {:?}", config.id, config.display),
        );
        let marker = surface.add_marker(&marker_spec(&config, &appearance, position, services.dark_mode));

        let title = display_name(&config, state);
        let mut history =
            EntityHistoryManager::new(&config, &title, &services.settings, services.logger.clone());
        if let Err(e) = history.setup(surface, &services.history, snapshot).await {
            warn!(entity_id = %config.id, error = %e, "History unavailable");
        }

        let mut circle = CircleEngine::new(&config.id, config.circle.clone(), services.logger.clone());
        circle.setup(surface, Some(position), state);

        Ok(Self {
            config,
            marker: Some(marker),
            appearance,
            position,
            history,
            circle,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    pub fn position(&self) -> LatLng {
        self.position
    }

    pub fn marker(&self) -> Option<OverlayId> {
        self.marker
    }

    pub fn title(&self) -> &str {
        &self.appearance.title
    }

    pub fn history(&self) -> &EntityHistoryManager {
        &self.history
    }

    pub fn circle(&self) -> &CircleEngine {
        &self.circle
    }

    /// Reposition from a fresh snapshot and redraw what changed.
    ///
    /// State and attribute markers are rebuilt when their text changes;
    /// every other mode only moves.
    pub fn update(&mut self, services: &Services, snapshot: &StateSnapshot) -> Result<(), MapCardError> {
        let surface = services.surface.as_ref();
        let state = snapshot.get(&self.config.id);
        let position = resolve_position(&self.config, snapshot)?;

        if self.config.display.is_textual() {
            let next = appearance(&self.config, state);
            if next.title != self.appearance.title {
                services.logger.debug(
                    "EntityController",
                    format!(
                        "updating marker for {} from {} to {}",
                        self.config.id, self.appearance.title, next.title
                    ),
                );
                if let Some(marker) = self.marker.take() {
                    surface.remove(marker);
                }
                self.marker = Some(surface.add_marker(&marker_spec(
                    &self.config,
                    &next,
                    position,
                    services.dark_mode,
                )));
                self.appearance = next;
            }
        }

        if let Some(marker) = self.marker {
            surface.move_marker(marker, position);
        }
        self.position = position;

        self.history.update(surface);
        self.circle.update(surface, position, state);
        Ok(())
    }

    /// Forward a linked state or broadcast to the history manager.
    pub async fn apply_window(
        &mut self,
        change: &WindowChange,
        services: &Services,
        snapshot: &StateSnapshot,
    ) -> Result<bool, MapCardError> {
        self.history
            .apply(change, services.surface.as_ref(), &services.history, snapshot)
            .await
    }

    pub async fn teardown(&mut self, services: &Services) {
        let surface = services.surface.as_ref();
        if let Some(marker) = self.marker.take() {
            surface.remove(marker);
        }
        self.history.teardown(surface, &services.history).await;
        self.circle.teardown(surface);
    }
}

fn marker_spec(
    config: &EntityConfig,
    appearance: &MarkerAppearance,
    position: LatLng,
    dark_mode: bool,
) -> MarkerSpec {
    MarkerSpec {
        entity_id: config.id.clone(),
        position,
        title: appearance.title.clone(),
        icon: appearance.icon.clone(),
        picture: appearance.picture.clone(),
        size: config.size,
        color: config.color.clone(),
        css: config.css.clone(),
        z_index_offset: config.z_index_offset,
        dark_mode,
        tap_action: config.tap_action.clone(),
    }
}
