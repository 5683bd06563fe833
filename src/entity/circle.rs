use crate::config::{CircleConfig, CircleSource};
use crate::geo::LatLng;
use crate::host::{CircleSpec, MapSurface, OverlayId};
use crate::state::EntityState;
use crate::telemetry::Logger;
use serde_json::Map;
use tracing::warn;

/// Radius in meters for the current state.
pub fn resolve_radius(config: &CircleConfig, state: Option<&EntityState>) -> f64 {
    let attribute = |name: &str| state.and_then(|s| s.attribute_f64(name));
    match config.source {
        CircleSource::Config => config.radius,
        CircleSource::Attribute => config
            .attribute
            .as_deref()
            .and_then(attribute)
            .unwrap_or(0.0),
        CircleSource::Auto => config
            .attribute
            .as_deref()
            .and_then(attribute)
            .or_else(|| attribute("gps_accuracy").filter(|r| *r > 0.0))
            .or_else(|| attribute("radius").filter(|r| *r > 0.0))
            .or(Some(config.radius).filter(|r| *r > 0.0))
            .unwrap_or(0.0),
    }
}

/// Keeps an entity's uncertainty circle in sync with its position.
pub struct CircleEngine {
    entity_id: String,
    config: CircleConfig,
    overlay: Option<OverlayId>,
    logger: Logger,
}

impl CircleEngine {
    pub fn new(entity_id: &str, config: CircleConfig, logger: Logger) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            config,
            overlay: None,
            logger,
        }
    }

    pub fn overlay(&self) -> Option<OverlayId> {
        self.overlay
    }

    /// Draw the circle when enabled. Without a position it is skipped.
    pub fn setup(&mut self, surface: &dyn MapSurface, position: Option<LatLng>, state: Option<&EntityState>) {
        if !self.config.enabled {
            return;
        }
        let Some(center) = position else {
            warn!(entity_id = %self.entity_id, "Circle skipped: entity has no position");
            return;
        };

        let radius = resolve_radius(&self.config, state);
        self.logger.debug(
            "Circle",
            format!(
                "for {}, using {:?}, resulting in: {}",
                self.entity_id, self.config.source, radius
            ),
        );
        self.overlay = Some(surface.add_circle(&CircleSpec {
            center,
            radius,
            color: self.config.color.clone(),
            fill_opacity: self.config.fill_opacity,
            options: Map::new(),
        }));
    }

    pub fn update(&self, surface: &dyn MapSurface, position: LatLng, state: Option<&EntityState>) {
        if let Some(overlay) = self.overlay {
            surface.update_circle(overlay, position, resolve_radius(&self.config, state));
        }
    }

    pub fn teardown(&mut self, surface: &dyn MapSurface) {
        if let Some(overlay) = self.overlay.take() {
            surface.remove(overlay);
        }
    }
}
