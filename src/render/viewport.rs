use crate::config::{FocusFollow, ViewportAnchor};
use crate::error::MapCardError;
use crate::geo::{Bounds, LatLng};
use crate::host::MapSurface;
use crate::state::StateSnapshot;
use crate::telemetry::Logger;
use tracing::warn;

/// Owns the map viewport: the initial view and refocusing on updates.
/// Nothing else calls `set_view` or `fit_bounds`.
pub struct ViewportController {
    anchor: ViewportAnchor,
    zoom: u32,
    focus_follow: FocusFollow,
    padding: f64,
    logger: Logger,
}

impl ViewportController {
    pub fn new(
        anchor: ViewportAnchor,
        zoom: u32,
        focus_follow: FocusFollow,
        padding: f64,
        logger: Logger,
    ) -> Self {
        Self {
            anchor,
            zoom,
            focus_follow,
            padding,
            logger,
        }
    }

    /// Explicit coordinates, else the focus entity, else fit every
    /// focus-eligible entity.
    pub fn initial_view(
        &self,
        surface: &dyn MapSurface,
        snapshot: &StateSnapshot,
        points: &[LatLng],
    ) -> Result<(), MapCardError> {
        match &self.anchor {
            ViewportAnchor::Coordinates(center) => {
                self.logger
                    .debug("ViewportController", format!("Setting initial view to {:?}", center));
                surface.set_view(*center, self.zoom);
            }
            ViewportAnchor::FocusEntity(entity_id) => {
                if snapshot.get(entity_id).is_none() {
                    return Err(MapCardError::EntityNotFound(entity_id.clone()));
                }
                let center = snapshot
                    .position_of(entity_id)
                    .ok_or_else(|| MapCardError::MissingPosition(entity_id.clone()))?;
                surface.set_view(center, self.zoom);
            }
            ViewportAnchor::FitEntities => {
                self.fit(surface, points);
            }
        }
        Ok(())
    }

    /// Refocus after an update according to `focus_follow`. Returns whether
    /// the view was changed.
    pub fn follow(&self, surface: &dyn MapSurface, points: &[LatLng]) -> bool {
        match self.focus_follow {
            FocusFollow::None => false,
            FocusFollow::Refocus => self.fit(surface, points),
            FocusFollow::Contains => {
                let Some(bounds) = Bounds::from_points(points.iter().copied()) else {
                    return false;
                };
                match surface.visible_bounds() {
                    Some(visible) if visible.contains(&bounds) => false,
                    _ => self.fit(surface, points),
                }
            }
        }
    }

    fn fit(&self, surface: &dyn MapSurface, points: &[LatLng]) -> bool {
        match Bounds::from_points(points.iter().copied()) {
            Some(bounds) => {
                self.logger.debug(
                    "ViewportController",
                    format!("Fitting view to {} entities", points.len()),
                );
                surface.fit_bounds(bounds.pad(self.padding));
                true
            }
            None => {
                warn!("No entity positions to fit the view to");
                false
            }
        }
    }
}
