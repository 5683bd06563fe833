use crate::config::{LayerKind, TapAction};
use crate::geo::{Bounds, LatLng};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Handle of anything drawn on the map (marker, circle, group, tile layer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OverlayId(pub u64);

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Called once with the layer's id when it has finished loading its tiles
pub type LoadCallback = Box<dyn FnOnce(OverlayId) + Send>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub entity_id: String,
    pub position: LatLng,
    /// Abbreviation, state text or attribute text
    pub title: String,
    pub icon: Option<String>,
    pub picture: Option<String>,
    pub size: u32,
    pub color: String,
    pub css: String,
    pub z_index_offset: i32,
    pub dark_mode: bool,
    pub tap_action: TapAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircleSpec {
    pub center: LatLng,
    /// Meters
    pub radius: f64,
    pub color: String,
    pub fill_opacity: f64,
    /// Extra renderer options
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// One element of a history path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PathElement {
    Dot {
        position: LatLng,
        radius: u32,
        color: String,
        opacity: f64,
        tooltip: String,
    },
    Segment {
        from: LatLng,
        to: LatLng,
        color: String,
        opacity: f64,
    },
}

impl PathElement {
    pub fn opacity(&self) -> f64 {
        match self {
            PathElement::Dot { opacity, .. } | PathElement::Segment { opacity, .. } => *opacity,
        }
    }

    pub fn is_dot(&self) -> bool {
        matches!(self, PathElement::Dot { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileLayerSpec {
    pub kind: LayerKind,
    pub url: String,
    pub options: Map<String, Value>,
}

/// Drawing primitives of the host map widget.
///
/// All calls happen on the card's event loop; implementations use interior
/// mutability. Unknown ids are ignored.
pub trait MapSurface: Send + Sync {
    fn add_marker(&self, marker: &MarkerSpec) -> OverlayId;
    fn move_marker(&self, id: OverlayId, position: LatLng);

    fn add_circle(&self, circle: &CircleSpec) -> OverlayId;
    fn update_circle(&self, id: OverlayId, center: LatLng, radius: f64);

    /// Empty overlay group for path elements
    fn add_group(&self) -> OverlayId;
    fn add_to_group(&self, group: OverlayId, element: &PathElement);
    fn clear_group(&self, group: OverlayId);

    /// Add a tile layer; `on_load` fires once when its tiles are loaded.
    fn add_tile_layer(&self, layer: &TileLayerSpec, on_load: Option<LoadCallback>) -> OverlayId;
    fn set_layer_url(&self, id: OverlayId, url: &str);

    /// Remove any overlay, dropping its pending load callback
    fn remove(&self, id: OverlayId);

    fn set_view(&self, center: LatLng, zoom: u32);
    fn fit_bounds(&self, bounds: Bounds);
    /// Currently visible area; `None` before the first view is set
    fn visible_bounds(&self) -> Option<Bounds>;

    fn show_warning(&self, message: &str);
    fn clear_warning(&self, message: &str);
}
