//! Card configuration: raw JSON in, immutable typed descriptors out.
//!
//! Everything that can be rejected is rejected here, before any entity,
//! layer or subscription exists.

pub mod circle;
pub mod color;
pub mod entity;
pub mod layer;
pub mod plugin;
pub mod raw;
pub mod tap_action;

pub use circle::{CircleConfig, CircleSource};
pub use color::color_for;
pub use entity::{
    looks_like_entity_id, BoundSource, DisplayMode, EntityConfig, HistoryConfig, HistoryDefaults,
    WindowSource,
};
pub use layer::{LayerConfig, LayerHistoryConfig, LayerHistorySource, LayerKind};
pub use plugin::PluginConfig;
pub use tap_action::TapAction;

use crate::error::MapCardError;
use crate::geo::LatLng;
use raw::{RawHistoryBound, RawMapConfig};
use serde_json::{Map, Value};

pub const DEFAULT_ZOOM: u32 = 12;
pub const DEFAULT_CARD_SIZE: u32 = 5;
pub const DEFAULT_TILE_LAYER_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_TILE_LAYER_ATTRIBUTION: &str =
    "&copy; <a href=\"http://www.openstreetmap.org/copyright\">OpenStreetMap</a>";
const TITLE_HEADER_HEIGHT: u32 = 78;

/// Where the first view of the map comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ViewportAnchor {
    Coordinates(LatLng),
    FocusEntity(String),
    /// Fit the positions of every focus-eligible entity
    FitEntities,
}

/// Whether later updates move the viewport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FocusFollow {
    #[default]
    None,
    /// Refit on every update
    Refocus,
    /// Refit only when a position leaves the visible bounds
    Contains,
}

impl FocusFollow {
    /// Unknown values fall back to `None`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("refocus") => FocusFollow::Refocus,
            Some("contains") => FocusFollow::Contains,
            _ => FocusFollow::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThemeMode {
    #[default]
    Auto,
    Light,
    Dark,
}

impl ThemeMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("light") => ThemeMode::Light,
            Some("dark") => ThemeMode::Dark,
            _ => ThemeMode::Auto,
        }
    }

    pub fn is_dark(&self, host_dark_mode: bool) -> bool {
        match self {
            ThemeMode::Auto => host_dark_mode,
            ThemeMode::Light => false,
            ThemeMode::Dark => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub title: Option<String>,
    pub anchor: ViewportAnchor,
    pub zoom: u32,
    pub card_size: u32,
    pub focus_follow: FocusFollow,
    pub theme_mode: ThemeMode,
    pub history_date_selection: bool,
    pub entities: Vec<EntityConfig>,
    pub tile_layer: LayerConfig,
    pub tile_layers: Vec<LayerConfig>,
    pub wms: Vec<LayerConfig>,
    pub plugins: Vec<PluginConfig>,
    pub map_options: Map<String, Value>,
    pub debug: bool,
}

impl MapConfig {
    /// Parse and validate a card configuration.
    pub fn from_value(value: Value) -> Result<Self, MapCardError> {
        let raw: RawMapConfig = serde_json::from_value(value)
            .map_err(|e| MapCardError::InvalidConfig(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawMapConfig) -> Result<Self, MapCardError> {
        // Date range selection replaces the map-level defaults entirely.
        let defaults = if raw.history_date_selection {
            HistoryDefaults {
                start: None,
                end: None,
                date_range_enabled: true,
            }
        } else {
            HistoryDefaults {
                start: raw.history_start.clone(),
                end: Some(
                    raw.history_end
                        .clone()
                        .unwrap_or_else(|| RawHistoryBound::Text("now".to_string())),
                ),
                date_range_enabled: false,
            }
        };

        let entities = raw
            .entities
            .iter()
            .map(|entity| EntityConfig::from_raw(entity, &defaults))
            .collect::<Result<Vec<_>, _>>()?;

        let anchor = match (raw.x, raw.y, raw.focus_entity.as_deref()) {
            (Some(x), Some(y), _) if x.is_finite() && y.is_finite() => {
                ViewportAnchor::Coordinates(LatLng::new(x, y))
            }
            (_, _, Some(focus)) if !focus.is_empty() => ViewportAnchor::FocusEntity(focus.to_string()),
            _ if !entities.is_empty() => ViewportAnchor::FitEntities,
            _ => return Err(MapCardError::MissingViewportAnchor),
        };

        let layer_start = defaults.start.as_ref();
        let tile_layers = raw
            .tile_layers
            .iter()
            .map(|layer| LayerConfig::from_raw(LayerKind::Tile, layer, layer_start))
            .collect::<Result<Vec<_>, _>>()?;
        let wms = raw
            .wms
            .iter()
            .map(|layer| LayerConfig::from_raw(LayerKind::Wms, layer, layer_start))
            .collect::<Result<Vec<_>, _>>()?;

        let tile_layer = LayerConfig::new(
            LayerKind::Tile,
            raw.tile_layer_url
                .clone()
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| DEFAULT_TILE_LAYER_URL.to_string()),
            raw.tile_layer_options.clone().unwrap_or_default(),
        )
        .with_attribution(Some(
            raw.tile_layer_attribution
                .as_deref()
                .unwrap_or(DEFAULT_TILE_LAYER_ATTRIBUTION),
        ));

        Ok(Self {
            title: raw.title.clone(),
            anchor,
            zoom: raw.zoom.filter(|z| *z > 0).unwrap_or(DEFAULT_ZOOM),
            card_size: raw.card_size.filter(|s| *s > 0).unwrap_or(DEFAULT_CARD_SIZE),
            focus_follow: FocusFollow::parse(raw.focus_follow.as_deref()),
            theme_mode: ThemeMode::parse(raw.theme_mode.as_deref()),
            history_date_selection: raw.history_date_selection,
            entities,
            tile_layer,
            tile_layers,
            wms,
            plugins: raw.plugins.iter().map(PluginConfig::from_raw).collect(),
            map_options: raw.map_options,
            debug: raw.debug,
        })
    }

    pub fn has_title(&self) -> bool {
        self.title.is_some()
    }

    /// Minimum map height in pixels
    pub fn map_height(&self) -> u32 {
        let height = self.card_size * 50 + 20;
        if self.has_title() {
            height.saturating_sub(TITLE_HEADER_HEIGHT)
        } else {
            height
        }
    }

    /// Every overlay in draw order: base layer, tile layers, then WMS.
    pub fn layers(&self) -> impl Iterator<Item = &LayerConfig> {
        std::iter::once(&self.tile_layer)
            .chain(self.tile_layers.iter())
            .chain(self.wms.iter())
    }
}
