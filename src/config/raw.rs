//! Card configuration exactly as the dashboard hands it over.

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMapConfig {
    pub title: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub zoom: Option<u32>,
    pub card_size: Option<u32>,
    pub focus_entity: Option<String>,
    pub focus_follow: Option<String>,
    pub history_date_selection: bool,
    pub history_start: Option<RawHistoryBound>,
    pub history_end: Option<RawHistoryBound>,
    pub entities: Vec<RawEntity>,
    pub tile_layer_url: Option<String>,
    pub tile_layer_options: Option<Map<String, Value>>,
    pub tile_layer_attribution: Option<String>,
    pub tile_layers: Vec<RawLayer>,
    pub wms: Vec<RawLayer>,
    pub plugins: Vec<RawPlugin>,
    pub theme_mode: Option<String>,
    pub map_options: Map<String, Value>,
    pub debug: bool,
}

/// `history_start` / `history_end`: a date expression, an entity id, or
/// `{entity, suffix}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawHistoryBound {
    Entity {
        entity: String,
        #[serde(default)]
        suffix: Option<String>,
    },
    Text(String),
}

/// Entity entry: bare id or full object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEntity {
    Id(String),
    Full(Box<RawEntityConfig>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEntityConfig {
    pub entity: String,
    pub display: Option<String>,
    pub size: Option<u32>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub picture: Option<String>,
    pub css: Option<String>,
    pub attribute: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub history_start: Option<RawHistoryBound>,
    pub history_end: Option<RawHistoryBound>,
    pub history_line_color: Option<String>,
    pub history_show_dots: Option<bool>,
    pub history_show_lines: Option<bool>,
    pub gradual_opacity: Option<f64>,
    pub fixed_x: Option<f64>,
    pub fixed_y: Option<f64>,
    pub fallback_x: Option<f64>,
    pub fallback_y: Option<f64>,
    pub circle: Option<RawCircle>,
    pub tap_action: Option<RawTapAction>,
    pub focus_on_fit: Option<bool>,
    pub z_index_offset: Option<i32>,
    pub use_base_entity_only: Option<bool>,
}

/// `circle: auto` or an options object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawCircle {
    Keyword(String),
    Options(RawCircleOptions),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawCircleOptions {
    pub radius: Option<f64>,
    pub source: Option<String>,
    pub attribute: Option<String>,
    pub color: Option<String>,
    pub fill_opacity: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTapAction {
    pub action: Option<String>,
    pub navigation_path: Option<String>,
    pub url_path: Option<String>,
    #[serde(alias = "perform_action")]
    pub service: Option<String>,
    #[serde(alias = "service_data")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLayer {
    pub url: String,
    pub options: Map<String, Value>,
    pub history: Option<RawLayerHistory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLayerHistory {
    pub property: Option<String>,
    pub source: Option<String>,
    pub suffix: Option<String>,
    pub force_midnight: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPlugin {
    pub name: String,
    pub url: String,
    pub options: Map<String, Value>,
}
