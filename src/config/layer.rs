use crate::config::entity::BoundSource;
use crate::config::raw::{RawHistoryBound, RawLayer, RawLayerHistory};
use crate::error::MapCardError;
use serde_json::{Map, Value};

/// Overlay kind, dispatched once when the tile layer is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Tile,
    Wms,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Tile => "tile",
            LayerKind::Wms => "wms",
        }
    }
}

/// Where a dated layer takes its date from
#[derive(Debug, Clone, PartialEq)]
pub enum LayerHistorySource {
    /// Broadcaster if present, else the map-level `history_start`
    Auto { fallback: Option<BoundSource> },
    /// Another entity's state, converted with `suffix`
    Entity {
        entity_id: String,
        suffix: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerHistoryConfig {
    pub property: String,
    pub source: LayerHistorySource,
    pub force_midnight: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    pub kind: LayerKind,
    pub url: String,
    pub options: Map<String, Value>,
    pub history: Option<LayerHistoryConfig>,
}

impl LayerConfig {
    pub fn new(kind: LayerKind, url: impl Into<String>, options: Map<String, Value>) -> Self {
        Self {
            kind,
            url: url.into(),
            options,
            history: None,
        }
    }

    /// `attribution` is merged under the configured options, which win.
    pub fn with_attribution(mut self, attribution: Option<&str>) -> Self {
        if let Some(attribution) = attribution {
            self.options
                .entry("attribution")
                .or_insert_with(|| Value::String(attribution.to_string()));
        }
        self
    }

    pub(crate) fn from_raw(
        kind: LayerKind,
        raw: &RawLayer,
        map_history_start: Option<&RawHistoryBound>,
    ) -> Result<Self, MapCardError> {
        if raw.url.trim().is_empty() {
            return Err(MapCardError::InvalidConfig(format!(
                "{} layer is missing 'url'",
                kind.as_str()
            )));
        }

        let history = match &raw.history {
            Some(history) => parse_history(history, map_history_start)?,
            None => None,
        };

        Ok(Self {
            kind,
            url: raw.url.clone(),
            options: raw.options.clone(),
            history,
        })
    }
}

fn parse_history(
    raw: &RawLayerHistory,
    map_history_start: Option<&RawHistoryBound>,
) -> Result<Option<LayerHistoryConfig>, MapCardError> {
    let Some(property) = raw.property.clone().filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let source = match raw.source.as_deref() {
        None | Some("auto") => LayerHistorySource::Auto {
            fallback: map_history_start.map(BoundSource::from_raw).transpose()?,
        },
        Some(entity_id) => LayerHistorySource::Entity {
            entity_id: entity_id.to_string(),
            suffix: raw.suffix.clone(),
        },
    };

    Ok(Some(LayerHistoryConfig {
        property,
        source,
        force_midnight: raw.force_midnight,
    }))
}
