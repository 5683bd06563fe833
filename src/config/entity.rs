use crate::config::circle::CircleConfig;
use crate::config::color::color_for;
use crate::config::raw::{RawEntity, RawEntityConfig, RawHistoryBound};
use crate::config::tap_action::TapAction;
use crate::date;
use crate::error::MapCardError;
use crate::geo::LatLng;
use chrono::{DateTime, Utc};

const DEFAULT_SIZE: u32 = 48;
const DEFAULT_CSS: &str = "text-align: center; font-size: 60%;";

/// How an entity's marker is drawn
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayMode {
    /// Picture, icon or name abbreviation
    Marker,
    /// Icon glyph only
    Icon,
    /// Formatted entity state as text
    State,
    /// Formatted attribute value with optional prefix/suffix
    Attribute {
        attribute: String,
        prefix: Option<String>,
        suffix: Option<String>,
    },
}

impl DisplayMode {
    /// Modes whose marker is rebuilt whenever the displayed text changes.
    pub fn is_textual(&self) -> bool {
        matches!(self, DisplayMode::State | DisplayMode::Attribute { .. })
    }
}

/// Source of one bound of a history window
#[derive(Debug, Clone, PartialEq)]
pub enum BoundSource {
    /// Literal time; `None` means unbounded (start: none configured, end: now)
    Fixed(Option<DateTime<Utc>>),
    /// Derived from another entity's state
    Linked {
        entity_id: String,
        suffix: Option<String>,
    },
}

impl BoundSource {
    pub fn is_configured(&self) -> bool {
        !matches!(self, BoundSource::Fixed(None))
    }

    pub fn linked_entity(&self) -> Option<&str> {
        match self {
            BoundSource::Linked { entity_id, .. } => Some(entity_id),
            BoundSource::Fixed(_) => None,
        }
    }

    /// Parse a raw bound. Strings that look like entity ids become links,
    /// everything else is a date expression.
    pub(crate) fn from_raw(raw: &RawHistoryBound) -> Result<Self, MapCardError> {
        match raw {
            RawHistoryBound::Entity { entity, suffix } => Ok(BoundSource::Linked {
                entity_id: entity.clone(),
                suffix: suffix.clone(),
            }),
            RawHistoryBound::Text(text) if looks_like_entity_id(text) => Ok(BoundSource::Linked {
                entity_id: text.clone(),
                suffix: None,
            }),
            RawHistoryBound::Text(text) => Ok(BoundSource::Fixed(date::to_absolute(text)?)),
        }
    }
}

/// Where an entity's history window comes from
#[derive(Debug, Clone, PartialEq)]
pub enum WindowSource {
    /// Both bounds follow the shared date range selector
    Broadcast,
    /// Each bound resolved on its own
    Bounds { start: BoundSource, end: BoundSource },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryConfig {
    pub window: WindowSource,
    pub line_color: String,
    pub show_dots: bool,
    pub show_lines: bool,
    pub gradual_opacity: Option<f64>,
}

impl HistoryConfig {
    pub fn has_history(&self) -> bool {
        match &self.window {
            WindowSource::Broadcast => true,
            WindowSource::Bounds { start, end } => {
                start.is_configured() || end.linked_entity().is_some()
            }
        }
    }
}

/// History defaults inherited from the map level
#[derive(Debug, Clone, Default)]
pub struct HistoryDefaults {
    pub start: Option<RawHistoryBound>,
    pub end: Option<RawHistoryBound>,
    pub date_range_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityConfig {
    pub id: String,
    pub display: DisplayMode,
    pub size: u32,
    pub color: String,
    pub icon: Option<String>,
    pub picture: Option<String>,
    pub css: String,
    pub fixed_position: Option<LatLng>,
    pub fallback_position: Option<LatLng>,
    pub z_index_offset: i32,
    pub tap_action: TapAction,
    pub focus_on_fit: bool,
    pub use_base_entity_only: bool,
    pub circle: CircleConfig,
    pub history: HistoryConfig,
}

impl EntityConfig {
    pub fn from_raw(raw: &RawEntity, defaults: &HistoryDefaults) -> Result<Self, MapCardError> {
        let owned;
        let raw = match raw {
            RawEntity::Id(id) => {
                owned = RawEntityConfig {
                    entity: id.clone(),
                    ..Default::default()
                };
                &owned
            }
            RawEntity::Full(config) => config.as_ref(),
        };

        let id = raw.entity.trim().to_string();
        if id.is_empty() {
            return Err(MapCardError::InvalidConfig(
                "entity entry is missing 'entity'".to_string(),
            ));
        }

        let color = raw.color.clone().unwrap_or_else(|| color_for(&id));
        let display = parse_display(raw, &id)?;
        let tap_action = match &raw.tap_action {
            Some(action) => TapAction::from_raw(action)?,
            None => TapAction::default(),
        };

        Ok(Self {
            display,
            size: raw.size.unwrap_or(DEFAULT_SIZE),
            icon: raw.icon.clone(),
            picture: raw.picture.clone(),
            css: raw.css.clone().unwrap_or_else(|| DEFAULT_CSS.to_string()),
            fixed_position: pair(raw.fixed_x, raw.fixed_y),
            fallback_position: pair(raw.fallback_x, raw.fallback_y),
            z_index_offset: raw.z_index_offset.unwrap_or(0),
            tap_action,
            focus_on_fit: raw.focus_on_fit.unwrap_or(true),
            use_base_entity_only: raw.use_base_entity_only.unwrap_or(false),
            circle: CircleConfig::from_raw(raw.circle.as_ref(), &color),
            history: parse_history(raw, defaults, &color)?,
            color,
            id,
        })
    }

    pub fn has_history(&self) -> bool {
        self.history.has_history()
    }
}

fn parse_display(raw: &RawEntityConfig, id: &str) -> Result<DisplayMode, MapCardError> {
    match raw.display.as_deref().unwrap_or("marker") {
        "marker" => Ok(DisplayMode::Marker),
        "icon" => Ok(DisplayMode::Icon),
        "state" => Ok(DisplayMode::State),
        "attribute" => {
            let attribute = raw.attribute.clone().ok_or_else(|| {
                MapCardError::InvalidConfig(format!(
                    "entity {} uses display 'attribute' without 'attribute'",
                    id
                ))
            })?;
            Ok(DisplayMode::Attribute {
                attribute,
                prefix: raw.prefix.clone(),
                suffix: raw.suffix.clone(),
            })
        }
        other => Err(MapCardError::InvalidConfig(format!(
            "entity {} has unknown display '{}'",
            id, other
        ))),
    }
}

fn parse_history(
    raw: &RawEntityConfig,
    defaults: &HistoryDefaults,
    color: &str,
) -> Result<HistoryConfig, MapCardError> {
    let own_bounds = raw.history_start.is_some() || raw.history_end.is_some();

    let window = if !own_bounds && defaults.date_range_enabled {
        WindowSource::Broadcast
    } else {
        let start = match raw.history_start.as_ref().or(defaults.start.as_ref()) {
            Some(bound) => BoundSource::from_raw(bound)?,
            None => BoundSource::Fixed(None),
        };
        let end = match raw.history_end.as_ref().or(defaults.end.as_ref()) {
            Some(bound) => BoundSource::from_raw(bound)?,
            None => BoundSource::Fixed(None),
        };
        WindowSource::Bounds { start, end }
    };

    Ok(HistoryConfig {
        window,
        line_color: raw
            .history_line_color
            .clone()
            .unwrap_or_else(|| color.to_string()),
        show_dots: raw.history_show_dots.unwrap_or(true),
        show_lines: raw.history_show_lines.unwrap_or(true),
        gradual_opacity: raw.gradual_opacity.map(|g| g.clamp(0.0, 1.0)),
    })
}

fn pair(x: Option<f64>, y: Option<f64>) -> Option<LatLng> {
    match (x, y) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some(LatLng::new(x, y)),
        _ => None,
    }
}

/// `domain.object_id`, lowercase, no whitespace
pub fn looks_like_entity_id(value: &str) -> bool {
    let Some((domain, object_id)) = value.split_once('.') else {
        return false;
    };
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };
    valid_part(domain)
        && valid_part(object_id)
        && domain.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}
