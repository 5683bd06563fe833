use std::fmt;

/// Errors raised by the map card engine.
///
/// Configuration variants are fatal and stop the card from rendering.
/// Runtime variants are caught per entity, layer or plugin and surfaced
/// as a warning banner on the map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapCardError {
    /// A date expression could not be parsed
    InvalidDateFormat(String),
    /// No x/y, no focus entity and no entities configured
    MissingViewportAnchor,
    /// Tap action kind unknown or missing a required field
    InvalidTapAction(String),
    /// Structurally invalid configuration (wrong types, unknown enum values)
    InvalidConfig(String),
    /// Entity has no coordinates and no fallback configured
    MissingPosition(String),
    /// Entity is absent from the state snapshot
    EntityNotFound(String),
    HistorySubscriptionFailure { entity_id: String, reason: String },
    PluginLoadFailure { name: String, reason: String },
    PluginLifecycleFailure { name: String, stage: &'static str, reason: String },
}

impl MapCardError {
    /// True for errors that must halt card rendering.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MapCardError::InvalidDateFormat(_)
                | MapCardError::MissingViewportAnchor
                | MapCardError::InvalidTapAction(_)
                | MapCardError::InvalidConfig(_)
        )
    }
}

impl fmt::Display for MapCardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapCardError::InvalidDateFormat(input) => {
                write!(f, "Invalid input string for Date: {}", input)
            }
            MapCardError::MissingViewportAnchor => write!(
                f,
                "We need a map latitude & longitude; set at least [x, y], a focus_entity or have at least 1 entities defined."
            ),
            MapCardError::InvalidTapAction(reason) => write!(f, "invalid tap_action: {}", reason),
            MapCardError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            MapCardError::MissingPosition(entity_id) => write!(
                f,
                "Entity: {} has no latitude & longitude and no fallback configured",
                entity_id
            ),
            MapCardError::EntityNotFound(entity_id) => write!(f, "Entity {} not found", entity_id),
            MapCardError::HistorySubscriptionFailure { entity_id, reason } => {
                write!(f, "Error retrieving history for entity {}: {}", entity_id, reason)
            }
            MapCardError::PluginLoadFailure { name, reason } => {
                write!(f, "Failed to load plugin {}: {}", name, reason)
            }
            MapCardError::PluginLifecycleFailure { name, stage, reason } => {
                write!(f, "Plugin {} failed during {}: {}", name, stage, reason)
            }
        }
    }
}

impl std::error::Error for MapCardError {}
