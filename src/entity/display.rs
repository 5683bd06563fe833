use crate::config::{DisplayMode, EntityConfig};
use crate::state::EntityState;

/// What a marker shows for the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerAppearance {
    pub title: String,
    pub icon: Option<String>,
    pub picture: Option<String>,
}

/// Short marker label from a friendly name.
///
/// Names shorter than five characters are kept as is. Longer ones become
/// the uppercased initials of their words, at most three.
pub fn abbreviate(name: &str) -> String {
    if name.chars().count() < 5 {
        return name.to_string();
    }
    name.split([' ', '_', '/', '-'])
        .filter_map(|part| part.chars().next())
        .take(3)
        .collect::<String>()
        .to_uppercase()
}

/// Name shown in tooltips: the friendly name, else the id.
pub fn display_name(config: &EntityConfig, state: Option<&EntityState>) -> String {
    state
        .and_then(EntityState::friendly_name)
        .unwrap_or(config.id.as_str())
        .to_string()
}

pub fn appearance(config: &EntityConfig, state: Option<&EntityState>) -> MarkerAppearance {
    match &config.display {
        DisplayMode::Marker => MarkerAppearance {
            title: abbreviate(&display_name(config, state)),
            icon: icon(config, state),
            picture: config
                .picture
                .clone()
                .or_else(|| state.and_then(EntityState::entity_picture).map(str::to_string)),
        },
        DisplayMode::Icon => MarkerAppearance {
            title: abbreviate(&display_name(config, state)),
            icon: icon(config, state),
            picture: None,
        },
        DisplayMode::State => MarkerAppearance {
            title: state.map(EntityState::formatted_state).unwrap_or_default(),
            icon: None,
            picture: None,
        },
        DisplayMode::Attribute {
            attribute,
            prefix,
            suffix,
        } => {
            let value = state
                .and_then(|s| s.formatted_attribute(attribute))
                .unwrap_or_default();
            MarkerAppearance {
                title: format!(
                    "{}{}{}",
                    prefix.as_deref().unwrap_or(""),
                    value,
                    suffix.as_deref().unwrap_or("")
                ),
                icon: None,
                picture: None,
            }
        }
    }
}

fn icon(config: &EntityConfig, state: Option<&EntityState>) -> Option<String> {
    config
        .icon
        .clone()
        .or_else(|| state.and_then(EntityState::icon).map(str::to_string))
}
