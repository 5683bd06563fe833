use crate::config::raw::RawTapAction;
use crate::error::MapCardError;
use serde::Serialize;
use serde_json::Value;

/// What tapping a marker does, validated at configuration time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TapAction {
    #[default]
    MoreInfo,
    None,
    Navigate { navigation_path: String },
    Url { url_path: String },
    CallService {
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl TapAction {
    pub fn from_raw(raw: &RawTapAction) -> Result<Self, MapCardError> {
        let action = raw.action.as_deref().unwrap_or("more-info");
        match action {
            "more-info" => Ok(TapAction::MoreInfo),
            "none" => Ok(TapAction::None),
            "navigate" => {
                let path = required(&raw.navigation_path, "navigate", "navigation_path")?;
                Ok(TapAction::Navigate {
                    navigation_path: path,
                })
            }
            "url" => {
                let path = required(&raw.url_path, "url", "url_path")?;
                Ok(TapAction::Url { url_path: path })
            }
            "call-service" | "perform-action" => {
                let service = required(&raw.service, action, "service")?;
                Ok(TapAction::CallService {
                    service,
                    data: raw.data.clone(),
                })
            }
            other => Err(MapCardError::InvalidTapAction(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}

fn required(value: &Option<String>, action: &str, field: &str) -> Result<String, MapCardError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(MapCardError::InvalidTapAction(format!(
            "action '{}' requires '{}'",
            action, field
        ))),
    }
}
