use crate::config::raw::RawPlugin;
use serde_json::{Map, Value};

/// One plugin entry: which factory to load and the options it receives.
/// Never fails at config time; a bad entry surfaces as a load failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub name: String,
    pub url: String,
    pub options: Map<String, Value>,
}

impl PluginConfig {
    pub(crate) fn from_raw(raw: &RawPlugin) -> Self {
        Self {
            name: raw.name.clone(),
            url: raw.url.clone(),
            options: raw.options.clone(),
        }
    }
}
