use crate::config::PluginConfig;
use crate::geo::LatLng;
use crate::host::{CircleSpec, MapSurface, OverlayId};
use crate::plugin::Plugin;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

pub const CIRCLE_PLUGIN_URL: &str = "builtin:circle";

const DEFAULT_COLOR: &str = "#3388ff";
const DEFAULT_FILL_OPACITY: f64 = 0.2;

/// Draws one fixed circle from its options: `x`, `y`, `r` and any
/// renderer options
pub struct CirclePlugin {
    name: String,
    center: LatLng,
    radius: f64,
    color: String,
    fill_opacity: f64,
    options: Map<String, Value>,
    overlay: Option<OverlayId>,
}

impl CirclePlugin {
    pub fn from_config(config: &PluginConfig) -> Result<Self> {
        let mut options = config.options.clone();
        let mut take = |key: &str| -> Result<f64> {
            options
                .remove(key)
                .and_then(|v| v.as_f64())
                .with_context(|| format!("circle plugin {} needs a numeric '{}'", config.name, key))
        };
        let x = take("x")?;
        let y = take("y")?;
        let radius = take("r")?;

        let color = options
            .remove("color")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_COLOR.to_string());
        let fill_opacity = options
            .remove("fillOpacity")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_FILL_OPACITY);

        Ok(Self {
            name: config.name.clone(),
            center: LatLng::new(x, y),
            radius,
            color,
            fill_opacity,
            options,
            overlay: None,
        })
    }
}

#[async_trait]
impl Plugin for CirclePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn render_map(&mut self, surface: &dyn MapSurface) -> Result<()> {
        debug!(plugin = %self.name, "Drawing circle");
        self.overlay = Some(surface.add_circle(&CircleSpec {
            center: self.center,
            radius: self.radius,
            color: self.color.clone(),
            fill_opacity: self.fill_opacity,
            options: self.options.clone(),
        }));
        Ok(())
    }

    fn destroy(&mut self, surface: &dyn MapSurface) -> Result<()> {
        if let Some(overlay) = self.overlay.take() {
            surface.remove(overlay);
        }
        Ok(())
    }
}
