//! Third-party map extensions.
//!
//! A plugin is created from its configured `url` through a [`PluginRegistry`]
//! of factories, then initialised and asked to draw once. It receives every
//! tick afterwards and is destroyed when the card disconnects.
//!
//! # Example
//! ```no_run
//! use map_card::host::MapSurface;
//! use map_card::plugin::Plugin;
//! use async_trait::async_trait;
//! use anyhow::Result;
//!
//! struct Heatmap {
//!     name: String,
//! }
//!
//! #[async_trait]
//! impl Plugin for Heatmap {
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//!
//!     async fn render_map(&mut self, _surface: &dyn MapSurface) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn destroy(&mut self, _surface: &dyn MapSurface) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

pub mod circle;

pub use circle::{CirclePlugin, CIRCLE_PLUGIN_URL};

use crate::config::PluginConfig;
use crate::error::MapCardError;
use crate::host::MapSurface;
use crate::state::StateSnapshot;
use crate::telemetry::Logger;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};


#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once after construction
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Draw onto the map. Called once after `init`.
    async fn render_map(&mut self, surface: &dyn MapSurface) -> Result<()>;

    /// Called on every tick
    async fn update(&mut self, _surface: &dyn MapSurface, _snapshot: &StateSnapshot) -> Result<()> {
        Ok(())
    }

    /// Remove everything the plugin drew and release its resources.
    fn destroy(&mut self, surface: &dyn MapSurface) -> Result<()>;
}

/// Builds a plugin from its configuration
pub type PluginFactory = Arc<dyn Fn(&PluginConfig) -> Result<Box<dyn Plugin>> + Send + Sync>;

/// Plugin factories by module url
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins shipped with the card
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            CIRCLE_PLUGIN_URL,
            Arc::new(|config: &PluginConfig| -> Result<Box<dyn Plugin>> {
                Ok(Box::new(CirclePlugin::from_config(config)?))
            }),
        );
        registry
    }

    pub fn register(&mut self, url: &str, factory: PluginFactory) {
        self.factories.insert(url.to_string(), factory);
    }

    pub fn create(&self, config: &PluginConfig) -> Result<Box<dyn Plugin>, MapCardError> {
        let factory = self
            .factories
            .get(&config.url)
            .ok_or_else(|| MapCardError::PluginLoadFailure {
                name: config.name.clone(),
                reason: format!("no plugin module at {}", config.url),
            })?;
        factory(config).map_err(|e| MapCardError::PluginLoadFailure {
            name: config.name.clone(),
            reason: format!("{:#}", e),
        })
    }
}

/// Runs the configured plugins. A failing plugin never affects the others.
pub struct PluginsRenderService {
    plugins: Vec<Box<dyn Plugin>>,
    logger: Logger,
}

impl PluginsRenderService {
    pub fn new(logger: Logger) -> Self {
        Self {
            plugins: Vec::new(),
            logger,
        }
    }

    /// Create, initialise and draw every plugin. Returns the failures.
    pub async fn setup(
        &mut self,
        configs: &[PluginConfig],
        registry: &PluginRegistry,
        surface: &dyn MapSurface,
    ) -> Vec<MapCardError> {
        let mut failures = Vec::new();
        for config in configs {
            if let Err(e) = self.register(config, registry, surface).await {
                error!(plugin = %config.name, url = %config.url, error = %e, "Failed to load plugin");
                failures.push(e);
            }
        }
        self.logger
            .debug("PluginsRenderService", "All plugins have been loaded and initialized.");
        failures
    }

    async fn register(
        &mut self,
        config: &PluginConfig,
        registry: &PluginRegistry,
        surface: &dyn MapSurface,
    ) -> Result<(), MapCardError> {
        if self.plugins.iter().any(|p| p.name() == config.name) {
            warn!(plugin = %config.name, "Plugin is already registered");
            return Ok(());
        }

        let mut plugin = registry.create(config)?;
        plugin
            .init()
            .await
            .map_err(|e| lifecycle_failure(&config.name, "init", e))?;

        self.logger.debug(
            "PluginsRenderService",
            format!("Plugin {} has been registered and initialized.", config.name),
        );
        let rendered = plugin.render_map(surface).await;
        self.plugins.push(plugin);
        rendered.map_err(|e| lifecycle_failure(&config.name, "render", e))
    }

    pub async fn update(&mut self, surface: &dyn MapSurface, snapshot: &StateSnapshot) {
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.update(surface, snapshot).await {
                error!(error = %lifecycle_failure(plugin.name(), "update", e), "Plugin update failed");
            }
        }
    }

    pub fn destroy(&mut self, surface: &dyn MapSurface) {
        for mut plugin in self.plugins.drain(..) {
            if let Err(e) = plugin.destroy(surface) {
                error!(error = %lifecycle_failure(plugin.name(), "destroy", e), "Plugin destroy failed");
            }
        }
    }

    pub fn list_plugins(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }
}

fn lifecycle_failure(name: &str, stage: &'static str, e: anyhow::Error) -> MapCardError {
    MapCardError::PluginLifecycleFailure {
        name: name.to_string(),
        stage,
        reason: format!("{:#}", e),
    }
}
