//! The map card: owns one session of controllers per connect and applies
//! state ticks and push events to them in order.

pub mod banner;
pub mod events;
pub mod services;

pub use banner::{WarningBanner, FIRST_RUN_ERROR, UPDATE_ERROR};
pub use events::{CardEvent, EventTarget};
pub use services::Services;

use crate::config::MapConfig;
use crate::error::MapCardError;
use crate::history::WindowChange;
use crate::host::{HostConnection, MapSurface};
use crate::plugin::{PluginRegistry, PluginsRenderService};
use crate::render::{EntitiesRenderService, TileLayersRenderService, ViewportController};
use crate::settings::EngineSettings;
use crate::state::StateSnapshot;
use crate::telemetry::Logger;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;


/// Everything created by one `connect`. Dropped whole on disconnect so a
/// reconnect never reuses a listener or subscription.
struct Session {
    id: Uuid,
    services: Services,
    events: mpsc::UnboundedReceiver<CardEvent>,
    entities: EntitiesRenderService,
    layers: TileLayersRenderService,
    plugins: PluginsRenderService,
    viewport: ViewportController,
    snapshot: StateSnapshot,
}

enum Next {
    Tick(Option<StateSnapshot>),
    Event(Option<CardEvent>),
}

pub struct MapCard {
    config: MapConfig,
    settings: EngineSettings,
    connection: Arc<dyn HostConnection>,
    surface: Arc<dyn MapSurface>,
    registry: PluginRegistry,
    logger: Logger,
    banner: WarningBanner,
    session: Option<Session>,
}

impl MapCard {
    pub fn new(
        config: MapConfig,
        settings: EngineSettings,
        connection: Arc<dyn HostConnection>,
        surface: Arc<dyn MapSurface>,
        registry: PluginRegistry,
    ) -> Self {
        let logger = Logger::new(config.title.as_deref().unwrap_or("map-card"), config.debug);
        Self {
            config,
            settings,
            connection,
            surface,
            registry,
            logger,
            banner: WarningBanner::new(),
            session: None,
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn banner(&self) -> &WarningBanner {
        &self.banner
    }

    pub fn entities(&self) -> Option<&EntitiesRenderService> {
        self.session.as_ref().map(|s| &s.entities)
    }

    pub fn layers(&self) -> Option<&TileLayersRenderService> {
        self.session.as_ref().map(|s| &s.layers)
    }

    pub fn services(&self) -> Option<&Services> {
        self.session.as_ref().map(|s| &s.services)
    }

    pub fn plugins(&self) -> Vec<String> {
        self.session
            .as_ref()
            .map(|s| s.plugins.list_plugins())
            .unwrap_or_default()
    }

    /// Build a fresh session and draw the first frame.
    ///
    /// Failures of single entities, layers or plugins are recovered and
    /// returned; the card stays usable.
    pub async fn connect(&mut self, snapshot: StateSnapshot) -> Vec<MapCardError> {
        if self.session.is_some() {
            self.disconnect().await;
        }

        let id = Uuid::now_v7();
        info!(card = %self.logger.card(), session = %id, "Connecting map card");

        let (tx, rx) = mpsc::unbounded_channel();
        let dark_mode = self.config.theme_mode.is_dark(self.connection.is_dark_mode());
        let services = Services::new(
            self.connection.clone(),
            self.surface.clone(),
            self.settings.clone(),
            self.logger.clone(),
            tx,
            self.config.history_date_selection,
            dark_mode,
        );
        let surface = self.surface.as_ref();
        let mut failures = Vec::new();

        let mut layers = TileLayersRenderService::new();
        layers.setup(self.config.layers(), &services, &snapshot).await;

        let mut entities = EntitiesRenderService::new();
        for (entity_id, e) in entities.setup(&self.config.entities, &services, &snapshot).await {
            self.banner.show(
                surface,
                &format!("Entity: {} could not be loaded. See console for details.", entity_id),
            );
            failures.push(e);
        }

        let mut plugins = PluginsRenderService::new(self.logger.clone());
        failures.extend(plugins.setup(&self.config.plugins, &self.registry, surface).await);

        let viewport = ViewportController::new(
            self.config.anchor.clone(),
            self.config.zoom,
            self.config.focus_follow,
            self.settings.fit_padding,
            self.logger.clone(),
        );
        if let Err(e) = viewport.initial_view(surface, &snapshot, &entities.focus_points()) {
            error!(error = %e, "Failed to set the initial view");
            failures.push(e);
        }

        if !failures.is_empty() {
            self.banner.show(surface, FIRST_RUN_ERROR);
        }

        self.session = Some(Session {
            id,
            services,
            events: rx,
            entities,
            layers,
            plugins,
            viewport,
            snapshot,
        });
        failures
    }

    /// Apply a state tick: move markers, redraw paths and circles, refocus,
    /// then let plugins react.
    pub async fn update(&mut self, snapshot: StateSnapshot) -> Vec<MapCardError> {
        let Some(session) = self.session.as_mut() else {
            warn!("Update ignored; card is not connected");
            return Vec::new();
        };
        let surface = self.surface.as_ref();
        session.snapshot = snapshot;

        let failures = session.entities.update(&session.services, &session.snapshot);
        session
            .viewport
            .follow(surface, &session.entities.focus_points());
        session.plugins.update(surface, &session.snapshot).await;

        if failures.is_empty() {
            self.banner.clear(surface, FIRST_RUN_ERROR);
            self.banner.clear(surface, UPDATE_ERROR);
        } else {
            self.banner.show(surface, UPDATE_ERROR);
        }
        failures
    }

    /// Apply every queued push event. Returns how many were applied.
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let event = match self.session.as_mut().map(|s| s.events.try_recv()) {
                Some(Ok(event)) => event,
                _ => break,
            };
            self.apply(event).await;
            applied += 1;
        }
        applied
    }

    /// Drive the card until `ticks` closes: each received snapshot is an
    /// update, and push events are applied as they arrive.
    pub async fn run(&mut self, mut ticks: mpsc::Receiver<StateSnapshot>) {
        loop {
            let next = {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                tokio::select! {
                    tick = ticks.recv() => Next::Tick(tick),
                    event = session.events.recv() => Next::Event(event),
                }
            };
            match next {
                Next::Tick(Some(snapshot)) => {
                    self.update(snapshot).await;
                }
                Next::Tick(None) => return,
                Next::Event(Some(event)) => self.apply(event).await,
                // Every sender lives in the session, so this only happens
                // mid-teardown
                Next::Event(None) => return,
            }
        }
    }

    async fn apply(&mut self, event: CardEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Session {
            services,
            entities,
            layers,
            snapshot,
            ..
        } = session;

        let result = match event {
            CardEvent::LinkedState {
                target,
                entity_id,
                state,
            } => match target {
                EventTarget::Entity(index) => entities
                    .apply(index, &WindowChange::Linked { entity_id, state }, services, snapshot)
                    .await
                    .map(|_| ()),
                EventTarget::Layer(index) => {
                    layers.on_linked_state(index, &entity_id, &state, services, snapshot)
                }
                EventTarget::LayerUrls => {
                    layers.on_token_state(&entity_id, &state, services, snapshot);
                    Ok(())
                }
            },
            CardEvent::DateRange { target, range } => match target {
                EventTarget::Entity(index) => entities
                    .apply(index, &WindowChange::Broadcast(range), services, snapshot)
                    .await
                    .map(|_| ()),
                EventTarget::Layer(index) => {
                    layers.on_date_range(index, &range, services, snapshot);
                    Ok(())
                }
                EventTarget::LayerUrls => Ok(()),
            },
            CardEvent::LayerLoaded { layer, overlay } => {
                layers.on_loaded(layer, overlay, services);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(error = %e, "Failed to apply card event");
            self.banner.show(self.surface.as_ref(), UPDATE_ERROR);
        }
    }

    /// Tear down every controller and cancel every subscription of the
    /// current session. Queued events are discarded.
    pub async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let surface = self.surface.as_ref();
        let services = &session.services;

        session.entities.teardown(services).await;
        session.layers.teardown(services).await;
        session.plugins.destroy(surface);

        services.history.unsubscribe_all().await;
        services.linked.disconnect().await;
        if let Some(broadcaster) = &services.date_range {
            broadcaster.disconnect().await;
        }
        session.events.close();
        self.banner.clear_all(surface);

        info!(card = %self.logger.card(), session = %session.id, "Map card disconnected");
    }
}
