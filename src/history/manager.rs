use crate::config::EntityConfig;
use crate::error::MapCardError;
use crate::history::path::{EntityHistory, PathStyle};
use crate::history::service::{EntrySink, HistoryQuery, HistoryTimelineService};
use crate::history::window::{ResolvedWindow, WindowChange, WindowTracker};
use crate::host::{lock, MapSurface, OverlayId};
use crate::settings::EngineSettings;
use crate::state::StateSnapshot;
use crate::telemetry::Logger;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};

/// Per-entity history state machine.
///
/// Owns the window tracker, the buffer samples are streamed into and the
/// overlay group the path is drawn in. Each bound is fixed, linked to
/// another entity, or both follow the date range broadcast.
pub struct EntityHistoryManager {
    entity_id: String,
    has_history: bool,
    use_base_entity_only: bool,
    tracker: WindowTracker,
    history: Arc<Mutex<EntityHistory>>,
    group: Option<OverlayId>,
    lookback: Duration,
    logger: Logger,
}

impl EntityHistoryManager {
    pub fn new(config: &EntityConfig, title: &str, settings: &EngineSettings, logger: Logger) -> Self {
        let style = PathStyle {
            title: title.to_string(),
            color: config.history.line_color.clone(),
            show_dots: config.history.show_dots,
            show_lines: config.history.show_lines,
            gradual_opacity: config.history.gradual_opacity,
            dot_radius: settings.history_dot_radius,
        };
        Self {
            entity_id: config.id.clone(),
            has_history: config.has_history(),
            use_base_entity_only: config.use_base_entity_only,
            tracker: WindowTracker::new(config.history.window.clone()),
            history: Arc::new(Mutex::new(EntityHistory::new(&config.id, style))),
            group: None,
            lookback: settings.initial_lookback(),
            logger,
        }
    }

    pub fn has_history(&self) -> bool {
        self.has_history
    }

    pub fn tracker(&self) -> &WindowTracker {
        &self.tracker
    }

    pub fn group(&self) -> Option<OverlayId> {
        self.group
    }

    pub fn history(&self) -> Arc<Mutex<EntityHistory>> {
        self.history.clone()
    }

    /// Create the path group and open the first subscription.
    ///
    /// Without a fixed start the first query only looks back a few
    /// seconds; linked bounds and broadcasts refresh it later.
    pub async fn setup(
        &mut self,
        surface: &dyn MapSurface,
        service: &HistoryTimelineService,
        snapshot: &StateSnapshot,
    ) -> Result<(), MapCardError> {
        if !self.has_history {
            self.logger
                .debug("EntityHistoryManager", format!("History for {}: not enabled", self.entity_id));
            return Ok(());
        }

        self.group = Some(surface.add_group());
        self.logger.debug(
            "EntityHistoryManager",
            format!("History for {}: {:?}", self.entity_id, self.tracker.source()),
        );
        self.subscribe(self.tracker.current(), service, snapshot).await
    }

    /// Feed a linked state or broadcast. Refreshes when it moves this window.
    pub async fn apply(
        &mut self,
        change: &WindowChange,
        surface: &dyn MapSurface,
        service: &HistoryTimelineService,
        snapshot: &StateSnapshot,
    ) -> Result<bool, MapCardError> {
        if !self.has_history {
            return Ok(false);
        }
        match self.tracker.apply(change, Utc::now())? {
            Some(window) => {
                self.refresh(window, surface, service, snapshot).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the subscription with one for `window` and wipe the path.
    pub async fn refresh(
        &mut self,
        window: ResolvedWindow,
        surface: &dyn MapSurface,
        service: &HistoryTimelineService,
        snapshot: &StateSnapshot,
    ) -> Result<(), MapCardError> {
        self.logger.debug(
            "EntityHistoryManager",
            format!(
                "Refreshing history for {}: {:?} -> {:?}",
                self.entity_id, window.start, window.end
            ),
        );

        // Samples still in flight from the old window are dropped from here on.
        service.invalidate(&self.entity_id);
        lock(&self.history).clear();
        if let Some(group) = self.group {
            surface.clear_group(group);
        }

        self.subscribe(window, service, snapshot).await
    }

    async fn subscribe(
        &self,
        window: ResolvedWindow,
        service: &HistoryTimelineService,
        snapshot: &StateSnapshot,
    ) -> Result<(), MapCardError> {
        let query = HistoryQuery {
            entity_id: self.entity_id.clone(),
            start: window.query_start(Utc::now(), self.lookback),
            end: window.end,
            use_base_entity_only: self.use_base_entity_only,
        };

        let history = self.history.clone();
        let sink: EntrySink = Arc::new(move |entry| {
            lock(&history).accept(entry);
        });
        service.subscribe(query, snapshot, sink).await
    }

    /// Redraw the path if new samples arrived since the last update.
    pub fn update(&mut self, surface: &dyn MapSurface) {
        let Some(group) = self.group else {
            return;
        };
        let rendered = lock(&self.history).render();
        if let Some(elements) = rendered {
            surface.clear_group(group);
            for element in &elements {
                surface.add_to_group(group, element);
            }
        }
    }

    /// Cancel the subscription and remove the path group.
    pub async fn teardown(&mut self, surface: &dyn MapSurface, service: &HistoryTimelineService) {
        service.unsubscribe(&self.entity_id).await;
        if let Some(group) = self.group.take() {
            surface.remove(group);
        }
        lock(&self.history).clear();
    }
}
