use crate::card::events::CardEvent;
use crate::history::HistoryTimelineService;
use crate::host::{HostConnection, MapSurface};
use crate::settings::EngineSettings;
use crate::subscription::{DateRangeBroadcaster, LinkedEntityWatcher};
use crate::telemetry::Logger;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Collaborators of one card session, handed to every controller.
///
/// Rebuilt from scratch on every connect so nothing survives a
/// disconnect.
#[derive(Clone)]
pub struct Services {
    pub connection: Arc<dyn HostConnection>,
    pub surface: Arc<dyn MapSurface>,
    pub history: Arc<HistoryTimelineService>,
    pub linked: LinkedEntityWatcher,
    /// Present only when `history_date_selection` is enabled
    pub date_range: Option<DateRangeBroadcaster>,
    pub settings: EngineSettings,
    pub logger: Logger,
    pub events: mpsc::UnboundedSender<CardEvent>,
    pub dark_mode: bool,
}

impl Services {
    /// Fresh collaborators for one session. Starts date range discovery when
    /// `follow_date_range` is set, so it must run inside a tokio runtime.
    pub fn new(
        connection: Arc<dyn HostConnection>,
        surface: Arc<dyn MapSurface>,
        settings: EngineSettings,
        logger: Logger,
        events: mpsc::UnboundedSender<CardEvent>,
        follow_date_range: bool,
        dark_mode: bool,
    ) -> Self {
        let history = Arc::new(HistoryTimelineService::new(
            connection.clone(),
            settings.significant_changes_only,
            logger.clone(),
        ));
        let linked = LinkedEntityWatcher::new(connection.clone(), logger.clone());
        let date_range = follow_date_range
            .then(|| DateRangeBroadcaster::start(connection.clone(), &settings, logger.clone()));

        Self {
            connection,
            surface,
            history,
            linked,
            date_range,
            settings,
            logger,
            events,
            dark_mode,
        }
    }
}
