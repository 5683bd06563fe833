use crate::card::{EventTarget, Services};
use crate::config::EntityConfig;
use crate::entity::EntityController;
use crate::error::MapCardError;
use crate::geo::LatLng;
use crate::history::WindowChange;
use crate::render::{range_listener, unwatch, watch};
use crate::state::StateSnapshot;
use crate::subscription::ListenerHandle;
use tracing::{error, warn};

/// Every entity controller of the card.
///
/// Controllers that fail setup are skipped with a warning; the rest keep
/// working. Event targets index into the surviving controllers.
pub struct EntitiesRenderService {
    controllers: Vec<EntityController>,
    handles: Vec<ListenerHandle>,
}

impl EntitiesRenderService {
    pub fn new() -> Self {
        Self {
            controllers: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Build a controller per entity and wire its linked entities and
    /// date range to the card's queue. Returns the skipped entity ids with
    /// their failure.
    pub async fn setup(
        &mut self,
        configs: &[EntityConfig],
        services: &Services,
        snapshot: &StateSnapshot,
    ) -> Vec<(String, MapCardError)> {
        let mut failures = Vec::new();
        for config in configs {
            let entity_id = config.id.clone();
            match EntityController::setup(config.clone(), services, snapshot).await {
                Ok(controller) => self.controllers.push(controller),
                Err(e) => {
                    error!(entity_id = %entity_id, error = %e, "Entity skipped due to missing data");
                    failures.push((entity_id, e));
                }
            }
        }

        for index in 0..self.controllers.len() {
            let target = EventTarget::Entity(index);
            let history = self.controllers[index].history();
            if !history.has_history() {
                continue;
            }
            let follows_broadcast = history.tracker().follows_broadcast();
            let linked = history.tracker().linked_entities();

            for entity_id in linked {
                if let Some(handle) = watch(services, target, &entity_id).await {
                    self.handles.push(handle);
                }
            }
            if follows_broadcast {
                match &services.date_range {
                    Some(broadcaster) => broadcaster.on_date_range_change(range_listener(services, target)),
                    None => warn!(
                        entity_id = %self.controllers[index].id(),
                        "Entity follows the date range but no broadcaster is running"
                    ),
                }
            }
        }
        failures
    }

    /// Update every controller; a failing one does not stop the others.
    pub fn update(&mut self, services: &Services, snapshot: &StateSnapshot) -> Vec<MapCardError> {
        let mut failures = Vec::new();
        for controller in &mut self.controllers {
            if let Err(e) = controller.update(services, snapshot) {
                error!(entity_id = %controller.id(), error = %e, "Entity update failed");
                failures.push(e);
            }
        }
        failures
    }

    /// Route a window change to the controller it targets.
    pub async fn apply(
        &mut self,
        index: usize,
        change: &WindowChange,
        services: &Services,
        snapshot: &StateSnapshot,
    ) -> Result<bool, MapCardError> {
        match self.controllers.get_mut(index) {
            Some(controller) => controller.apply_window(change, services, snapshot).await,
            None => Ok(false),
        }
    }

    /// Positions considered when fitting the view
    pub fn focus_points(&self) -> Vec<LatLng> {
        self.controllers
            .iter()
            .filter(|c| c.config().focus_on_fit)
            .map(EntityController::position)
            .collect()
    }

    pub fn controllers(&self) -> &[EntityController] {
        &self.controllers
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityController> {
        self.controllers.iter().find(|c| c.id() == entity_id)
    }

    pub async fn teardown(&mut self, services: &Services) {
        unwatch(services, std::mem::take(&mut self.handles)).await;
        for mut controller in self.controllers.drain(..) {
            controller.teardown(services).await;
        }
    }
}

impl Default for EntitiesRenderService {
    fn default() -> Self {
        Self::new()
    }
}
