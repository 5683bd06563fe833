// Orchestration over every entity, layer and the viewport

pub mod entities;
pub mod layers;
pub mod viewport;

pub use entities::EntitiesRenderService;
pub use layers::TileLayersRenderService;
pub use viewport::ViewportController;

use crate::card::{CardEvent, EventTarget, Services};
use crate::host::DateRange;
use crate::state::LinkedState;
use crate::subscription::{ListenerHandle, RangeListener, StateListener};
use tracing::warn;


/// Listener that queues every state of `entity_id` for `target`.
pub(crate) fn linked_listener(services: &Services, target: EventTarget, entity_id: &str) -> StateListener {
    let events = services.events.clone();
    let entity_id = entity_id.to_string();
    std::sync::Arc::new(move |state: &LinkedState| {
        let _ = events.send(CardEvent::LinkedState {
            target,
            entity_id: entity_id.clone(),
            state: state.clone(),
        });
    })
}

pub(crate) fn range_listener(services: &Services, target: EventTarget) -> RangeListener {
    let events = services.events.clone();
    std::sync::Arc::new(move |range: &DateRange| {
        let _ = events.send(CardEvent::DateRange {
            target,
            range: *range,
        });
    })
}

/// Watch `entity_id` on behalf of `target`; failures are logged only.
pub(crate) async fn watch(
    services: &Services,
    target: EventTarget,
    entity_id: &str,
) -> Option<ListenerHandle> {
    match services
        .linked
        .on_state_change(entity_id, linked_listener(services, target, entity_id))
        .await
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(entity_id = %entity_id, error = %e, "Failed to watch linked entity");
            None
        }
    }
}

pub(crate) async fn unwatch(services: &Services, handles: Vec<ListenerHandle>) {
    for handle in handles {
        if let Err(e) = services.linked.remove_listener(&handle).await {
            warn!(entity_id = %handle.entity_id(), error = %e, "Failed to remove linked listener");
        }
    }
}
