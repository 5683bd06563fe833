use crate::host::{DateRange, OverlayId};
use crate::state::LinkedState;

/// Which controller an event is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// Index into the entity controllers
    Entity(usize),
    /// Index into the layer reconcilers
    Layer(usize),
    /// Every layer whose URL references the entity
    LayerUrls,
}

/// Push events funneled into the card's queue.
///
/// Listener callbacks never touch controllers directly; they send one of
/// these and the card applies it on its own turn.
#[derive(Debug, Clone, PartialEq)]
pub enum CardEvent {
    LinkedState {
        target: EventTarget,
        entity_id: String,
        state: LinkedState,
    },
    DateRange {
        target: EventTarget,
        range: DateRange,
    },
    /// A replacement tile layer finished loading
    LayerLoaded { layer: usize, overlay: OverlayId },
}
