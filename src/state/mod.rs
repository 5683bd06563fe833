// Host entity states and snapshots

mod entity;
mod snapshot;
mod store;

pub use entity::{EntityState, StateUpdate};
pub use snapshot::{LinkedState, StateSnapshot};
pub use store::StateStore;
