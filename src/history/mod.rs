// Per-entity history: window resolution, the sample stream and path geometry

pub mod manager;
pub mod path;
pub mod service;
pub mod timeline;
pub mod window;

pub use manager::EntityHistoryManager;
pub use path::{opacity, EntityHistory, PathStyle};
pub use service::{tracked_ids, EntrySink, HistoryQuery, HistoryTimelineService};
pub use timeline::TimelineEntry;
pub use window::{ResolvedWindow, WindowChange, WindowTracker};

#[cfg(test)]
mod tests;
