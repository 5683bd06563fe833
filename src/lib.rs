// Card lifecycle and the event queue
pub mod card;

// Configuration model
pub mod config;

// Date expressions and formatting
pub mod date;

// Errors
pub mod error;

// Coordinates and bounds
pub mod geo;

// Per-entity controllers: marker, circle
pub mod entity;

// History timelines and path geometry
pub mod history;

// Host transport and map surface boundary
pub mod host;

// Tile and WMS layers
pub mod layer;

// Third-party extensions
pub mod plugin;

// Orchestration of entities, layers and the viewport
pub mod render;

// Engine settings
pub mod settings;

// Entity state model
pub mod state;

// Linked entity and date range subscriptions
pub mod subscription;

// Logging
pub mod telemetry;

pub use card::MapCard;
pub use config::MapConfig;
pub use error::MapCardError;
pub use settings::EngineSettings;
pub use state::StateSnapshot;
