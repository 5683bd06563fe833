//! Boundary between the engine and the dashboard hosting it.
//!
//! The engine never talks to a websocket or a map widget directly. It sends
//! subscription requests through [`HostConnection`] and draws through
//! [`MapSurface`]. `memory` provides both for tests and the replay binary.

pub mod memory;
pub mod surface;

pub use memory::{InMemoryConnection, InMemoryDateRangeSelector, RecordingSurface, SurfaceOp};
pub use surface::{
    CircleSpec, LoadCallback, MapSurface, MarkerSpec, OverlayId, PathElement, TileLayerSpec,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives every message pushed on one subscription
pub type MessageSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Receives every change of the date range selector
pub type DateRangeSink = Arc<dyn Fn(DateRange) + Send + Sync>;

/// Handle for an open push subscription.
///
/// Dropping the handle does not cancel the subscription; callers must
/// await `unsubscribe` so that no message is delivered afterwards.
#[async_trait]
pub trait Unsubscribe: Send + Sync {
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}

/// Shared `{start, end}` selection published by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// External date range selector component
#[async_trait]
pub trait DateRangeSelector: Send + Sync {
    /// Subscribe to selection changes. The current selection, if any, is
    /// delivered right away.
    async fn subscribe(&self, sink: DateRangeSink) -> Result<Box<dyn Unsubscribe>>;
}

/// Push transport to the dashboard's state store.
///
/// # Messages
/// - `{"type": "history/stream", ...}` streams history samples
/// - `{"type": "subscribe_entities", "entity_ids": [...]}` streams state
///   changes as `{"a": {..}}` (full) or `{"c": {..}}` (delta) payloads
#[async_trait]
pub trait HostConnection: Send + Sync {
    /// Open a push subscription; `sink` is called for every message until
    /// the returned handle is unsubscribed.
    async fn subscribe_message(
        &self,
        request: Value,
        sink: MessageSink,
    ) -> Result<Box<dyn Unsubscribe>>;

    /// The date range selector, if one is mounted on the dashboard yet.
    fn date_range_selector(&self) -> Option<Arc<dyn DateRangeSelector>>;

    fn is_dark_mode(&self) -> bool {
        false
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
