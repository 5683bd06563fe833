use crate::error::MapCardError;
use crate::geo::LatLng;
use crate::history::timeline::TimelineEntry;
use crate::host::{HostConnection, MessageSink, Unsubscribe};
use crate::state::StateSnapshot;
use crate::subscription::protocol::{to_request, HistoryStreamMessage, HistoryStreamRequest};
use crate::telemetry::Logger;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Receives every accepted sample of one subscription
pub type EntrySink = Arc<dyn Fn(TimelineEntry) + Send + Sync>;

/// What to stream for one tracked entity
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub entity_id: String,
    pub start: DateTime<Utc>,
    /// `None` streams up to now and keeps streaming live samples
    pub end: Option<DateTime<Utc>>,
    pub use_base_entity_only: bool,
}

/// Source ids streamed for an entity: the entity itself, then its
/// device trackers unless `use_base_entity_only` is set.
pub fn tracked_ids(entity_id: &str, use_base_entity_only: bool, snapshot: &StateSnapshot) -> Vec<String> {
    let mut ids = vec![entity_id.to_string()];
    if !use_base_entity_only {
        if let Some(state) = snapshot.get(entity_id) {
            ids.extend(
                state
                    .device_trackers()
                    .into_iter()
                    .filter(|tracker| tracker != entity_id),
            );
        }
    }
    ids
}

/// History streams, at most one live subscription per entity.
///
/// Each subscription is tagged with a generation. Subscribing again, or
/// unsubscribing, bumps the generation before the old subscription is
/// cancelled, so a sample still in flight from the old one is dropped.
pub struct HistoryTimelineService {
    connection: Arc<dyn HostConnection>,
    significant_changes_only: bool,
    active: DashMap<String, Box<dyn Unsubscribe>>,
    generations: Arc<DashMap<String, u64>>,
    next_generation: AtomicU64,
    logger: Logger,
}

impl HistoryTimelineService {
    pub fn new(
        connection: Arc<dyn HostConnection>,
        significant_changes_only: bool,
        logger: Logger,
    ) -> Self {
        Self {
            connection,
            significant_changes_only,
            active: DashMap::new(),
            generations: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
            logger,
        }
    }

    /// Open a history stream for `query.entity_id`, replacing any previous
    /// one. The previous subscription is fully cancelled first.
    pub async fn subscribe(
        &self,
        query: HistoryQuery,
        snapshot: &StateSnapshot,
        on_entry: EntrySink,
    ) -> Result<(), MapCardError> {
        let entity_id = query.entity_id.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.generations.insert(entity_id.clone(), generation);

        let previous = self.active.remove(&entity_id).map(|(_, handle)| handle);
        if let Some(previous) = previous {
            if let Err(e) = previous.unsubscribe().await {
                warn!(entity_id = %entity_id, error = %e, "Failed to cancel previous history subscription");
            }
            self.logger
                .debug("HistoryTimelineService", format!("unsubscribed history for {}", entity_id));
        }

        let ids = tracked_ids(&entity_id, query.use_base_entity_only, snapshot);
        let request = HistoryStreamRequest::new(
            ids,
            self.significant_changes_only,
            query.start,
            query.end,
        );
        let failure = |reason: String| MapCardError::HistorySubscriptionFailure {
            entity_id: entity_id.clone(),
            reason,
        };
        let request = to_request(&request).map_err(|e| failure(e.to_string()))?;

        let sink = self.sink_for(&entity_id, generation, on_entry);
        match self.connection.subscribe_message(request, sink).await {
            Ok(handle) => {
                let current = self.generations.get(&entity_id).map(|g| *g) == Some(generation);
                if current {
                    self.active.insert(entity_id.clone(), handle);
                    self.logger.debug(
                        "HistoryTimelineService",
                        format!(
                            "successfully subscribed to history from {} showing {} till {}",
                            entity_id,
                            query.start,
                            query.end.map_or_else(|| "now".to_string(), |e| e.to_string())
                        ),
                    );
                } else if let Err(e) = handle.unsubscribe().await {
                    // Superseded while opening
                    warn!(entity_id = %entity_id, error = %e, "Failed to cancel superseded history subscription");
                }
                Ok(())
            }
            Err(e) => {
                self.generations
                    .remove_if(&entity_id, |_, current| *current == generation);
                let err = failure(format!("{:#}", e));
                error!(entity_id = %entity_id, error = %err, "History subscription failed");
                Err(err)
            }
        }
    }

    fn sink_for(&self, entity_id: &str, generation: u64, on_entry: EntrySink) -> MessageSink {
        let generations = self.generations.clone();
        let entity_id = entity_id.to_string();
        Arc::new(move |message: Value| {
            let live = generations.get(&entity_id).map(|g| *g) == Some(generation);
            if !live {
                debug!(entity_id = %entity_id, "Dropping sample from cancelled history subscription");
                return;
            }

            let message: HistoryStreamMessage = match serde_json::from_value(message) {
                Ok(message) => message,
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Malformed history message");
                    return;
                }
            };

            for (source_id, samples) in message.states {
                for sample in samples {
                    let position = match (sample.coordinate("latitude"), sample.coordinate("longitude")) {
                        (Some(lat), Some(lng)) => LatLng::new(lat, lng),
                        _ => {
                            warn!(entity_id = %source_id, "History sample without coordinates dropped");
                            continue;
                        }
                    };
                    let Some(timestamp) = sample.timestamp() else {
                        warn!(entity_id = %source_id, lu = sample.lu, "History sample with invalid timestamp dropped");
                        continue;
                    };
                    on_entry(TimelineEntry {
                        timestamp,
                        original_entity_id: entity_id.clone(),
                        entity_id: source_id.clone(),
                        state: sample.state(),
                        position,
                        attributes: sample.a,
                    });
                }
            }
        })
    }

    /// Stop delivering samples for `entity_id` without closing the stream.
    /// The next `subscribe` replaces it.
    pub fn invalidate(&self, entity_id: &str) {
        self.generations.remove(entity_id);
    }

    /// Cancel the subscription of one entity, if any.
    pub async fn unsubscribe(&self, entity_id: &str) {
        self.generations.remove(entity_id);
        let handle = self.active.remove(entity_id).map(|(_, handle)| handle);
        if let Some(handle) = handle {
            if let Err(e) = handle.unsubscribe().await {
                warn!(entity_id = %entity_id, error = %e, "Failed to cancel history subscription");
            }
        }
    }

    /// Cancel every subscription. Safe to call repeatedly.
    pub async fn unsubscribe_all(&self) {
        self.generations.clear();
        let ids: Vec<String> = self.active.iter().map(|a| a.key().clone()).collect();
        let handles: Vec<(String, Box<dyn Unsubscribe>)> = ids
            .into_iter()
            .filter_map(|id| self.active.remove(&id))
            .collect();

        let results = futures::future::join_all(handles.into_iter().map(|(id, handle)| async move {
            (id, handle.unsubscribe().await)
        }))
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                warn!(entity_id = %id, error = %e, "Failed to cancel history subscription");
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_subscribed(&self, entity_id: &str) -> bool {
        self.active.contains_key(entity_id)
    }
}
