use crate::host::{HostConnection, MessageSink, Unsubscribe};
use crate::state::LinkedState;
use crate::subscription::protocol::{to_request, EntitiesMessage, SubscribeEntitiesRequest};
use crate::telemetry::Logger;
use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Callback receiving every new state of a watched entity
pub type StateListener = Arc<dyn Fn(&LinkedState) + Send + Sync>;

/// Registration returned by [`LinkedEntityWatcher::on_state_change`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    entity_id: String,
    id: u64,
}

impl ListenerHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

#[derive(Default)]
struct Watch {
    /// Registration order
    listeners: Vec<(u64, StateListener)>,
    last: Option<LinkedState>,
    upstream: Option<Box<dyn Unsubscribe>>,
    opening: bool,
}

struct WatcherInner {
    connection: Arc<dyn HostConnection>,
    watches: DashMap<String, Watch>,
    next_id: AtomicU64,
    logger: Logger,
}

impl WatcherInner {
    fn dispatch(&self, entity_id: &str, state: LinkedState) {
        let listeners: Vec<StateListener> = match self.watches.get_mut(entity_id) {
            Some(mut watch) => {
                watch.last = Some(state.clone());
                watch.listeners.iter().map(|(_, l)| l.clone()).collect()
            }
            None => return,
        };

        self.logger.debug(
            "LinkedEntityWatcher",
            format!("{} state updated to {}", entity_id, state),
        );
        for listener in listeners {
            listener(&state);
        }
    }
}

/// Multiplexes state-change listeners onto one upstream subscription per
/// entity id.
///
/// The upstream subscription opens with the first listener and closes when
/// the last listener of that entity is removed. A listener registered after
/// the first state arrived is handed the last known state right away.
#[derive(Clone)]
pub struct LinkedEntityWatcher {
    inner: Arc<WatcherInner>,
}

impl LinkedEntityWatcher {
    pub fn new(connection: Arc<dyn HostConnection>, logger: Logger) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                connection,
                watches: DashMap::new(),
                next_id: AtomicU64::new(1),
                logger,
            }),
        }
    }

    /// Register `listener` for state changes of `entity_id`.
    pub async fn on_state_change(
        &self,
        entity_id: &str,
        listener: StateListener,
    ) -> Result<ListenerHandle> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (needs_upstream, replay) = {
            let mut watch = self.inner.watches.entry(entity_id.to_string()).or_default();
            let needs_upstream = watch.upstream.is_none() && !watch.opening;
            if needs_upstream {
                watch.opening = true;
            }
            watch.listeners.push((id, listener.clone()));
            (needs_upstream, watch.last.clone())
        };

        if let Some(state) = replay {
            listener(&state);
        }

        let handle = ListenerHandle {
            entity_id: entity_id.to_string(),
            id,
        };

        if needs_upstream {
            if let Err(e) = self.open_upstream(entity_id).await {
                warn!(entity_id = %entity_id, error = %e, "Failed to watch linked entity");
                self.remove_listener(&handle).await?;
                return Err(e);
            }
        }

        Ok(handle)
    }

    async fn open_upstream(&self, entity_id: &str) -> Result<()> {
        self.inner
            .logger
            .debug("LinkedEntityWatcher", format!("initializing connection for {}", entity_id));

        let weak: Weak<WatcherInner> = Arc::downgrade(&self.inner);
        let watched = entity_id.to_string();
        let sink: MessageSink = Arc::new(move |message: Value| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<EntitiesMessage>(message) {
                Ok(message) => {
                    if let Some(raw) = message.state_of(&watched) {
                        inner.dispatch(&watched, LinkedState::from_raw(&raw));
                    }
                }
                Err(e) => warn!(entity_id = %watched, error = %e, "Malformed entity message"),
            }
        });

        let request = to_request(&SubscribeEntitiesRequest::single(entity_id))?;
        let subscribed = self.inner.connection.subscribe_message(request, sink).await;

        let orphaned = match (subscribed, self.inner.watches.get_mut(entity_id)) {
            (Ok(handle), Some(mut watch)) => {
                watch.opening = false;
                watch.upstream = Some(handle);
                None
            }
            // Last listener left while the subscription was opening
            (Ok(handle), None) => Some(handle),
            (Err(e), watch) => {
                if let Some(mut watch) = watch {
                    watch.opening = false;
                }
                return Err(e);
            }
        };

        if let Some(handle) = orphaned {
            handle.unsubscribe().await?;
        }
        Ok(())
    }

    /// Remove one listener; closes the upstream subscription with the last.
    pub async fn remove_listener(&self, handle: &ListenerHandle) -> Result<()> {
        let now_empty = match self.inner.watches.get_mut(&handle.entity_id) {
            Some(mut watch) => {
                watch.listeners.retain(|(id, _)| *id != handle.id);
                watch.listeners.is_empty()
            }
            None => false,
        };
        if !now_empty {
            return Ok(());
        }

        let upstream = self
            .inner
            .watches
            .remove_if(&handle.entity_id, |_, watch| watch.listeners.is_empty())
            .and_then(|(_, watch)| watch.upstream);
        if let Some(upstream) = upstream {
            debug!(entity_id = %handle.entity_id, "Closing linked entity subscription");
            upstream.unsubscribe().await?;
        }
        Ok(())
    }

    /// Close every upstream subscription and forget every listener.
    pub async fn disconnect(&self) {
        let ids: Vec<String> = self.inner.watches.iter().map(|w| w.key().clone()).collect();
        let upstreams: Vec<Box<dyn Unsubscribe>> = ids
            .iter()
            .filter_map(|id| self.inner.watches.remove(id))
            .filter_map(|(_, watch)| watch.upstream)
            .collect();

        for result in futures::future::join_all(upstreams.into_iter().map(|u| u.unsubscribe())).await
        {
            if let Err(e) = result {
                warn!(error = %e, "Failed to close linked entity subscription");
            }
        }
        self.inner.logger.debug("LinkedEntityWatcher", "Disconnecting");
    }

    pub fn listener_count(&self, entity_id: &str) -> usize {
        self.inner
            .watches
            .get(entity_id)
            .map_or(0, |watch| watch.listeners.len())
    }

    /// Number of entities with an upstream subscription
    pub fn watched_count(&self) -> usize {
        self.inner
            .watches
            .iter()
            .filter(|watch| watch.upstream.is_some())
            .count()
    }
}
