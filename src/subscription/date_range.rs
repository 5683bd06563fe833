use crate::host::{lock, DateRange, DateRangeSink, HostConnection, Unsubscribe};
use crate::settings::EngineSettings;
use crate::telemetry::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Callback receiving every selection of the date range selector
pub type RangeListener = Arc<dyn Fn(&DateRange) + Send + Sync>;

#[derive(Default)]
struct BroadcasterInner {
    listeners: Mutex<Vec<RangeListener>>,
    last: Mutex<Option<DateRange>>,
    upstream: Mutex<Option<Box<dyn Unsubscribe>>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl BroadcasterInner {
    fn broadcast(&self, range: DateRange) {
        *lock(&self.last) = Some(range);
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener(&range);
        }
    }
}

/// Finds the dashboard's date range selector and fans its selections out.
///
/// Discovery polls the host until the selector shows up or the timeout
/// elapses. A missing selector is logged, never fatal: listeners simply
/// never fire.
#[derive(Clone)]
pub struct DateRangeBroadcaster {
    inner: Arc<BroadcasterInner>,
    logger: Logger,
}

impl DateRangeBroadcaster {
    /// Start discovery in the background. Must be called inside a tokio runtime.
    pub fn start(
        connection: Arc<dyn HostConnection>,
        settings: &EngineSettings,
        logger: Logger,
    ) -> Self {
        let inner = Arc::new(BroadcasterInner::default());
        logger.debug("DateRangeBroadcaster", "initializing");

        let task = tokio::spawn(discover(
            Arc::downgrade(&inner),
            connection,
            settings.date_range_poll_interval(),
            settings.date_range_discovery_timeout(),
            logger.clone(),
        ));
        *lock(&inner.discovery) = Some(task);

        Self { inner, logger }
    }

    /// Register a listener. The latest selection, if any, is replayed.
    pub fn on_date_range_change(&self, listener: RangeListener) {
        lock(&self.inner.listeners).push(listener.clone());
        let last = *lock(&self.inner.last);
        if let Some(range) = last {
            listener(&range);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Stop discovery, unsubscribe from the selector, drop all listeners.
    pub async fn disconnect(&self) {
        if let Some(task) = lock(&self.inner.discovery).take() {
            task.abort();
        }
        lock(&self.inner.listeners).clear();

        let upstream = lock(&self.inner.upstream).take();
        if let Some(upstream) = upstream {
            if let Err(e) = upstream.unsubscribe().await {
                warn!(error = %e, "Failed to unsubscribe from date range selector");
            }
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        self.logger.debug("DateRangeBroadcaster", "Disconnecting");
    }
}

async fn discover(
    inner: Weak<BroadcasterInner>,
    connection: Arc<dyn HostConnection>,
    poll: Duration,
    timeout: Duration,
    logger: Logger,
) {
    let deadline = Instant::now() + timeout;
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Some(selector) = connection.date_range_selector() {
            let weak = inner.clone();
            let sink: DateRangeSink = Arc::new(move |range| {
                if let Some(inner) = weak.upgrade() {
                    inner.broadcast(range);
                }
            });

            match selector.subscribe(sink).await {
                Ok(handle) => match inner.upgrade() {
                    Some(inner) => {
                        *lock(&inner.upstream) = Some(handle);
                        inner.connected.store(true, Ordering::SeqCst);
                        info!("Connected to date range selector");
                        logger.debug(
                            "DateRangeBroadcaster",
                            "Successfully connected to date range component",
                        );
                    }
                    None => {
                        let _ = handle.unsubscribe().await;
                    }
                },
                Err(e) => error!(error = %e, "Failed to subscribe to date range selector"),
            }
            return;
        }

        if Instant::now() >= deadline {
            error!(
                "Unable to connect to date range selector. Make sure a date selection card is on this dashboard."
            );
            return;
        }

        if inner.strong_count() == 0 {
            return;
        }
    }
}
