use std::sync::Arc;
use tracing::debug;

/// Card-scoped logger handed to every component at construction.
///
/// Debug output is gated per card by the `debug` config flag; warnings and
/// errors always go through `tracing` directly.
#[derive(Clone, Debug)]
pub struct Logger {
    debug_enabled: bool,
    card: Arc<str>,
}

impl Logger {
    pub fn new(card: &str, debug_enabled: bool) -> Self {
        Self {
            debug_enabled,
            card: Arc::from(card),
        }
    }

    /// Logger that never emits debug output
    pub fn quiet() -> Self {
        Self::new("map-card", false)
    }

    pub fn card(&self) -> &str {
        &self.card
    }

    pub fn debug(&self, component: &str, message: impl AsRef<str>) {
        if !self.debug_enabled {
            return;
        }
        debug!(card = %self.card, component = component, "{}", message.as_ref());
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::quiet()
    }
}

/// Install the global tracing subscriber for the binary.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();
}
