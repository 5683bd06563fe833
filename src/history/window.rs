use crate::config::{BoundSource, WindowSource};
use crate::date;
use crate::error::MapCardError;
use crate::host::DateRange;
use crate::state::LinkedState;
use chrono::{DateTime, Duration, Utc};

/// History window resolved for one refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    /// `None` until a start is known
    pub start: Option<DateTime<Utc>>,
    /// `None` means open-ended (now, then live)
    pub end: Option<DateTime<Utc>>,
}

impl ResolvedWindow {
    /// Start to query with: the resolved start, else `now - lookback`,
    /// floored at the earliest representable time.
    pub fn query_start(&self, now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
        self.start.unwrap_or_else(|| {
            now.checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }
}

/// Something that can move a history window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowChange {
    Linked { entity_id: String, state: LinkedState },
    Broadcast(DateRange),
}

/// Tracks the latest value of each bound of one window source.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    source: WindowSource,
    current: ResolvedWindow,
}

impl WindowTracker {
    pub fn new(source: WindowSource) -> Self {
        let current = match &source {
            WindowSource::Broadcast => ResolvedWindow {
                start: None,
                end: None,
            },
            WindowSource::Bounds { start, end } => ResolvedWindow {
                start: fixed_value(start),
                end: fixed_value(end),
            },
        };
        Self { source, current }
    }

    pub fn source(&self) -> &WindowSource {
        &self.source
    }

    pub fn current(&self) -> ResolvedWindow {
        self.current
    }

    pub fn follows_broadcast(&self) -> bool {
        matches!(self.source, WindowSource::Broadcast)
    }

    /// Entity ids whose state drives a bound, deduplicated
    pub fn linked_entities(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let WindowSource::Bounds { start, end } = &self.source {
            for bound in [start, end] {
                if let Some(id) = bound.linked_entity() {
                    if !ids.iter().any(|known| known == id) {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        ids
    }

    /// Apply a change. Returns the new window when this tracker is driven by
    /// the change; bounds that don't depend on it keep their value.
    pub fn apply(
        &mut self,
        change: &WindowChange,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedWindow>, MapCardError> {
        match (&self.source, change) {
            (WindowSource::Broadcast, WindowChange::Broadcast(range)) => {
                self.current = ResolvedWindow {
                    start: Some(range.start),
                    end: range.end,
                };
                Ok(Some(self.current))
            }
            (WindowSource::Bounds { start, end }, WindowChange::Linked { entity_id, state }) => {
                let new_start = linked_value(start, entity_id, state, now)?;
                let new_end = linked_value(end, entity_id, state, now)?;
                if new_start.is_none() && new_end.is_none() {
                    return Ok(None);
                }
                let mut next = self.current;
                if let Some(value) = new_start {
                    next.start = value;
                }
                if let Some(value) = new_end {
                    next.end = value;
                }
                self.current = next;
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }
}

fn fixed_value(bound: &BoundSource) -> Option<DateTime<Utc>> {
    match bound {
        BoundSource::Fixed(value) => *value,
        BoundSource::Linked { .. } => None,
    }
}

/// `Some(value)` when `bound` is linked to `entity_id`
fn linked_value(
    bound: &BoundSource,
    entity_id: &str,
    state: &LinkedState,
    now: DateTime<Utc>,
) -> Result<Option<Option<DateTime<Utc>>>, MapCardError> {
    match bound {
        BoundSource::Linked {
            entity_id: linked,
            suffix,
        } if linked == entity_id => {
            date::derive_from_state_at(state, suffix.as_deref(), now).map(Some)
        }
        _ => Ok(None),
    }
}
