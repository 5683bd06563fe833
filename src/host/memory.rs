//! In-memory host used by the replay binary and the tests.

use crate::geo::{Bounds, LatLng};
use crate::host::surface::{
    CircleSpec, LoadCallback, MapSurface, MarkerSpec, OverlayId, PathElement, TileLayerSpec,
};
use crate::host::{
    lock, DateRange, DateRangeSelector, DateRangeSink, HostConnection, MessageSink, Unsubscribe,
};
use crate::state::{EntityState, StateStore};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

enum LiveKind {
    History {
        entity_ids: Vec<String>,
        end: Option<DateTime<Utc>>,
    },
    Entities {
        pump: JoinHandle<()>,
    },
}

struct LiveSubscription {
    kind: LiveKind,
    sink: MessageSink,
}

type Registry = Arc<DashMap<u64, LiveSubscription>>;

struct MemoryUnsubscribe {
    id: u64,
    registry: Registry,
}

#[async_trait]
impl Unsubscribe for MemoryUnsubscribe {
    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        if let Some((_, live)) = self.registry.remove(&self.id) {
            if let LiveKind::Entities { pump } = live.kind {
                pump.abort();
            }
        }
        Ok(())
    }
}

/// Host transport backed by a [`StateStore`] and scripted history.
///
/// History subscriptions replay every stored sample inside the requested
/// window before `subscribe_message` returns, then receive samples pushed
/// with [`InMemoryConnection::push_history`]. Entity subscriptions get the
/// current states as an `a` payload, then one `c` payload per store change.
pub struct InMemoryConnection {
    store: Arc<StateStore>,
    history: Mutex<HashMap<String, Vec<Value>>>,
    failing_history: Mutex<HashSet<String>>,
    requests: Mutex<Vec<Value>>,
    registry: Registry,
    next_id: AtomicU64,
    selector: Mutex<Option<Arc<dyn DateRangeSelector>>>,
    dark_mode: AtomicBool,
}

impl InMemoryConnection {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            history: Mutex::new(HashMap::new()),
            failing_history: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            registry: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            selector: Mutex::new(None),
            dark_mode: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Update an entity in the backing store; entity subscribers are
    /// notified by their pump task.
    pub fn set_state(&self, entity_id: &str, state: &str, attributes: Map<String, Value>) {
        self.store.set_state(entity_id, state, attributes);
    }

    /// Store a history sample without delivering it.
    /// `position: None` produces a sample without coordinates.
    pub fn add_history(&self, entity_id: &str, at: DateTime<Utc>, position: Option<LatLng>) {
        lock(&self.history)
            .entry(entity_id.to_string())
            .or_default()
            .push(history_sample(at, position));
    }

    /// Store a history sample and deliver it to every live history
    /// subscription tracking `entity_id` whose window includes `at`.
    pub fn push_history(&self, entity_id: &str, at: DateTime<Utc>, position: Option<LatLng>) {
        let sample = history_sample(at, position);
        lock(&self.history)
            .entry(entity_id.to_string())
            .or_default()
            .push(sample.clone());

        let sinks: Vec<MessageSink> = self
            .registry
            .iter()
            .filter_map(|live| match &live.kind {
                LiveKind::History { entity_ids, end }
                    if entity_ids.iter().any(|id| id == entity_id)
                        && end.map_or(true, |end| at <= end) =>
                {
                    Some(live.sink.clone())
                }
                _ => None,
            })
            .collect();

        for sink in sinks {
            sink(json!({ "states": { entity_id: [sample.clone()] } }));
        }
    }

    /// Make every history request that tracks `entity_id` fail.
    pub fn fail_history_for(&self, entity_id: &str) {
        lock(&self.failing_history).insert(entity_id.to_string());
    }

    pub fn mount_date_range_selector(&self, selector: Arc<dyn DateRangeSelector>) {
        *lock(&self.selector) = Some(selector);
    }

    pub fn set_dark_mode(&self, dark: bool) {
        self.dark_mode.store(dark, Ordering::SeqCst);
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<Value> {
        lock(&self.requests).clone()
    }

    pub fn requests_of_type(&self, kind: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.get("type").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.registry.len()
    }

    pub fn live_history_subscriptions(&self) -> usize {
        self.registry
            .iter()
            .filter(|live| matches!(live.kind, LiveKind::History { .. }))
            .count()
    }

    fn register(&self, kind: LiveKind, sink: MessageSink) -> Box<dyn Unsubscribe> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry.insert(id, LiveSubscription { kind, sink });
        Box::new(MemoryUnsubscribe {
            id,
            registry: self.registry.clone(),
        })
    }

    fn open_history(&self, request: &Value, sink: MessageSink) -> Result<Box<dyn Unsubscribe>> {
        let entity_ids: Vec<String> = request
            .get("entity_ids")
            .and_then(Value::as_array)
            .context("history request without entity_ids")?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        let failing = lock(&self.failing_history);
        if let Some(id) = entity_ids.iter().find(|id| failing.contains(*id)) {
            bail!("history backend unavailable for {}", id);
        }
        drop(failing);

        let start = parse_time(request.get("start_time"))?
            .context("history request without start_time")?;
        let end = parse_time(request.get("end_time"))?;

        let mut states = Map::new();
        {
            let history = lock(&self.history);
            for id in &entity_ids {
                let samples: Vec<Value> = history
                    .get(id)
                    .into_iter()
                    .flatten()
                    .filter(|sample| {
                        sample_time(sample).is_some_and(|at| {
                            at >= start && end.map_or(true, |end| at <= end)
                        })
                    })
                    .cloned()
                    .collect();
                if !samples.is_empty() {
                    states.insert(id.clone(), Value::Array(samples));
                }
            }
        }

        if !states.is_empty() {
            sink(json!({ "states": states }));
        }
        Ok(self.register(LiveKind::History { entity_ids, end }, sink))
    }

    fn open_entities(&self, request: &Value, sink: MessageSink) -> Result<Box<dyn Unsubscribe>> {
        let entity_ids: HashSet<String> = request
            .get("entity_ids")
            .and_then(Value::as_array)
            .context("subscribe_entities request without entity_ids")?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        let mut added = Map::new();
        for id in &entity_ids {
            if let Some(state) = self.store.get(id) {
                added.insert(id.clone(), compressed_state(&state));
            }
        }
        if !added.is_empty() {
            sink(json!({ "a": added }));
        }

        let mut updates = BroadcastStream::new(self.store.subscribe());
        let pump_sink = sink.clone();
        let pump = tokio::spawn(async move {
            while let Some(update) = updates.next().await {
                match update {
                    Ok(update) if entity_ids.contains(&update.entity_id) => {
                        let mut changed = Map::new();
                        changed.insert(
                            update.entity_id.clone(),
                            json!({ "+": compressed_state(&update.new_state) }),
                        );
                        pump_sink(json!({ "c": changed }));
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Entity subscription lagged"),
                }
            }
        });

        Ok(self.register(LiveKind::Entities { pump }, sink))
    }
}

#[async_trait]
impl HostConnection for InMemoryConnection {
    async fn subscribe_message(
        &self,
        request: Value,
        sink: MessageSink,
    ) -> Result<Box<dyn Unsubscribe>> {
        lock(&self.requests).push(request.clone());
        debug!(request = %request, "In-memory subscription");

        match request.get("type").and_then(Value::as_str) {
            Some("history/stream") => self.open_history(&request, sink),
            Some("subscribe_entities") => self.open_entities(&request, sink),
            other => bail!("unsupported message type {:?}", other),
        }
    }

    fn date_range_selector(&self) -> Option<Arc<dyn DateRangeSelector>> {
        lock(&self.selector).clone()
    }

    fn is_dark_mode(&self) -> bool {
        self.dark_mode.load(Ordering::SeqCst)
    }
}

fn history_sample(at: DateTime<Utc>, position: Option<LatLng>) -> Value {
    let mut attributes = Map::new();
    if let Some(position) = position {
        attributes.insert("latitude".to_string(), json!(position.lat));
        attributes.insert("longitude".to_string(), json!(position.lng));
    }
    json!({
        "s": "not_home",
        "a": attributes,
        "lu": at.timestamp_millis() as f64 / 1000.0,
    })
}

fn sample_time(sample: &Value) -> Option<DateTime<Utc>> {
    let seconds = sample.get("lu").and_then(Value::as_f64)?;
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

fn parse_time(value: Option<&Value>) -> Result<Option<DateTime<Utc>>> {
    match value.and_then(Value::as_str) {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw)
                .with_context(|| format!("invalid timestamp {}", raw))?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
        None => Ok(None),
    }
}

fn compressed_state(state: &EntityState) -> Value {
    json!({ "s": state.state, "a": state.attributes })
}

/// Date range selector the tests drive by hand
#[derive(Default)]
pub struct InMemoryDateRangeSelector {
    current: Mutex<Option<DateRange>>,
    sinks: Arc<DashMap<u64, DateRangeSink>>,
    next_id: AtomicU64,
}

struct SelectorUnsubscribe {
    id: u64,
    sinks: Arc<DashMap<u64, DateRangeSink>>,
}

#[async_trait]
impl Unsubscribe for SelectorUnsubscribe {
    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        self.sinks.remove(&self.id);
        Ok(())
    }
}

impl InMemoryDateRangeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new selection to every subscriber
    pub fn select(&self, range: DateRange) {
        *lock(&self.current) = Some(range);
        let sinks: Vec<DateRangeSink> = self.sinks.iter().map(|s| s.value().clone()).collect();
        for sink in sinks {
            sink(range);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait]
impl DateRangeSelector for InMemoryDateRangeSelector {
    async fn subscribe(&self, sink: DateRangeSink) -> Result<Box<dyn Unsubscribe>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sinks.insert(id, sink.clone());
        let current = *lock(&self.current);
        if let Some(range) = current {
            sink(range);
        }
        Ok(Box::new(SelectorUnsubscribe {
            id,
            sinks: self.sinks.clone(),
        }))
    }
}

/// One call made on a [`RecordingSurface`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SurfaceOp {
    AddMarker { id: OverlayId, marker: MarkerSpec },
    MoveMarker { id: OverlayId, position: LatLng },
    AddCircle { id: OverlayId, circle: CircleSpec },
    UpdateCircle { id: OverlayId, center: LatLng, radius: f64 },
    AddGroup { id: OverlayId },
    AddToGroup { group: OverlayId, element: PathElement },
    ClearGroup { group: OverlayId },
    AddTileLayer { id: OverlayId, layer: TileLayerSpec },
    SetLayerUrl { id: OverlayId, url: String },
    Remove { id: OverlayId },
    SetView { center: LatLng, zoom: u32 },
    FitBounds { bounds: Bounds },
    ShowWarning { message: String },
    ClearWarning { message: String },
}

#[derive(Default)]
struct SurfaceState {
    next_id: u64,
    ops: Vec<SurfaceOp>,
    markers: BTreeMap<OverlayId, MarkerSpec>,
    circles: BTreeMap<OverlayId, CircleSpec>,
    groups: BTreeMap<OverlayId, Vec<PathElement>>,
    layers: BTreeMap<OverlayId, TileLayerSpec>,
    pending_loads: Vec<(OverlayId, LoadCallback)>,
    visible: Option<Bounds>,
    warnings: Vec<String>,
}

impl SurfaceState {
    fn allocate(&mut self) -> OverlayId {
        self.next_id += 1;
        OverlayId(self.next_id)
    }
}

/// Map surface that records every call and keeps the resulting scene.
///
/// Tile load callbacks are held until [`RecordingSurface::complete_loads`].
#[derive(Default)]
pub struct RecordingSurface {
    state: Mutex<SurfaceState>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        lock(&self.state).ops.clone()
    }

    /// Forget recorded operations, keeping the scene
    pub fn clear_ops(&self) {
        lock(&self.state).ops.clear();
    }

    pub fn markers(&self) -> Vec<(OverlayId, MarkerSpec)> {
        lock(&self.state)
            .markers
            .iter()
            .map(|(id, m)| (*id, m.clone()))
            .collect()
    }

    pub fn marker_for(&self, entity_id: &str) -> Option<(OverlayId, MarkerSpec)> {
        self.markers()
            .into_iter()
            .find(|(_, marker)| marker.entity_id == entity_id)
    }

    pub fn circles(&self) -> Vec<(OverlayId, CircleSpec)> {
        lock(&self.state)
            .circles
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect()
    }

    /// Elements of a live group; `None` once the group is removed
    pub fn group(&self, id: OverlayId) -> Option<Vec<PathElement>> {
        lock(&self.state).groups.get(&id).cloned()
    }

    pub fn groups(&self) -> Vec<(OverlayId, Vec<PathElement>)> {
        lock(&self.state)
            .groups
            .iter()
            .map(|(id, g)| (*id, g.clone()))
            .collect()
    }

    pub fn layers(&self) -> Vec<(OverlayId, TileLayerSpec)> {
        lock(&self.state)
            .layers
            .iter()
            .map(|(id, l)| (*id, l.clone()))
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        lock(&self.state).warnings.clone()
    }

    pub fn fit_count(&self) -> usize {
        lock(&self.state)
            .ops
            .iter()
            .filter(|op| matches!(op, SurfaceOp::FitBounds { .. }))
            .count()
    }

    pub fn last_view(&self) -> Option<(LatLng, u32)> {
        lock(&self.state).ops.iter().rev().find_map(|op| match op {
            SurfaceOp::SetView { center, zoom } => Some((*center, *zoom)),
            _ => None,
        })
    }

    pub fn set_visible_bounds(&self, bounds: Bounds) {
        lock(&self.state).visible = Some(bounds);
    }

    pub fn pending_loads(&self) -> usize {
        lock(&self.state).pending_loads.len()
    }

    /// Fire every pending tile load callback. Returns how many fired.
    pub fn complete_loads(&self) -> usize {
        let pending = std::mem::take(&mut lock(&self.state).pending_loads);
        let fired = pending.len();
        for (id, on_load) in pending {
            on_load(id);
        }
        fired
    }
}

impl MapSurface for RecordingSurface {
    fn add_marker(&self, marker: &MarkerSpec) -> OverlayId {
        let mut state = lock(&self.state);
        let id = state.allocate();
        state.markers.insert(id, marker.clone());
        state.ops.push(SurfaceOp::AddMarker {
            id,
            marker: marker.clone(),
        });
        id
    }

    fn move_marker(&self, id: OverlayId, position: LatLng) {
        let mut state = lock(&self.state);
        if let Some(marker) = state.markers.get_mut(&id) {
            marker.position = position;
            state.ops.push(SurfaceOp::MoveMarker { id, position });
        }
    }

    fn add_circle(&self, circle: &CircleSpec) -> OverlayId {
        let mut state = lock(&self.state);
        let id = state.allocate();
        state.circles.insert(id, circle.clone());
        state.ops.push(SurfaceOp::AddCircle {
            id,
            circle: circle.clone(),
        });
        id
    }

    fn update_circle(&self, id: OverlayId, center: LatLng, radius: f64) {
        let mut state = lock(&self.state);
        if let Some(circle) = state.circles.get_mut(&id) {
            circle.center = center;
            circle.radius = radius;
            state.ops.push(SurfaceOp::UpdateCircle { id, center, radius });
        }
    }

    fn add_group(&self) -> OverlayId {
        let mut state = lock(&self.state);
        let id = state.allocate();
        state.groups.insert(id, Vec::new());
        state.ops.push(SurfaceOp::AddGroup { id });
        id
    }

    fn add_to_group(&self, group: OverlayId, element: &PathElement) {
        let mut state = lock(&self.state);
        if let Some(elements) = state.groups.get_mut(&group) {
            elements.push(element.clone());
            state.ops.push(SurfaceOp::AddToGroup {
                group,
                element: element.clone(),
            });
        }
    }

    fn clear_group(&self, group: OverlayId) {
        let mut state = lock(&self.state);
        if let Some(elements) = state.groups.get_mut(&group) {
            elements.clear();
            state.ops.push(SurfaceOp::ClearGroup { group });
        }
    }

    fn add_tile_layer(&self, layer: &TileLayerSpec, on_load: Option<LoadCallback>) -> OverlayId {
        let mut state = lock(&self.state);
        let id = state.allocate();
        state.layers.insert(id, layer.clone());
        if let Some(on_load) = on_load {
            state.pending_loads.push((id, on_load));
        }
        state.ops.push(SurfaceOp::AddTileLayer {
            id,
            layer: layer.clone(),
        });
        id
    }

    fn set_layer_url(&self, id: OverlayId, url: &str) {
        let mut state = lock(&self.state);
        if let Some(layer) = state.layers.get_mut(&id) {
            layer.url = url.to_string();
            state.ops.push(SurfaceOp::SetLayerUrl {
                id,
                url: url.to_string(),
            });
        }
    }

    fn remove(&self, id: OverlayId) {
        let mut state = lock(&self.state);
        let known = state.markers.remove(&id).is_some()
            | state.circles.remove(&id).is_some()
            | state.groups.remove(&id).is_some()
            | state.layers.remove(&id).is_some();
        state.pending_loads.retain(|(pending, _)| *pending != id);
        if known {
            state.ops.push(SurfaceOp::Remove { id });
        }
    }

    /// Approximates the visible area as a square whose half side halves
    /// with every zoom level.
    fn set_view(&self, center: LatLng, zoom: u32) {
        let mut state = lock(&self.state);
        let half = 180.0 / f64::from(1u32 << zoom.min(20));
        state.visible = Some(Bounds {
            south_west: LatLng::new(center.lat - half, center.lng - half),
            north_east: LatLng::new(center.lat + half, center.lng + half),
        });
        state.ops.push(SurfaceOp::SetView { center, zoom });
    }

    fn fit_bounds(&self, bounds: Bounds) {
        let mut state = lock(&self.state);
        state.visible = Some(bounds);
        state.ops.push(SurfaceOp::FitBounds { bounds });
    }

    fn visible_bounds(&self) -> Option<Bounds> {
        lock(&self.state).visible
    }

    fn show_warning(&self, message: &str) {
        let mut state = lock(&self.state);
        state.warnings.push(message.to_string());
        state.ops.push(SurfaceOp::ShowWarning {
            message: message.to_string(),
        });
    }

    fn clear_warning(&self, message: &str) {
        let mut state = lock(&self.state);
        let before = state.warnings.len();
        state.warnings.retain(|w| w != message);
        if state.warnings.len() != before {
            state.ops.push(SurfaceOp::ClearWarning {
                message: message.to_string(),
            });
        }
    }
}
