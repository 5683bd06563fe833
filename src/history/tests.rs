use super::*;
use crate::config::{BoundSource, MapConfig, WindowSource};
use crate::error::MapCardError;
use crate::geo::LatLng;
use crate::host::{
    DateRange, HostConnection, InMemoryConnection, MessageSink, PathElement, RecordingSurface,
    Unsubscribe, DateRangeSelector,
};
use crate::settings::EngineSettings;
use crate::state::{EntityState, LinkedState, StateSnapshot, StateStore};
use crate::telemetry::Logger;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

fn entry(entity_id: &str, ts: DateTime<Utc>, lat: f64) -> TimelineEntry {
    TimelineEntry::new(entity_id, entity_id, ts, LatLng::new(lat, 4.0))
}

fn style() -> PathStyle {
    PathStyle {
        title: "Alice".to_string(),
        color: "hsl(120, 95%, 35%)".to_string(),
        show_dots: true,
        show_lines: true,
        gradual_opacity: None,
        dot_radius: 3,
    }
}

fn collecting_sink() -> (Arc<Mutex<Vec<TimelineEntry>>>, EntrySink) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let sink: EntrySink = Arc::new(move |entry| sink_seen.lock().unwrap().push(entry));
    (seen, sink)
}

fn query(entity_id: &str, start: DateTime<Utc>) -> HistoryQuery {
    HistoryQuery {
        entity_id: entity_id.to_string(),
        start,
        end: None,
        use_base_entity_only: true,
    }
}

/// Transport that keeps delivering to cancelled sinks, like a socket
/// whose unsubscribe raced with messages already on the wire.
#[derive(Default)]
struct LateDeliveryConnection {
    sinks: Mutex<Vec<MessageSink>>,
}

struct NoopUnsubscribe;

#[async_trait]
impl Unsubscribe for NoopUnsubscribe {
    async fn unsubscribe(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl HostConnection for LateDeliveryConnection {
    async fn subscribe_message(
        &self,
        _request: Value,
        sink: MessageSink,
    ) -> anyhow::Result<Box<dyn Unsubscribe>> {
        self.sinks.lock().unwrap().push(sink);
        Ok(Box::new(NoopUnsubscribe))
    }

    fn date_range_selector(&self) -> Option<Arc<dyn DateRangeSelector>> {
        None
    }
}

fn sample_message(entity_id: &str, ts: DateTime<Utc>, lat: f64) -> Value {
    json!({
        "states": {
            entity_id: [{
                "s": "home",
                "a": {"latitude": lat, "longitude": 4.0},
                "lu": ts.timestamp() as f64,
            }]
        }
    })
}

#[test]
fn test_path_geometry_is_rebuilt_in_full() {
    let mut history = EntityHistory::new("person.alice", style());
    assert!(history.render().is_none());

    for (i, minute) in [0, 10, 20].iter().enumerate() {
        assert!(history.accept(entry("person.alice", at(9, *minute), 50.0 + i as f64)));
    }
    let elements = history.render().unwrap();
    assert_eq!(elements.iter().filter(|e| e.is_dot()).count(), 3);
    assert_eq!(elements.iter().filter(|e| !e.is_dot()).count(), 2);

    // Nothing new, nothing to draw
    assert!(history.render().is_none());

    history.accept(entry("person.alice", at(9, 30), 53.0));
    assert!(history.needs_rerender());
    let elements = history.render().unwrap();
    assert_eq!(elements.len(), 4 + 3);
    match &elements[0] {
        PathElement::Dot { tooltip, radius, .. } => {
            assert_eq!(tooltip, "Alice 2024-03-01 09:00:00");
            assert_eq!(*radius, 3);
        }
        other => panic!("expected a dot first, got {:?}", other),
    }
}

#[test]
fn test_path_switches_and_foreign_entries() {
    let mut dots_only = EntityHistory::new(
        "person.alice",
        PathStyle {
            show_lines: false,
            ..style()
        },
    );
    assert!(!dots_only.accept(entry("person.bob", at(9, 0), 1.0)));
    dots_only.accept(entry("person.alice", at(9, 0), 1.0));
    dots_only.accept(entry("person.alice", at(9, 1), 2.0));
    assert!(dots_only.render().unwrap().iter().all(PathElement::is_dot));

    let mut lines_only = EntityHistory::new(
        "person.alice",
        PathStyle {
            show_dots: false,
            ..style()
        },
    );
    lines_only.accept(entry("person.alice", at(9, 0), 1.0));
    lines_only.accept(entry("person.alice", at(9, 1), 2.0));
    let elements = lines_only.render().unwrap();
    assert_eq!(elements.len(), 1);
    assert!(!elements[0].is_dot());
}

#[test]
fn test_gradual_opacity() {
    assert_eq!(opacity(None, 0, 10), 1.0);
    assert_eq!(opacity(Some(0.2), 0, 2), 1.0);
    assert_eq!(opacity(Some(0.2), 0, 5), 0.2);
    assert!((opacity(Some(0.2), 2, 5) - 0.6).abs() < 1e-9);
    assert_eq!(opacity(Some(0.2), 4, 5), 1.0);

    let mut history = EntityHistory::new(
        "person.alice",
        PathStyle {
            gradual_opacity: Some(0.0),
            ..style()
        },
    );
    for minute in 0..3 {
        history.accept(entry("person.alice", at(9, minute), 1.0));
    }
    let dots: Vec<f64> = history
        .render()
        .unwrap()
        .iter()
        .filter(|e| e.is_dot())
        .map(PathElement::opacity)
        .collect();
    assert_eq!(dots, vec![0.0, 0.5, 1.0]);
}

#[test]
fn test_tracked_ids_follow_device_trackers() {
    let mut snapshot = StateSnapshot::default();
    let mut attributes = Map::new();
    attributes.insert(
        "device_trackers".to_string(),
        json!(["device_tracker.phone", "person.alice", "device_tracker.watch"]),
    );
    snapshot.insert(EntityState::new("person.alice", "home", attributes));

    assert_eq!(
        tracked_ids("person.alice", false, &snapshot),
        vec!["person.alice", "device_tracker.phone", "device_tracker.watch"]
    );
    assert_eq!(tracked_ids("person.alice", true, &snapshot), vec!["person.alice"]);
    assert_eq!(tracked_ids("person.ghost", false, &snapshot), vec!["person.ghost"]);
}

#[tokio::test]
async fn test_subscribe_twice_keeps_one_subscription() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    let snapshot = StateSnapshot::default();
    let (seen, sink) = collecting_sink();

    let start = Utc::now() - Duration::hours(1);
    service
        .subscribe(query("person.alice", start), &snapshot, sink.clone())
        .await
        .unwrap();
    service
        .subscribe(query("person.alice", start), &snapshot, sink)
        .await
        .unwrap();

    assert_eq!(service.active_count(), 1);
    assert_eq!(connection.live_history_subscriptions(), 1);

    connection.push_history("person.alice", Utc::now(), Some(LatLng::new(1.0, 2.0)));
    assert_eq!(seen.lock().unwrap().len(), 1);

    service.unsubscribe_all().await;
    service.unsubscribe_all().await;
    assert_eq!(service.active_count(), 0);
    assert_eq!(connection.live_history_subscriptions(), 0);
}

#[tokio::test]
async fn test_late_sample_from_replaced_subscription_is_dropped() {
    let connection = Arc::new(LateDeliveryConnection::default());
    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    let snapshot = StateSnapshot::default();
    let (seen, sink) = collecting_sink();

    service
        .subscribe(query("person.alice", at(8, 0)), &snapshot, sink.clone())
        .await
        .unwrap();
    service
        .subscribe(query("person.alice", at(9, 0)), &snapshot, sink)
        .await
        .unwrap();

    let sinks = connection.sinks.lock().unwrap().clone();
    assert_eq!(sinks.len(), 2);

    sinks[0](sample_message("person.alice", at(8, 30), 1.0));
    assert!(seen.lock().unwrap().is_empty());

    sinks[1](sample_message("person.alice", at(9, 30), 2.0));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].position, LatLng::new(2.0, 4.0));
    assert_eq!(seen[0].timestamp, at(9, 30));
}

#[tokio::test]
async fn test_samples_without_coordinates_are_dropped() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let start = Utc::now() - Duration::hours(2);
    connection.add_history("person.alice", start + Duration::minutes(5), None);
    connection.add_history(
        "person.alice",
        start + Duration::minutes(10),
        Some(LatLng::new(0.0, 0.0)),
    );

    let service = HistoryTimelineService::new(connection.clone(), false, Logger::quiet());
    let (seen, sink) = collecting_sink();
    service
        .subscribe(query("person.alice", start), &StateSnapshot::default(), sink)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].position, LatLng::new(0.0, 0.0));
    assert_eq!(seen[0].original_entity_id, "person.alice");

    let request = &connection.requests_of_type("history/stream")[0];
    assert_eq!(request["significant_changes_only"], json!(false));
}

#[tokio::test]
async fn test_tracker_batch_keeps_transport_order() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let start = Utc::now() - Duration::hours(1);
    connection.add_history("person.alice", start + Duration::minutes(30), Some(LatLng::new(1.0, 1.0)));
    connection.add_history("device_tracker.phone", start + Duration::minutes(10), Some(LatLng::new(2.0, 2.0)));
    connection.add_history("device_tracker.watch", start + Duration::minutes(20), Some(LatLng::new(3.0, 3.0)));

    let mut snapshot = StateSnapshot::default();
    let mut attributes = Map::new();
    attributes.insert(
        "device_trackers".to_string(),
        json!(["device_tracker.phone", "device_tracker.watch"]),
    );
    snapshot.insert(EntityState::new("person.alice", "home", attributes));

    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    for _ in 0..20 {
        let (seen, sink) = collecting_sink();
        let tracked = HistoryQuery {
            use_base_entity_only: false,
            ..query("person.alice", start)
        };
        service.subscribe(tracked, &snapshot, sink).await.unwrap();
        let order: Vec<String> = seen.lock().unwrap().iter().map(|e| e.entity_id.clone()).collect();
        assert_eq!(
            order,
            vec!["person.alice", "device_tracker.phone", "device_tracker.watch"]
        );
    }
    service.unsubscribe_all().await;
}

#[tokio::test]
async fn test_wire_message_key_order_is_kept() {
    let connection = Arc::new(LateDeliveryConnection::default());
    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    let (seen, sink) = collecting_sink();
    service
        .subscribe(query("person.alice", at(8, 0)), &StateSnapshot::default(), sink)
        .await
        .unwrap();

    let wire = r#"{"states": {
        "device_tracker.watch": [{"s": "home", "a": {"latitude": 3.0, "longitude": 4.0}, "lu": 1709283600}],
        "person.alice": [{"s": "home", "a": {"latitude": 1.0, "longitude": 4.0}, "lu": 1709280000}],
        "device_tracker.phone": [{"s": "home", "a": {"latitude": 2.0, "longitude": 4.0}, "lu": 1709281800}]
    }}"#;
    let sinks = connection.sinks.lock().unwrap().clone();
    sinks[0](serde_json::from_str(wire).unwrap());

    let order: Vec<String> = seen.lock().unwrap().iter().map(|e| e.entity_id.clone()).collect();
    assert_eq!(
        order,
        vec!["device_tracker.watch", "person.alice", "device_tracker.phone"]
    );
}

#[tokio::test]
async fn test_failed_subscription_is_reported() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    connection.fail_history_for("person.alice");
    let service = HistoryTimelineService::new(connection, true, Logger::quiet());
    let (_, sink) = collecting_sink();

    let err = service
        .subscribe(query("person.alice", at(9, 0)), &StateSnapshot::default(), sink)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MapCardError::HistorySubscriptionFailure { ref entity_id, .. } if entity_id == "person.alice"
    ));
    assert!(!err.is_fatal());
    assert!(!service.is_subscribed("person.alice"));
}

#[test]
fn test_window_tracker_linked_bounds() {
    let now = at(12, 0);
    let mut tracker = WindowTracker::new(WindowSource::Bounds {
        start: BoundSource::Linked {
            entity_id: "input_number.hours".to_string(),
            suffix: None,
        },
        end: BoundSource::Fixed(None),
    });
    assert_eq!(tracker.linked_entities(), vec!["input_number.hours"]);
    assert!(!tracker.follows_broadcast());
    assert_eq!(tracker.current(), ResolvedWindow { start: None, end: None });

    let unrelated = WindowChange::Linked {
        entity_id: "sensor.other".to_string(),
        state: LinkedState::Number(1.0),
    };
    assert_eq!(tracker.apply(&unrelated, now).unwrap(), None);

    let change = WindowChange::Linked {
        entity_id: "input_number.hours".to_string(),
        state: LinkedState::from_raw("3"),
    };
    let window = tracker.apply(&change, now).unwrap().unwrap();
    assert_eq!(window.start, Some(at(9, 0)));
    assert_eq!(window.end, None);

    let broadcast = WindowChange::Broadcast(DateRange {
        start: at(1, 0),
        end: None,
    });
    assert_eq!(tracker.apply(&broadcast, now).unwrap(), None);
}

#[test]
fn test_window_tracker_both_bounds_from_one_entity() {
    let now = at(12, 0);
    let mut tracker = WindowTracker::new(WindowSource::Bounds {
        start: BoundSource::Linked {
            entity_id: "input_number.window".to_string(),
            suffix: Some("hours ago".to_string()),
        },
        end: BoundSource::Linked {
            entity_id: "input_number.window".to_string(),
            suffix: Some("minutes ago".to_string()),
        },
    });
    assert_eq!(tracker.linked_entities().len(), 1);

    let window = tracker
        .apply(
            &WindowChange::Linked {
                entity_id: "input_number.window".to_string(),
                state: LinkedState::Number(2.0),
            },
            now,
        )
        .unwrap()
        .unwrap();
    assert_eq!(window.start, Some(at(10, 0)));
    assert_eq!(window.end, Some(at(11, 58)));
}

#[test]
fn test_window_tracker_broadcast_and_invalid_link() {
    let mut tracker = WindowTracker::new(WindowSource::Broadcast);
    let range = DateRange {
        start: at(6, 0),
        end: Some(at(7, 0)),
    };
    let window = tracker
        .apply(&WindowChange::Broadcast(range), at(12, 0))
        .unwrap()
        .unwrap();
    assert_eq!(window, ResolvedWindow { start: Some(at(6, 0)), end: Some(at(7, 0)) });

    let mut linked = WindowTracker::new(WindowSource::Bounds {
        start: BoundSource::Linked {
            entity_id: "input_text.start".to_string(),
            suffix: None,
        },
        end: BoundSource::Fixed(None),
    });
    let err = linked
        .apply(
            &WindowChange::Linked {
                entity_id: "input_text.start".to_string(),
                state: LinkedState::Text("yesterday-ish".to_string()),
            },
            at(12, 0),
        )
        .unwrap_err();
    assert!(matches!(err, MapCardError::InvalidDateFormat(_)));
}

#[test]
fn test_query_start_falls_back_to_lookback() {
    let window = ResolvedWindow { start: None, end: None };
    assert_eq!(window.query_start(at(12, 0), Duration::seconds(10)), at(12, 0) - Duration::seconds(10));

    let fixed = ResolvedWindow { start: Some(at(3, 0)), end: None };
    assert_eq!(fixed.query_start(at(12, 0), Duration::seconds(10)), at(3, 0));

    assert_eq!(window.query_start(at(12, 0), Duration::MAX), DateTime::<Utc>::MIN_UTC);
}

#[tokio::test]
async fn test_huge_lookback_setting_stays_recoverable() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let config = MapConfig::from_value(json!({
        "entities": [{
            "entity": "person.alice",
            "history_start": {"entity": "input_number.hours", "suffix": "hours ago"}
        }]
    }))
    .unwrap();
    let settings = EngineSettings {
        initial_lookback_seconds: i64::MAX / 100,
        ..EngineSettings::default()
    };
    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    let surface = RecordingSurface::new();

    let mut manager = EntityHistoryManager::new(&config.entities[0], "Alice", &settings, Logger::quiet());
    // No linked state yet, so the query starts at the floored lookback
    if let Err(err) = manager.setup(&surface, &service, &StateSnapshot::default()).await {
        assert!(!err.is_fatal());
    }
    let request = &connection.requests_of_type("history/stream")[0];
    assert!(request["start_time"].as_str().unwrap().starts_with('-'));

    manager.teardown(&surface, &service).await;
    assert_eq!(connection.live_history_subscriptions(), 0);
}

#[tokio::test]
async fn test_manager_draws_and_refreshes() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let now = Utc::now();
    for minutes in [50, 40, 30] {
        connection.add_history(
            "person.alice",
            now - Duration::minutes(minutes),
            Some(LatLng::new(minutes as f64, 1.0)),
        );
    }

    let config = MapConfig::from_value(json!({
        "entities": [{"entity": "person.alice", "history_start": "2 hours ago"}]
    }))
    .unwrap();
    let entity = &config.entities[0];
    let settings = EngineSettings::default();
    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    let surface = RecordingSurface::new();
    let snapshot = StateSnapshot::default();

    let mut manager = EntityHistoryManager::new(entity, "Alice", &settings, Logger::quiet());
    assert!(manager.has_history());
    manager.setup(&surface, &service, &snapshot).await.unwrap();
    let group = manager.group().unwrap();
    assert_eq!(manager.history().lock().unwrap().len(), 3);

    manager.update(&surface);
    assert_eq!(surface.group(group).unwrap().len(), 5);

    let later = ResolvedWindow {
        start: Some(now - Duration::minutes(35)),
        end: None,
    };
    manager.refresh(later, &surface, &service, &snapshot).await.unwrap();
    assert_eq!(manager.history().lock().unwrap().len(), 1);
    assert_eq!(connection.live_history_subscriptions(), 1);

    manager.update(&surface);
    assert_eq!(surface.group(group).unwrap().len(), 1);

    manager.teardown(&surface, &service).await;
    assert!(surface.group(group).is_none());
    assert_eq!(connection.live_history_subscriptions(), 0);
}

#[tokio::test]
async fn test_manager_without_history_is_inert() {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let config = MapConfig::from_value(json!({"entities": ["person.alice"]})).unwrap();
    let service = HistoryTimelineService::new(connection.clone(), true, Logger::quiet());
    let surface = RecordingSurface::new();

    let mut manager = EntityHistoryManager::new(
        &config.entities[0],
        "Alice",
        &EngineSettings::default(),
        Logger::quiet(),
    );
    manager.setup(&surface, &service, &StateSnapshot::default()).await.unwrap();

    assert!(manager.group().is_none());
    assert!(connection.requests().is_empty());
    assert!(surface.ops().is_empty());
}
