use super::*;
use crate::card::Services;
use crate::config::{CircleConfig, CircleSource, MapConfig};
use crate::host::{InMemoryConnection, RecordingSurface, SurfaceOp};
use crate::settings::EngineSettings;
use crate::state::{EntityState, StateStore};
use crate::telemetry::Logger;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

fn snapshot(states: Value) -> StateSnapshot {
    StateSnapshot::from_json(states).unwrap()
}

fn entity(value: Value) -> EntityConfig {
    let config = MapConfig::from_value(json!({"x": 0.0, "y": 0.0, "entities": [value]})).unwrap();
    config.entities.into_iter().next().unwrap()
}

fn services() -> (Services, Arc<RecordingSurface>, Arc<InMemoryConnection>) {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let surface = Arc::new(RecordingSurface::new());
    let (events, _) = mpsc::unbounded_channel();
    let services = Services::new(
        connection.clone(),
        surface.clone(),
        EngineSettings::default(),
        Logger::quiet(),
        events,
        false,
        false,
    );
    (services, surface, connection)
}

fn state_with(attributes: Value) -> EntityState {
    let attributes = match attributes {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    EntityState::new("person.alice", "home", attributes)
}

#[test]
fn test_abbreviate() {
    assert_eq!(abbreviate("Bob"), "Bob");
    assert_eq!(abbreviate("Alice Smith"), "AS");
    assert_eq!(abbreviate("Alice"), "A");
    assert_eq!(abbreviate("living_room/motion-sensor"), "LRM");
    assert_eq!(abbreviate("the big red car"), "TBR");
}

#[test]
fn test_circle_radius_resolution() {
    let auto = CircleConfig {
        enabled: true,
        radius: 0.0,
        source: CircleSource::Auto,
        attribute: None,
        color: "red".to_string(),
        fill_opacity: 0.1,
    };

    let both = state_with(json!({"gps_accuracy": 50, "radius": 200}));
    assert_eq!(resolve_radius(&auto, Some(&both)), 50.0);

    let radius_only = state_with(json!({"radius": 200}));
    assert_eq!(resolve_radius(&auto, Some(&radius_only)), 200.0);

    let nothing = state_with(json!({}));
    let configured = CircleConfig {
        radius: 100.0,
        ..auto.clone()
    };
    assert_eq!(resolve_radius(&configured, Some(&nothing)), 100.0);
    assert_eq!(resolve_radius(&auto, Some(&nothing)), 0.0);
    assert_eq!(resolve_radius(&auto, None), 0.0);

    let explicit = CircleConfig {
        attribute: Some("range".to_string()),
        ..auto.clone()
    };
    let with_range = state_with(json!({"range": 7, "gps_accuracy": 50}));
    assert_eq!(resolve_radius(&explicit, Some(&with_range)), 7.0);

    let config_source = CircleConfig {
        source: CircleSource::Config,
        radius: 30.0,
        ..auto.clone()
    };
    assert_eq!(resolve_radius(&config_source, Some(&both)), 30.0);

    let attribute_source = CircleConfig {
        source: CircleSource::Attribute,
        attribute: Some("range".to_string()),
        ..auto
    };
    assert_eq!(resolve_radius(&attribute_source, Some(&both)), 0.0);
}

#[test]
fn test_position_resolution_order() {
    let states = snapshot(json!({
        "person.alice": {
            "state": "home",
            "attributes": {"device_trackers": ["device_tracker.none", "device_tracker.phone"]}
        },
        "device_tracker.none": {"state": "unknown", "attributes": {}},
        "device_tracker.phone": {"state": "home", "attributes": {"latitude": 5.0, "longitude": 6.0}},
        "person.bob": {"state": "home", "attributes": {"latitude": 1.0, "longitude": 2.0}},
        "sensor.a": {"state": "on", "attributes": {}}
    }));

    let fixed = entity(json!({"entity": "person.bob", "fixed_x": 9.0, "fixed_y": 9.0}));
    assert_eq!(resolve_position(&fixed, &states).unwrap(), LatLng::new(9.0, 9.0));

    let direct = entity(json!({"entity": "person.bob", "fallback_x": 3.0, "fallback_y": 3.0}));
    assert_eq!(resolve_position(&direct, &states).unwrap(), LatLng::new(1.0, 2.0));

    let tracker = entity(json!("person.alice"));
    assert_eq!(resolve_position(&tracker, &states).unwrap(), LatLng::new(5.0, 6.0));

    let fallback = entity(json!({"entity": "sensor.a", "fallback_x": 3.0, "fallback_y": 4.0}));
    assert_eq!(resolve_position(&fallback, &states).unwrap(), LatLng::new(3.0, 4.0));

    let missing = entity(json!("sensor.a"));
    assert_eq!(
        resolve_position(&missing, &states).unwrap_err(),
        MapCardError::MissingPosition("sensor.a".to_string())
    );
}

#[test]
fn test_appearance_by_display_mode() {
    let state = EntityState::new(
        "person.alice",
        "home",
        json!({
            "friendly_name": "Alice Smith",
            "icon": "mdi:account",
            "entity_picture": "/local/alice.png",
            "battery": 87
        })
        .as_object()
        .cloned()
        .unwrap(),
    );

    let marker = appearance(&entity(json!("person.alice")), Some(&state));
    assert_eq!(marker.title, "AS");
    assert_eq!(marker.icon.as_deref(), Some("mdi:account"));
    assert_eq!(marker.picture.as_deref(), Some("/local/alice.png"));

    let icon = appearance(
        &entity(json!({"entity": "person.alice", "display": "icon", "icon": "mdi:car"})),
        Some(&state),
    );
    assert_eq!(icon.icon.as_deref(), Some("mdi:car"));
    assert_eq!(icon.picture, None);

    let text = appearance(&entity(json!({"entity": "person.alice", "display": "state"})), Some(&state));
    assert_eq!(text.title, "home");
    assert_eq!(text.icon, None);
    assert_eq!(text.picture, None);

    let attribute = appearance(
        &entity(json!({
            "entity": "person.alice",
            "display": "attribute",
            "attribute": "battery",
            "prefix": "~",
            "suffix": "%"
        })),
        Some(&state),
    );
    assert_eq!(attribute.title, "~87%");
}

#[tokio::test]
async fn test_setup_draws_marker_and_circle() {
    let (services, surface, _) = services();
    let states = snapshot(json!({
        "person.alice": {
            "state": "home",
            "attributes": {"latitude": 1.0, "longitude": 2.0, "friendly_name": "Alice Smith", "gps_accuracy": 12}
        }
    }));

    let mut controller = EntityController::setup(
        entity(json!({"entity": "person.alice", "circle": "auto"})),
        &services,
        &states,
    )
    .await
    .unwrap();

    let (marker_id, marker) = surface.marker_for("person.alice").unwrap();
    assert_eq!(Some(marker_id), controller.marker());
    assert_eq!(marker.title, "AS");
    assert_eq!(marker.position, LatLng::new(1.0, 2.0));
    let circles = surface.circles();
    assert_eq!(circles.len(), 1);
    assert_eq!(circles[0].1.radius, 12.0);

    let moved = snapshot(json!({
        "person.alice": {
            "state": "away",
            "attributes": {"latitude": 1.5, "longitude": 2.5, "friendly_name": "Alice Smith", "gps_accuracy": 30}
        }
    }));
    surface.clear_ops();
    controller.update(&services, &moved).unwrap();

    // Marker mode never rebuilds the marker
    assert!(!surface.ops().iter().any(|op| matches!(op, SurfaceOp::Remove { .. })));
    assert_eq!(surface.marker_for("person.alice").unwrap().1.position, LatLng::new(1.5, 2.5));
    assert_eq!(surface.circles()[0].1.radius, 30.0);

    controller.teardown(&services).await;
    assert!(surface.markers().is_empty());
    assert!(surface.circles().is_empty());
}

#[tokio::test]
async fn test_state_marker_is_recreated_on_change() {
    let (services, surface, _) = services();
    let at_home = snapshot(json!({
        "person.alice": {"state": "home", "attributes": {"latitude": 1.0, "longitude": 2.0}}
    }));
    let mut controller = EntityController::setup(
        entity(json!({"entity": "person.alice", "display": "state"})),
        &services,
        &at_home,
    )
    .await
    .unwrap();
    let first = controller.marker().unwrap();

    surface.clear_ops();
    controller.update(&services, &at_home).unwrap();
    assert_eq!(controller.marker(), Some(first));
    assert!(matches!(surface.ops().as_slice(), [SurfaceOp::MoveMarker { .. }]));

    let away = snapshot(json!({
        "person.alice": {"state": "not_home", "attributes": {"latitude": 1.0, "longitude": 2.0}}
    }));
    controller.update(&services, &away).unwrap();
    let second = controller.marker().unwrap();
    assert_ne!(second, first);
    assert_eq!(controller.title(), "not_home");
    assert!(surface.ops().contains(&SurfaceOp::Remove { id: first }));
    assert_eq!(surface.markers().len(), 1);
}

#[tokio::test]
async fn test_unknown_entity_and_missing_position_fail_setup() {
    let (services, surface, _) = services();
    let states = snapshot(json!({"sensor.a": {"state": "on", "attributes": {}}}));

    let err = EntityController::setup(entity(json!("sensor.ghost")), &services, &states)
        .await
        .err()
        .unwrap();
    assert_eq!(err, MapCardError::EntityNotFound("sensor.ghost".to_string()));

    let err = EntityController::setup(entity(json!("sensor.a")), &services, &states)
        .await
        .err()
        .unwrap();
    assert_eq!(err, MapCardError::MissingPosition("sensor.a".to_string()));
    assert!(surface.markers().is_empty());
}

#[tokio::test]
async fn test_failed_history_does_not_block_marker() {
    let (services, surface, connection) = services();
    connection.fail_history_for("person.alice");
    let states = snapshot(json!({
        "person.alice": {"state": "home", "attributes": {"latitude": 1.0, "longitude": 2.0}}
    }));

    let controller = EntityController::setup(
        entity(json!({"entity": "person.alice", "history_start": "1 hour ago"})),
        &services,
        &states,
    )
    .await
    .unwrap();

    assert!(surface.marker_for("person.alice").is_some());
    assert!(controller.history().has_history());
    assert!(!services.history.is_subscribed("person.alice"));
}
