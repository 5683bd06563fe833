// Integration tests for dated layers, URL tokens and date range following

use chrono::{DateTime, TimeZone, Utc};
use map_card::host::{DateRange, InMemoryConnection, InMemoryDateRangeSelector, RecordingSurface};
use map_card::plugin::PluginRegistry;
use map_card::state::StateStore;
use map_card::{EngineSettings, MapCard, MapConfig, StateSnapshot};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn card_for(
    config: Value,
    settings: EngineSettings,
) -> (MapCard, Arc<InMemoryConnection>, Arc<RecordingSurface>) {
    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::new())));
    let surface = Arc::new(RecordingSurface::new());
    let card = MapCard::new(
        MapConfig::from_value(config).unwrap(),
        settings,
        connection.clone(),
        surface.clone(),
        PluginRegistry::with_builtins(),
    );
    (card, connection, surface)
}

fn fast_discovery() -> EngineSettings {
    EngineSettings {
        date_range_poll_interval_ms: 1,
        date_range_discovery_timeout_ms: 1_000,
        ..EngineSettings::default()
    }
}

fn parse_time(value: &Value) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value.as_str().unwrap())
        .unwrap()
        .with_timezone(&Utc)
}

/// Let spawned pumps and discovery run
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn test_force_midnight_stamp_ignores_time_of_day() {
    let (mut card, _, surface) = card_for(
        json!({
            "x": 0.0, "y": 0.0,
            "history_start": "2024-01-01T15:42:17Z",
            "wms": [{
                "url": "https://wms/",
                "options": {"layers": "radar"},
                "history": {"property": "time", "force_midnight": true}
            }]
        }),
        EngineSettings::default(),
    );

    card.connect(StateSnapshot::default()).await;

    let layers = surface.layers();
    assert_eq!(layers.len(), 2);
    let wms = &layers[1].1;
    assert_eq!(wms.options["time"], json!("2024-01-01T00:00:00.000Z"));
    assert_eq!(wms.options["layers"], json!("radar"));
}

#[tokio::test]
async fn test_swap_keeps_old_layer_until_loaded() {
    let (mut card, connection, surface) = card_for(
        json!({
            "x": 0.0, "y": 0.0,
            "wms": [{
                "url": "https://wms/",
                "history": {"property": "time", "source": "input_number.days", "suffix": "days ago"}
            }]
        }),
        EngineSettings::default(),
    );
    connection.set_state("input_number.days", "1", Map::new());

    card.connect(StateSnapshot::default()).await;
    card.dispatch_pending().await;
    surface.complete_loads();
    card.dispatch_pending().await;
    assert_eq!(surface.layers().len(), 2);

    connection.set_state("input_number.days", "2", Map::new());
    settle().await;
    assert_eq!(card.dispatch_pending().await, 1);
    // Old and new dated layer side by side while loading
    assert_eq!(surface.layers().len(), 3);

    surface.complete_loads();
    card.dispatch_pending().await;
    assert_eq!(surface.layers().len(), 2);
}

#[tokio::test]
async fn test_url_token_change_updates_layer() {
    let (mut card, connection, surface) = card_for(
        json!({
            "x": 0.0, "y": 0.0,
            "tile_layers": [{"url": "https://tiles/{{ states('input_select.style') }}/{z}/{x}/{y}.png"}]
        }),
        EngineSettings::default(),
    );
    connection.set_state("input_select.style", "roads", Map::new());
    let snapshot =
        StateSnapshot::from_json(json!({"input_select.style": {"state": "roads", "attributes": {}}}))
            .unwrap();

    card.connect(snapshot).await;
    card.dispatch_pending().await;
    assert!(surface
        .layers()
        .iter()
        .any(|(_, spec)| spec.url == "https://tiles/roads/{z}/{x}/{y}.png"));

    connection.set_state("input_select.style", "satellite", Map::new());
    settle().await;
    card.dispatch_pending().await;

    assert!(surface
        .layers()
        .iter()
        .any(|(_, spec)| spec.url == "https://tiles/satellite/{z}/{x}/{y}.png"));
    assert_eq!(
        card.layers().unwrap().resolver().bound_layers("input_select.style"),
        1
    );
}

#[tokio::test]
async fn test_date_range_drives_entities_and_layers() {
    let (mut card, connection, surface) = card_for(
        json!({
            "x": 0.0, "y": 0.0,
            "history_date_selection": true,
            "entities": ["person.alice"],
            "wms": [{"url": "https://wms/", "history": {"property": "time"}}]
        }),
        fast_discovery(),
    );
    let selector = Arc::new(InMemoryDateRangeSelector::new());
    let range = DateRange {
        start: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
        end: Some(Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap()),
    };
    selector.select(range);
    connection.mount_date_range_selector(selector.clone());

    let snapshot = StateSnapshot::from_json(json!({
        "person.alice": {"state": "home", "attributes": {"latitude": 1.0, "longitude": 2.0}}
    }))
    .unwrap();
    card.connect(snapshot).await;
    settle().await;
    assert!(card.services().unwrap().date_range.as_ref().unwrap().is_connected());
    assert_eq!(selector.subscriber_count(), 1);

    card.dispatch_pending().await;

    let requests = connection.requests_of_type("history/stream");
    let last = requests.last().unwrap();
    assert_eq!(parse_time(&last["start_time"]), range.start);
    assert_eq!(parse_time(&last["end_time"]), range.end.unwrap());
    assert_eq!(connection.live_history_subscriptions(), 1);

    let stamped: Vec<Value> = surface
        .layers()
        .into_iter()
        .filter_map(|(_, spec)| spec.options.get("time").cloned())
        .collect();
    assert_eq!(stamped, vec![json!("2024-03-01T06:00:00.000Z")]);

    // A new selection moves both
    let next = DateRange {
        start: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
        end: None,
    };
    selector.select(next);
    card.dispatch_pending().await;
    let requests = connection.requests_of_type("history/stream");
    let last = requests.last().unwrap();
    assert_eq!(parse_time(&last["start_time"]), next.start);
    assert!(last.get("end_time").is_none());

    card.disconnect().await;
    assert_eq!(selector.subscriber_count(), 0);
    assert_eq!(connection.live_subscriptions(), 0);
}

#[tokio::test]
async fn test_missing_selector_is_not_fatal() {
    let settings = EngineSettings {
        date_range_poll_interval_ms: 1,
        date_range_discovery_timeout_ms: 5,
        ..EngineSettings::default()
    };
    let (mut card, _, surface) = card_for(
        json!({
            "x": 0.0, "y": 0.0,
            "history_date_selection": true,
            "entities": ["person.alice"]
        }),
        settings,
    );
    let snapshot = StateSnapshot::from_json(json!({
        "person.alice": {"state": "home", "attributes": {"latitude": 1.0, "longitude": 2.0}}
    }))
    .unwrap();

    assert!(card.connect(snapshot.clone()).await.is_empty());
    settle().await;
    assert!(!card.services().unwrap().date_range.as_ref().unwrap().is_connected());
    assert_eq!(card.dispatch_pending().await, 0);
    assert!(card.update(snapshot).await.is_empty());
    assert!(surface.marker_for("person.alice").is_some());
}
