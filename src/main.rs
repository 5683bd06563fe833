use anyhow::{bail, Context, Result};
use map_card::host::{InMemoryConnection, RecordingSurface};
use map_card::plugin::PluginRegistry;
use map_card::settings::{load_settings, EngineSettings};
use map_card::state::StateStore;
use map_card::telemetry::init_tracing;
use map_card::{MapCard, MapConfig, StateSnapshot};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Replay one card configuration against a state snapshot and print every
/// map operation as a JSON line.
///
/// Usage: map-card-replay <config.json> <states.json> [settings.toml]
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("usage: map-card-replay <config.json> <states.json> [settings.toml]");
    }

    let config = MapConfig::from_value(read_json(Path::new(&args[0]))?)
        .with_context(|| format!("Invalid card configuration in {}", args[0]))?;
    init_tracing(if config.debug { "map_card=debug" } else { "map_card=info" });

    let settings = match args.get(2) {
        Some(path) => load_settings(Path::new(path))?.with_env_overrides(),
        None => EngineSettings::from_env(),
    };
    let snapshot = StateSnapshot::from_json(read_json(Path::new(&args[1]))?)
        .with_context(|| format!("Invalid state snapshot in {}", args[1]))?;

    let connection = Arc::new(InMemoryConnection::new(Arc::new(StateStore::from_snapshot(
        &snapshot,
    ))));
    let surface = Arc::new(RecordingSurface::new());
    let mut card = MapCard::new(
        config,
        settings,
        connection,
        surface.clone(),
        PluginRegistry::with_builtins(),
    );

    info!(entities = snapshot.len(), "Replaying card");
    for e in card.connect(snapshot.clone()).await {
        warn!(error = %e, "First run failure");
    }
    card.dispatch_pending().await;
    surface.complete_loads();
    card.dispatch_pending().await;
    for e in card.update(snapshot).await {
        warn!(error = %e, "Update failure");
    }

    for op in surface.ops() {
        println!("{}", serde_json::to_string(&op)?);
    }
    card.disconnect().await;
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}
