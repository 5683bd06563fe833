use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine tunables, independent of any single card's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Ask the history backend for significant changes only
    #[serde(default = "default_significant_changes_only")]
    pub significant_changes_only: bool,

    /// Look-back used for the first history subscription when no fixed
    /// start is known yet (seconds)
    #[serde(default = "default_initial_lookback_seconds")]
    pub initial_lookback_seconds: i64,

    /// Give up looking for the date range selector after this long (ms)
    #[serde(default = "default_date_range_discovery_timeout_ms")]
    pub date_range_discovery_timeout_ms: u64,

    /// Poll interval while looking for the date range selector (ms)
    #[serde(default = "default_date_range_poll_interval_ms")]
    pub date_range_poll_interval_ms: u64,

    /// Radius of history dots (px)
    #[serde(default = "default_history_dot_radius")]
    pub history_dot_radius: u32,

    /// Padding ratio applied when fitting the viewport to entities
    #[serde(default = "default_fit_padding")]
    pub fit_padding: f64,
}

fn default_significant_changes_only() -> bool {
    true
}

fn default_initial_lookback_seconds() -> i64 {
    10
}

fn default_date_range_discovery_timeout_ms() -> u64 {
    10_000
}

fn default_date_range_poll_interval_ms() -> u64 {
    100
}

fn default_history_dot_radius() -> u32 {
    3
}

fn default_fit_padding() -> f64 {
    0.1
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            significant_changes_only: default_significant_changes_only(),
            initial_lookback_seconds: default_initial_lookback_seconds(),
            date_range_discovery_timeout_ms: default_date_range_discovery_timeout_ms(),
            date_range_poll_interval_ms: default_date_range_poll_interval_ms(),
            history_dot_radius: default_history_dot_radius(),
            fit_padding: default_fit_padding(),
        }
    }
}

impl EngineSettings {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `MAP_CARD_*` env vars on top of these settings.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("MAP_CARD_SIGNIFICANT_CHANGES_ONLY") {
            if let Ok(b) = v.parse::<bool>() {
                self.significant_changes_only = b;
            }
        }
        if let Ok(v) = std::env::var("MAP_CARD_INITIAL_LOOKBACK_SECONDS") {
            if let Ok(n) = v.parse::<i64>() {
                self.initial_lookback_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("MAP_CARD_DATE_RANGE_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.date_range_discovery_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("MAP_CARD_DATE_RANGE_POLL_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.date_range_poll_interval_ms = n;
            }
        }
        self
    }

    pub fn date_range_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.date_range_discovery_timeout_ms)
    }

    pub fn date_range_poll_interval(&self) -> Duration {
        Duration::from_millis(self.date_range_poll_interval_ms.max(1))
    }

    /// Clamped to chrono's range; out-of-range values saturate.
    pub fn initial_lookback(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.initial_lookback_seconds.max(0))
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Load settings from a TOML file
pub fn load_settings(path: &Path) -> Result<EngineSettings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let settings: EngineSettings = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert!(settings.significant_changes_only);
        assert_eq!(settings.initial_lookback_seconds, 10);
        assert_eq!(settings.date_range_discovery_timeout_ms, 10_000);
        assert_eq!(settings.date_range_poll_interval_ms, 100);
        assert_eq!(settings.history_dot_radius, 3);
    }

    #[test]
    fn test_partial_settings() {
        let toml = r#"
            significant_changes_only = false
            initial_lookback_seconds = 60
        "#;

        let settings: EngineSettings = toml::from_str(toml).unwrap();
        assert!(!settings.significant_changes_only);
        assert_eq!(settings.initial_lookback_seconds, 60);
        assert_eq!(settings.date_range_poll_interval_ms, 100); // Default
    }

    #[test]
    fn test_out_of_range_lookback_saturates() {
        let settings = EngineSettings {
            initial_lookback_seconds: i64::MAX / 100,
            ..EngineSettings::default()
        };
        assert_eq!(settings.initial_lookback(), chrono::Duration::MAX);

        let negative = EngineSettings {
            initial_lookback_seconds: -5,
            ..EngineSettings::default()
        };
        assert_eq!(negative.initial_lookback(), chrono::Duration::zero());
    }

    #[test]
    fn test_load_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "date_range_discovery_timeout_ms = 250").unwrap();

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.date_range_discovery_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_settings_missing_file() {
        assert!(load_settings(Path::new("/nonexistent/map-card.toml")).is_err());
    }
}
