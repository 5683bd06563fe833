use crate::config::raw::RawCircle;

/// Where a circle's radius comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleSource {
    /// Always the configured literal radius
    Config,
    /// Always the named attribute
    Attribute,
    /// attribute > gps_accuracy > radius > configured radius > 0
    Auto,
}

/// Uncertainty circle drawn around an entity
#[derive(Debug, Clone, PartialEq)]
pub struct CircleConfig {
    pub enabled: bool,
    pub radius: f64,
    pub source: CircleSource,
    pub attribute: Option<String>,
    pub color: String,
    pub fill_opacity: f64,
}

const DEFAULT_FILL_OPACITY: f64 = 0.1;

impl CircleConfig {
    pub fn disabled(default_color: &str) -> Self {
        Self {
            enabled: false,
            radius: 0.0,
            source: CircleSource::Auto,
            attribute: None,
            color: default_color.to_string(),
            fill_opacity: DEFAULT_FILL_OPACITY,
        }
    }

    pub fn from_raw(raw: Option<&RawCircle>, default_color: &str) -> Self {
        match raw {
            Some(RawCircle::Keyword(keyword)) if keyword == "auto" => Self {
                enabled: true,
                ..Self::disabled(default_color)
            },
            Some(RawCircle::Options(options)) => {
                let radius = options.radius.unwrap_or(0.0);
                let (source, attribute) =
                    resolve_source(options.source.as_deref(), options.attribute.as_deref(), radius);
                Self {
                    enabled: true,
                    radius,
                    source,
                    attribute,
                    color: options
                        .color
                        .clone()
                        .unwrap_or_else(|| default_color.to_string()),
                    fill_opacity: options.fill_opacity.unwrap_or(DEFAULT_FILL_OPACITY),
                }
            }
            _ => Self::disabled(default_color),
        }
    }
}

fn resolve_source(
    source: Option<&str>,
    attribute: Option<&str>,
    radius: f64,
) -> (CircleSource, Option<String>) {
    if let Some(attribute) = attribute {
        return (CircleSource::Attribute, Some(attribute.to_string()));
    }
    if radius != 0.0 {
        return (CircleSource::Config, None);
    }
    match source {
        Some(name @ ("gps_accuracy" | "radius")) => {
            (CircleSource::Attribute, Some(name.to_string()))
        }
        _ => (CircleSource::Auto, None),
    }
}
