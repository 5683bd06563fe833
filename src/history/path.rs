use crate::history::timeline::TimelineEntry;
use crate::host::PathElement;

/// Styling of a rendered path
#[derive(Debug, Clone, PartialEq)]
pub struct PathStyle {
    pub title: String,
    pub color: String,
    pub show_dots: bool,
    pub show_lines: bool,
    pub gradual_opacity: Option<f64>,
    pub dot_radius: u32,
}

/// Accepted samples of one entity and the path drawn from them.
///
/// Geometry is never patched: any new entry marks the history dirty and
/// the next render rebuilds every element.
#[derive(Debug, Clone)]
pub struct EntityHistory {
    entity_id: String,
    style: PathStyle,
    entries: Vec<TimelineEntry>,
    needs_rerender: bool,
}

impl EntityHistory {
    pub fn new(entity_id: &str, style: PathStyle) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            style,
            entries: Vec::new(),
            needs_rerender: false,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Append a sample in arrival order. Samples for other entities are
    /// ignored.
    pub fn accept(&mut self, entry: TimelineEntry) -> bool {
        if entry.original_entity_id != self.entity_id {
            return false;
        }
        self.entries.push(entry);
        self.needs_rerender = true;
        true
    }

    /// Drop every sample, e.g. before a refreshed window streams in.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.needs_rerender = false;
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn needs_rerender(&self) -> bool {
        self.needs_rerender
    }

    /// Full set of path elements if anything changed since the last render.
    pub fn render(&mut self) -> Option<Vec<PathElement>> {
        if !self.needs_rerender || self.entries.is_empty() {
            return None;
        }
        self.needs_rerender = false;
        Some(self.build())
    }

    fn build(&self) -> Vec<PathElement> {
        let n = self.entries.len();
        let segments = n.saturating_sub(1);
        let mut elements = Vec::with_capacity(n + segments);

        for (i, entry) in self.entries.iter().enumerate() {
            if self.style.show_dots {
                elements.push(PathElement::Dot {
                    position: entry.position,
                    radius: self.style.dot_radius,
                    color: self.style.color.clone(),
                    opacity: opacity(self.style.gradual_opacity, i, n),
                    tooltip: format!(
                        "{} {}",
                        self.style.title,
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S")
                    ),
                });
            }

            if self.style.show_lines {
                if let Some(next) = self.entries.get(i + 1) {
                    elements.push(PathElement::Segment {
                        from: entry.position,
                        to: next.position,
                        color: self.style.color.clone(),
                        opacity: opacity(self.style.gradual_opacity, i, segments),
                    });
                }
            }
        }

        elements
    }
}

/// Opacity of element `index` out of `count`: older elements fade toward
/// `gradual`, the newest is fully opaque. Two or fewer elements never fade.
pub fn opacity(gradual: Option<f64>, index: usize, count: usize) -> f64 {
    match gradual {
        Some(g) if count > 2 => g + (1.0 - g) * index as f64 / (count - 1) as f64,
        _ => 1.0,
    }
}
