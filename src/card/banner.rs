use crate::host::MapSurface;
use std::collections::BTreeSet;

pub const FIRST_RUN_ERROR: &str = "Error found in first run, check Console";
pub const UPDATE_ERROR: &str = "Error found, check Console";

/// On-map warnings, each message shown at most once.
#[derive(Debug, Default)]
pub struct WarningBanner {
    shown: BTreeSet<String>,
}

impl WarningBanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the message is already on the map.
    pub fn show(&mut self, surface: &dyn MapSurface, message: &str) -> bool {
        if !self.shown.insert(message.to_string()) {
            return false;
        }
        surface.show_warning(message);
        true
    }

    pub fn clear(&mut self, surface: &dyn MapSurface, message: &str) {
        if self.shown.remove(message) {
            surface.clear_warning(message);
        }
    }

    pub fn clear_all(&mut self, surface: &dyn MapSurface) {
        for message in std::mem::take(&mut self.shown) {
            surface.clear_warning(&message);
        }
    }

    pub fn is_shown(&self, message: &str) -> bool {
        self.shown.contains(message)
    }

    pub fn messages(&self) -> Vec<String> {
        self.shown.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingSurface;

    #[test]
    fn test_messages_are_deduplicated() {
        let surface = RecordingSurface::new();
        let mut banner = WarningBanner::new();

        assert!(banner.show(&surface, UPDATE_ERROR));
        assert!(!banner.show(&surface, UPDATE_ERROR));
        assert_eq!(surface.warnings(), vec![UPDATE_ERROR.to_string()]);

        banner.clear(&surface, UPDATE_ERROR);
        assert!(surface.warnings().is_empty());
        assert!(!banner.is_shown(UPDATE_ERROR));

        // Clearing twice is harmless
        banner.clear(&surface, UPDATE_ERROR);
        assert!(banner.show(&surface, UPDATE_ERROR));
    }
}
