//! Water-purifier status projection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Operating state reported by one purifier array.
///
/// The purifier controller publishes small integer status codes; any
/// code outside the known set (including a missing reading) projects
/// to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurifierStatus {
    /// Idle, ready to start
    Standby,

    /// Startup sequence in progress
    Starting,

    /// Producing water
    Running,

    /// Shutdown sequence in progress
    ShuttingDown,

    /// Missing or unrecognized status code
    Unknown,
}

impl PurifierStatus {
    /// Maps a raw status-code reading to its state.
    ///
    /// Codes arrive as whole floats off the telemetry store; anything
    /// that is not exactly 0-3 is `Unknown`.
    pub fn from_code(code: Option<f64>) -> Self {
        match code {
            Some(c) if c == 0.0 => Self::Standby,
            Some(c) if c == 1.0 => Self::Starting,
            Some(c) if c == 2.0 => Self::Running,
            Some(c) if c == 3.0 => Self::ShuttingDown,
            _ => Self::Unknown,
        }
    }

    /// Returns the operator-facing status text written to the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standby => "standby",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PurifierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-source status debounce memory.
///
/// Remembers the last status observed for each monitored source so the
/// control loop writes status text only on change. Sources are tracked
/// independently; memory resets when the control loop restarts.
#[derive(Debug, Default)]
pub struct StatusTracker {
    previous: HashMap<String, PurifierStatus>,
}

impl StatusTracker {
    /// Creates an empty tracker (every source's first observation counts
    /// as a change).
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `status` for `source` and reports whether it differs from
    /// the previous observation.
    pub fn changed(&mut self, source: &str, status: PurifierStatus) -> bool {
        match self.previous.get(source) {
            Some(prev) if *prev == status => false,
            _ => {
                self.previous.insert(source.to_string(), status);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(PurifierStatus::from_code(Some(0.0)), PurifierStatus::Standby);
        assert_eq!(PurifierStatus::from_code(Some(1.0)), PurifierStatus::Starting);
        assert_eq!(PurifierStatus::from_code(Some(2.0)), PurifierStatus::Running);
        assert_eq!(
            PurifierStatus::from_code(Some(3.0)),
            PurifierStatus::ShuttingDown
        );
    }

    #[test]
    fn test_status_out_of_range_is_unknown() {
        assert_eq!(PurifierStatus::from_code(Some(7.0)), PurifierStatus::Unknown);
        assert_eq!(PurifierStatus::from_code(Some(-1.0)), PurifierStatus::Unknown);
        assert_eq!(PurifierStatus::from_code(Some(1.5)), PurifierStatus::Unknown);
        assert_eq!(PurifierStatus::from_code(None), PurifierStatus::Unknown);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(PurifierStatus::ShuttingDown.to_string(), "shutting down");
        assert_eq!(PurifierStatus::Running.as_str(), "running");
    }

    #[test]
    fn test_tracker_first_observation_changes() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.changed("array-1", PurifierStatus::Standby));
    }

    #[test]
    fn test_tracker_repeat_does_not_change() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.changed("array-1", PurifierStatus::Running));
        assert!(!tracker.changed("array-1", PurifierStatus::Running));
        assert!(tracker.changed("array-1", PurifierStatus::ShuttingDown));
    }

    #[test]
    fn test_tracker_sources_independent() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.changed("array-1", PurifierStatus::Running));
        assert!(tracker.changed("array-2", PurifierStatus::Running));
        assert!(!tracker.changed("array-1", PurifierStatus::Running));
    }
}
