//! Edge-triggered alarm latching.

use std::collections::HashMap;

/// Interprets a raw telemetry reading as an alarm level.
///
/// A reading is active when present and nonzero after integer
/// truncation (matching how the purifier controller publishes alarm
/// flags). Missing readings are inactive.
pub fn alarm_active(value: Option<f64>) -> bool {
    match value {
        Some(v) if v.is_finite() => v as i64 != 0,
        _ => false,
    }
}

/// Converts level-style alarm readings into one-shot notifications.
///
/// A latch entry is set when an alarm first reads active and cleared
/// the moment it reads inactive again, so a sustained condition
/// notifies exactly once and each re-activation notifies again. The
/// latch carries no timestamps; it resets wholesale when the control
/// loop restarts.
#[derive(Debug, Default)]
pub struct AlarmLatch {
    sent: HashMap<String, bool>,
}

impl AlarmLatch {
    /// Creates an empty latch (no alarm has been notified).
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one reading for `name`; returns true when a notification
    /// should go out this cycle.
    pub fn should_notify(&mut self, name: &str, active: bool) -> bool {
        if active {
            let sent = self.sent.entry(name.to_string()).or_insert(false);
            if *sent {
                false
            } else {
                *sent = true;
                true
            }
        } else {
            self.sent.insert(name.to_string(), false);
            false
        }
    }

    /// Returns true if `name` is currently latched (notified and not
    /// yet cleared).
    #[must_use]
    pub fn is_latched(&self, name: &str) -> bool {
        self.sent.get(name).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_active_truthiness() {
        assert!(alarm_active(Some(1.0)));
        assert!(alarm_active(Some(2.0)));
        assert!(!alarm_active(Some(0.0)));
        assert!(!alarm_active(Some(0.5)));
        assert!(!alarm_active(None));
        assert!(!alarm_active(Some(f64::NAN)));
    }

    #[test]
    fn test_latch_notifies_once_per_activation() {
        let mut latch = AlarmLatch::new();
        let readings = [false, true, true, false, true];
        let notified: Vec<bool> = readings
            .iter()
            .map(|&active| latch.should_notify("Array 1 Red Alarm", active))
            .collect();
        assert_eq!(notified, vec![false, true, false, false, true]);
    }

    #[test]
    fn test_latch_first_reading_active() {
        let mut latch = AlarmLatch::new();
        assert!(latch.should_notify("Array 2 Blue Alarm", true));
        assert!(latch.is_latched("Array 2 Blue Alarm"));
    }

    #[test]
    fn test_latch_clears_on_inactive() {
        let mut latch = AlarmLatch::new();
        assert!(latch.should_notify("alarm", true));
        assert!(!latch.should_notify("alarm", false));
        assert!(!latch.is_latched("alarm"));
        assert!(latch.should_notify("alarm", true));
    }

    #[test]
    fn test_latch_names_independent() {
        let mut latch = AlarmLatch::new();
        assert!(latch.should_notify("red", true));
        assert!(latch.should_notify("blue", true));
        assert!(!latch.should_notify("red", true));
    }
}
