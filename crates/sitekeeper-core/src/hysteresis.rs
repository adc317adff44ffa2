//! Generator hysteresis control.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete command for a relay actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayCommand {
    /// Close the relay contact (generator on)
    On,

    /// Open the relay contact (generator off)
    Off,
}

impl RelayCommand {
    /// Returns the wire value written to the relay endpoint.
    pub fn as_value(&self) -> u16 {
        match self {
            Self::On => 1,
            Self::Off => 0,
        }
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Separate on/off trip points around a dead band.
///
/// The generator relay closes when the charge average falls below
/// `lower` and opens when it climbs above `upper`. Between the two
/// thresholds the relay holds whatever state it is in, which prevents
/// rapid toggling around a single trip point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisBand {
    /// Charge percentage below which the generator turns on
    pub lower: f64,

    /// Charge percentage above which the generator turns off
    pub upper: f64,
}

impl HysteresisBand {
    /// Creates a band from its two trip points.
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Decides whether the relay needs a command this cycle.
    ///
    /// `relay_on` is the actuator's current state as last reported by
    /// telemetry, fetched fresh rather than cached. Returns `None`
    /// inside the dead band or when the relay already sits on the
    /// wanted side, so repeated cycles past a threshold issue no
    /// redundant commands.
    pub fn decide(&self, average: f64, relay_on: bool) -> Option<RelayCommand> {
        if average < self.lower && !relay_on {
            Some(RelayCommand::On)
        } else if average > self.upper && relay_on {
            Some(RelayCommand::Off)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band() -> HysteresisBand {
        HysteresisBand::new(30.0, 90.0)
    }

    #[test]
    fn test_below_lower_with_relay_off_commands_on() {
        assert_eq!(band().decide(25.0, false), Some(RelayCommand::On));
    }

    #[test]
    fn test_below_lower_with_relay_on_holds() {
        // Already running, do not re-command
        assert_eq!(band().decide(25.0, true), None);
    }

    #[test]
    fn test_above_upper_with_relay_on_commands_off() {
        assert_eq!(band().decide(95.0, true), Some(RelayCommand::Off));
    }

    #[test]
    fn test_above_upper_with_relay_off_holds() {
        assert_eq!(band().decide(95.0, false), None);
    }

    #[test]
    fn test_dead_band_holds_either_state() {
        assert_eq!(band().decide(60.0, false), None);
        assert_eq!(band().decide(60.0, true), None);
    }

    #[test]
    fn test_exact_thresholds_hold() {
        // Trip points are strict comparisons
        assert_eq!(band().decide(30.0, false), None);
        assert_eq!(band().decide(90.0, true), None);
    }

    #[test]
    fn test_relay_command_values() {
        assert_eq!(RelayCommand::On.as_value(), 1);
        assert_eq!(RelayCommand::Off.as_value(), 0);
    }
}
