//! Telemetry samples and aggregation.

use serde::{Deserialize, Serialize};

/// One telemetry reading fetched from the transport.
///
/// Ephemeral by design: samples are pulled fresh each control cycle and
/// never persisted. A `None` value means the sequence has no data yet
/// (device offline, sequence absent, or no report since server start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Full server path of the sequence (e.g. "garage/BMU-1/relative_state_of_charge")
    pub path: String,

    /// Most recent numeric value, if any
    pub value: Option<f64>,
}

impl TelemetrySample {
    /// Creates a new sample.
    pub fn new(path: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// Returns true if the sample carries a value.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// Arithmetic mean of the values that are present.
///
/// Missing readings are ignored rather than treated as zero, so one
/// offline battery unit does not drag the bank average down. An
/// all-missing input yields `None`: no average exists and callers must
/// skip the downstream write for that group this cycle.
pub fn mean_of_present(values: &[Option<f64>]) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values.iter().flatten() {
        sum += value;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_ignores_missing() {
        let values = [Some(40.0), None, Some(60.0)];
        assert_eq!(mean_of_present(&values), Some(50.0));
    }

    #[test]
    fn test_mean_all_missing_is_none() {
        let values: [Option<f64>; 3] = [None, None, None];
        assert_eq!(mean_of_present(&values), None);
    }

    #[test]
    fn test_mean_empty_is_none() {
        assert_eq!(mean_of_present(&[]), None);
    }

    #[test]
    fn test_mean_single_value() {
        assert_eq!(mean_of_present(&[Some(72.5)]), Some(72.5));
    }

    #[test]
    fn test_mean_five_values() {
        let values = [Some(10.0), Some(20.0), Some(30.0), Some(40.0), Some(50.0)];
        assert_eq!(mean_of_present(&values), Some(30.0));
    }

    #[test]
    fn test_sample_presence() {
        assert!(TelemetrySample::new("a/b", Some(1.0)).is_present());
        assert!(!TelemetrySample::new("a/b", None).is_present());
    }
}
