//! Device identity and classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Server-side path identifying one physical device.
///
/// Wraps a relative path string (e.g. "ohana/generator-relay").
/// Paths are unique within a device registry; the sequences a device
/// publishes live underneath its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevicePath(String);

impl DevicePath {
    /// Creates a new DevicePath from a string.
    ///
    /// Note: This does not validate the path shape. The configuration
    /// loader rejects empty paths before constructing devices.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the path is empty (not a usable identity).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the full path of a sequence published under this device.
    ///
    /// `DevicePath::new("ohana/generator-relay").sequence("relay-1")`
    /// yields `"ohana/generator-relay/relay-1"`.
    pub fn sequence(&self, name: &str) -> String {
        format!("{}/{}", self.0, name)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DevicePath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DevicePath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DevicePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Device Classification
// ============================================================================

/// Kind of physical endpoint a device row describes.
///
/// The configuration table names kinds with lowercase strings; rows
/// carrying anything else are configuration errors and contribute no
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Switchable relay contact (actuator-capable)
    Relay,

    /// Modbus TCP controller (register bank)
    Modbus,
}

impl DeviceKind {
    /// Returns the lowercase identifier used in configuration rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Modbus => "modbus",
        }
    }
}

impl FromStr for DeviceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relay" => Ok(Self::Relay),
            "modbus" => Ok(Self::Modbus),
            other => Err(CoreError::UnknownDeviceKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_sequence() {
        let path = DevicePath::new("ohana/generator-relay");
        assert_eq!(path.sequence("relay-1"), "ohana/generator-relay/relay-1");
    }

    #[test]
    fn test_device_path_display() {
        let path = DevicePath::from("garage/BMU-1");
        assert_eq!(path.to_string(), "garage/BMU-1");
        assert_eq!(path.as_str(), "garage/BMU-1");
    }

    #[test]
    fn test_device_kind_parsing() {
        assert_eq!("relay".parse::<DeviceKind>().unwrap(), DeviceKind::Relay);
        assert_eq!("modbus".parse::<DeviceKind>().unwrap(), DeviceKind::Modbus);
        assert_eq!(" Modbus ".parse::<DeviceKind>().unwrap(), DeviceKind::Modbus);
    }

    #[test]
    fn test_device_kind_unknown() {
        let err = "zigbee".parse::<DeviceKind>().unwrap_err();
        assert!(err.to_string().contains("zigbee"));
    }

    #[test]
    fn test_device_kind_display() {
        assert_eq!(DeviceKind::Relay.to_string(), "relay");
        assert_eq!(DeviceKind::Modbus.to_string(), "modbus");
    }
}
