//! Sitekeeper Core - Shared domain types for site device supervision
//!
//! This crate provides the pure domain types and control logic shared
//! between the daemon (sitekeeperd) and the transport layer: device
//! identity, telemetry aggregation, hysteresis actuation decisions,
//! status projection, and alarm edge detection. It performs no I/O.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod alarm;
pub mod device;
pub mod error;
pub mod hysteresis;
pub mod status;
pub mod telemetry;

// Re-exports for convenience
pub use alarm::{alarm_active, AlarmLatch};
pub use device::{DeviceKind, DevicePath};
pub use error::{CoreError, CoreResult};
pub use hysteresis::{HysteresisBand, RelayCommand};
pub use status::{PurifierStatus, StatusTracker};
pub use telemetry::{mean_of_present, TelemetrySample};
