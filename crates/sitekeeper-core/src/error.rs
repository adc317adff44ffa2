//! Core error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in core domain operations.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Configuration row named a device kind this build does not implement
    #[error("unrecognized device kind: {kind}")]
    UnknownDeviceKind { kind: String },

    /// Field value failed validation
    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
