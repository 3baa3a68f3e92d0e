//! Custom error types for the cooling control engine.
//!
//! This module provides fine-grained error handling for driver command
//! execution, status parsing, dialect negotiation, and configuration
//! validation.

use thiserror::Error;

/// Main error type for control engine operations.
#[derive(Error, Debug)]
pub enum ControlError {
    /// External command did not finish within its time budget.
    #[error("Timeout after {timeout_ms} ms waiting for {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// External command ran but reported failure.
    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// External command could not be started.
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or unrecognized output from the driver or a sensor tool.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Every command variant was rejected by the device.
    #[error("No accepted command dialect for device '{device}'. Reconnect or renegotiate.")]
    DialectUnresolved { device: String },

    /// Speed percentage out of valid range.
    #[error("Invalid speed {value}% for {channel}. Valid range: 0%-100%")]
    InvalidPercent { channel: String, value: u8 },

    /// Safety or curve configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Named profile does not exist.
    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    /// Control loop is no longer running.
    #[error("Control loop is not running")]
    LoopStopped,

    /// Generic invalid input error.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Whether this failure is transient I/O (retried next tick).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControlError::Timeout { .. }
                | ControlError::Spawn { .. }
                | ControlError::InvalidResponse { .. }
        )
    }
}

/// Result type alias for control engine operations.
pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = ControlError::Timeout {
            operation: "status".into(),
            timeout_ms: 3000,
        };
        assert!(timeout.is_transient());

        let unresolved = ControlError::DialectUnresolved {
            device: "Kraken".into(),
        };
        assert!(!unresolved.is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = ControlError::InvalidPercent {
            channel: "fan1".into(),
            value: 120,
        };
        assert_eq!(err.to_string(), "Invalid speed 120% for fan1. Valid range: 0%-100%");
    }
}
