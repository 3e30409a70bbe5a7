//! Error types for the FleetLab device fleet simulator.
//!
//! Hub communication errors are deliberately `Clone`: a settled poll outcome
//! travels through the coalescing poller's broadcast slot, where more than
//! one waiter may observe it before exactly one claims it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`FleetError`] as the error type.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Top-level error type for all FleetLab operations.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Hub communication errors
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by hub operations (open, poll, send, state updates).
///
/// These cover the lifecycle of the device's single long-lived connection.
/// The device loop uses [`HubError::is_transient`] to decide whether to back
/// off and keep cycling or to log and move on.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum HubError {
    /// A remote operation failed mid-flight
    #[error("Hub communication failed: {reason}")]
    Communication { reason: String },

    /// The connection was closed by the hub or the transport
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// No connection is established
    #[error("Not connected")]
    NotConnected,

    /// Connection establishment timed out
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// The hub sent something the client could not interpret
    #[error("Protocol violation: {details}")]
    Protocol { details: String },
}

impl HubError {
    /// Creates a communication error.
    pub fn communication(reason: impl Into<String>) -> Self {
        Self::Communication {
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol(details: impl Into<String>) -> Self {
        Self::Protocol {
            details: details.into(),
        }
    }

    /// Returns true if this error is transient and the device loop should
    /// back off and retry on its next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HubError::Communication { .. }
                | HubError::ConnectionClosed { .. }
                | HubError::ConnectTimeout { .. }
        )
    }
}

/// Errors related to configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Duplicate device identity
    #[error("Duplicate device id: {device_id}")]
    DuplicateDevice { device_id: String },

    /// No devices configured
    #[error("No devices configured")]
    NoDevices,
}

impl ConfigError {
    /// Creates a load failed error.
    pub fn load_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_error_transient() {
        assert!(HubError::communication("broken pipe").is_transient());
        assert!(HubError::closed("EOF").is_transient());
        assert!(HubError::ConnectTimeout { timeout_ms: 10_000 }.is_transient());
        assert!(!HubError::NotConnected.is_transient());
        assert!(!HubError::protocol("bad frame").is_transient());
    }

    #[test]
    fn test_hub_error_clone_preserves_reason() {
        let err = HubError::communication("socket reset");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_config_error_helpers() {
        let err = ConfigError::missing_field("shared_access_key");
        assert!(matches!(err, ConfigError::MissingField { .. }));

        let err = ConfigError::invalid_value("loop_delay_ms", "must be positive");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_error_conversion() {
        let err: FleetError = HubError::NotConnected.into();
        assert!(matches!(err, FleetError::Hub(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FleetError = io_err.into();
        assert!(matches!(err, FleetError::Io(_)));
    }
}
