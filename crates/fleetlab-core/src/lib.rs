//! # FleetLab Core
//!
//! Core types, error handling, and configuration for the FleetLab device fleet
//! simulator.
//!
//! This crate provides the foundational building blocks shared by the client
//! crate and the launcher binary:
//!
//! - **Types**: Control and telemetry message structures, reported device
//!   state, and the wire envelope for the newline-delimited hub protocol.
//! - **Errors**: `thiserror`-based error types for hub communication and
//!   configuration failures.
//! - **Configuration**: YAML configuration with `FLEETLAB_*` environment
//!   variable overrides and validation.
//!
//! ## Example
//!
//! ```
//! use fleetlab_core::config::SimulatorConfig;
//!
//! let config = SimulatorConfig::from_yaml(r#"
//! hub_addr: "127.0.0.1:9900"
//! shared_access_key: "secret"
//! devices: ["sensor-1", "sensor-2"]
//! "#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::SimulatorConfig;
pub use error::{FleetError, HubError, Result};
pub use types::{ControlMessage, Envelope, ReportedState, TelemetryMessage};
