//! # fleetlab-client
//!
//! Async hub client for simulated devices.
//!
//! This crate provides the device side of the FleetLab simulator:
//!
//! - **HubClient**: async trait covering the lifecycle of one device
//!   connection (open, poll, complete/abandon, telemetry, reported state)
//! - **CoalescedClient**: decorator that merges overlapping control polls
//!   into a single in-flight remote poll, with per-caller timeouts and
//!   orphaned-message disposal
//! - **TcpHubClient**: concrete transport over newline-delimited JSON frames
//! - **Retry**: connect retry with exponential backoff
//! - **State**: connection state tracking and counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleetlab_client::{CoalescedClient, HubClient, tcp::{TcpHubClient, TcpHubConfig}};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = TcpHubConfig::default();
//!     config.device_id = "sensor-1".to_string();
//!     config.endpoint = "127.0.0.1:9900".to_string();
//!
//!     let transport = Arc::new(TcpHubClient::new(config));
//!     transport.open().await?;
//!
//!     let client = CoalescedClient::new("sensor-1", transport);
//!     if let Some(msg) = client.poll(Duration::from_millis(500)).await? {
//!         client.complete(&msg).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod coalesce;
pub mod hub;
pub mod retry;
pub mod state;
pub mod tcp;

// Re-export commonly used types
pub use coalesce::CoalescedClient;
pub use hub::HubClient;
pub use retry::{backoff_for, with_retry, RetryConfig};
pub use state::{ConnectionMetrics, ConnectionState, ConnectionStatus};
pub use tcp::{TcpHubClient, TcpHubConfig};
