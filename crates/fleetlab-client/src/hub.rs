use crate::state::ConnectionStatus;
use async_trait::async_trait;
use fleetlab_core::error::HubError;
use fleetlab_core::types::{ControlMessage, ReportedState, TelemetryMessage};
use std::time::Duration;

/// Async trait for hub clients.
///
/// One implementor exists per device connection; the coalescing poller
/// decorates another implementor, so every method takes `&self` and
/// implementations must be safe to share behind an `Arc` across tasks.
///
/// `poll` leases at most one control message from the hub per call. A leased
/// message must eventually be either completed (removed from the hub's
/// queue) or abandoned (returned for redelivery).
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Establish the connection to the hub.
    async fn open(&self) -> Result<(), HubError>;

    /// Check for a pending control message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when no message arrived within the timeout.
    /// Implementations must not block past the timeout by more than
    /// scheduling overhead.
    async fn poll(&self, timeout: Duration) -> Result<Option<ControlMessage>, HubError>;

    /// Acknowledge a control message, removing it from the hub's queue.
    async fn complete(&self, msg: &ControlMessage) -> Result<(), HubError>;

    /// Abandon a control message, returning it to the hub's queue for
    /// redelivery.
    async fn abandon(&self, msg: &ControlMessage) -> Result<(), HubError>;

    /// Send a telemetry event to the hub.
    async fn send_telemetry(&self, msg: TelemetryMessage) -> Result<(), HubError>;

    /// Update the device's reported state.
    async fn update_reported(&self, state: &ReportedState) -> Result<(), HubError>;

    /// Connection state and counters for this client.
    fn status(&self) -> &ConnectionStatus;
}
