use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Connection state for a hub client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Client is disconnected
    Disconnected,
    /// Client is attempting to connect
    Connecting,
    /// Client is connected and operational
    Connected,
    /// Client is reconnecting after a failure
    Reconnecting,
    /// Client encountered a fatal error
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Counters tracked per hub connection
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    /// Total control messages received
    messages_received: Arc<AtomicU64>,
    /// Total messages sent (telemetry, reports, acks)
    messages_sent: Arc<AtomicU64>,
    /// Total errors encountered
    errors: Arc<AtomicU64>,
    /// Number of reconnection attempts
    reconnect_attempts: Arc<AtomicUsize>,
    /// Last activity timestamp
    last_activity: Arc<parking_lot::RwLock<SystemTime>>,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMetrics {
    /// Create a new ConnectionMetrics instance
    pub fn new() -> Self {
        Self {
            messages_received: Arc::new(AtomicU64::new(0)),
            messages_sent: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: Arc::new(AtomicUsize::new(0)),
            last_activity: Arc::new(parking_lot::RwLock::new(SystemTime::now())),
        }
    }

    /// Record a control message received
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    /// Record a message sent
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    /// Record an error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconnection attempt
    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Update last activity timestamp
    pub fn update_last_activity(&self) {
        *self.last_activity.write() = SystemTime::now();
    }

    /// Get total control messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get total messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Get total errors
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Get reconnect attempts
    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Get time since last activity
    pub fn time_since_last_activity(&self) -> Duration {
        self.last_activity
            .read()
            .elapsed()
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Combined connection state and metrics
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    metrics: ConnectionMetrics,
    error_message: Arc<parking_lot::RwLock<Option<String>>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    /// Create a new ConnectionStatus
    pub fn new() -> Self {
        Self {
            state: Arc::new(parking_lot::RwLock::new(ConnectionState::Disconnected)),
            metrics: ConnectionMetrics::new(),
            error_message: Arc::new(parking_lot::RwLock::new(None)),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Set connection state
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Get metrics reference
    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Set error message and mark the connection failed
    pub fn set_error(&self, error: String) {
        *self.error_message.write() = Some(error);
        self.set_state(ConnectionState::Failed);
    }

    /// Clear error message
    pub fn clear_error(&self) {
        *self.error_message.write() = None;
    }

    /// Get error message
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = ConnectionMetrics::new();

        metrics.record_message_sent();
        metrics.record_message_received();
        metrics.record_error();
        metrics.record_reconnect();

        assert_eq!(metrics.messages_sent(), 1);
        assert_eq!(metrics.messages_received(), 1);
        assert_eq!(metrics.errors(), 1);
        assert_eq!(metrics.reconnect_attempts(), 1);
    }

    #[test]
    fn test_connection_status() {
        let status = ConnectionStatus::new();

        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert!(!status.is_connected());

        status.set_state(ConnectionState::Connected);
        assert!(status.is_connected());

        status.set_error("link lost".to_string());
        assert_eq!(status.state(), ConnectionState::Failed);
        assert_eq!(status.error_message(), Some("link lost".to_string()));
    }
}
