use crate::hub::HubClient;
use crate::state::{ConnectionState, ConnectionStatus};
use async_trait::async_trait;
use bytes::BytesMut;
use fleetlab_core::error::HubError;
use fleetlab_core::types::{ControlMessage, Envelope, ReportedState, TelemetryMessage};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Frame delimiter for the newline-delimited protocol
const NEWLINE_DELIMITER: u8 = b'\n';

/// Maximum frame size (1MB)
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Configuration for the TCP hub client
#[derive(Debug, Clone)]
pub struct TcpHubConfig {
    /// Device identity presented on open
    pub device_id: String,
    /// Hub endpoint (host:port)
    pub endpoint: String,
    /// Shared access key presented on open
    pub shared_access_key: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Write timeout
    pub write_timeout: Duration,
    /// Enable TCP keepalive
    pub keepalive: bool,
    /// TCP keepalive interval
    pub keepalive_interval: Option<Duration>,
    /// Queue depth for inbound control messages
    pub recv_buffer_size: usize,
}

impl Default for TcpHubConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            endpoint: String::new(),
            shared_access_key: String::new(),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            keepalive: true,
            keepalive_interval: Some(Duration::from_secs(30)),
            recv_buffer_size: 64,
        }
    }
}

/// Hub client over a newline-delimited JSON TCP connection.
///
/// One frame is one [`Envelope`] serialized as a single JSON line. A
/// background task parses inbound `control` envelopes into a bounded queue
/// that `poll` drains; all outbound operations write a single frame.
pub struct TcpHubClient {
    config: TcpHubConfig,
    status: ConnectionStatus,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    control_rx: tokio::sync::Mutex<Option<Receiver<ControlMessage>>>,
}

impl TcpHubClient {
    /// Create a new TCP hub client
    pub fn new(config: TcpHubConfig) -> Self {
        Self {
            config,
            status: ConnectionStatus::new(),
            writer: tokio::sync::Mutex::new(None),
            control_rx: tokio::sync::Mutex::new(None),
        }
    }

    /// Configure TCP socket options
    fn configure_socket(&self, stream: &TcpStream) -> Result<(), HubError> {
        stream
            .set_nodelay(true)
            .map_err(|e| HubError::communication(format!("failed to set TCP_NODELAY: {e}")))?;

        if self.config.keepalive {
            let keepalive = socket2::TcpKeepalive::new();
            let keepalive = if let Some(interval) = self.config.keepalive_interval {
                keepalive.with_time(interval)
            } else {
                keepalive
            };

            let socket = socket2::SockRef::from(stream);
            socket
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| HubError::communication(format!("failed to set keepalive: {e}")))?;
        }

        Ok(())
    }

    /// Serialize and write one envelope frame
    async fn write_frame(&self, envelope: &Envelope) -> Result<(), HubError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(HubError::NotConnected)?;

        let mut line = serde_json::to_vec(envelope)
            .map_err(|e| HubError::protocol(format!("failed to encode envelope: {e}")))?;
        line.push(NEWLINE_DELIMITER);

        timeout(self.config.write_timeout, writer.write_all(&line))
            .await
            .map_err(|_| HubError::communication("write timeout"))?
            .map_err(|e| {
                self.status.metrics().record_error();
                HubError::communication(format!("write error: {e}"))
            })?;

        writer
            .flush()
            .await
            .map_err(|e| HubError::communication(format!("flush error: {e}")))?;

        self.status.metrics().record_message_sent();
        Ok(())
    }

    /// Read frames from the hub, routing control messages into the queue.
    ///
    /// Runs until EOF, a read error, or the queue's receiver is dropped.
    async fn receive_loop(
        mut reader: OwnedReadHalf,
        tx: Sender<ControlMessage>,
        status: ConnectionStatus,
        device_id: String,
    ) {
        let mut buffer = BytesMut::with_capacity(8192);

        loop {
            // Drain complete frames already buffered
            while let Some(pos) = buffer.iter().position(|&b| b == NEWLINE_DELIMITER) {
                let frame = buffer.split_to(pos + 1);
                let line = &frame[..frame.len() - 1];
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_slice::<Envelope>(line) {
                    Ok(envelope) => {
                        if let Some(msg) = envelope.into_control() {
                            status.metrics().record_message_received();
                            if tx.send(msg).await.is_err() {
                                debug!(device_id = %device_id, "control queue closed, stopping receive loop");
                                return;
                            }
                        } else {
                            debug!(device_id = %device_id, "ignoring non-control envelope from hub");
                        }
                    }
                    Err(e) => {
                        status.metrics().record_error();
                        warn!(device_id = %device_id, error = %e, "dropping malformed frame from hub");
                    }
                }
            }

            if buffer.len() >= MAX_FRAME_SIZE {
                status.set_error("frame too large".to_string());
                return;
            }

            match reader.read_buf(&mut buffer).await {
                Ok(0) => {
                    info!(device_id = %device_id, "connection closed by hub");
                    status.set_state(ConnectionState::Disconnected);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    status.metrics().record_error();
                    status.set_error(format!("read error: {e}"));
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl HubClient for TcpHubClient {
    async fn open(&self) -> Result<(), HubError> {
        self.status.set_state(ConnectionState::Connecting);
        self.status.clear_error();

        info!(
            device_id = %self.config.device_id,
            endpoint = %self.config.endpoint,
            "connecting to hub"
        );

        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.endpoint),
        )
        .await
        .map_err(|_| {
            self.status.metrics().record_reconnect();
            HubError::ConnectTimeout {
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            }
        })?
        .map_err(|e| {
            self.status.metrics().record_reconnect();
            HubError::communication(format!("failed to connect: {e}"))
        })?;

        self.configure_socket(&stream)?;

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.config.recv_buffer_size);

        *self.writer.lock().await = Some(writer);
        *self.control_rx.lock().await = Some(rx);

        tokio::spawn(Self::receive_loop(
            reader,
            tx,
            self.status.clone(),
            self.config.device_id.clone(),
        ));

        self.write_frame(&Envelope::Open {
            device_id: self.config.device_id.clone(),
            shared_access_key: self.config.shared_access_key.clone(),
        })
        .await?;

        self.status.set_state(ConnectionState::Connected);
        info!(device_id = %self.config.device_id, "connected to hub");

        Ok(())
    }

    async fn poll(&self, wait: Duration) -> Result<Option<ControlMessage>, HubError> {
        let mut guard = self.control_rx.lock().await;
        let rx = guard.as_mut().ok_or(HubError::NotConnected)?;

        match timeout(wait, rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            // Queue closed: the receive loop ended, so waiters must get a
            // failure rather than hang on a dead connection.
            Ok(None) => {
                *guard = None;
                Err(HubError::closed(
                    self.status
                        .error_message()
                        .unwrap_or_else(|| "receive loop ended".to_string()),
                ))
            }
            Err(_) => Ok(None),
        }
    }

    async fn complete(&self, msg: &ControlMessage) -> Result<(), HubError> {
        debug!(
            device_id = %self.config.device_id,
            message_id = %msg.message_id,
            "completing control message"
        );
        self.write_frame(&Envelope::Ack {
            message_id: msg.message_id.clone(),
        })
        .await
    }

    async fn abandon(&self, msg: &ControlMessage) -> Result<(), HubError> {
        debug!(
            device_id = %self.config.device_id,
            message_id = %msg.message_id,
            "abandoning control message"
        );
        self.write_frame(&Envelope::Nack {
            message_id: msg.message_id.clone(),
        })
        .await
    }

    async fn send_telemetry(&self, msg: TelemetryMessage) -> Result<(), HubError> {
        self.write_frame(&Envelope::from_telemetry(&msg)).await
    }

    async fn update_reported(&self, state: &ReportedState) -> Result<(), HubError> {
        self.write_frame(&Envelope::Report {
            state: state.clone(),
        })
        .await
    }

    fn status(&self) -> &ConnectionStatus {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_starts_disconnected() {
        let client = TcpHubClient::new(TcpHubConfig::default());
        assert!(!client.status().is_connected());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = TcpHubClient::new(TcpHubConfig::default());

        let err = client.poll(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected));

        let err = client
            .update_reported(&ReportedState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
    }
}
