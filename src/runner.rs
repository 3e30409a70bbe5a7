//! Device simulation loop.
//!
//! One runner per simulated device: it owns the device's hub connection,
//! drives a fixed-period cycle of reported-state update, telemetry send, and
//! control poll, and tracks per-operation latency the whole session.

use fleetlab_client::coalesce::CoalescedClient;
use fleetlab_client::retry::{with_retry, RetryConfig};
use fleetlab_client::tcp::{TcpHubClient, TcpHubConfig};
use fleetlab_client::HubClient;
use fleetlab_core::config::SimulatorConfig;
use fleetlab_core::types::{ReportedState, TelemetryMessage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Latency tracking for one operation kind over a runner's lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct OpStats {
    /// Slowest observed duration
    pub max: Duration,
    /// Number of operations slower than the configured threshold
    pub slow: u32,
}

impl OpStats {
    /// Record one operation's duration against the slow threshold.
    pub fn record(&mut self, elapsed: Duration, threshold: Duration) {
        if elapsed > self.max {
            self.max = elapsed;
        }
        if elapsed > threshold {
            self.slow += 1;
        }
    }
}

/// Drives one simulated device against the hub.
pub struct DeviceRunner {
    device_id: String,
    config: Arc<SimulatorConfig>,
}

impl DeviceRunner {
    pub fn new(device_id: String, config: Arc<SimulatorConfig>) -> Self {
        Self { device_id, config }
    }

    /// Builds the hub client for this device, coalescing polls when enabled.
    fn build_client(&self) -> Arc<dyn HubClient> {
        let transport = Arc::new(TcpHubClient::new(TcpHubConfig {
            device_id: self.device_id.clone(),
            endpoint: self.config.device_endpoint().to_string(),
            shared_access_key: self.config.shared_access_key.clone(),
            connect_timeout: Duration::from_millis(self.config.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.config.write_timeout_ms),
            ..TcpHubConfig::default()
        }));

        if self.config.coalesced_poll {
            Arc::new(CoalescedClient::new(self.device_id.clone(), transport))
        } else {
            transport
        }
    }

    /// Runs the simulation loop until cancelled.
    ///
    /// Connection failure during startup ends the runner; errors inside the
    /// cycle are logged, transient ones additionally back the loop off.
    pub async fn run(self, cancel: CancellationToken) {
        let device_id = self.device_id.clone();
        let config = Arc::clone(&self.config);
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let retry = if config.retry.enabled {
            RetryConfig::from(&config.retry)
        } else {
            RetryConfig::disabled()
        };

        let client = self.build_client();

        let started = Instant::now();
        match with_retry(|| client.open(), &retry).await {
            Ok(()) => {
                info!(
                    device_id = %device_id,
                    connect_ms = started.elapsed().as_millis() as u64,
                    retry_enabled = retry.enabled,
                    "device client connected"
                );
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "device client creation failed");
                return;
            }
        }

        let mut number: u64 = 0;
        let mut report_stats = OpStats::default();
        let mut telemetry_stats = OpStats::default();
        let mut poll_stats = OpStats::default();
        let threshold = config.slow_op_threshold();

        while !cancel.is_cancelled() {
            number += 1;

            if config.update_reported {
                let mut state = ReportedState::new();
                state.set("number", format!("{correlation_id}-{number}"));

                let started = Instant::now();
                match client.update_reported(&state).await {
                    Ok(()) => {
                        report_stats.record(started.elapsed(), threshold);
                        info!(
                            device_id = %device_id,
                            cycle = number,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            max_ms = report_stats.max.as_millis() as u64,
                            delays = report_stats.slow,
                            "reported state updated"
                        );
                    }
                    Err(e) if e.is_transient() => {
                        warn!(
                            device_id = %device_id,
                            backoff_ms = config.comm_error_backoff_ms,
                            error = %e,
                            "hub problem while updating reported state, backing off"
                        );
                        if self.backoff(&cancel).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(device_id = %device_id, error = %e, "failed to update reported state");
                    }
                }
            }

            if config.send_telemetry {
                let telemetry = TelemetryMessage::text(format!("{correlation_id}-{number}"))
                    .with_correlation_id(correlation_id.clone());

                let started = Instant::now();
                match client.send_telemetry(telemetry).await {
                    Ok(()) => {
                        telemetry_stats.record(started.elapsed(), threshold);
                        info!(
                            device_id = %device_id,
                            cycle = number,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            max_ms = telemetry_stats.max.as_millis() as u64,
                            delays = telemetry_stats.slow,
                            "telemetry sent"
                        );
                    }
                    Err(e) if e.is_transient() => {
                        warn!(
                            device_id = %device_id,
                            backoff_ms = config.comm_error_backoff_ms,
                            error = %e,
                            "hub problem while sending telemetry, backing off"
                        );
                        if self.backoff(&cancel).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(device_id = %device_id, error = %e, "failed to send telemetry");
                    }
                }
            }

            if config.poll_control
                && self
                    .poll_cycle(&client, &mut poll_stats, &cancel, number)
                    .await
            {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.loop_delay()) => {}
            }
        }

        info!(device_id = %device_id, cycles = number, "device runner stopped");
    }

    /// One control-poll step: poll, optionally check-and-abandon a pending
    /// message, optionally complete the received one.
    ///
    /// Returns true when the loop should stop (cancelled during backoff).
    async fn poll_cycle(
        &self,
        client: &Arc<dyn HubClient>,
        stats: &mut OpStats,
        cancel: &CancellationToken,
        cycle: u64,
    ) -> bool {
        let config = &self.config;
        let device_id = &self.device_id;
        let threshold = config.slow_op_threshold();

        let started = Instant::now();
        let polled = client.poll(config.poll_timeout()).await;
        stats.record(started.elapsed(), threshold);

        let msg = match polled {
            Ok(msg) => {
                info!(
                    device_id = %device_id,
                    cycle,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    max_ms = stats.max.as_millis() as u64,
                    delays = stats.slow,
                    "control poll finished"
                );
                msg
            }
            Err(e) if e.is_transient() => {
                warn!(
                    device_id = %device_id,
                    backoff_ms = config.comm_error_backoff_ms,
                    error = %e,
                    "hub problem while polling control messages, backing off"
                );
                return self.backoff(cancel).await;
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "failed to poll control message");
                return false;
            }
        };

        let Some(msg) = msg else {
            info!(device_id = %device_id, cycle, "no control message received");
            return false;
        };

        info!(
            device_id = %device_id,
            message_id = %msg.message_id,
            body = %msg.body_as_text(),
            "control message received"
        );

        if config.check_pending_control {
            let started = Instant::now();
            match client.poll(config.pending_poll_timeout()).await {
                Ok(Some(pending)) => {
                    stats.record(started.elapsed(), threshold);
                    info!(
                        device_id = %device_id,
                        message_id = %pending.message_id,
                        body = %pending.body_as_text(),
                        "abandoning pending control message"
                    );
                    if let Err(e) = client.abandon(&pending).await {
                        warn!(device_id = %device_id, error = %e, "failed to abandon pending message");
                    }
                }
                Ok(None) => {
                    stats.record(started.elapsed(), threshold);
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "pending-message check failed");
                }
            }
        }

        if config.complete_control {
            if let Err(e) = client.complete(&msg).await {
                warn!(
                    device_id = %device_id,
                    message_id = %msg.message_id,
                    error = %e,
                    "failed to complete control message"
                );
            } else {
                info!(
                    device_id = %device_id,
                    message_id = %msg.message_id,
                    "control message completed"
                );
            }
        }

        false
    }

    /// Sleeps the communication-error backoff; returns true when cancelled.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.comm_error_backoff()) => false,
        }
    }
}
