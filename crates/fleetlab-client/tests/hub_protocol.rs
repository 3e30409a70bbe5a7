//! Integration tests for the TCP hub client against an in-process hub.
//!
//! The hub here is a scripted TCP listener speaking the newline-delimited
//! JSON envelope protocol: it records everything the device sends and pushes
//! control messages on request.

use fleetlab_client::tcp::{TcpHubClient, TcpHubConfig};
use fleetlab_client::{CoalescedClient, HubClient};
use fleetlab_core::error::HubError;
use fleetlab_core::types::{Envelope, ReportedState, TelemetryMessage};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Everything the scripted hub observed from the device.
#[derive(Default)]
struct HubLog {
    opens: Vec<String>,
    reports: Vec<ReportedState>,
    telemetry: Vec<String>,
    acks: Vec<String>,
    nacks: Vec<String>,
}

struct ScriptedHub {
    addr: SocketAddr,
    log: Arc<Mutex<HubLog>>,
    push_tx: mpsc::UnboundedSender<Envelope>,
}

impl ScriptedHub {
    /// Starts a hub accepting a single device connection.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log: Arc<Mutex<HubLog>> = Arc::default();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Envelope>();

        let task_log = Arc::clone(&log);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        let envelope: Envelope = serde_json::from_str(&line).unwrap();
                        let mut log = task_log.lock();
                        match envelope {
                            Envelope::Open { device_id, .. } => log.opens.push(device_id),
                            Envelope::Report { state } => log.reports.push(state),
                            Envelope::Telemetry { body, .. } => log.telemetry.push(body),
                            Envelope::Ack { message_id } => log.acks.push(message_id),
                            Envelope::Nack { message_id } => log.nacks.push(message_id),
                            other => panic!("unexpected envelope from device: {other:?}"),
                        }
                    }
                    pushed = push_rx.recv() => {
                        let Some(envelope) = pushed else { break };
                        let mut line = serde_json::to_vec(&envelope).unwrap();
                        line.push(b'\n');
                        writer.write_all(&line).await.unwrap();
                    }
                }
            }
        });

        Self { addr, log, push_tx }
    }

    fn push_control(&self, message_id: &str, body: &str) {
        self.push_tx
            .send(Envelope::Control {
                message_id: message_id.to_string(),
                correlation_id: None,
                content_type: None,
                body: body.to_string(),
            })
            .unwrap();
    }

    /// Drops the push channel, which ends the hub task and closes the socket.
    fn shutdown(self) -> Arc<Mutex<HubLog>> {
        drop(self.push_tx);
        self.log
    }
}

fn client_for(hub: &ScriptedHub, device_id: &str) -> TcpHubClient {
    TcpHubClient::new(TcpHubConfig {
        device_id: device_id.to_string(),
        endpoint: hub.addr.to_string(),
        shared_access_key: "test-key".to_string(),
        ..TcpHubConfig::default()
    })
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

#[tokio::test]
async fn open_poll_and_complete_round_trip() {
    let hub = ScriptedHub::start().await;
    let client = client_for(&hub, "sensor-1");

    client.open().await.unwrap();
    wait_for(|| !hub.log.lock().opens.is_empty()).await;
    assert_eq!(hub.log.lock().opens, vec!["sensor-1".to_string()]);

    hub.push_control("m-1", "reboot");
    let msg = client
        .poll(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("control message should arrive");
    assert_eq!(msg.message_id, "m-1");
    assert_eq!(msg.body_as_text(), "reboot");

    client.complete(&msg).await.unwrap();
    wait_for(|| !hub.log.lock().acks.is_empty()).await;
    assert_eq!(hub.log.lock().acks, vec!["m-1".to_string()]);
}

#[tokio::test]
async fn poll_times_out_when_queue_is_empty() {
    let hub = ScriptedHub::start().await;
    let client = client_for(&hub, "sensor-1");
    client.open().await.unwrap();

    let result = client.poll(Duration::from_millis(100)).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn reports_and_telemetry_reach_the_hub() {
    let hub = ScriptedHub::start().await;
    let client = client_for(&hub, "sensor-1");
    client.open().await.unwrap();

    let mut state = ReportedState::new();
    state.set("number", "corr-1");
    client.update_reported(&state).await.unwrap();

    client
        .send_telemetry(TelemetryMessage::text("corr-1").with_correlation_id("corr"))
        .await
        .unwrap();

    wait_for(|| {
        let log = hub.log.lock();
        !log.reports.is_empty() && !log.telemetry.is_empty()
    })
    .await;

    let log = hub.log.lock();
    assert_eq!(
        log.reports[0].get("number"),
        Some(&serde_json::Value::String("corr-1".to_string()))
    );
    assert_eq!(log.telemetry, vec!["corr-1".to_string()]);
}

#[tokio::test]
async fn abandoned_message_is_nacked() {
    let hub = ScriptedHub::start().await;
    let client = client_for(&hub, "sensor-1");
    client.open().await.unwrap();

    hub.push_control("m-2", "pending");
    let msg = client.poll(Duration::from_secs(2)).await.unwrap().unwrap();

    client.abandon(&msg).await.unwrap();
    wait_for(|| !hub.log.lock().nacks.is_empty()).await;
    assert_eq!(hub.log.lock().nacks, vec!["m-2".to_string()]);
}

#[tokio::test]
async fn hub_shutdown_fails_waiting_pollers() {
    let hub = ScriptedHub::start().await;
    let client = client_for(&hub, "sensor-1");
    client.open().await.unwrap();

    // Make sure the connection is fully up before tearing it down.
    wait_for(|| !hub.log.lock().opens.is_empty()).await;
    hub.shutdown();

    // The receive loop ends on EOF and a waiting poll must not hang.
    let err = client.poll(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, HubError::ConnectionClosed { .. }));
}

#[tokio::test]
async fn coalesced_pollers_share_the_transport() {
    let hub = ScriptedHub::start().await;
    let transport = Arc::new(client_for(&hub, "sensor-1"));
    transport.open().await.unwrap();

    let client = Arc::new(CoalescedClient::new(
        "sensor-1",
        Arc::clone(&transport) as Arc<dyn HubClient>,
    ));

    let mut callers = Vec::new();
    for _ in 0..3 {
        let client = Arc::clone(&client);
        callers.push(tokio::spawn(async move {
            client.poll(Duration::from_secs(2)).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    hub.push_control("m-3", "shared");

    let mut received = Vec::new();
    for caller in callers {
        if let Some(msg) = caller.await.unwrap().unwrap() {
            received.push(msg);
        }
    }

    // Exactly one caller claims the message; the hub only ever saw one
    // device connection doing the polling.
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_id, "m-3");
}
