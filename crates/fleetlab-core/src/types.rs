//! Core message types for the FleetLab device fleet simulator.
//!
//! Defines the control and telemetry message structures exchanged with the
//! hub, the reported-state map, and the wire envelope used by the
//! newline-delimited JSON hub protocol.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inbound control message delivered by the hub to a device.
///
/// Control messages are leased to the device: the device either completes
/// (acknowledges) a message or abandons it back to the hub's queue for
/// redelivery. `Clone` is required because a settled poll outcome may be
/// observed by several coalesced waiters before exactly one claims it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Hub-assigned message identifier, used for complete/abandon
    pub message_id: String,
    /// Optional correlation identifier carried end to end
    pub correlation_id: Option<String>,
    /// Optional MIME content type of the body
    pub content_type: Option<String>,
    /// Raw message body
    pub body: Bytes,
}

impl ControlMessage {
    /// Returns the body decoded as UTF-8 text, replacing invalid sequences.
    ///
    /// Intended for logging; the body itself is opaque to the simulator.
    pub fn body_as_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An outbound telemetry event sent by a device to the hub.
#[derive(Debug, Clone)]
pub struct TelemetryMessage {
    /// Correlation identifier tying events to a runner session
    pub correlation_id: Option<String>,
    /// Optional MIME content type of the body
    pub content_type: Option<String>,
    /// Raw event body
    pub body: Bytes,
    /// Time the event was produced
    pub sent_at: DateTime<Utc>,
}

impl TelemetryMessage {
    /// Creates a telemetry message with a UTF-8 text body, stamped now.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(body.into()),
            sent_at: Utc::now(),
        }
    }

    /// Sets the correlation identifier.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Reported device state: a flat map of property names to JSON values.
///
/// The simulator reports a single increasing `number` property per cycle,
/// but the map is open-ended so richer simulations can report more.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportedState(pub HashMap<String, serde_json::Value>);

impl ReportedState {
    /// Creates an empty reported state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Gets a property value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Number of reported properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no properties are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Wire envelope for the newline-delimited JSON hub protocol.
///
/// Every frame on the device link and the service link is one envelope,
/// serialized as a single JSON line. Bodies travel as UTF-8 text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Device introduces itself after connecting
    Open {
        device_id: String,
        shared_access_key: String,
    },
    /// Device reports its state
    Report { state: ReportedState },
    /// Device sends a telemetry event
    Telemetry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        body: String,
        sent_at: DateTime<Utc>,
    },
    /// Hub delivers a control message to the device
    Control {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        body: String,
    },
    /// Device acknowledges a control message (removes it from the queue)
    Ack { message_id: String },
    /// Device abandons a control message (returns it for redelivery)
    Nack { message_id: String },
    /// Service-side request to enqueue a control message for a device
    SendControl {
        device_id: String,
        message_id: String,
        body: String,
    },
}

impl Envelope {
    /// Builds a `Control` envelope from a control message.
    pub fn from_control(msg: &ControlMessage) -> Self {
        Envelope::Control {
            message_id: msg.message_id.clone(),
            correlation_id: msg.correlation_id.clone(),
            content_type: msg.content_type.clone(),
            body: msg.body_as_text(),
        }
    }

    /// Builds a `Telemetry` envelope from a telemetry message.
    pub fn from_telemetry(msg: &TelemetryMessage) -> Self {
        Envelope::Telemetry {
            correlation_id: msg.correlation_id.clone(),
            content_type: msg.content_type.clone(),
            body: String::from_utf8_lossy(&msg.body).into_owned(),
            sent_at: msg.sent_at,
        }
    }

    /// Converts a `Control` envelope into a control message.
    ///
    /// Returns `None` for any other envelope variant.
    pub fn into_control(self) -> Option<ControlMessage> {
        match self {
            Envelope::Control {
                message_id,
                correlation_id,
                content_type,
                body,
            } => Some(ControlMessage {
                message_id,
                correlation_id,
                content_type,
                body: Bytes::from(body),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_as_text() {
        let msg = ControlMessage {
            message_id: "m-1".to_string(),
            correlation_id: None,
            content_type: None,
            body: Bytes::from_static(b"ping"),
        };
        assert_eq!(msg.body_as_text(), "ping");
    }

    #[test]
    fn test_reported_state_set_get() {
        let mut state = ReportedState::new();
        assert!(state.is_empty());

        state.set("number", "abc-7");
        assert_eq!(state.len(), 1);
        assert_eq!(
            state.get("number"),
            Some(&serde_json::Value::String("abc-7".to_string()))
        );
    }

    #[test]
    fn test_control_envelope_round_trip() {
        let msg = ControlMessage {
            message_id: "42".to_string(),
            correlation_id: Some("corr-1".to_string()),
            content_type: Some("text/plain".to_string()),
            body: Bytes::from_static(b"reboot"),
        };

        let line = serde_json::to_string(&Envelope::from_control(&msg)).unwrap();
        assert!(line.contains("\"type\":\"control\""));

        let parsed: Envelope = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.into_control(), Some(msg));
    }

    #[test]
    fn test_non_control_envelope_is_not_a_message() {
        let env = Envelope::Ack {
            message_id: "42".to_string(),
        };
        assert!(env.into_control().is_none());
    }
}
