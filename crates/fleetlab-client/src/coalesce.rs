//! Request-coalescing control poller.
//!
//! Many loop iterations can ask "is there a pending control message?"
//! against one device connection. Issuing one remote poll per caller would
//! multiply hub load and race several polls for the same single queued
//! message. [`CoalescedClient`] decorates a [`HubClient`] so that at most
//! one underlying poll is in flight: the first caller starts it, later
//! callers join it, and each caller races its own timeout against the shared
//! outcome. A message that resolves after every waiter has timed out is
//! abandoned back to the hub so it can be redelivered, never dropped.

use crate::hub::HubClient;
use crate::state::ConnectionStatus;
use async_trait::async_trait;
use fleetlab_core::error::HubError;
use fleetlab_core::types::{ControlMessage, ReportedState, TelemetryMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome of one underlying poll, shared between its waiters.
type PollOutcome = Result<Option<ControlMessage>, HubError>;

/// The single in-flight underlying poll and its attached waiters.
///
/// Lives in the client's guarded slot. Cleared either by the first caller to
/// observe the settled outcome while the slot still holds this entry, or by
/// the completion task when the last waiter has already timed out.
struct PendingReceive {
    /// Identity of this poll; callers re-check it after reacquiring the guard
    id: u64,
    /// Callers still waiting on the outcome
    waiters: usize,
    /// Settles exactly once with the poll outcome
    outcome_rx: watch::Receiver<Option<PollOutcome>>,
}

/// Hub client decorator that coalesces overlapping `poll` calls.
///
/// All other operations delegate to the wrapped client unchanged. The guard
/// is held only for slot inspection and bookkeeping, never across an await.
pub struct CoalescedClient {
    device_id: String,
    inner: Arc<dyn HubClient>,
    pending: Arc<Mutex<Option<PendingReceive>>>,
    next_poll_id: AtomicU64,
}

impl CoalescedClient {
    /// Wraps a hub client with poll coalescing.
    pub fn new(device_id: impl Into<String>, inner: Arc<dyn HubClient>) -> Self {
        Self {
            device_id: device_id.into(),
            inner,
            pending: Arc::new(Mutex::new(None)),
            next_poll_id: AtomicU64::new(0),
        }
    }

    /// Issues the underlying poll and installs its completion task.
    ///
    /// Must be called while the guard is held. The completion task runs once
    /// when the underlying poll settles, whether or not anyone still waits.
    fn start_underlying_poll(&self, timeout: Duration) -> PendingReceive {
        let id = self.next_poll_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (outcome_tx, outcome_rx) = watch::channel(None);

        debug!(
            device_id = %self.device_id,
            poll_id = id,
            timeout_ms = timeout.as_millis() as u64,
            "starting new underlying poll"
        );

        let client = Arc::clone(&self.inner);
        let slot = Arc::clone(&self.pending);
        let device_id = self.device_id.clone();

        tokio::spawn(async move {
            let outcome = client.poll(timeout).await;

            // Decide hand-off vs disposal under the guard, act outside it.
            enum Disposition {
                HandOff,
                Orphaned,
                Superseded,
            }

            let disposition = {
                let mut pending = slot.lock();
                match pending.as_ref() {
                    Some(p) if p.id == id => {
                        if p.waiters > 0 {
                            Disposition::HandOff
                        } else {
                            *pending = None;
                            Disposition::Orphaned
                        }
                    }
                    _ => Disposition::Superseded,
                }
            };

            match disposition {
                Disposition::HandOff => {
                    // The claiming caller clears the slot.
                    let _ = outcome_tx.send(Some(outcome));
                }
                Disposition::Orphaned => match outcome {
                    Ok(Some(msg)) => {
                        warn!(
                            device_id = %device_id,
                            poll_id = id,
                            message_id = %msg.message_id,
                            body = %msg.body_as_text(),
                            "poll resolved with a message but no caller is waiting, abandoning"
                        );
                        if let Err(e) = client.abandon(&msg).await {
                            warn!(
                                device_id = %device_id,
                                message_id = %msg.message_id,
                                error = %e,
                                "failed to abandon orphaned message, relying on hub redelivery"
                            );
                        }
                    }
                    Ok(None) => {
                        debug!(device_id = %device_id, poll_id = id, "orphaned poll resolved empty");
                    }
                    Err(e) => {
                        debug!(
                            device_id = %device_id,
                            poll_id = id,
                            error = %e,
                            "orphaned poll failed, no caller to notify"
                        );
                    }
                },
                Disposition::Superseded => {
                    // A new poll only starts after this slot was cleared, so
                    // reaching here means someone else already settled the
                    // cycle. Dispose of a stray message rather than leak the
                    // lease.
                    debug!(device_id = %device_id, poll_id = id, "poll completed after being superseded");
                    if let Ok(Some(msg)) = outcome {
                        if let Err(e) = client.abandon(&msg).await {
                            warn!(
                                device_id = %device_id,
                                message_id = %msg.message_id,
                                error = %e,
                                "failed to abandon message from superseded poll"
                            );
                        }
                    }
                }
            }
        });

        PendingReceive {
            id,
            waiters: 0,
            outcome_rx,
        }
    }
}

#[async_trait]
impl HubClient for CoalescedClient {
    async fn open(&self) -> Result<(), HubError> {
        self.inner.open().await
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<ControlMessage>, HubError> {
        let (poll_id, mut outcome_rx, joined) = {
            let mut pending = self.pending.lock();
            match pending.as_mut() {
                Some(p) => {
                    p.waiters += 1;
                    (p.id, p.outcome_rx.clone(), true)
                }
                None => {
                    let mut p = self.start_underlying_poll(timeout);
                    p.waiters = 1;
                    let handles = (p.id, p.outcome_rx.clone(), false);
                    *pending = Some(p);
                    handles
                }
            }
        };

        if joined {
            debug!(
                device_id = %self.device_id,
                poll_id,
                timeout_ms = timeout.as_millis() as u64,
                "joining pending underlying poll"
            );
        }

        tokio::select! {
            _ = outcome_rx.changed() => {
                // The shared outcome settled before this caller's timeout.
                // Only the caller that finds the slot still holding this
                // poll claims the outcome; a loser of that race reports an
                // empty poll and the winner forwards the message.
                let claimed = {
                    let mut pending = self.pending.lock();
                    match pending.as_ref() {
                        Some(p) if p.id == poll_id => {
                            *pending = None;
                            true
                        }
                        _ => false,
                    }
                };

                if !claimed {
                    debug!(device_id = %self.device_id, poll_id, "outcome already claimed by another caller");
                    return Ok(None);
                }

                let outcome = outcome_rx.borrow().clone();
                match outcome {
                    Some(outcome) => outcome,
                    // Settled channel without a published value cannot
                    // happen while a waiter is attached; treat as empty.
                    None => Ok(None),
                }
            }
            _ = tokio::time::sleep(timeout) => {
                debug!(
                    device_id = %self.device_id,
                    poll_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "poll timed out locally, underlying poll continues"
                );
                let mut pending = self.pending.lock();
                if let Some(p) = pending.as_mut() {
                    if p.id == poll_id {
                        p.waiters -= 1;
                    }
                }
                Ok(None)
            }
        }
    }

    async fn complete(&self, msg: &ControlMessage) -> Result<(), HubError> {
        self.inner.complete(msg).await
    }

    async fn abandon(&self, msg: &ControlMessage) -> Result<(), HubError> {
        self.inner.abandon(msg).await
    }

    async fn send_telemetry(&self, msg: TelemetryMessage) -> Result<(), HubError> {
        self.inner.send_telemetry(msg).await
    }

    async fn update_reported(&self, state: &ReportedState) -> Result<(), HubError> {
        self.inner.update_reported(state).await
    }

    fn status(&self) -> &ConnectionStatus {
        self.inner.status()
    }
}
