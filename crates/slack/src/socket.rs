use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::events::{
    EnvelopeCategory, EventContext, EventDispatcher, EventsApiPayload, SocketEnvelope,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Waits for the next envelope. `Ok(None)` means the stream has ended.
    async fn next_envelope(&self) -> Result<Option<SocketEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Running,
    ShuttingDown,
}

/// Drains envelopes from a transport one at a time. Each envelope is fully
/// acknowledged and dispatched before the next one is awaited.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EventDispatcher,
}

impl SocketModeRunner {
    pub fn new(transport: Arc<dyn SocketTransport>, dispatcher: EventDispatcher) -> Self {
        Self { transport, dispatcher }
    }

    /// Runs until `shutdown` flips to `true` (or its sender is dropped), or
    /// the transport stream ends. Shutdown takes priority over envelopes that
    /// are already queued; an in-flight dispatch is never interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SocketError> {
        let mut state = if *shutdown.borrow_and_update() {
            ListenerState::ShuttingDown
        } else {
            ListenerState::Running
        };
        info!(event_name = "ingress.slack.listener_started", "socket mode listener started");

        while state == ListenerState::Running {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        state = ListenerState::ShuttingDown;
                    }
                }
                next = self.transport.next_envelope() => {
                    let envelope = match next {
                        Ok(Some(envelope)) => envelope,
                        Ok(None) => {
                            info!(
                                event_name = "ingress.slack.stream_closed",
                                "socket mode transport stream closed"
                            );
                            return Ok(());
                        }
                        Err(transport_error) => {
                            error!(
                                event_name = "ingress.slack.transport_failed",
                                error = %transport_error,
                                "socket mode transport failed"
                            );
                            return Err(transport_error.into());
                        }
                    };
                    self.handle_envelope(envelope).await;
                }
            }
        }

        info!(event_name = "ingress.slack.listener_stopped", "shutting down socket mode listener");
        Ok(())
    }

    async fn handle_envelope(&self, envelope: SocketEnvelope) {
        if envelope.category != EnvelopeCategory::EventsApi {
            debug!(
                event_name = "ingress.slack.envelope_ignored",
                envelope_id = %envelope.envelope_id,
                category = %envelope.category,
                "ignoring socket mode envelope outside the events api"
            );
            return;
        }

        let payload = match EventsApiPayload::decode(&envelope.payload) {
            Ok(payload) => payload,
            Err(decode_error) => {
                warn!(
                    event_name = "ingress.slack.envelope_rejected",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %decode_error,
                    "could not decode events api envelope; skipping"
                );
                return;
            }
        };

        info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            correlation_id = %envelope.envelope_id,
            callback_type = %payload.callback_type,
            event_type = payload.event.event_type(),
            event_id = payload.event_id.as_deref().unwrap_or("unknown"),
            team_id = payload.team_id.as_deref().unwrap_or("unknown"),
            retry_attempt = envelope.retry_attempt.unwrap_or_default(),
            "received slack envelope"
        );

        if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
            warn!(
                event_name = "ingress.slack.ack_failed",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "failed to acknowledge slack envelope"
            );
        } else {
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                "acknowledged slack envelope"
            );
        }

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        match self.dispatcher.dispatch(&payload.event, &context).await {
            Ok(result) => debug!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                result = ?result,
                "event dispatched"
            ),
            Err(error) => warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "event dispatch failed; continuing socket loop"
            ),
        }
    }
}
