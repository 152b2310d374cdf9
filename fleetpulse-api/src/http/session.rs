//! Lifecycle shared by both streaming transports
//!
//! `Connecting → Registered → Streaming → Closed`. Closing drops the hub
//! registration, so the entry is released exactly once whichever way the
//! connection ends, including when the transport future itself is dropped.

use fleetpulse_core::metrics::ACTIVE_OBSERVERS;
use fleetpulse_hub::{BroadcastHub, ObserverId, ObserverRegistration, Payload, TenantScope};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Sse,
    WebSocket,
}

impl Transport {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    WriteFailed,
    Shutdown,
    /// Registration was removed out from under us
    HubClosed,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::WriteFailed => "write_failed",
            Self::Shutdown => "shutdown",
            Self::HubClosed => "hub_closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Streaming,
    Closed(CloseReason),
}

pub struct ObserverSession {
    transport: Transport,
    scope: TenantScope,
    state: SessionState,
    registration: Option<ObserverRegistration>,
    opened_at: Instant,
}

impl ObserverSession {
    /// A connection whose handshake has not completed yet
    #[must_use]
    pub fn connecting(transport: Transport, scope: TenantScope) -> Self {
        debug!(transport = transport.as_str(), tenant = %scope, "Observer connecting");
        Self {
            transport,
            scope,
            state: SessionState::Connecting,
            registration: None,
            opened_at: Instant::now(),
        }
    }

    /// Handshake done: register with the hub. No-op outside `Connecting`.
    pub fn register(&mut self, hub: &BroadcastHub) {
        if self.state != SessionState::Connecting {
            return;
        }
        let registration = hub.register(self.scope.clone());
        ACTIVE_OBSERVERS
            .with_label_values(&[self.transport.as_str()])
            .inc();
        self.registration = Some(registration);
        self.state = SessionState::Registered;
    }

    /// `Registered → Streaming`
    pub fn start_streaming(&mut self) {
        if self.state == SessionState::Registered {
            self.state = SessionState::Streaming;
            info!(
                transport = self.transport.as_str(),
                observer_id = ?self.observer_id(),
                tenant = %self.scope,
                "Observer streaming"
            );
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn observer_id(&self) -> Option<ObserverId> {
        self.registration.as_ref().map(ObserverRegistration::id)
    }

    /// Next payload to forward; `None` when the session is not streaming or
    /// the registration has gone away.
    pub async fn next_payload(&mut self) -> Option<Payload> {
        if self.state != SessionState::Streaming {
            return None;
        }
        self.registration.as_mut()?.recv().await
    }

    /// Enter `Closed`. Only the first call has any effect.
    pub fn close(&mut self, reason: CloseReason) {
        if matches!(self.state, SessionState::Closed(_)) {
            return;
        }

        let observer_id = self.observer_id();
        if self.registration.take().is_some() {
            ACTIVE_OBSERVERS
                .with_label_values(&[self.transport.as_str()])
                .dec();
        }
        self.state = SessionState::Closed(reason);

        info!(
            transport = self.transport.as_str(),
            observer_id = ?observer_id,
            tenant = %self.scope,
            reason = %reason,
            duration_ms = self.opened_at.elapsed().as_millis() as u64,
            "Observer closed"
        );
    }
}

impl Drop for ObserverSession {
    fn drop(&mut self) {
        // The response body was dropped by the server: the peer went away
        self.close(CloseReason::ClientClosed);
    }
}
