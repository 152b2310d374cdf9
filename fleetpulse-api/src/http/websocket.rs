//! WebSocket stream of accepted readings
//!
//! One text frame per reading. Inbound frames are read and discarded;
//! ping/pong is answered by the protocol layer.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::{CloseReason, ObserverSession, Transport};
use super::tenant::RequestTenant;
use super::{AppResult, AppState};

/// GET /api/stream/ws
pub async fn stream_ws(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let scope = state.observer_scope(tenant)?;
    let session = ObserverSession::connecting(Transport::WebSocket, scope);

    Ok(ws.on_upgrade(move |socket| async move {
        let mut session = session;
        session.register(state.hub());
        session.start_streaming();
        let reason = forward(socket, &mut session, &state.shutdown).await;
        session.close(reason);
    }))
}

async fn forward(
    socket: WebSocket,
    session: &mut ObserverSession,
    shutdown: &CancellationToken,
) -> CloseReason {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                return CloseReason::Shutdown;
            }
            payload = session.next_payload() => {
                let Some(payload) = payload else {
                    return CloseReason::HubClosed;
                };
                if let Err(e) = sender.send(Message::Text(payload.as_ref().into())).await {
                    debug!(error = %e, "WebSocket write failed");
                    return CloseReason::WriteFailed;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket read failed");
                    return CloseReason::ClientClosed;
                }
            },
        }
    }
}
