//! Server-Sent Events stream of accepted readings

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::session::{CloseReason, ObserverSession, Transport};
use super::tenant::RequestTenant;
use super::{AppResult, AppState};

pub const EVENT_NAME: &str = "telemetry";
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /api/stream/sse
pub async fn stream_sse(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let scope = state.observer_scope(tenant)?;

    let mut session = ObserverSession::connecting(Transport::Sse, scope);
    session.register(state.hub());
    session.start_streaming();

    let stream = futures::stream::unfold(
        (session, state.shutdown.clone()),
        |(mut session, shutdown)| async move {
            match next_event(&mut session, &shutdown).await {
                Ok(event) => Some((Ok(event), (session, shutdown))),
                Err(reason) => {
                    session.close(reason);
                    None
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

async fn next_event(
    session: &mut ObserverSession,
    shutdown: &CancellationToken,
) -> Result<Event, CloseReason> {
    let payload = tokio::select! {
        () = shutdown.cancelled() => return Err(CloseReason::Shutdown),
        payload = session.next_payload() => payload,
    };

    payload
        .map(|payload| Event::default().event(EVENT_NAME).data(payload))
        .ok_or(CloseReason::HubClosed)
}
