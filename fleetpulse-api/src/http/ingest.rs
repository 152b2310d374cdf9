//! Single-record push endpoint

use axum::{body::Bytes, extract::State, http::StatusCode};
use fleetpulse_hub::IngestSource;

use super::tenant::RequestTenant;
use super::{AppResult, AppState};

/// POST /api/telemetry
///
/// 201 with an empty body once the reading is stored and handed to the hub.
pub async fn ingest_reading(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    body: Bytes,
) -> AppResult<StatusCode> {
    state
        .pipeline
        .ingest_bytes(IngestSource::Http, &body, tenant)
        .await?;

    Ok(StatusCode::CREATED)
}
