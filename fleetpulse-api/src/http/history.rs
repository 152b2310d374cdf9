//! Stored readings over a time window

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use fleetpulse_core::{models::CanonicalRecord, repository::TimeRange};
use serde::Deserialize;

use super::tenant::RequestTenant;
use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// GET /api/telemetry/history?from=<RFC3339>&to=<RFC3339>
pub async fn query_history(
    State(state): State<AppState>,
    RequestTenant(tenant): RequestTenant,
    Query(params): Query<HistoryQuery>,
) -> AppResult<Json<Vec<CanonicalRecord>>> {
    let from = parse_bound("from", params.from.as_deref())?;
    let to = parse_bound("to", params.to.as_deref())?;
    let range = TimeRange::new(from, to)?;

    let records = state
        .pipeline
        .store()
        .query(range, tenant.as_ref())
        .await?;

    Ok(Json(records))
}

fn parse_bound(name: &str, value: Option<&str>) -> AppResult<DateTime<Utc>> {
    let value = value.ok_or_else(|| AppError::bad_request(format!("missing query parameter: {name}")))?;
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::bad_request(format!("invalid {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bound() {
        assert!(parse_bound("from", None).is_err());
        assert!(parse_bound("from", Some("yesterday")).is_err());

        let ts = parse_bound("to", Some("2024-01-01T02:00:00+02:00")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
