// Module: http
// Ingestion, history and streaming endpoints

pub mod error;
pub mod health;
pub mod history;
pub mod ingest;
pub mod session;
pub mod sse;
pub mod tenant;
pub mod websocket;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use fleetpulse_core::{models::TenantId, Config};
use fleetpulse_hub::{BroadcastHub, IngestPipeline, TenantScope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};
pub use tenant::{HeaderTenantResolver, RequestTenant, TenantResolver};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: IngestPipeline,
    pub tenant_resolver: Arc<dyn TenantResolver>,
    pub allow_unscoped_observers: bool,
    pub bridge_enabled: bool,
    /// Cancelled on process shutdown; open streams close when it fires
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &Config, pipeline: IngestPipeline, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            tenant_resolver: Arc::new(HeaderTenantResolver::from_config(&config.identity)),
            allow_unscoped_observers: config.identity.allow_unscoped_observers,
            bridge_enabled: config.broker.enabled,
            shutdown,
        }
    }

    #[must_use]
    pub const fn hub(&self) -> &BroadcastHub {
        self.pipeline.hub()
    }

    /// Registry scope for a new streaming connection
    pub fn observer_scope(&self, tenant: Option<TenantId>) -> AppResult<TenantScope> {
        match tenant {
            Some(tenant) => Ok(TenantScope::Tenant(tenant)),
            None if self.allow_unscoped_observers => Ok(TenantScope::All),
            None => Err(AppError::forbidden("a tenant is required to open a stream")),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    let api = Router::new()
        .route(
            "/telemetry",
            post(ingest::ingest_reading).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/telemetry/history", get(history::query_history))
        .route("/stream/sse", get(sse::stream_sse))
        .route("/stream/ws", get(websocket::stream_ws));

    Router::new()
        .merge(health::create_health_router())
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
