#![allow(dead_code)]

use async_trait::async_trait;
use fleetpulse_api::{create_router, AppState};
use fleetpulse_core::{
    models::{CanonicalRecord, TenantId},
    repository::{MemoryTelemetryStore, TelemetryStore, TimeRange},
    Config, Normalizer,
};
use fleetpulse_hub::{BroadcastHub, IngestPipeline};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const VALID_ICE: &str = r#"{"vehicle_id":"v1","timestamp":"2024-01-01T00:00:00Z","location":{"lat":51.5,"lon":-0.1},"speed":42.5,"emissions":10.2,"type":"ICE","status":"active","fuel_level":80}"#;

/// Counts every call and optionally fails inserts
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryTelemetryStore,
    pub inserts: Mutex<Vec<CanonicalRecord>>,
    pub fail_inserts: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail_inserts: true,
            ..Self::default()
        }
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.lock().len()
    }
}

#[async_trait]
impl TelemetryStore for RecordingStore {
    async fn insert(&self, record: &CanonicalRecord) -> fleetpulse_core::Result<()> {
        if self.fail_inserts {
            return Err(fleetpulse_core::Error::Internal("write rejected".to_string()));
        }
        self.inserts.lock().push(record.clone());
        self.inner.insert(record).await
    }

    async fn query(
        &self,
        range: TimeRange,
        tenant: Option<&TenantId>,
    ) -> fleetpulse_core::Result<Vec<CanonicalRecord>> {
        self.inner.query(range, tenant).await
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub hub: BroadcastHub,
    pub store: Arc<RecordingStore>,
    pub shutdown: CancellationToken,
}

pub fn app_with(store: RecordingStore, config: &Config) -> TestApp {
    let store = Arc::new(store);
    let hub = BroadcastHub::with_capacity(config.hub.channel_capacity);
    let pipeline = IngestPipeline::new(
        Normalizer::new(config.validation.ev_emissions),
        store.clone(),
        hub.clone(),
    );
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, pipeline, shutdown.clone());

    TestApp {
        router: create_router(state, config.server.max_body_bytes),
        hub,
        store,
        shutdown,
    }
}

pub fn app() -> TestApp {
    app_with(RecordingStore::default(), &Config::default())
}
