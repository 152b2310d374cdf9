//! Normalize → persist → broadcast, shared by every producer
//!
//! The HTTP endpoint and the broker bridge both call into [`IngestPipeline`]
//! so the two paths apply identical validation, tenant stamping and
//! persist-before-broadcast ordering.

use fleetpulse_core::{
    metrics,
    models::{CanonicalRecord, Drivetrain, TenantId, VehicleId},
    repository::TelemetryStore,
    EvEmissionsPolicy, NormalizeError, Normalizer, ValidationError,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::hub::{BroadcastHub, DeliveryReport, Payload};

/// Which producer handed us the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    Http,
    Broker,
}

impl IngestSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Broker => "broker",
        }
    }
}

impl fmt::Display for IngestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to persist reading: {0}")]
    Persistence(fleetpulse_core::Error),

    #[error("failed to serialize reading: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Metric label for the rejection
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Caller's fault rather than ours
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::Validation(_))
    }
}

impl From<NormalizeError> for IngestError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Malformed(e) => Self::Malformed(e.to_string()),
            NormalizeError::Invalid(e) => Self::Validation(e),
        }
    }
}

/// What happened to an accepted reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub vehicle_id: VehicleId,
    pub tenant: Option<TenantId>,
    pub delivery: DeliveryReport,
}

#[derive(Clone)]
pub struct IngestPipeline {
    normalizer: Normalizer,
    store: Arc<dyn TelemetryStore>,
    hub: BroadcastHub,
}

impl IngestPipeline {
    pub fn new(normalizer: Normalizer, store: Arc<dyn TelemetryStore>, hub: BroadcastHub) -> Self {
        Self {
            normalizer,
            store,
            hub,
        }
    }

    #[must_use]
    pub const fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    /// Ingest a raw JSON document.
    ///
    /// `request_tenant` comes from the identity collaborator and takes
    /// precedence over any `tenant_id` inside the payload. Without one, an
    /// HTTP payload's own `tenant_id` is discarded; broker payloads keep it.
    pub async fn ingest_bytes(
        &self,
        source: IngestSource,
        bytes: &[u8],
        request_tenant: Option<TenantId>,
    ) -> Result<IngestReceipt, IngestError> {
        let record = match self.normalizer.normalize_bytes(bytes) {
            Ok(record) => record,
            Err(e) => return Err(Self::reject(source, e.into())),
        };
        self.accept(source, record, request_tenant).await
    }

    /// Ingest an already-parsed JSON document
    pub async fn ingest_value(
        &self,
        source: IngestSource,
        raw: &Value,
        request_tenant: Option<TenantId>,
    ) -> Result<IngestReceipt, IngestError> {
        let record = match self.normalizer.normalize(raw) {
            Ok(record) => record,
            Err(e) => return Err(Self::reject(source, e.into())),
        };
        self.accept(source, record, request_tenant).await
    }

    async fn accept(
        &self,
        source: IngestSource,
        record: CanonicalRecord,
        request_tenant: Option<TenantId>,
    ) -> Result<IngestReceipt, IngestError> {
        let record = match (request_tenant, source) {
            (Some(tenant), _) => record.with_tenant(Some(tenant)),
            (None, IngestSource::Broker) => record,
            (None, IngestSource::Http) => record.with_tenant(None),
        };

        if record.drivetrain == Drivetrain::Electric
            && record.emissions != 0.0
            && self.normalizer.ev_emissions_policy() == EvEmissionsPolicy::Accept
        {
            warn!(
                source = %source,
                vehicle_id = %record.vehicle_id,
                emissions = record.emissions,
                "Electric vehicle reported non-zero emissions"
            );
        }

        // Serialize before touching the store so a payload we cannot
        // broadcast is never persisted either
        let payload: Payload = match record.to_payload() {
            Ok(json) => Arc::from(json),
            Err(e) => return Err(Self::reject(source, e.into())),
        };

        if let Err(e) = self.store.insert(&record).await {
            return Err(Self::reject(source, IngestError::Persistence(e)));
        }

        let delivery = match &record.tenant_id {
            Some(tenant) => self.hub.broadcast_to_tenant(tenant, &payload),
            None => self.hub.broadcast(&payload),
        };

        metrics::record_ingested(source.as_str());
        debug!(
            source = %source,
            vehicle_id = %record.vehicle_id,
            tenant = record.tenant_id.as_ref().map(TenantId::as_str),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Reading ingested"
        );

        Ok(IngestReceipt {
            vehicle_id: record.vehicle_id,
            tenant: record.tenant_id,
            delivery,
        })
    }

    fn reject(source: IngestSource, err: IngestError) -> IngestError {
        metrics::record_rejected(source.as_str(), err.reason());
        match &err {
            IngestError::Malformed(_) | IngestError::Validation(_) => {
                warn!(source = %source, error = %err, "Rejected telemetry payload");
            }
            IngestError::Persistence(_) | IngestError::Serialization(_) => {
                error!(source = %source, error = %err, "Failed to ingest telemetry reading");
            }
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::TenantScope;
    use async_trait::async_trait;
    use chrono::DateTime;
    use fleetpulse_core::repository::TimeRange;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<CanonicalRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl TelemetryStore for RecordingStore {
        async fn insert(&self, record: &CanonicalRecord) -> fleetpulse_core::Result<()> {
            if self.fail {
                return Err(fleetpulse_core::Error::Unavailable("pool closed".to_string()));
            }
            self.inserted.lock().push(record.clone());
            Ok(())
        }

        async fn query(
            &self,
            _range: TimeRange,
            _tenant: Option<&TenantId>,
        ) -> fleetpulse_core::Result<Vec<CanonicalRecord>> {
            Ok(self.inserted.lock().clone())
        }
    }

    fn valid() -> Value {
        json!({
            "vehicle_id": "v1",
            "timestamp": "2024-01-01T00:00:00Z",
            "location": {"lat": 51.5, "lon": -0.1},
            "speed": 42.5,
            "emissions": 10.2,
            "type": "ICE",
            "status": "active",
            "fuel_level": 80
        })
    }

    fn pipeline(store: Arc<RecordingStore>) -> IngestPipeline {
        IngestPipeline::new(Normalizer::default(), store, BroadcastHub::new())
    }

    #[tokio::test]
    async fn test_valid_reading_is_persisted_then_broadcast() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());
        let mut observer = pipeline.hub().register(TenantScope::All);

        let receipt = pipeline
            .ingest_value(IngestSource::Http, &valid(), None)
            .await
            .unwrap();

        assert_eq!(receipt.vehicle_id.as_str(), "v1");
        assert_eq!(receipt.delivery.delivered, 1);

        let inserted = store.inserted.lock().clone();
        assert_eq!(inserted.len(), 1);
        assert!((inserted[0].speed - 42.5).abs() < f64::EPSILON);

        let payload = observer.try_recv().unwrap();
        let echoed: CanonicalRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(echoed, inserted[0]);
        assert_eq!(
            echoed.timestamp,
            DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_out_of_range_speed_touches_nothing() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());
        let mut observer = pipeline.hub().register(TenantScope::All);

        let mut raw = valid();
        raw["speed"] = json!(500);
        let err = pipeline
            .ingest_value(IngestSource::Http, &raw, None)
            .await
            .unwrap_err();

        assert!(matches!(&err, IngestError::Validation(v) if v.field() == "speed"));
        assert!(err.is_client_error());
        assert!(store.inserted.lock().is_empty());
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_missing_field_names_it() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());

        let mut raw = valid();
        raw.as_object_mut().unwrap().remove("status");
        let err = pipeline
            .ingest_value(IngestSource::Broker, &raw, None)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "validation");
        assert!(err.to_string().contains("status"));
        assert!(store.inserted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_bytes() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());

        let err = pipeline
            .ingest_bytes(IngestSource::Http, b"{not json", None)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Malformed(_)));
        assert!(store.inserted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_broadcast() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let pipeline = pipeline(store);
        let mut observer = pipeline.hub().register(TenantScope::All);

        let err = pipeline
            .ingest_value(IngestSource::Broker, &valid(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Persistence(_)));
        assert!(!err.is_client_error());
        assert!(observer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_request_tenant_overrides_payload_and_scopes_broadcast() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());
        let mut acme = pipeline.hub().register(TenantScope::Tenant(TenantId::from("acme")));
        let mut globex = pipeline.hub().register(TenantScope::Tenant(TenantId::from("globex")));
        let mut unscoped = pipeline.hub().register(TenantScope::All);

        let mut raw = valid();
        raw["tenant_id"] = json!("globex");
        let receipt = pipeline
            .ingest_value(IngestSource::Http, &raw, Some(TenantId::from("acme")))
            .await
            .unwrap();

        assert_eq!(receipt.tenant, Some(TenantId::from("acme")));
        assert_eq!(
            store.inserted.lock()[0].tenant_id,
            Some(TenantId::from("acme"))
        );
        assert!(acme.try_recv().is_some());
        assert!(globex.try_recv().is_none());
        assert!(unscoped.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_payload_tenant_used_without_request_tenant() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store);
        let mut globex = pipeline.hub().register(TenantScope::Tenant(TenantId::from("globex")));

        let mut raw = valid();
        raw["tenant_id"] = json!("globex");
        let receipt = pipeline
            .ingest_bytes(IngestSource::Broker, raw.to_string().as_bytes(), None)
            .await
            .unwrap();

        assert_eq!(receipt.tenant, Some(TenantId::from("globex")));
        assert!(globex.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_http_payload_tenant_ignored_without_request_tenant() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());
        let mut globex = pipeline.hub().register(TenantScope::Tenant(TenantId::from("globex")));
        let mut unscoped = pipeline.hub().register(TenantScope::All);

        let mut raw = valid();
        raw["tenant_id"] = json!("globex");
        let receipt = pipeline
            .ingest_value(IngestSource::Http, &raw, None)
            .await
            .unwrap();

        assert_eq!(receipt.tenant, None);
        assert_eq!(store.inserted.lock()[0].tenant_id, None);
        assert!(!unscoped.try_recv().unwrap().contains("tenant_id"));
        assert!(!globex.try_recv().unwrap().contains("tenant_id"));
    }

    #[tokio::test]
    async fn test_ev_emissions_policy_accept() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = IngestPipeline::new(
            Normalizer::new(EvEmissionsPolicy::Accept),
            store.clone(),
            BroadcastHub::new(),
        );

        let raw = json!({
            "vehicle_id": "ev-7",
            "timestamp": "2024-01-01T00:00:00Z",
            "location": {"lat": 0.0, "lon": 0.0},
            "speed": 10,
            "emissions": 1.5,
            "type": "EV",
            "status": "active",
            "battery_level": 64
        });
        pipeline
            .ingest_value(IngestSource::Http, &raw, None)
            .await
            .unwrap();

        assert!((store.inserted.lock()[0].emissions - 1.5).abs() < f64::EPSILON);
    }
}
