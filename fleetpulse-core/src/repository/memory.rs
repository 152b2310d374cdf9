use async_trait::async_trait;
use parking_lot::RwLock;

use super::{TelemetryStore, TimeRange};
use crate::{
    models::{CanonicalRecord, TenantId},
    Result,
};

/// Process-local store for development runs without PostgreSQL
///
/// Readings are lost on restart.
#[derive(Default)]
pub struct MemoryTelemetryStore {
    records: RwLock<Vec<CanonicalRecord>>,
}

impl MemoryTelemetryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert(&self, record: &CanonicalRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn query(
        &self,
        range: TimeRange,
        tenant: Option<&TenantId>,
    ) -> Result<Vec<CanonicalRecord>> {
        let mut rows: Vec<CanonicalRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| range.contains(&r.timestamp))
            .filter(|r| tenant.map_or(true, |t| r.tenant_id.as_ref() == Some(t)))
            .cloned()
            .collect();

        rows.sort_by_key(|r| r.timestamp);
        rows.truncate(TimeRange::MAX_ROWS as usize);
        Ok(rows)
    }
}
