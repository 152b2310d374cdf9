//! Persistence collaborator for telemetry readings

pub mod memory;
pub mod telemetry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{CanonicalRecord, TenantId},
    Error, Result,
};

pub use memory::MemoryTelemetryStore;
pub use telemetry::PgTelemetryStore;

/// Half-open interval `[from, to)` over reading timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Upper bound on rows returned by a single query
    pub const MAX_ROWS: i64 = 10_000;

    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(Error::InvalidInput(format!(
                "time range start {from} is after end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    #[must_use]
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.from <= *ts && *ts < self.to
    }
}

/// Durable storage of canonical records
///
/// Implementations must be safe to call from many ingestion tasks at once.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn insert(&self, record: &CanonicalRecord) -> Result<()>;

    /// Readings in `range` ordered by timestamp, limited to one tenant when given
    async fn query(
        &self,
        range: TimeRange,
        tenant: Option<&TenantId>,
    ) -> Result<Vec<CanonicalRecord>>;
}
