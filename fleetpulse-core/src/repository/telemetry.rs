use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use super::{TelemetryStore, TimeRange};
use crate::{
    models::{CanonicalRecord, Drivetrain, EnergyLevel, Location, TenantId, VehicleId, VehicleStatus},
    Error, Result,
};

const SELECT_RANGE: &str = r"
    SELECT vehicle_id, recorded_at, latitude, longitude, speed_kmh,
           fuel_level, battery_level, emissions, drivetrain, status, tenant_id
    FROM telemetry_readings
    WHERE recorded_at >= $1 AND recorded_at < $2
    ORDER BY recorded_at ASC
    LIMIT $3
";

const SELECT_RANGE_FOR_TENANT: &str = r"
    SELECT vehicle_id, recorded_at, latitude, longitude, speed_kmh,
           fuel_level, battery_level, emissions, drivetrain, status, tenant_id
    FROM telemetry_readings
    WHERE recorded_at >= $1 AND recorded_at < $2 AND tenant_id = $3
    ORDER BY recorded_at ASC
    LIMIT $4
";

/// PostgreSQL-backed telemetry store
#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<CanonicalRecord> {
        let drivetrain: String = row.try_get("drivetrain")?;
        let drivetrain = drivetrain.parse::<Drivetrain>().map_err(Error::Internal)?;
        let status: String = row.try_get("status")?;
        let status = status.parse::<VehicleStatus>().map_err(Error::Internal)?;

        let fuel: Option<f64> = row.try_get("fuel_level")?;
        let battery: Option<f64> = row.try_get("battery_level")?;
        let energy = match (drivetrain, fuel, battery) {
            (Drivetrain::Combustion, Some(level), None) => EnergyLevel::Fuel(level),
            (Drivetrain::Electric, None, Some(level)) => EnergyLevel::Battery(level),
            _ => {
                return Err(Error::Internal(
                    "stored reading has inconsistent energy columns".to_string(),
                ))
            }
        };

        Ok(CanonicalRecord {
            vehicle_id: row.try_get::<VehicleId, _>("vehicle_id")?,
            timestamp: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
            location: Location {
                lat: row.try_get("latitude")?,
                lon: row.try_get("longitude")?,
            },
            speed: row.try_get("speed_kmh")?,
            energy,
            emissions: row.try_get("emissions")?,
            drivetrain,
            status,
            tenant_id: row.try_get::<Option<TenantId>, _>("tenant_id")?,
        })
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert(&self, record: &CanonicalRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO telemetry_readings (
                vehicle_id, recorded_at, latitude, longitude, speed_kmh,
                fuel_level, battery_level, emissions, drivetrain, status, tenant_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(&record.vehicle_id)
        .bind(record.timestamp)
        .bind(record.location.lat)
        .bind(record.location.lon)
        .bind(record.speed)
        .bind(record.energy.fuel())
        .bind(record.energy.battery())
        .bind(record.emissions)
        .bind(record.drivetrain.as_str())
        .bind(record.status.as_str())
        .bind(record.tenant_id.as_ref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        range: TimeRange,
        tenant: Option<&TenantId>,
    ) -> Result<Vec<CanonicalRecord>> {
        let rows = if let Some(tenant) = tenant {
            sqlx::query(SELECT_RANGE_FOR_TENANT)
                .bind(range.from)
                .bind(range.to)
                .bind(tenant)
                .bind(TimeRange::MAX_ROWS)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(SELECT_RANGE)
                .bind(range.from)
                .bind(range.to)
                .bind(TimeRange::MAX_ROWS)
                .fetch_all(&self.pool)
                .await?
        };

        rows.iter().map(Self::row_to_record).collect()
    }
}
