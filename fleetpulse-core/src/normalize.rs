//! Canonical record normalizer
//!
//! Turns an inbound telemetry payload (HTTP body or broker message) into a
//! [`CanonicalRecord`], or reports the first invariant it violates. Pure: no
//! I/O, no logging, no clamping. Out-of-range numbers are rejected as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{
    CanonicalRecord, Drivetrain, EnergyLevel, Location, TenantId, VehicleId, VehicleStatus,
    MAX_SPEED_KMH,
};

// ============================================================================
// Canonical validation limits
// ============================================================================

pub const LATITUDE_MIN: f64 = -90.0;
pub const LATITUDE_MAX: f64 = 90.0;
pub const LONGITUDE_MIN: f64 = -180.0;
pub const LONGITUDE_MAX: f64 = 180.0;
pub const SPEED_MIN: f64 = 0.0;
pub const SPEED_MAX: f64 = MAX_SPEED_KMH;
pub const LEVEL_MIN: f64 = 0.0;
pub const LEVEL_MAX: f64 = 100.0;

/// Validation error naming the first violated field
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {field}")]
    Missing { field: &'static str },

    #[error("invalid {field}: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid {field}: {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid {field}: {value} must not be negative")]
    Negative { field: &'static str, value: f64 },

    #[error("invalid {field}: unrecognized value {value:?}")]
    UnknownVariant { field: &'static str, value: String },

    #[error("invalid timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },

    #[error("invalid {field}: not allowed for drivetrain {drivetrain}")]
    EnergyMismatch {
        field: &'static str,
        drivetrain: Drivetrain,
    },

    #[error("invalid emissions: electric vehicles must report 0, got {value}")]
    ElectricEmissions { value: f64 },
}

impl ValidationError {
    /// Field the error refers to, `"payload"` for whole-document errors
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::NotAnObject => "payload",
            Self::Missing { field }
            | Self::WrongType { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::Negative { field, .. }
            | Self::UnknownVariant { field, .. }
            | Self::EnergyMismatch { field, .. } => *field,
            Self::Timestamp { .. } => "timestamp",
            Self::ElectricEmissions { .. } => "emissions",
        }
    }
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Failure to turn raw bytes into a record
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// What to do with a non-zero emissions value on an electric record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvEmissionsPolicy {
    #[default]
    Reject,
    Accept,
}

/// Payload normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    ev_emissions: EvEmissionsPolicy,
}

impl Normalizer {
    #[must_use]
    pub const fn new(ev_emissions: EvEmissionsPolicy) -> Self {
        Self { ev_emissions }
    }

    #[must_use]
    pub const fn ev_emissions_policy(&self) -> EvEmissionsPolicy {
        self.ev_emissions
    }

    /// Parse and normalize a raw JSON document
    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<CanonicalRecord, NormalizeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(self.normalize(&value)?)
    }

    /// Normalize an already-parsed JSON document
    pub fn normalize(&self, raw: &Value) -> ValidationResult<CanonicalRecord> {
        let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        let vehicle_id = required_string(obj, "vehicle_id")?;
        if vehicle_id.is_empty() {
            return Err(ValidationError::WrongType {
                field: "vehicle_id",
                expected: "a non-empty string",
            });
        }

        let timestamp = parse_timestamp(required_string(obj, "timestamp")?)?;
        let location = parse_location(obj)?;

        let speed = required_number(obj, "speed")?;
        check_range("speed", speed, SPEED_MIN, SPEED_MAX)?;

        let drivetrain = required_string(obj, "type")?
            .parse::<Drivetrain>()
            .map_err(|_| unknown_variant(obj, "type"))?;
        let status = required_string(obj, "status")?
            .parse::<VehicleStatus>()
            .map_err(|_| unknown_variant(obj, "status"))?;

        let emissions = required_number(obj, "emissions")?;
        if emissions < 0.0 {
            return Err(ValidationError::Negative {
                field: "emissions",
                value: emissions,
            });
        }
        if drivetrain == Drivetrain::Electric
            && emissions != 0.0
            && self.ev_emissions == EvEmissionsPolicy::Reject
        {
            return Err(ValidationError::ElectricEmissions { value: emissions });
        }

        let energy = parse_energy(obj, drivetrain)?;
        let tenant_id = optional_string(obj, "tenant_id")?
            .map(|tenant| {
                if tenant.is_empty() {
                    Err(ValidationError::WrongType {
                        field: "tenant_id",
                        expected: "a non-empty string",
                    })
                } else {
                    Ok(TenantId::from(tenant))
                }
            })
            .transpose()?;

        Ok(CanonicalRecord {
            vehicle_id: VehicleId::from(vehicle_id),
            timestamp,
            location,
            speed,
            energy,
            emissions,
            drivetrain,
            status,
            tenant_id,
        })
    }
}

/// Present and non-null
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

fn required_string<'a>(obj: &'a Map<String, Value>, name: &'static str) -> ValidationResult<&'a str> {
    field(obj, name)
        .ok_or(ValidationError::Missing { field: name })?
        .as_str()
        .ok_or(ValidationError::WrongType {
            field: name,
            expected: "a string",
        })
}

fn optional_string<'a>(
    obj: &'a Map<String, Value>,
    name: &'static str,
) -> ValidationResult<Option<&'a str>> {
    field(obj, name)
        .map(|v| {
            v.as_str().ok_or(ValidationError::WrongType {
                field: name,
                expected: "a string",
            })
        })
        .transpose()
}

fn number_in(obj: &Map<String, Value>, name: &'static str, label: &'static str) -> ValidationResult<f64> {
    field(obj, name)
        .ok_or(ValidationError::Missing { field: label })?
        .as_f64()
        .ok_or(ValidationError::WrongType {
            field: label,
            expected: "a number",
        })
}

fn required_number(obj: &Map<String, Value>, name: &'static str) -> ValidationResult<f64> {
    number_in(obj, name, name)
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> ValidationResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn unknown_variant(obj: &Map<String, Value>, name: &'static str) -> ValidationError {
    ValidationError::UnknownVariant {
        field: name,
        value: obj
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn parse_timestamp(raw: &str) -> ValidationResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ValidationError::Timestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_location(obj: &Map<String, Value>) -> ValidationResult<Location> {
    let location = field(obj, "location")
        .ok_or(ValidationError::Missing { field: "location" })?
        .as_object()
        .ok_or(ValidationError::WrongType {
            field: "location",
            expected: "an object with lat and lon",
        })?;

    let lat = number_in(location, "lat", "location.lat")?;
    check_range("location.lat", lat, LATITUDE_MIN, LATITUDE_MAX)?;
    let lon = number_in(location, "lon", "location.lon")?;
    check_range("location.lon", lon, LONGITUDE_MIN, LONGITUDE_MAX)?;

    Ok(Location { lat, lon })
}

fn parse_energy(obj: &Map<String, Value>, drivetrain: Drivetrain) -> ValidationResult<EnergyLevel> {
    let (wanted, forbidden) = match drivetrain {
        Drivetrain::Combustion => ("fuel_level", "battery_level"),
        Drivetrain::Electric => ("battery_level", "fuel_level"),
    };

    if field(obj, forbidden).is_some() {
        return Err(ValidationError::EnergyMismatch {
            field: forbidden,
            drivetrain,
        });
    }

    let level = required_number(obj, wanted)?;
    check_range(wanted, level, LEVEL_MIN, LEVEL_MAX)?;

    Ok(match drivetrain {
        Drivetrain::Combustion => EnergyLevel::Fuel(level),
        Drivetrain::Electric => EnergyLevel::Battery(level),
    })
}
