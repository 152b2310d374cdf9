use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::id::{TenantId, VehicleId};

/// Highest speed (km/h) accepted from any producer
pub const MAX_SPEED_KMH: f64 = 300.0;

/// Drivetrain of the reporting vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Drivetrain {
    #[serde(rename = "ICE")]
    Combustion,
    #[serde(rename = "EV")]
    Electric,
}

impl Drivetrain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Combustion => "ICE",
            Self::Electric => "EV",
        }
    }

    /// Name of the energy field this drivetrain must report
    #[must_use]
    pub const fn energy_field(self) -> &'static str {
        match self {
            Self::Combustion => "fuel_level",
            Self::Electric => "battery_level",
        }
    }
}

impl fmt::Display for Drivetrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Drivetrain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ICE" => Ok(Self::Combustion),
            "EV" => Ok(Self::Electric),
            other => Err(format!("unknown drivetrain type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    Active,
    Inactive,
}

impl VehicleStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown vehicle status: {other}")),
        }
    }
}

/// WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Energy reading, percent in [0, 100]
///
/// Flattened into the record so the wire carries either `fuel_level` or
/// `battery_level`, never both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EnergyLevel {
    #[serde(rename = "fuel_level")]
    Fuel(f64),
    #[serde(rename = "battery_level")]
    Battery(f64),
}

impl EnergyLevel {
    #[must_use]
    pub const fn fuel(self) -> Option<f64> {
        match self {
            Self::Fuel(v) => Some(v),
            Self::Battery(_) => None,
        }
    }

    #[must_use]
    pub const fn battery(self) -> Option<f64> {
        match self {
            Self::Battery(v) => Some(v),
            Self::Fuel(_) => None,
        }
    }
}

/// One validated observation for one vehicle at one instant.
///
/// Only the normalizer produces these from untrusted input; the `Deserialize`
/// impl exists for reading our own serialized output back (history clients,
/// tests) and performs no range checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub vehicle_id: VehicleId,
    pub timestamp: DateTime<Utc>,
    pub location: Location,
    pub speed: f64,
    #[serde(flatten)]
    pub energy: EnergyLevel,
    pub emissions: f64,
    #[serde(rename = "type")]
    pub drivetrain: Drivetrain,
    pub status: VehicleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl CanonicalRecord {
    /// Serialize into the payload handed to observers
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.tenant_id = tenant;
        self
    }
}
