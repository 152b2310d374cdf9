pub mod id;
pub mod record;

pub use id::{TenantId, VehicleId};
pub use record::{
    CanonicalRecord, Drivetrain, EnergyLevel, Location, VehicleStatus, MAX_SPEED_KMH,
};
