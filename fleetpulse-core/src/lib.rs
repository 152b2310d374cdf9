pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod repository;

pub use config::Config;
pub use error::{Error, Result};
pub use normalize::{EvEmissionsPolicy, NormalizeError, Normalizer, ValidationError};
