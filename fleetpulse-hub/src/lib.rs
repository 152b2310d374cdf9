pub mod bridge;
pub mod error;
pub mod hub;
pub mod ingest;

pub use bridge::BrokerBridge;
pub use error::{Error, Result};
pub use hub::{BroadcastHub, DeliveryReport, ObserverId, ObserverRegistration, Payload, TenantScope};
pub use ingest::{IngestError, IngestPipeline, IngestReceipt, IngestSource};
