pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod model;
pub mod search;
pub mod service;
pub mod spatial;
pub mod store;
pub mod surge;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{load_config, LocatorConfig};
pub use error::{LocatorError, LocatorResult};
pub use model::{AgentLocation, LocationUpdate, NearbyAgent, NearbyResult, SurgeZone};
pub use search::NearbyQuery;
pub use service::LocationService;
