pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pg_repository;
pub mod repository;
pub mod routes;
pub mod state;
pub mod tokens;
pub mod types;
pub mod worker;

pub use config::{BridgeConfig, DeviceStoreType, KeyMaterial, TokenConfig};
pub use error::{BridgeError, BridgeResult};
pub use orchestrator::DeviceOrchestrator;
pub use pg_repository::PgDeviceRepository;
pub use repository::{DeviceRepository, MemoryDeviceRepository};
pub use state::BridgeState;
pub use tokens::{PlaybackGrant, PlaybackTokenIssuer, TokenError, Verification};
pub use types::*;
pub use worker::{HttpIngestWorker, IngestWorker};
