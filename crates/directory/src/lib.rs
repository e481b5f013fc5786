//! Placement directory: gateway liveness tracking and load-aware assignment.

pub mod health;
pub mod record;
pub mod registry;
pub mod server;

pub use health::HealthChecker;
pub use record::{GatewayRecord, GatewayStatus};
pub use registry::GatewayRegistry;
pub use server::{DirectorySettings, NO_GATEWAY_BODY, PlacementDirectory};
