//! Shared wire types for the relay gateway, placement directory and edge agent.
//!
//! This crate defines the serializable link message, the endpoint descriptors
//! exchanged during discovery and health probing, the well-known HTTP paths,
//! and the strongly-typed error enums shared across the workspace.

pub mod endpoint;
pub mod error;
pub mod message;

/// Re-export of endpoint descriptor and probe types.
pub use endpoint::{GatewayEndpoint, PingResponse};
/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of link message and identity types.
pub use message::{Message, NodeId, next_message_id};

/// Header carrying the edge node identity on link upgrades and discovery.
pub const NODE_ID_HEADER: &str = "edgenode_id";

/// Header carrying the project identity on discovery requests.
pub const PROJECT_ID_HEADER: &str = "project_id";

/// Gateway liveness/load probe polled by the directory.
pub const PING_PATH: &str = "/v1.0/ping";

/// Gateway endpoint that drives one downlink round trip.
pub const PING_THROUGH_PATH: &str = "/v1.0/ping2edged";

/// Directory discovery endpoint.
pub const EDGE_ACCESS_PATH: &str = "/v1.0/edgeaccess";

/// Directory status listing of every known gateway.
pub const GATEWAYS_PATH: &str = "/v1.0/gateways";

/// Plain liveness endpoint exposed by both HTTP services.
pub const HEALTH_PATH: &str = "/health";
