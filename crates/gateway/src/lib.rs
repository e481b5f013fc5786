//! Relay gateway: session registry, link bridging, and the HTTP/WebSocket surface.

pub mod bridge;
pub mod link;
pub mod server;
pub mod session;

/// Reply stamp written by the gateway.
pub use bridge::GATEWAY_STAMP;
/// Link transport abstraction and its in-process implementation.
pub use link::{FrameKind, LinkFrame, LinkKind, LinkSocket, MemoryLink, MemoryPeer, memory_link};
/// Relay gateway server.
pub use server::{GatewaySettings, RelayGateway};
/// Session registry and downlink reply type.
pub use session::{DownlinkReply, SessionRegistry};
