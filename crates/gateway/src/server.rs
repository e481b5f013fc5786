//! Relay gateway HTTP/WebSocket surface.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use proto::{
    GatewayEndpoint, GatewayError, HEALTH_PATH, NODE_ID_HEADER, NodeId, PING_PATH,
    PING_THROUGH_PATH, PingResponse,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::session::SessionRegistry;

/// Runtime settings of one relay gateway.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Socket address to listen on, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Address and paths reported to the directory. The uplink and
    /// downlink paths are also the routes the gateway serves.
    pub advertised: GatewayEndpoint,
    /// Deadline for every link read. `None` waits forever.
    pub read_timeout: Option<Duration>,
}

/// Query parameters of the ping-through endpoint.
#[derive(Debug, Deserialize)]
pub struct PingThroughParams {
    #[serde(default)]
    pub edgenode_id: String,
    #[serde(default)]
    pub msg: String,
}

struct GatewayState {
    registry: Arc<SessionRegistry>,
    advertised: GatewayEndpoint,
}

impl GatewayState {
    fn health_snapshot(&self) -> PingResponse {
        PingResponse {
            conn_num: self.registry.len(),
            endpoint: self.advertised.clone(),
        }
    }
}

/// Relay gateway: accepts agent links and bridges their traffic.
pub struct RelayGateway {
    bind_addr: String,
    state: Arc<GatewayState>,
}

impl RelayGateway {
    /// Creates a gateway with an empty session registry.
    pub fn new(settings: GatewaySettings) -> Self {
        let registry = Arc::new(SessionRegistry::new(settings.read_timeout));
        Self {
            bind_addr: settings.bind_addr,
            state: Arc::new(GatewayState {
                registry,
                advertised: settings.advertised,
            }),
        }
    }

    /// Shared session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.state.registry.clone()
    }

    /// Current load and advertised endpoint, as served on `/v1.0/ping`.
    pub fn health_snapshot(&self) -> PingResponse {
        self.state.health_snapshot()
    }

    /// Builds the axum router for all gateway routes.
    pub fn router(&self) -> Router {
        let advertised = &self.state.advertised;
        Router::new()
            .route(PING_PATH, get(ping_handler))
            .route(PING_THROUGH_PATH, get(ping_through_handler))
            .route(&advertised.uplink_path, get(uplink_handler))
            .route(&advertised.downlink_path, get(downlink_handler))
            .route(HEALTH_PATH, get(health_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| GatewayError::Server(format!("bind {} failed: {e}", self.bind_addr)))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::Server(e.to_string()))?;
        info!(
            addr = %local,
            uplink = %self.state.advertised.uplink_path,
            downlink = %self.state.advertised.downlink_path,
            "Relay gateway listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))?;

        info!("Relay gateway stopped");
        Ok(())
    }
}

// ─── Axum handlers ─────────────────────────────────────────

async fn health_handler() -> &'static str {
    "ok"
}

async fn ping_handler(State(state): State<Arc<GatewayState>>) -> Json<PingResponse> {
    Json(state.health_snapshot())
}

async fn uplink_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let Some(node_id) = node_id_from(&headers) else {
        return missing_node_id();
    };
    info!(node_id = %node_id, "Uplink upgrade requested");
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| async move {
        registry.establish_uplink(node_id, socket);
    })
}

async fn downlink_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let Some(node_id) = node_id_from(&headers) else {
        return missing_node_id();
    };
    info!(node_id = %node_id, "Downlink upgrade requested");
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| async move {
        registry.establish_downlink(node_id, socket);
    })
}

async fn ping_through_handler(
    Query(params): Query<PingThroughParams>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    if params.edgenode_id.is_empty() || params.msg.is_empty() {
        warn!(edgenode_id = %params.edgenode_id, msg = %params.msg, "Incomplete ping-through params");
    }
    let node_id = NodeId::from(params.edgenode_id);

    match state.registry.push(&node_id, params.msg).await {
        Ok(reply) => {
            info!(node_id = %node_id, id = reply.request_id, "Ping-through answered");
            format!("Reply from {node_id} is {}", reply.raw).into_response()
        }
        Err(e) => {
            warn!(node_id = %node_id, error = %e, "Ping-through failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ─── Helpers ───────────────────────────────────────────────

/// Reads the trusted identity header. Blank values are treated as absent.
fn node_id_from(headers: &HeaderMap) -> Option<NodeId> {
    headers
        .get(NODE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(NodeId::from)
}

fn missing_node_id() -> Response {
    warn!("Link upgrade without {NODE_ID_HEADER} header");
    (
        StatusCode::BAD_REQUEST,
        format!("missing {NODE_ID_HEADER} header"),
    )
        .into_response()
}
