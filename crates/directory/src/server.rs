//! Placement directory HTTP surface.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use proto::{
    DirectoryError, EDGE_ACCESS_PATH, GATEWAYS_PATH, GatewayEndpoint, HEALTH_PATH,
    NODE_ID_HEADER, PROJECT_ID_HEADER,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::health::HealthChecker;
use crate::record::GatewayStatus;
use crate::registry::GatewayRegistry;

/// Answer body when no gateway is fresh.
pub const NO_GATEWAY_BODY: &str = "no gateway is available, try again later";

/// Runtime settings of the placement directory.
#[derive(Debug, Clone)]
pub struct DirectorySettings {
    /// Socket address to listen on, e.g. `0.0.0.0:8000`.
    pub bind_addr: String,
    /// Gateway probe addresses (`host:port` or base URLs).
    pub homes: Vec<String>,
    /// Staleness threshold.
    pub heart_broken: Duration,
    /// Health cycle period.
    pub ping_interval: Duration,
    /// Per-probe HTTP timeout.
    pub probe_timeout: Duration,
}

/// Placement directory: health-checks gateways and answers discovery.
pub struct PlacementDirectory {
    bind_addr: String,
    ping_interval: Duration,
    registry: Arc<GatewayRegistry>,
    checker: HealthChecker,
}

impl PlacementDirectory {
    /// Builds the registry and health checker. Every duration setting must
    /// be non-zero.
    pub fn new(settings: DirectorySettings) -> Result<Self, DirectoryError> {
        for (name, value) in [
            ("heart_broken", settings.heart_broken),
            ("ping_interval", settings.ping_interval),
            ("probe_timeout", settings.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(DirectoryError::InvalidSettings(format!("{name} must be non-zero")));
            }
        }
        let registry = Arc::new(GatewayRegistry::new(settings.homes, settings.heart_broken));
        let checker = HealthChecker::new(registry.clone(), settings.probe_timeout)?;
        Ok(Self {
            bind_addr: settings.bind_addr,
            ping_interval: settings.ping_interval,
            registry,
            checker,
        })
    }

    /// Shared gateway records.
    pub fn registry(&self) -> Arc<GatewayRegistry> {
        self.registry.clone()
    }

    /// Handle for running health cycles by hand.
    pub fn checker(&self) -> HealthChecker {
        self.checker.clone()
    }

    /// Builds the axum router for discovery, status and health routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route(EDGE_ACCESS_PATH, get(edge_access_handler).post(edge_access_handler))
            .route(GATEWAYS_PATH, get(gateways_handler))
            .route(HEALTH_PATH, get(health_handler))
            .with_state(self.registry.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Binds the configured address, starts the health checker and serves
    /// until `shutdown` resolves.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), DirectoryError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| DirectoryError::Server(format!("bind {} failed: {e}", self.bind_addr)))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves. The
    /// health checker runs alongside and stops with the server.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), DirectoryError> {
        let local = listener
            .local_addr()
            .map_err(|e| DirectoryError::Server(e.to_string()))?;
        info!(addr = %local, gateways = self.registry.len(), "Placement directory listening");

        let health = tokio::spawn(self.checker.clone().run(self.ping_interval));
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| DirectoryError::Server(e.to_string()));
        health.abort();

        info!("Placement directory stopped");
        served
    }
}

// ─── Axum handlers ─────────────────────────────────────────

async fn health_handler() -> &'static str {
    "ok"
}

async fn gateways_handler(State(registry): State<Arc<GatewayRegistry>>) -> Json<Vec<GatewayStatus>> {
    Json(registry.snapshot(Instant::now()))
}

async fn edge_access_handler(
    State(registry): State<Arc<GatewayRegistry>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let node_id = header_str(&headers, NODE_ID_HEADER);
    let project_id = header_str(&headers, PROJECT_ID_HEADER);

    let previous = if body.iter().all(u8::is_ascii_whitespace) {
        GatewayEndpoint::default()
    } else {
        match serde_json::from_slice::<GatewayEndpoint>(&body) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(node_id, error = %e, "Malformed discovery body");
                return (StatusCode::BAD_REQUEST, format!("invalid endpoint body: {e}"))
                    .into_response();
            }
        }
    };

    match registry.select(&previous) {
        Ok(endpoint) => {
            info!(
                node_id,
                project_id,
                previous = %format!("{}:{}", previous.host, previous.port),
                assigned = %format!("{}:{}", endpoint.host, endpoint.port),
                "Gateway assigned"
            );
            Json(endpoint).into_response()
        }
        Err(e) => {
            warn!(node_id, project_id, error = %e, "Discovery failed");
            (StatusCode::NOT_FOUND, NO_GATEWAY_BODY).into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
