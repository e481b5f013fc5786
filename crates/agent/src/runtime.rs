//! Agent lifecycle: discover, dial both links, report and respond, retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use proto::{AgentError, GatewayEndpoint, Message, NODE_ID_HEADER, NodeId};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::discovery::DirectoryClient;
use crate::metrics::MetricProvider;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runtime settings of one edge agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub node_id: NodeId,
    pub project_id: String,
    /// Full discovery URL of the placement directory.
    pub directory_url: String,
    /// Period of uplink self-reports.
    pub report_interval: Duration,
    /// Deadline for each uplink reply. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Backoff after a failed discovery.
    pub retry_directory_interval: Duration,
    /// Backoff after a failed dial or a link fault.
    pub retry_gateway_interval: Duration,
}

/// Edge agent: keeps one uplink/downlink pair to an assigned gateway.
pub struct EdgeAgent {
    settings: AgentSettings,
    directory: DirectoryClient,
    metrics: Arc<dyn MetricProvider>,
    stamp: String,
}

impl EdgeAgent {
    /// Rejects zero report or retry intervals.
    pub fn new(
        settings: AgentSettings,
        metrics: Arc<dyn MetricProvider>,
    ) -> Result<Self, AgentError> {
        for (name, value) in [
            ("report_interval", settings.report_interval),
            ("retry_directory_interval", settings.retry_directory_interval),
            ("retry_gateway_interval", settings.retry_gateway_interval),
        ] {
            if value.is_zero() {
                return Err(AgentError::InvalidSettings(format!("{name} must be non-zero")));
            }
        }
        let directory = DirectoryClient::new(
            settings.directory_url.clone(),
            settings.node_id.clone(),
            settings.project_id.clone(),
        );
        let stamp = format!("edge agent {}", settings.node_id);
        Ok(Self {
            settings,
            directory,
            metrics,
            stamp,
        })
    }

    /// Name this agent writes into downlink replies.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// Runs discovery/link cycles until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(node_id = %self.settings.node_id, directory = %self.settings.directory_url, "Edge agent started");

        let mut previous = GatewayEndpoint::default();
        loop {
            let backoff = tokio::select! {
                _ = &mut shutdown => break,
                backoff = self.cycle(&mut previous) => backoff,
            };
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
        info!(node_id = %self.settings.node_id, "Edge agent stopped");
    }

    /// One attempt: discover, dial, serve until a fault. Returns the backoff
    /// before the next attempt. `previous` keeps the last assigned endpoint.
    async fn cycle(&self, previous: &mut GatewayEndpoint) -> Duration {
        let endpoint = match self.directory.discover(previous).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(node_id = %self.settings.node_id, error = %e, "Gateway discovery failed");
                return self.settings.retry_directory_interval;
            }
        };
        *previous = endpoint.clone();
        info!(
            node_id = %self.settings.node_id,
            host = %endpoint.host,
            port = %endpoint.port,
            "Gateway assigned"
        );

        let (mut uplink, mut downlink) = match self.connect(&endpoint).await {
            Ok(links) => links,
            Err(e) => {
                warn!(node_id = %self.settings.node_id, error = %e, "Gateway dial failed");
                return self.settings.retry_gateway_interval;
            }
        };

        let fault = tokio::select! {
            r = self.report_loop(&mut uplink) => r,
            r = self.respond_loop(&mut downlink) => r,
        };
        if let Err(e) = fault {
            warn!(node_id = %self.settings.node_id, error = %e, "Link fault, reconnecting");
        }
        let _ = uplink.close(None).await;
        let _ = downlink.close(None).await;
        self.settings.retry_gateway_interval
    }

    async fn connect(&self, endpoint: &GatewayEndpoint) -> Result<(WsStream, WsStream), AgentError> {
        let uplink = dial(&endpoint.uplink_url(), &self.settings.node_id).await?;
        let downlink = match dial(&endpoint.downlink_url(), &self.settings.node_id).await {
            Ok(downlink) => downlink,
            Err(e) => {
                let mut uplink = uplink;
                let _ = uplink.close(None).await;
                return Err(e);
            }
        };
        Ok((uplink, downlink))
    }

    /// Sends a report every interval and waits for the gateway's echo.
    async fn report_loop(&self, ws: &mut WsStream) -> Result<(), AgentError> {
        let mut ticker = tokio::time::interval(self.settings.report_interval);
        loop {
            ticker.tick().await;
            let report = Message::new(self.metrics.sample().await);
            let frame = report
                .encode()
                .map_err(|e| AgentError::Transport(e.to_string()))?;
            ws.send(WsMessage::text(frame))
                .await
                .map_err(|e| AgentError::Transport(e.to_string()))?;

            let raw = read_text(ws, self.settings.read_timeout).await?;
            match Message::decode(&raw) {
                Ok(reply) if reply.id != report.id => {
                    warn!(sent = report.id, received = reply.id, "wrong order");
                }
                Ok(reply) => debug!(id = reply.id, reply = %reply.reply, "Report acknowledged"),
                Err(e) => warn!(error = %e, "Undecodable uplink reply"),
            }
        }
    }

    /// Answers every pushed request by stamping and echoing it.
    async fn respond_loop(&self, ws: &mut WsStream) -> Result<(), AgentError> {
        loop {
            let raw = read_text(ws, None).await?;
            let mut request = match Message::decode(&raw) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable push");
                    continue;
                }
            };
            request.stamp_reply(&self.stamp);
            let frame = request
                .encode()
                .map_err(|e| AgentError::Transport(e.to_string()))?;
            ws.send(WsMessage::text(frame))
                .await
                .map_err(|e| AgentError::Transport(e.to_string()))?;
            debug!(id = request.id, "Push answered");
        }
    }
}

async fn dial(url: &str, node_id: &NodeId) -> Result<WsStream, AgentError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| AgentError::Dial(format!("{url}: {e}")))?;
    let value = HeaderValue::from_str(node_id.as_str())
        .map_err(|e| AgentError::Dial(format!("invalid node id: {e}")))?;
    request.headers_mut().insert(NODE_ID_HEADER, value);

    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| AgentError::Dial(format!("{url}: {e}")))?;
    debug!(url, "Link dialed");
    Ok(ws)
}

async fn read_text(ws: &mut WsStream, deadline: Option<Duration>) -> Result<String, AgentError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, next_text(ws))
            .await
            .map_err(|_| AgentError::ReadTimeout(limit))?,
        None => next_text(ws).await,
    }
}

async fn next_text(ws: &mut WsStream) -> Result<String, AgentError> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text.as_str().to_string()),
            Some(Ok(WsMessage::Binary(bytes))) => {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(AgentError::Transport("link closed by gateway".into()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(AgentError::Transport(e.to_string())),
        }
    }
}
