//! Directory client used to obtain a gateway assignment.

use proto::{AgentError, GatewayEndpoint, NODE_ID_HEADER, NodeId, PROJECT_ID_HEADER};
use tracing::debug;

/// Asks the placement directory which gateway to use.
#[derive(Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    url: String,
    node_id: NodeId,
    project_id: String,
}

impl DirectoryClient {
    /// `url` is the full discovery URL, e.g. `http://dir:8000/v1.0/edgeaccess`.
    pub fn new(url: impl Into<String>, node_id: NodeId, project_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            node_id,
            project_id: project_id.into(),
        }
    }

    /// Sends the previously used endpoint and returns the new assignment.
    /// Any answer other than 200 is a discovery error.
    pub async fn discover(&self, previous: &GatewayEndpoint) -> Result<GatewayEndpoint, AgentError> {
        let resp = self
            .client
            .get(&self.url)
            .header(NODE_ID_HEADER, self.node_id.as_str())
            .header(PROJECT_ID_HEADER, &self.project_id)
            .json(previous)
            .send()
            .await
            .map_err(|e| AgentError::Discovery(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Discovery(format!("status {status}: {text}")));
        }

        let endpoint: GatewayEndpoint = resp
            .json()
            .await
            .map_err(|e| AgentError::Discovery(format!("invalid endpoint: {e}")))?;
        if !endpoint.has_address() {
            return Err(AgentError::Discovery(
                "directory answered without host/port".to_string(),
            ));
        }
        debug!(host = %endpoint.host, port = %endpoint.port, "Gateway discovered");
        Ok(endpoint)
    }
}
