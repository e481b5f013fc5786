use serde::{Deserialize, Serialize};

/// Where an agent reaches a gateway. Also the discovery request body, where
/// it carries the previously used gateway (all fields empty on first contact).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    /// Downlink (gateway to agent) WebSocket path.
    #[serde(default, rename = "toedged_path")]
    pub downlink_path: String,
    /// Uplink (agent to gateway) WebSocket path.
    #[serde(default, rename = "toedgeaccess_path")]
    pub uplink_path: String,
    /// Advertised bi-directional async path.
    #[serde(default, rename = "biasync_path")]
    pub biasync_path: String,
}

impl GatewayEndpoint {
    /// Returns `true` when both host and port are known.
    pub fn has_address(&self) -> bool {
        !self.host.is_empty() && !self.port.is_empty()
    }

    /// WebSocket URL of the uplink.
    pub fn uplink_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.uplink_path)
    }

    /// WebSocket URL of the downlink.
    pub fn downlink_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.downlink_path)
    }
}

/// Body of the gateway's `/v1.0/ping` answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Number of live sessions on the gateway.
    pub conn_num: usize,
    #[serde(flatten)]
    pub endpoint: GatewayEndpoint,
}
