//! Last known state of one probed gateway.

use std::time::{Duration, Instant};

use proto::{GatewayEndpoint, PingResponse};
use serde::Serialize;

/// A gateway as seen by the directory.
///
/// `home` is the configured probe address and never changes; `endpoint` is
/// whatever the gateway last advertised, which may differ when it is proxied.
#[derive(Debug, Clone)]
pub struct GatewayRecord {
    pub home: String,
    pub conn_num: usize,
    pub endpoint: GatewayEndpoint,
    pub last_probe: Option<Instant>,
}

impl GatewayRecord {
    /// Creates an unprobed record.
    pub fn new(home: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            conn_num: 0,
            endpoint: GatewayEndpoint::default(),
            last_probe: None,
        }
    }

    /// Time since the last successful probe. `None` if never probed.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_probe.map(|at| now.saturating_duration_since(at))
    }

    /// Fresh means probed less than `heart_broken` ago.
    pub fn is_fresh(&self, now: Instant, heart_broken: Duration) -> bool {
        self.age(now).is_some_and(|age| age < heart_broken)
    }

    /// Whether the last advertised address equals `host:port`.
    pub fn advertises(&self, host: &str, port: &str) -> bool {
        self.endpoint.host == host && self.endpoint.port == port
    }

    /// Overwrites load, advertised endpoint and probe time.
    pub fn apply(&mut self, ping: PingResponse, at: Instant) {
        self.conn_num = ping.conn_num;
        self.endpoint = ping.endpoint;
        self.last_probe = Some(at);
    }

    pub fn status(&self, now: Instant, heart_broken: Duration) -> GatewayStatus {
        GatewayStatus {
            home: self.home.clone(),
            conn_num: self.conn_num,
            host: self.endpoint.host.clone(),
            port: self.endpoint.port.clone(),
            age_secs: self.age(now).map(|age| age.as_secs()),
            fresh: self.is_fresh(now, heart_broken),
        }
    }
}

/// Row of the `/v1.0/gateways` status view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub home: String,
    pub conn_num: usize,
    pub host: String,
    pub port: String,
    pub age_secs: Option<u64>,
    pub fresh: bool,
}
