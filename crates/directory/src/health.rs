//! Periodic gateway probing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use proto::{DirectoryError, PING_PATH, PingResponse};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::GatewayRegistry;

/// Probes every configured gateway and feeds the results into the registry.
#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    registry: Arc<GatewayRegistry>,
}

impl HealthChecker {
    pub fn new(registry: Arc<GatewayRegistry>, probe_timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| DirectoryError::Server(format!("failed to build probe client: {e}")))?;
        Ok(Self { client, registry })
    }

    /// Asks one gateway for its load and advertised endpoint.
    pub async fn probe(&self, home: &str) -> Result<PingResponse, DirectoryError> {
        let fail = |reason: String| DirectoryError::Probe {
            home: home.to_string(),
            reason,
        };
        let resp = self
            .client
            .get(probe_url(home))
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fail(format!("status {}", resp.status())));
        }
        resp.json::<PingResponse>()
            .await
            .map_err(|e| fail(e.to_string()))
    }

    /// One health cycle: probes all homes concurrently and waits for every
    /// probe to finish. Returns how many succeeded. Failed probes leave
    /// their record untouched.
    pub async fn collect(&self) -> usize {
        let handles: Vec<_> = self
            .registry
            .homes()
            .into_iter()
            .map(|home| {
                let checker = self.clone();
                tokio::spawn(async move {
                    match checker.probe(&home).await {
                        Ok(ping) => {
                            debug!(home = %home, conn_num = ping.conn_num, "Gateway probe ok");
                            checker.registry.apply_probe(&home, ping, Instant::now())
                        }
                        Err(e) => {
                            debug!(error = %e, "Gateway probe failed");
                            false
                        }
                    }
                })
            })
            .collect();

        let mut updated = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }
        updated
    }

    /// Runs [`collect`](Self::collect) every `interval`, starting immediately.
    pub async fn run(self, interval: Duration) {
        info!(
            gateways = self.registry.len(),
            interval_secs = interval.as_secs(),
            "Health checker started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let updated = self.collect().await;
            debug!(updated, total = self.registry.len(), "Health cycle finished");
        }
    }
}

/// `home` may be `host:port` or a full base URL.
pub fn probe_url(home: &str) -> String {
    let base = home.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}{PING_PATH}")
    } else {
        format!("http://{base}{PING_PATH}")
    }
}
