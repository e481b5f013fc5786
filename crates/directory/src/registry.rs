//! Load-ordered GatewayRecord collection and the selection algorithm.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use proto::{DirectoryError, GatewayEndpoint, PingResponse};
use tracing::debug;

use crate::record::{GatewayRecord, GatewayStatus};

/// Every configured gateway, kept ascending by reported load.
///
/// Updates take the write lock for the overwrite and the re-sort together,
/// so a reader never observes a half-sorted sequence.
pub struct GatewayRegistry {
    records: RwLock<Vec<GatewayRecord>>,
    heart_broken: Duration,
}

impl GatewayRegistry {
    /// One unprobed record per distinct home, in configuration order.
    pub fn new<I, S>(homes: I, heart_broken: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut records: Vec<GatewayRecord> = Vec::new();
        for home in homes {
            let home = home.into();
            if records.iter().any(|r| r.home == home) {
                continue;
            }
            records.push(GatewayRecord::new(home));
        }
        Self {
            records: RwLock::new(records),
            heart_broken,
        }
    }

    /// Configured home addresses in current load order.
    pub fn homes(&self) -> Vec<String> {
        self.records.read().iter().map(|r| r.home.clone()).collect()
    }

    /// Number of configured gateways, fresh or not.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when no gateway is configured.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records a successful probe of `home`, then restores load order.
    /// Returns `false` if `home` is not configured.
    pub fn apply_probe(&self, home: &str, ping: PingResponse, at: Instant) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.iter_mut().find(|r| r.home == home) else {
            return false;
        };
        record.apply(ping, at);
        // stable: equal loads keep their relative order
        records.sort_by_key(|r| r.conn_num);
        true
    }

    /// Picks a gateway for an agent that last used `previous`.
    pub fn select(&self, previous: &GatewayEndpoint) -> Result<GatewayEndpoint, DirectoryError> {
        self.select_at(previous, Instant::now())
    }

    /// [`select`](Self::select) evaluated at a given instant.
    pub fn select_at(
        &self,
        previous: &GatewayEndpoint,
        now: Instant,
    ) -> Result<GatewayEndpoint, DirectoryError> {
        let records = self.records.read();

        if previous.has_address()
            && let Some(sticky) = records
                .iter()
                .find(|r| r.advertises(&previous.host, &previous.port))
        {
            if sticky.is_fresh(now, self.heart_broken) {
                debug!(home = %sticky.home, "Sticky gateway still fresh");
                return Ok(sticky.endpoint.clone());
            }
            debug!(home = %sticky.home, "Sticky gateway is stale, balancing by load");
        }

        records
            .iter()
            .find(|r| r.is_fresh(now, self.heart_broken))
            .map(|r| r.endpoint.clone())
            .ok_or(DirectoryError::NoAvailableGateway)
    }

    /// Status of every record, in load order.
    pub fn snapshot(&self, now: Instant) -> Vec<GatewayStatus> {
        self.records
            .read()
            .iter()
            .map(|r| r.status(now, self.heart_broken))
            .collect()
    }
}
