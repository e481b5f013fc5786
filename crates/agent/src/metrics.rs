//! Report payload sources.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

/// Produces the body of each periodic report.
#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// Takes one sample, formatted as the report body.
    async fn sample(&self) -> String;
}

/// 1-minute load average from `/proc/loadavg`.
pub struct LoadAverage {
    path: PathBuf,
}

impl LoadAverage {
    pub fn new() -> Self {
        Self::from_path("/proc/loadavg")
    }

    /// Reads a loadavg-formatted file at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for LoadAverage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricProvider for LoadAverage {
    async fn sample(&self) -> String {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read load average");
                return "load1 unavailable".to_string();
            }
        };
        match parse_load1(&text) {
            Some(load) => format!("load1 {load:.2}"),
            None => {
                warn!(path = %self.path.display(), "Unrecognized load average format");
                "load1 unavailable".to_string()
            }
        }
    }
}

fn parse_load1(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Always reports the same body.
pub struct FixedMetric(pub String);

#[async_trait]
impl MetricProvider for FixedMetric {
    async fn sample(&self) -> String {
        self.0.clone()
    }
}
