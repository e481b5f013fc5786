//! Edge agent: discovers a gateway, keeps both links up, reports and answers pushes.

pub mod discovery;
pub mod metrics;
pub mod runtime;

pub use discovery::DirectoryClient;
pub use metrics::{FixedMetric, LoadAverage, MetricProvider};
pub use runtime::{AgentSettings, EdgeAgent};
