// src/pipeline/mod.rs

pub mod driver;
pub mod metrics;

pub use driver::{DriverState, PipelineDriver, RunSummary, StopHandle, StopReason};
pub use metrics::{MetricsSummary, PipelineMetrics};
