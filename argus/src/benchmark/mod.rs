//! Multi-model performance benchmarks.
//!
//! A run fans out warmup and measured probes across its models through the
//! [`BenchmarkOrchestrator`], streams measured results as they finish, and ends with
//! per-model TTFT and TPS percentiles.

pub mod models;
pub mod orchestrator;
pub mod stats;

pub use models::{
    BenchmarkConfig, BenchmarkEvent, BenchmarkReport, BenchmarkRun, BenchmarkSettings, RunState, TriggeredBy,
};
pub use orchestrator::{BenchmarkHandle, BenchmarkOrchestrator};
pub use stats::{AggregateStatistics, MetricStatistics, Percentiles, percentile};
