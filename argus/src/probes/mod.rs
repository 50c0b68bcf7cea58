//! Single-model probing.
//!
//! A probe is one streaming completion against one model, gated by the shared
//! [`ThrottleController`](crate::throttle::ThrottleController) and timed by a
//! [`MetricsCollector`](crate::metrics::MetricsCollector). Benchmarks and uptime
//! checks are both built from probes.

pub mod executor;
pub mod models;

pub use executor::{ProbeConfig, ProbeExecutor};
pub use models::{
    FailureKind, MonitoredModel, ProbeFailure, ProbeOutcome, ProbeRequest, ProbeResult, ProviderAccount,
};
