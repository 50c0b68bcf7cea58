use std::future::Future;

use crate::alerts::{Alert, AlertRule};
use crate::benchmark::BenchmarkRun;
use crate::errors::Result;
use crate::probes::ProbeResult;
use crate::types::{AlertId, ModelId, RunId};
use crate::uptime::UptimeCheckRecord;

pub mod in_memory;

pub use in_memory::InMemoryStorage;

/// Persistence for benchmark runs, probe results, uptime checks and alerts.
///
/// The probing core only appends and reads. The one exception is
/// [`open_incident`](Storage::open_incident), which must check for an existing open
/// incident and insert atomically so concurrent evaluators cannot both open one.
pub trait Storage: Send + Sync {
    /// Insert or replace a benchmark run.
    fn put_benchmark_run(&self, run: &BenchmarkRun) -> impl Future<Output = Result<()>> + Send;

    /// # Errors
    /// - `NotFound` if no run has this ID
    fn get_benchmark_run(&self, id: RunId) -> impl Future<Output = Result<BenchmarkRun>> + Send;

    /// Append measured probe results to a run.
    fn append_probe_results(&self, run_id: RunId, results: &[ProbeResult]) -> impl Future<Output = Result<()>> + Send;

    /// Results of a run, in the order they were appended.
    fn list_probe_results(&self, run_id: RunId) -> impl Future<Output = Result<Vec<ProbeResult>>> + Send;

    fn append_uptime_checks(&self, checks: &[UptimeCheckRecord]) -> impl Future<Output = Result<()>> + Send;

    /// Most recent checks first, optionally for a single model.
    fn list_uptime_checks(
        &self,
        model_id: Option<ModelId>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<UptimeCheckRecord>>> + Send;

    /// Insert or replace an alert rule.
    fn put_alert_rule(&self, rule: AlertRule) -> impl Future<Output = Result<()>> + Send;

    fn list_alert_rules(&self) -> impl Future<Output = Result<Vec<AlertRule>>> + Send;

    /// Store `alert` unless an open incident already exists for its `(rule, model)` pair.
    ///
    /// Returns the stored alert, or `None` if it was suppressed as a duplicate.
    fn open_incident(&self, alert: Alert) -> impl Future<Output = Result<Option<Alert>>> + Send;

    /// Mark an alert acknowledged, closing its incident.
    ///
    /// # Errors
    /// - `NotFound` if no alert has this ID
    fn acknowledge_alert(&self, id: AlertId) -> impl Future<Output = Result<Alert>> + Send;

    /// All alerts, oldest first.
    fn list_alerts(&self) -> impl Future<Output = Result<Vec<Alert>>> + Send;

    /// Unacknowledged alerts, oldest first.
    fn list_open_alerts(&self) -> impl Future<Output = Result<Vec<Alert>>> + Send;
}
