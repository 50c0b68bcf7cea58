//! In-memory storage implementation.
//!
//! Everything lives behind a single lock, which also makes
//! [`open_incident`](Storage::open_incident) atomic. Suitable for tests and
//! one-shot CLI invocations; data is lost on exit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::Storage;
use crate::alerts::{Alert, AlertRule};
use crate::benchmark::BenchmarkRun;
use crate::errors::{Error, Result};
use crate::probes::ProbeResult;
use crate::types::{AlertId, ModelId, RunId};
use crate::uptime::UptimeCheckRecord;

#[derive(Default)]
struct Inner {
    runs: HashMap<RunId, BenchmarkRun>,
    results: HashMap<RunId, Vec<ProbeResult>>,
    checks: Vec<UptimeCheckRecord>,
    rules: Vec<AlertRule>,
    alerts: Vec<Alert>,
}

/// In-memory implementation of the [`Storage`] trait.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    async fn put_benchmark_run(&self, run: &BenchmarkRun) -> Result<()> {
        self.inner.write().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_benchmark_run(&self, id: RunId) -> Result<BenchmarkRun> {
        self.inner
            .read()
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("Benchmark run", id))
    }

    async fn append_probe_results(&self, run_id: RunId, results: &[ProbeResult]) -> Result<()> {
        self.inner
            .write()
            .results
            .entry(run_id)
            .or_default()
            .extend_from_slice(results);
        Ok(())
    }

    async fn list_probe_results(&self, run_id: RunId) -> Result<Vec<ProbeResult>> {
        Ok(self.inner.read().results.get(&run_id).cloned().unwrap_or_default())
    }

    async fn append_uptime_checks(&self, checks: &[UptimeCheckRecord]) -> Result<()> {
        self.inner.write().checks.extend_from_slice(checks);
        Ok(())
    }

    async fn list_uptime_checks(&self, model_id: Option<ModelId>, limit: usize) -> Result<Vec<UptimeCheckRecord>> {
        let inner = self.inner.read();
        let mut checks: Vec<_> = inner
            .checks
            .iter()
            .filter(|c| model_id.is_none_or(|id| c.model_id == id))
            .cloned()
            .collect();
        // Stable sort keeps append order among equal timestamps
        checks.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
        checks.truncate(limit);
        Ok(checks)
    }

    async fn put_alert_rule(&self, rule: AlertRule) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => inner.rules.push(rule),
        }
        Ok(())
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.inner.read().rules.clone())
    }

    async fn open_incident(&self, alert: Alert) -> Result<Option<Alert>> {
        let mut inner = self.inner.write();
        if inner.alerts.iter().any(|a| a.is_open_for(alert.rule_id, alert.model_id)) {
            return Ok(None);
        }
        inner.alerts.push(alert.clone());
        Ok(Some(alert))
    }

    async fn acknowledge_alert(&self, id: AlertId) -> Result<Alert> {
        let mut inner = self.inner.write();
        let alert = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::not_found("Alert", id))?;
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(Utc::now());
        }
        Ok(alert.clone())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.inner.read().alerts.clone())
    }

    async fn list_open_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.inner.read().alerts.iter().filter(|a| !a.acknowledged).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleId;

    #[tokio::test]
    async fn open_incident_suppresses_duplicates() {
        let storage = InMemoryStorage::new();
        let rule = RuleId::new();
        let model = ModelId::new();

        let first = storage.open_incident(Alert::open(rule, Some(model), "down")).await.unwrap();
        assert!(first.is_some());
        let second = storage.open_incident(Alert::open(rule, Some(model), "down")).await.unwrap();
        assert!(second.is_none());

        // Same rule, different model is a separate incident
        let other = storage.open_incident(Alert::open(rule, None, "all down")).await.unwrap();
        assert!(other.is_some());

        assert_eq!(storage.list_alerts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn acknowledge_closes_incident() {
        let storage = InMemoryStorage::new();
        let rule = RuleId::new();
        let model = ModelId::new();

        let alert = storage
            .open_incident(Alert::open(rule, Some(model), "down"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(storage.list_open_alerts().await.unwrap(), vec![alert.clone()]);

        let acked = storage.acknowledge_alert(alert.id).await.unwrap();
        assert!(acked.acknowledged);
        assert!(acked.acknowledged_at.is_some());
        assert!(storage.list_open_alerts().await.unwrap().is_empty());

        let reopened = storage.open_incident(Alert::open(rule, Some(model), "down again")).await.unwrap();
        assert!(reopened.is_some());
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.acknowledge_alert(AlertId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_alert_rule_replaces_by_id() {
        let storage = InMemoryStorage::new();
        let rule = AlertRule::any_model_down("outages");
        storage.put_alert_rule(rule.clone()).await.unwrap();
        storage.put_alert_rule(rule.disabled()).await.unwrap();

        let rules = storage.list_alert_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].enabled);
    }
}
