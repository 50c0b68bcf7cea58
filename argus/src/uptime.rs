//! Health checks for monitored models.
//!
//! One uptime cycle sends a single short health-check prompt to every enabled
//! model and classifies the outcome:
//!
//! - **up**: the probe succeeded within the latency and TTFT thresholds
//! - **degraded**: the probe succeeded but was slow, or the response looked wrong
//! - **down**: the probe failed or timed out
//!
//! Records are produced once and never modified. Deciding *when* to run a cycle is
//! up to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::probes::{FailureKind, MonitoredModel, ProbeConfig, ProbeExecutor, ProbeRequest, ProbeResult};
use crate::prompt_packs::PromptPackCatalog;
use crate::provider::ProviderClient;
use crate::throttle::{ThrottleConfig, ThrottleController};
use crate::types::{CheckId, ModelId, ProviderAccountId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UptimeStatus {
    Up,
    Degraded,
    Down,
}

impl std::fmt::Display for UptimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UptimeStatus::Up => "up",
            UptimeStatus::Degraded => "degraded",
            UptimeStatus::Down => "down",
        })
    }
}

/// Result of checking one model in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeCheckRecord {
    pub id: CheckId,
    pub model_id: ModelId,
    /// Provider-side model identifier, matched by `model_unavailable_everywhere` rules
    pub model_name: String,
    pub account_id: ProviderAccountId,
    pub status: UptimeStatus,
    pub latency_ms: Option<f64>,
    pub ttft_ms: Option<f64>,
    /// Generation speed, excluding time to first token
    pub tps: Option<f64>,
    pub output_tokens: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Health check settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UptimeSettings {
    /// Prompt pack sent on every check
    pub prompt_pack: String,
    pub max_tokens: u32,
    /// Per-attempt timeout; a check that exceeds it is `down`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Attempts per check, including the first
    pub max_attempts: u32,
    /// Total latency above this marks a successful check `degraded`
    #[serde(with = "humantime_serde")]
    pub latency_threshold: Duration,
    /// Time to first token above this marks a successful check `degraded`
    #[serde(with = "humantime_serde")]
    pub ttft_threshold: Duration,
}

impl Default for UptimeSettings {
    fn default() -> Self {
        Self {
            prompt_pack: "health_check".to_string(),
            max_tokens: 100,
            timeout: Duration::from_secs(15),
            max_attempts: 1,
            latency_threshold: Duration::from_secs(10),
            ttft_threshold: Duration::from_secs(5),
        }
    }
}

impl UptimeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::invalid_config("uptime max_tokens must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("uptime max_attempts must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("uptime timeout must be positive"));
        }
        Ok(())
    }

    /// Status of a finished probe, with the reason when it is not `up`.
    pub fn classify(&self, result: &ProbeResult) -> (UptimeStatus, Option<String>) {
        let Some(metrics) = result.metrics() else {
            let message = result
                .error()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "Health check failed".to_string());
            return (UptimeStatus::Down, Some(message));
        };

        let latency_limit = self.latency_threshold.as_secs_f64() * 1000.0;
        let ttft_limit = self.ttft_threshold.as_secs_f64() * 1000.0;

        if metrics.total_latency_ms > latency_limit {
            return (
                UptimeStatus::Degraded,
                Some(format!(
                    "latency {:.0}ms exceeds threshold {:.0}ms",
                    metrics.total_latency_ms, latency_limit
                )),
            );
        }
        if metrics.ttft_ms > ttft_limit {
            return (
                UptimeStatus::Degraded,
                Some(format!("ttft {:.0}ms exceeds threshold {:.0}ms", metrics.ttft_ms, ttft_limit)),
            );
        }
        if let Some(soft) = &result.soft_error {
            return (UptimeStatus::Degraded, Some(soft.clone()));
        }
        (UptimeStatus::Up, None)
    }
}

/// Runs uptime cycles. Owns the throttle shared by all checks it issues.
pub struct UptimeChecker<P> {
    executor: ProbeExecutor<P>,
    throttle: ThrottleController,
    prompt: Arc<str>,
    settings: UptimeSettings,
}

impl<P: ProviderClient> UptimeChecker<P> {
    /// Fails if the settings, throttle caps or prompt pack are invalid.
    pub fn new(
        client: Arc<P>,
        settings: UptimeSettings,
        probe: ProbeConfig,
        throttle: ThrottleConfig,
        catalog: &PromptPackCatalog,
    ) -> Result<Self> {
        settings.validate()?;
        let prompt: Arc<str> = Arc::from(catalog.get(&settings.prompt_pack)?.prompt.as_str());
        let probe = ProbeConfig {
            timeout: settings.timeout,
            max_attempts: settings.max_attempts,
            ..probe
        };
        probe.validate()?;

        Ok(Self {
            executor: ProbeExecutor::new(client, probe),
            throttle: ThrottleController::new(throttle)?,
            prompt,
            settings,
        })
    }

    pub fn settings(&self) -> &UptimeSettings {
        &self.settings
    }

    /// Check every enabled model once, concurrently.
    ///
    /// Records come back in the order of `models`; disabled models are skipped.
    /// Checks interrupted by `cancel` produce no record.
    #[tracing::instrument(skip_all, fields(models = models.len()))]
    pub async fn run_uptime_cycle(&self, models: &[MonitoredModel], cancel: &CancellationToken) -> Vec<UptimeCheckRecord> {
        let checks = models
            .iter()
            .filter(|model| model.enabled)
            .map(|model| self.check(model, cancel));

        let records: Vec<UptimeCheckRecord> = futures::future::join_all(checks).await.into_iter().flatten().collect();

        let down = records.iter().filter(|r| r.status == UptimeStatus::Down).count();
        let degraded = records.iter().filter(|r| r.status == UptimeStatus::Degraded).count();
        tracing::info!(checked = records.len(), down, degraded, "Uptime cycle complete");
        records
    }

    async fn check(&self, model: &MonitoredModel, cancel: &CancellationToken) -> Option<UptimeCheckRecord> {
        let request = ProbeRequest::for_model(model, self.prompt.clone(), self.settings.max_tokens, false);
        let result = self.executor.execute(&request, &self.throttle, cancel).await;

        if result.error().is_some_and(|e| e.kind == FailureKind::Cancelled) {
            tracing::debug!(model = %model.id, "Uptime check cancelled");
            return None;
        }

        let (status, error) = self.settings.classify(&result);
        if status != UptimeStatus::Up {
            tracing::warn!(
                model = %model.id,
                model_name = %model.model_name,
                status = %status,
                error = error.as_deref().unwrap_or_default(),
                "Model is not healthy"
            );
        }

        let metrics = result.metrics();
        Some(UptimeCheckRecord {
            id: CheckId::new(),
            model_id: model.id,
            model_name: model.model_name.clone(),
            account_id: model.account_id,
            status,
            latency_ms: metrics.map(|m| m.total_latency_ms),
            ttft_ms: metrics.map(|m| m.ttft_ms),
            tps: metrics.map(|m| m.tps_excluding_ttft),
            output_tokens: metrics.map(|m| m.output_tokens),
            error,
            checked_at: result.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProviderAccount;
    use crate::provider::{MockProviderClient, MockResponse, ProviderCredentials, StreamChunk};

    fn checker(mock: &Arc<MockProviderClient>) -> UptimeChecker<MockProviderClient> {
        UptimeChecker::new(
            mock.clone(),
            UptimeSettings::default(),
            ProbeConfig::default(),
            ThrottleConfig::default(),
            &PromptPackCatalog::builtin(),
        )
        .unwrap()
    }

    fn models(names: &[&str]) -> Vec<MonitoredModel> {
        let account = ProviderAccount::new("primary", ProviderCredentials::new("openai"));
        names.iter().map(|n| MonitoredModel::new(&account, *n)).collect()
    }

    #[test]
    fn unknown_prompt_pack_is_rejected() {
        let settings = UptimeSettings {
            prompt_pack: "nope".into(),
            ..Default::default()
        };
        let result = UptimeChecker::new(
            Arc::new(MockProviderClient::new()),
            settings,
            ProbeConfig::default(),
            ThrottleConfig::default(),
            &PromptPackCatalog::builtin(),
        );
        assert!(matches!(result, Err(Error::UnknownPromptPack { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn classifies_each_model() {
        let mock = Arc::new(MockProviderClient::new());
        mock.add_response("fast", MockResponse::text(&["1", "2"], Duration::from_millis(100), Some((10, 2))));
        mock.add_response("slow", MockResponse::text(&["1"], Duration::from_secs(12), None));
        mock.add_response("broken", MockResponse::permanent("HTTP 401: invalid api key"));
        mock.add_response(
            "empty",
            MockResponse::Stream(vec![(Duration::from_millis(10), Ok(StreamChunk::finish("stop")))]),
        );

        let models = models(&["fast", "slow", "broken", "empty"]);
        let records = checker(&mock).run_uptime_cycle(&models, &CancellationToken::new()).await;

        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                UptimeStatus::Up,
                UptimeStatus::Degraded,
                UptimeStatus::Down,
                UptimeStatus::Degraded
            ]
        );

        assert_eq!(records[0].latency_ms, Some(200.0));
        assert_eq!(records[0].ttft_ms, Some(100.0));
        assert_eq!(records[0].output_tokens, Some(2));
        assert!(records[0].error.is_none());

        assert!(records[1].error.as_deref().unwrap().contains("exceeds threshold"));
        assert_eq!(records[2].latency_ms, None);
        assert!(records[2].error.as_deref().unwrap().contains("invalid api key"));
        assert_eq!(records[3].error.as_deref(), Some("response contained no content"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_check_is_down() {
        let mock = Arc::new(MockProviderClient::new());
        mock.add_response("stuck", MockResponse::hang());

        let records = checker(&mock)
            .run_uptime_cycle(&models(&["stuck"]), &CancellationToken::new())
            .await;
        assert_eq!(records[0].status, UptimeStatus::Down);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_models_are_skipped() {
        let mock = Arc::new(MockProviderClient::new());
        mock.set_fallback("m", MockResponse::text(&["ok"], Duration::from_millis(5), None));
        let mut models = models(&["m", "m"]);
        models[1] = models[1].clone().disabled();

        let records = checker(&mock).run_uptime_cycle(&models, &CancellationToken::new()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model_id, models[0].id);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_prompt_and_budget_are_used() {
        let mock = Arc::new(MockProviderClient::new());
        mock.set_fallback("m", MockResponse::text(&["1"], Duration::from_millis(5), None));

        checker(&mock)
            .run_uptime_cycle(&models(&["m"]), &CancellationToken::new())
            .await;
        let call = &mock.get_calls()[0];
        assert_eq!(call.prompt, "Count from 1 to 20, each number on a new line.");
        assert_eq!(call.max_tokens, 100);
    }
}
