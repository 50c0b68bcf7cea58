use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::MetricsSnapshot;
use crate::provider::ProviderCredentials;
use crate::types::{ModelId, ProviderAccountId};

/// A set of credentials for one provider, shared by every model it offers.
#[derive(Debug, Clone)]
pub struct ProviderAccount {
    pub id: ProviderAccountId,
    pub name: String,
    pub credentials: Arc<ProviderCredentials>,
}

impl ProviderAccount {
    pub fn new(name: impl Into<String>, credentials: ProviderCredentials) -> Self {
        Self {
            id: ProviderAccountId::new(),
            name: name.into(),
            credentials: Arc::new(credentials),
        }
    }

    /// Provider kind, used as the provider throttle tier key.
    pub fn provider(&self) -> &str {
        &self.credentials.provider
    }
}

/// One model offered by one provider account.
#[derive(Debug, Clone)]
pub struct MonitoredModel {
    pub id: ModelId,
    /// Human-readable label, defaults to `model_name`
    pub display_name: String,
    /// Model identifier sent to the provider, e.g. `gpt-4o-mini`
    pub model_name: String,
    pub account_id: ProviderAccountId,
    pub credentials: Arc<ProviderCredentials>,
    /// Disabled models are skipped by uptime cycles and ignored by alert rules
    pub enabled: bool,
}

impl MonitoredModel {
    pub fn new(account: &ProviderAccount, model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        Self {
            id: ModelId::new(),
            display_name: model_name.clone(),
            model_name,
            account_id: account.id,
            credentials: account.credentials.clone(),
            enabled: true,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn provider(&self) -> &str {
        &self.credentials.provider
    }
}

/// Everything needed for one probe. Created per probe, never stored.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub model_id: ModelId,
    pub model_name: String,
    pub account_id: ProviderAccountId,
    pub credentials: Arc<ProviderCredentials>,
    pub prompt: Arc<str>,
    pub max_tokens: u32,
    pub is_warmup: bool,
}

impl ProbeRequest {
    pub fn for_model(model: &MonitoredModel, prompt: Arc<str>, max_tokens: u32, is_warmup: bool) -> Self {
        Self {
            model_id: model.id,
            model_name: model.model_name.clone(),
            account_id: model.account_id,
            credentials: model.credentials.clone(),
            prompt,
            max_tokens,
            is_warmup,
        }
    }

    pub fn provider(&self) -> &str {
        &self.credentials.provider
    }
}

/// Why a probe produced no metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable provider error that persisted through every attempt
    Transient,
    /// Provider rejected the request; not retried
    Permanent,
    /// Every attempt exceeded the per-attempt timeout
    Timeout,
    /// The caller's cancellation token fired
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status of the last failed attempt, if there was one
    pub status: Option<u16>,
}

/// Metrics on success or a failure, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success(MetricsSnapshot),
    Failure(ProbeFailure),
}

/// Outcome of one probe, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub model_id: ModelId,
    pub model_name: String,
    pub account_id: ProviderAccountId,
    pub is_warmup: bool,
    pub outcome: ProbeOutcome,
    /// Provider answered but the answer looks wrong (empty, filtered, errored finish)
    pub soft_error: Option<String>,
    /// Attempts made, including the final one
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub(crate) fn success(request: &ProbeRequest, metrics: MetricsSnapshot, soft_error: Option<String>, attempts: u32) -> Self {
        Self::from_outcome(request, ProbeOutcome::Success(metrics), soft_error, attempts)
    }

    pub(crate) fn failure(request: &ProbeRequest, failure: ProbeFailure, attempts: u32) -> Self {
        Self::from_outcome(request, ProbeOutcome::Failure(failure), None, attempts)
    }

    fn from_outcome(request: &ProbeRequest, outcome: ProbeOutcome, soft_error: Option<String>, attempts: u32) -> Self {
        Self {
            model_id: request.model_id,
            model_name: request.model_name.clone(),
            account_id: request.account_id,
            is_warmup: request.is_warmup,
            outcome,
            soft_error,
            attempts,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Success(_))
    }

    pub fn metrics(&self) -> Option<&MetricsSnapshot> {
        match &self.outcome {
            ProbeOutcome::Success(metrics) => Some(metrics),
            ProbeOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ProbeFailure> {
        match &self.outcome {
            ProbeOutcome::Success(_) => None,
            ProbeOutcome::Failure(failure) => Some(failure),
        }
    }
}
