//! Probe execution: one streaming completion, timed token by token.
//!
//! Each attempt acquires throttle capacity, opens a stream through the
//! [`ProviderClient`], feeds every chunk into a fresh [`MetricsCollector`] and
//! finalizes it when the stream ends. Transient failures are retried with
//! exponential backoff; permanent failures end the probe at once. Every outcome,
//! including cancellation, is returned as a [`ProbeResult`] rather than an error.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::models::{FailureKind, ProbeFailure, ProbeRequest, ProbeResult};
use crate::errors::{Error, Result};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::provider::{ProviderClient, ProviderError, Usage};
use crate::throttle::ThrottleController;

/// Retry and timeout policy for probe attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Maximum duration of a single attempt, excluding time spent waiting for throttle capacity
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Factor by which the backoff is increased with each retry
    pub backoff_factor: u32,
    /// Maximum delay between attempts
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("probe max_attempts must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("probe timeout must be positive"));
        }
        if self.backoff_factor == 0 {
            return Err(Error::invalid_config("probe backoff_factor must be at least 1"));
        }
        Ok(())
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("throttle unavailable: {0}")]
    Throttle(Error),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Provider(err) => err.is_transient(),
            AttemptError::Timeout(_) => true,
            AttemptError::Throttle(_) => false,
        }
    }

    fn into_failure(self) -> ProbeFailure {
        let message = self.to_string();
        match self {
            AttemptError::Provider(err) => ProbeFailure {
                kind: if err.is_transient() {
                    FailureKind::Transient
                } else {
                    FailureKind::Permanent
                },
                status: err.status(),
                message,
            },
            AttemptError::Timeout(_) => ProbeFailure {
                kind: FailureKind::Timeout,
                status: None,
                message,
            },
            AttemptError::Throttle(_) => ProbeFailure {
                kind: FailureKind::Permanent,
                status: None,
                message,
            },
        }
    }
}

struct Completion {
    metrics: MetricsSnapshot,
    soft_error: Option<String>,
}

/// Executes probes against a provider client.
pub struct ProbeExecutor<P> {
    client: Arc<P>,
    config: ProbeConfig,
}

impl<P> Clone for ProbeExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config,
        }
    }
}

impl<P: ProviderClient> ProbeExecutor<P> {
    pub fn new(client: Arc<P>, config: ProbeConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run one probe to completion.
    ///
    /// Throttle capacity is held only while an attempt is in flight, never during
    /// backoff. If `cancel` fires the in-flight attempt is dropped (releasing its
    /// capacity) and the result carries a [`FailureKind::Cancelled`] error.
    #[tracing::instrument(skip_all, fields(model = %request.model_id, model_name = %request.model_name, warmup = request.is_warmup))]
    pub async fn execute(&self, request: &ProbeRequest, throttle: &ThrottleController, cancel: &CancellationToken) -> ProbeResult {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(request, attempt),
                outcome = self.attempt(request, throttle) => outcome,
            };

            let err = match outcome {
                Ok(done) => {
                    tracing::debug!(
                        attempt,
                        ttft_ms = done.metrics.ttft_ms,
                        total_latency_ms = done.metrics.total_latency_ms,
                        output_tokens = done.metrics.output_tokens,
                        "Probe completed"
                    );
                    return ProbeResult::success(request, done.metrics, done.soft_error, attempt);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.config.max_attempts {
                tracing::warn!(attempt, error = %err, "Probe failed");
                return ProbeResult::failure(request, err.into_failure(), attempt);
            }

            let delay = self.config.backoff_for(attempt);
            tracing::info!(
                attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Probe attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(request, attempt),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, request: &ProbeRequest, throttle: &ThrottleController) -> std::result::Result<Completion, AttemptError> {
        // Model tier is per monitored model: two accounts serving the same name are separate models
        let _permit = throttle
            .acquire(request.provider(), &throttle_key(request))
            .await
            .map_err(AttemptError::Throttle)?;

        match tokio::time::timeout(self.config.timeout, self.stream(request)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(self.config.timeout)),
        }
    }

    async fn stream(&self, request: &ProbeRequest) -> std::result::Result<Completion, AttemptError> {
        let mut collector = MetricsCollector::new();
        collector
            .start()
            .map_err(|e| ProviderError::permanent(e.to_string()))?;

        let mut chunks = self
            .client
            .stream_completion(&request.model_name, &request.credentials, &request.prompt, request.max_tokens)
            .await?;

        let mut usage: Option<Usage> = None;
        let mut finish_reason: Option<String> = None;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            collector.record_token(chunk.content.as_deref());
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
        }

        let has_content = collector.has_first_token();
        let metrics = collector.finalize(
            &request.model_name,
            usage.map(|u| u.prompt_tokens),
            usage.map(|u| u.completion_tokens),
        );

        let soft_error = if !has_content {
            Some("response contained no content".to_string())
        } else {
            match finish_reason.as_deref() {
                Some(reason @ ("content_filter" | "error")) => Some(format!("response finished with '{reason}'")),
                _ => None,
            }
        };

        Ok(Completion { metrics, soft_error })
    }
}

fn throttle_key(request: &ProbeRequest) -> String {
    request.model_id.as_uuid().to_string()
}

fn cancelled(request: &ProbeRequest, attempts: u32) -> ProbeResult {
    tracing::debug!(attempts, "Probe cancelled");
    ProbeResult::failure(
        request,
        ProbeFailure {
            kind: FailureKind::Cancelled,
            message: Error::Cancelled.to_string(),
            status: None,
        },
        attempts,
    )
}
