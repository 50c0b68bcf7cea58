//! Streaming completion abstraction over model providers.
//!
//! The probing core never formats provider requests itself. It hands a model name,
//! credentials, a prompt and a token budget to a [`ProviderClient`] and consumes the
//! resulting stream of [`StreamChunk`]s.
//!
//! - [`OpenAiCompatibleClient`]: production client for any `/chat/completions` SSE endpoint
//! - [`MockProviderClient`]: scripted client for tests

mod mock;
mod openai;

pub use mock::{MockCall, MockProviderClient, MockResponse};
pub use openai::{OpenAiCompatibleClient, default_base_url};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Token usage reported by the provider, usually on the final chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// One decoded piece of a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamChunk {
    /// Text delta, `None` for role-only or usage-only chunks
    pub content: Option<String>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn usage(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
            }),
            ..Default::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Credentials and routing for one provider account.
///
/// `api_key` is never logged or serialized.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderCredentials {
    /// Provider kind, e.g. `openai`, `ollama`, `lm_studio`
    pub provider: String,
    /// Endpoint root; providers with a well-known default may omit it
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ProviderCredentials {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: None,
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Failure reported by a provider client.
///
/// The split decides retry behavior: transient errors are retried with backoff,
/// permanent errors fail the probe immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts, 5xx, rate limiting, connection failures
    #[error("Transient provider error: {message}")]
    Transient { message: String, status: Option<u16> },

    /// Authentication failures, unknown models, malformed requests or responses
    #[error("Permanent provider error: {message}")]
    Permanent { message: String, status: Option<u16> },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProviderError::Permanent {
            message: message.into(),
            status: None,
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 408, 429 and every 5xx are transient; all other statuses are permanent.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 512))
        };
        if is_retryable_status(status) {
            ProviderError::Transient {
                message,
                status: Some(status),
            }
        } else {
            ProviderError::Permanent {
                message,
                status: Some(status),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Transient { status, .. } | ProviderError::Permanent { status, .. } => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient { message, .. } | ProviderError::Permanent { message, .. } => message,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Lazily produced chunks of one completion. Ends after the last chunk; an `Err`
/// item ends the completion with that failure.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

/// Issues streaming completions against a provider.
///
/// An `Err` from `stream_completion` means the request never started streaming
/// (connection refused, non-2xx status). Failures after the first byte are
/// delivered as `Err` items on the stream.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn stream_completion(
        &self,
        model_name: &str,
        credentials: &ProviderCredentials,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<ChunkStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        for status in [408, 429, 500, 502, 503, 504, 599] {
            assert!(ProviderError::from_status(status, "").is_transient(), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!ProviderError::from_status(status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn status_message_includes_truncated_body() {
        let err = ProviderError::from_status(401, "invalid api key");
        assert_eq!(err.message(), "HTTP 401: invalid api key");
        assert_eq!(err.status(), Some(401));

        let long = "x".repeat(2000);
        let err = ProviderError::from_status(500, &long);
        assert_eq!(err.message().len(), "HTTP 500: ".len() + 512);
    }

    #[test]
    fn credentials_debug_redacts_api_key() {
        let creds = ProviderCredentials::new("openai").with_api_key("sk-secret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
