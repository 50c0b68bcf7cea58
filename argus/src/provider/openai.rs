//! OpenAI-compatible `/chat/completions` streaming client.
//!
//! Works against any provider that speaks the OpenAI SSE dialect: hosted APIs,
//! Ollama's `/v1` shim, LM Studio, vLLM and similar.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{ChunkStream, ProviderClient, ProviderCredentials, ProviderError, StreamChunk, Usage};

/// Well-known endpoint roots for providers that do not need an explicit `base_url`.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "xai" => Some("https://api.x.ai/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "deepseek" => Some("https://api.deepseek.com"),
        "ollama" => Some("http://localhost:11434/v1"),
        "lm_studio" => Some("http://localhost:1234/v1"),
        _ => None,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    message: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Production provider client using reqwest.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// Client with a 10 second connect timeout. Overall request time is bounded by
    /// the probe executor's per-attempt timeout, not here.
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint(credentials: &ProviderCredentials) -> Result<Url, ProviderError> {
        let mut base = match &credentials.base_url {
            Some(url) => url.clone(),
            None => {
                let default = default_base_url(&credentials.provider).ok_or_else(|| {
                    ProviderError::permanent(format!("provider '{}' requires a base_url", credentials.provider))
                })?;
                Url::parse(default).map_err(|e| ProviderError::permanent(format!("invalid base url {default}: {e}")))?
            }
        };

        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("chat/completions")
            .map_err(|e| ProviderError::permanent(format!("invalid endpoint for {base}: {e}")))
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    #[tracing::instrument(skip(self, credentials, prompt), fields(provider = %credentials.provider))]
    async fn stream_completion(
        &self,
        model_name: &str,
        credentials: &ProviderCredentials,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<ChunkStream, ProviderError> {
        let url = Self::endpoint(credentials)?;
        let body = ChatRequest {
            model: model_name,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        tracing::debug!(url = %url, max_tokens, "Opening completion stream");

        let mut request = self.client.post(url.clone()).json(&body);
        if let Some(key) = credentials.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::debug!(url = %url, error = %e, "Completion request failed");
            ProviderError::transient(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        Ok(sse_chunks(response.bytes_stream()))
    }
}

enum SseLine {
    Skip,
    Done,
    Chunk(StreamChunk),
    Error(ProviderError),
}

/// Decode an SSE byte stream into chunks. Lines may be split across network reads.
fn sse_chunks<S, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(next) = bytes.next().await {
            let read = match next {
                Ok(read) => read,
                Err(e) => {
                    yield Err(ProviderError::transient(format!("stream interrupted: {e}")));
                    return;
                }
            };
            buffer.extend_from_slice(&read);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    SseLine::Skip => {}
                    SseLine::Done => return,
                    SseLine::Chunk(chunk) => yield Ok(chunk),
                    SseLine::Error(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        // Final line without a trailing newline
        match parse_line(&buffer) {
            SseLine::Chunk(chunk) => yield Ok(chunk),
            SseLine::Error(e) => yield Err(e),
            SseLine::Skip | SseLine::Done => {}
        }
    })
}

fn parse_line(line: &[u8]) -> SseLine {
    let Ok(text) = std::str::from_utf8(line) else {
        return SseLine::Error(ProviderError::permanent("stream contained invalid UTF-8"));
    };
    let text = text.trim();
    if text.is_empty() || text.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = text.strip_prefix("data:") else {
        // event:, id:, retry: fields carry nothing we use
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => chunk_from_payload(chunk),
        Err(e) => SseLine::Error(ProviderError::permanent(format!("malformed stream payload: {e}"))),
    }
}

/// Classify an in-stream `error` object by its HTTP-style `code` or `status`, when it has one.
fn stream_error(error: &serde_json::Value) -> ProviderError {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    let status = ["code", "status"].iter().find_map(|key| match error.get(*key)? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    });

    match status.and_then(|s| u16::try_from(s).ok()).filter(|s| (100..600).contains(s)) {
        Some(status) => ProviderError::from_status(status, &format!("provider reported: {message}")),
        None => ProviderError::transient(format!("provider reported: {message}")),
    }
}

fn chunk_from_payload(payload: ChatChunk) -> SseLine {
    if let Some(error) = payload.error {
        return SseLine::Error(stream_error(&error));
    }

    let choice = payload.choices.into_iter().next();
    let (content, finish_reason) = match choice {
        Some(choice) => (
            choice.delta.or(choice.message).and_then(|d| d.content),
            choice.finish_reason,
        ),
        None => (None, None),
    };

    SseLine::Chunk(StreamChunk {
        content,
        usage: payload.usage,
        finish_reason,
    })
}
