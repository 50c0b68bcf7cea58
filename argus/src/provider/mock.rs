//! Scripted provider client for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ChunkStream, ProviderClient, ProviderCredentials, ProviderError, StreamChunk};

/// One scripted reply to a `stream_completion` call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Fail before streaming starts
    Fail(ProviderError),
    /// Stream the items in order, sleeping before each one. An `Err` item ends the stream.
    Stream(Vec<(Duration, Result<StreamChunk, ProviderError>)>),
}

impl MockResponse {
    /// Stream `chunks` with `delay` before each, then a usage chunk if given.
    pub fn text(chunks: &[&str], delay: Duration, usage: Option<(u64, u64)>) -> Self {
        let mut steps: Vec<_> = chunks
            .iter()
            .map(|c| (delay, Ok(StreamChunk::content(*c))))
            .collect();
        if let Some((prompt, completion)) = usage {
            steps.push((Duration::ZERO, Ok(StreamChunk::usage(prompt, completion))));
        }
        MockResponse::Stream(steps)
    }

    /// A stream that does not produce anything for a very long time.
    pub fn hang() -> Self {
        MockResponse::Stream(vec![(
            Duration::from_secs(365 * 24 * 60 * 60),
            Ok(StreamChunk::content("late")),
        )])
    }

    pub fn transient(message: &str) -> Self {
        MockResponse::Fail(ProviderError::transient(message))
    }

    pub fn permanent(message: &str) -> Self {
        MockResponse::Fail(ProviderError::permanent(message))
    }
}

/// Record of a call made to the mock provider client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub model_name: String,
    pub provider: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub at: tokio::time::Instant,
}

/// Mock provider client.
///
/// Responses are scripted per model name and consumed in FIFO order. When a model's
/// queue is empty its fallback response (if any) is replayed. Tracks calls, streams
/// currently open and the peak number of concurrently open streams.
///
/// # Example
/// ```
/// use argus::provider::{MockProviderClient, MockResponse};
/// use std::time::Duration;
///
/// let mock = MockProviderClient::new();
/// mock.add_response("gpt-4o", MockResponse::transient("HTTP 503"));
/// mock.set_fallback("gpt-4o", MockResponse::text(&["ok"], Duration::from_millis(5), Some((3, 1))));
/// ```
#[derive(Clone, Default)]
pub struct MockProviderClient {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    fallbacks: Arc<Mutex<HashMap<String, MockResponse>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot response for `model_name`.
    pub fn add_response(&self, model_name: &str, response: MockResponse) {
        self.responses
            .lock()
            .entry(model_name.to_string())
            .or_default()
            .push_back(response);
    }

    /// Response replayed for `model_name` once its queue is drained.
    pub fn set_fallback(&self, model_name: &str, response: MockResponse) {
        self.fallbacks.lock().insert(model_name.to_string(), response);
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, model_name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.model_name == model_name).count()
    }

    /// Streams currently open.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of streams that were open at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_response(&self, model_name: &str) -> MockResponse {
        if let Some(response) = self.responses.lock().get_mut(model_name).and_then(|q| q.pop_front()) {
            return response;
        }
        self.fallbacks
            .lock()
            .get(model_name)
            .cloned()
            .unwrap_or_else(|| MockResponse::permanent(&format!("no mock response configured for {model_name}")))
    }
}

/// Counts one open stream for as long as it lives.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self {
            in_flight: in_flight.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn stream_completion(
        &self,
        model_name: &str,
        credentials: &ProviderCredentials,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<ChunkStream, ProviderError> {
        self.calls.lock().push(MockCall {
            model_name: model_name.to_string(),
            provider: credentials.provider.clone(),
            prompt: prompt.to_string(),
            max_tokens,
            at: tokio::time::Instant::now(),
        });

        let steps = match self.next_response(model_name) {
            MockResponse::Fail(err) => return Err(err),
            MockResponse::Stream(steps) => steps,
        };

        let guard = InFlightGuard::enter(&self.in_flight, &self.peak);
        Ok(Box::pin(async_stream::stream! {
            let _guard = guard;
            for (delay, item) in steps {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let last = item.is_err();
                yield item;
                if last {
                    return;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn replays_queue_then_fallback() {
        let mock = MockProviderClient::new();
        let creds = ProviderCredentials::new("openai");
        mock.add_response("m", MockResponse::transient("HTTP 503"));
        mock.set_fallback("m", MockResponse::text(&["a", "b"], Duration::from_millis(10), None));

        let first = mock.stream_completion("m", &creds, "p", 5).await;
        assert!(matches!(first, Err(ProviderError::Transient { .. })));

        for _ in 0..2 {
            let stream = mock.stream_completion("m", &creds, "p", 5).await.unwrap();
            let chunks: Vec<_> = stream.collect().await;
            assert_eq!(chunks.len(), 2);
        }
        assert_eq!(mock.calls_for("m"), 3);
    }

    #[tokio::test]
    async fn unscripted_model_fails_permanently() {
        let mock = MockProviderClient::new();
        let result = mock
            .stream_completion("unknown", &ProviderCredentials::new("openai"), "p", 5)
            .await;
        assert!(matches!(result, Err(ProviderError::Permanent { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_open_streams() {
        let mock = MockProviderClient::new();
        let creds = ProviderCredentials::new("openai");
        mock.set_fallback("m", MockResponse::text(&["x"], Duration::from_millis(10), None));

        let a = mock.stream_completion("m", &creds, "p", 5).await.unwrap();
        let b = mock.stream_completion("m", &creds, "p", 5).await.unwrap();
        assert_eq!(mock.in_flight(), 2);
        drop(a);
        let _: Vec<_> = b.collect().await;
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(mock.peak_in_flight(), 2);
    }
}
