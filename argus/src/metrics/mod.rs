//! Token-level timing for a single completion request.
//!
//! A [`MetricsCollector`] is fed every chunk of a streaming response and turns the
//! observed timestamps into a [`MetricsSnapshot`]:
//!
//! - **TTFT**: time from `start()` to the first non-empty content chunk. Providers that
//!   never stream content (or return everything in one body) get `ttft == total latency`.
//! - **TPS**: output tokens divided by total elapsed seconds.
//! - **TPS excluding TTFT**: output tokens divided by the generation window
//!   (`total - ttft`).
//!
//! All divisions are guarded; a zero-length window or zero tokens yields `0.0`.

pub mod pricing;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::errors::{Error, Result};

/// Finalized timing and token figures for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Time to first content token in milliseconds
    pub ttft_ms: f64,
    /// Total request latency in milliseconds
    pub total_latency_ms: f64,
    /// Output tokens per second over the whole request
    pub tps: f64,
    /// Output tokens per second over the generation window only
    pub tps_excluding_ttft: f64,
    /// Prompt tokens reported by the provider
    pub input_tokens: u64,
    /// Completion tokens reported by the provider, or counted content chunks
    pub output_tokens: u64,
    /// Estimated USD cost, `None` for models without a price entry
    pub estimated_cost: Option<f64>,
}

impl MetricsSnapshot {
    /// All-zero snapshot, returned when finalizing a collector that was never started.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum CollectorState {
    #[default]
    Idle,
    Started {
        start: Instant,
        first_token: Option<Instant>,
    },
    Finalized,
}

/// Per-request timing state machine: `idle -> started -> (token)* -> finalized`.
///
/// ```
/// use argus::metrics::MetricsCollector;
///
/// let mut collector = MetricsCollector::new();
/// collector.start().unwrap();
/// collector.record_token(Some("Hello"));
/// let snapshot = collector.finalize("gpt-4o", Some(12), None);
/// assert!(snapshot.ttft_ms <= snapshot.total_latency_ms);
/// ```
#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: CollectorState,
    content_chunks: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the monotonic start time.
    ///
    /// Fails with [`Error::CollectorAlreadyStarted`] if the collector is already
    /// running. A finalized collector may be started again.
    pub fn start(&mut self) -> Result<()> {
        if matches!(self.state, CollectorState::Started { .. }) {
            return Err(Error::CollectorAlreadyStarted);
        }
        self.state = CollectorState::Started {
            start: Instant::now(),
            first_token: None,
        };
        self.content_chunks = 0;
        Ok(())
    }

    /// Record one streamed chunk's text. Empty or absent content is ignored.
    ///
    /// The first non-empty chunk latches the first-token timestamp; later calls
    /// leave it untouched.
    pub fn record_token(&mut self, content: Option<&str>) {
        let Some(content) = content else { return };
        if content.is_empty() {
            return;
        }

        if let CollectorState::Started { first_token, .. } = &mut self.state {
            first_token.get_or_insert_with(Instant::now);
            self.content_chunks += 1;
        }
    }

    /// Whether a non-empty content chunk has been recorded since `start()`.
    pub fn has_first_token(&self) -> bool {
        matches!(
            self.state,
            CollectorState::Started {
                first_token: Some(_),
                ..
            }
        )
    }

    /// Number of non-empty content chunks recorded since `start()`.
    pub fn content_chunks(&self) -> u64 {
        self.content_chunks
    }

    /// Stop timing and compute the snapshot.
    ///
    /// `output_tokens` falls back to the number of content chunks when the provider
    /// did not report usage. Calling this without a prior `start()` returns
    /// [`MetricsSnapshot::empty`].
    pub fn finalize(&mut self, model_name: &str, input_tokens: Option<u64>, output_tokens: Option<u64>) -> MetricsSnapshot {
        let end = Instant::now();
        let state = std::mem::replace(&mut self.state, CollectorState::Finalized);

        let CollectorState::Started { start, first_token } = state else {
            return MetricsSnapshot::empty();
        };

        let input_tokens = input_tokens.unwrap_or(0);
        let output_tokens = output_tokens.unwrap_or(self.content_chunks);

        let total_ms = duration_ms(end.saturating_duration_since(start));
        let ttft_ms = match first_token {
            Some(first) => duration_ms(first.saturating_duration_since(start)),
            None => total_ms,
        };

        let total_s = total_ms / 1000.0;
        let generation_s = ((total_ms - ttft_ms) / 1000.0).max(0.0);

        MetricsSnapshot {
            ttft_ms,
            total_latency_ms: total_ms,
            tps: rate(output_tokens, total_s),
            tps_excluding_ttft: rate(output_tokens, generation_s),
            input_tokens,
            output_tokens,
            estimated_cost: pricing::estimate_cost(model_name, input_tokens, output_tokens),
        }
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

fn rate(tokens: u64, seconds: f64) -> f64 {
    if tokens == 0 || seconds <= 0.0 {
        0.0
    } else {
        tokens as f64 / seconds
    }
}
