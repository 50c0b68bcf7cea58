//! # argus: active probing for LLM endpoints
//!
//! `argus` sends real streaming completion requests to remote providers and local
//! inference servers, measures what comes back, and turns the measurements into
//! benchmarks, uptime records and alerts.
//!
//! ## Components
//!
//! The **provider layer** ([`provider`]) speaks the OpenAI-compatible streaming chat
//! completions protocol and normalizes every backend to a stream of [`provider::StreamChunk`]s.
//! A scriptable mock implements the same trait for tests.
//!
//! The **metrics collector** ([`metrics`]) turns chunk arrival times into time to first
//! token, total latency and tokens per second.
//!
//! The **throttle** ([`throttle`]) caps concurrent probes globally, per provider and per
//! model. The **probe executor** ([`probes`]) runs a single probe under those caps with a
//! per-attempt timeout, retries transient failures with exponential backoff and honours
//! cancellation.
//!
//! On top of the executor sit the [`benchmark`] orchestrator, which fans warmup and
//! measured runs out across models and computes percentile statistics, and the
//! [`uptime`] checker, which runs a short health check per model and classifies it as
//! up, degraded or down. The [`alerts`] evaluator applies alert rules to uptime records
//! and opens at most one incident per rule and model until it is acknowledged.
//!
//! Persistence goes through the [`storage::Storage`] trait; [`storage::InMemoryStorage`]
//! is the bundled implementation.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and `ARGUS_` environment overrides.

pub mod alerts;
pub mod benchmark;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod probes;
pub mod prompt_packs;
pub mod provider;
pub mod storage;
pub mod telemetry;
pub mod throttle;
pub mod types;
pub mod uptime;

pub use config::Config;
pub use errors::{Error, Result};
