use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stats::{AggregateStatistics, MetricStatistics};
use crate::errors::{Error, Result};
use crate::probes::{MonitoredModel, ProbeResult};
use crate::throttle::ThrottleConfig;
use crate::types::{ModelId, RunId};

/// Benchmark defaults, overridable per run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchmarkSettings {
    pub prompt_pack: String,
    /// Measured runs per model
    pub runs: u32,
    /// Discarded runs per model, executed before the measured ones
    pub warmup_runs: u32,
    pub max_tokens: u32,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            prompt_pack: "shakespeare".to_string(),
            runs: 3,
            warmup_runs: 1,
            max_tokens: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    User,
    Scheduled,
}

/// Everything one benchmark run needs.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub name: Option<String>,
    pub models: Vec<MonitoredModel>,
    pub prompt_pack: String,
    pub runs: u32,
    pub warmup_runs: u32,
    pub max_tokens: u32,
    pub throttle: ThrottleConfig,
    pub triggered_by: TriggeredBy,
}

impl BenchmarkConfig {
    pub fn new(models: Vec<MonitoredModel>, settings: &BenchmarkSettings, throttle: ThrottleConfig) -> Self {
        Self {
            name: None,
            models,
            prompt_pack: settings.prompt_pack.clone(),
            runs: settings.runs,
            warmup_runs: settings.warmup_runs,
            max_tokens: settings.max_tokens,
            throttle,
            triggered_by: TriggeredBy::User,
        }
    }

    /// Checks that need no catalog or network access.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::invalid_config("benchmark requires at least one model"));
        }
        if self.runs == 0 {
            return Err(Error::invalid_config("benchmark runs must be at least 1"));
        }
        if self.runs.checked_add(self.warmup_runs).is_none() {
            return Err(Error::invalid_config("benchmark runs plus warmup_runs overflows"));
        }
        if self.max_tokens == 0 {
            return Err(Error::invalid_config("benchmark max_tokens must be positive"));
        }
        self.throttle.validate()
    }

    /// Total probes issued: warmups plus measured runs, for every model.
    pub fn total_probes(&self) -> usize {
        self.models.len() * (self.runs as usize + self.warmup_runs as usize)
    }

    /// Measured probes: the ones that appear in results.
    pub fn measured_probes(&self) -> usize {
        self.models.len() * self.runs as usize
    }
}

/// Lifecycle of a benchmark run.
///
/// `pending -> running -> {completed, failed, cancelled}`, or `pending -> failed`
/// when a precondition fails. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Pending, RunState::Failed)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Failed)
                | (RunState::Running, RunState::Cancelled)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        })
    }
}

/// A benchmark run as persisted. Only the orchestrator changes its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkRun {
    pub id: RunId,
    pub name: String,
    pub model_ids: Vec<ModelId>,
    pub prompt_pack: String,
    pub runs: u32,
    pub warmup_runs: u32,
    pub max_tokens: u32,
    pub triggered_by: TriggeredBy,
    pub state: RunState,
    /// Why the run failed, when it did
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BenchmarkRun {
    pub(crate) fn pending(config: &BenchmarkConfig) -> Self {
        let id = RunId::new();
        let now = Utc::now();
        Self {
            id,
            name: config
                .name
                .clone()
                .unwrap_or_else(|| format!("Benchmark {}", now.format("%Y-%m-%d %H:%M:%S"))),
            model_ids: config.models.iter().map(|m| m.id).collect(),
            prompt_pack: config.prompt_pack.clone(),
            runs: config.runs,
            warmup_runs: config.warmup_runs,
            max_tokens: config.max_tokens,
            triggered_by: config.triggered_by,
            state: RunState::Pending,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Other(anyhow::anyhow!(
                "invalid benchmark run transition {} -> {}",
                self.state,
                next
            )));
        }
        let now = Utc::now();
        match next {
            RunState::Running => self.started_at = Some(now),
            _ if next.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(RunState::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }
}

/// Progress notifications for incremental consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BenchmarkEvent {
    Started { run_id: RunId, total: usize },
    Result { result: ProbeResult, completed: usize, total: usize },
    Finished { run_id: RunId, state: RunState },
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub run: BenchmarkRun,
    /// Measured results, in completion order
    pub results: Vec<ProbeResult>,
    pub warmups_discarded: usize,
    pub statistics: Vec<AggregateStatistics>,
    pub overall: MetricStatistics,
}
