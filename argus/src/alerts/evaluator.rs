//! Turns uptime check batches into deduplicated incidents.
//!
//! Each enabled rule is evaluated against the latest check per model in the batch.
//! A triggered rule opens an incident through [`Storage::open_incident`], which
//! suppresses it if an unacknowledged alert already exists for the same
//! `(rule, model)` pair. Incidents stay open until someone acknowledges them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::models::{Alert, AlertRule, AlertRuleType};
use crate::errors::Result;
use crate::storage::Storage;
use crate::types::{AlertId, ModelId, RuleId};
use crate::uptime::{UptimeCheckRecord, UptimeStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SkipReason {
    /// The rule type has no evaluation logic
    Unsupported,
    /// The rule type needs a target the rule does not have
    MissingTarget,
    /// Storage failed while evaluating the rule
    Failed(String),
}

/// A rule that was enabled but produced no verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRule {
    pub rule_id: RuleId,
    pub rule_type: AlertRuleType,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertEvaluation {
    /// Alerts opened by this evaluation
    pub created: Vec<Alert>,
    pub skipped: Vec<SkippedRule>,
}

/// An open incident whose model is healthy again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub alert_id: AlertId,
    pub rule_id: RuleId,
    pub model_id: ModelId,
    pub recovered_at: DateTime<Utc>,
}

pub struct AlertEvaluator<S> {
    storage: Arc<S>,
}

impl<S: Storage> AlertEvaluator<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Evaluate every enabled rule against one cycle's checks.
    ///
    /// Fails only if the rules cannot be loaded. A rule that cannot be evaluated is
    /// reported in [`AlertEvaluation::skipped`] and does not affect the others.
    #[tracing::instrument(skip_all, fields(checks = checks.len()))]
    pub async fn evaluate(&self, checks: &[UptimeCheckRecord]) -> Result<AlertEvaluation> {
        let rules = self.storage.list_alert_rules().await?;
        let latest = latest_per_model(checks);
        let mut evaluation = AlertEvaluation::default();

        for rule in rules.iter().filter(|r| r.enabled) {
            let candidates = match candidates_for(rule, &latest) {
                Ok(candidates) => candidates,
                Err(reason) => {
                    if reason == SkipReason::Unsupported {
                        tracing::warn!(rule = %rule.id, rule_type = %rule.rule_type, "Unsupported alert rule type, skipping");
                    } else {
                        tracing::warn!(rule = %rule.id, rule_type = %rule.rule_type, "Alert rule has no target, skipping");
                    }
                    evaluation.skipped.push(skipped(rule, reason));
                    continue;
                }
            };

            for alert in candidates {
                match self.storage.open_incident(alert).await {
                    Ok(Some(alert)) => {
                        tracing::info!(
                            rule = %rule.id,
                            model = ?alert.model_id.map(|m| m.to_short_string()),
                            message = %alert.message,
                            "Alert opened"
                        );
                        evaluation.created.push(alert);
                    }
                    Ok(None) => {
                        tracing::debug!(rule = %rule.id, "Incident already open, alert suppressed");
                    }
                    Err(e) => {
                        tracing::error!(rule = %rule.id, error = %e, "Failed to open incident");
                        evaluation.skipped.push(skipped(rule, SkipReason::Failed(e.to_string())));
                        break;
                    }
                }
            }
        }

        Ok(evaluation)
    }

    /// Evaluate and return only the alerts that were opened.
    pub async fn evaluate_alerts(&self, checks: &[UptimeCheckRecord]) -> Result<Vec<Alert>> {
        Ok(self.evaluate(checks).await?.created)
    }

    /// Open incidents whose model's latest check in `checks` is `up`.
    ///
    /// Informational only: incidents are closed by acknowledgement, never here.
    pub async fn detect_recoveries(&self, checks: &[UptimeCheckRecord]) -> Result<Vec<Recovery>> {
        let latest = latest_per_model(checks);
        let open = self.storage.list_open_alerts().await?;

        Ok(open
            .into_iter()
            .filter_map(|alert| {
                let model_id = alert.model_id?;
                let check = latest.get(&model_id)?;
                (check.status == UptimeStatus::Up).then(|| Recovery {
                    alert_id: alert.id,
                    rule_id: alert.rule_id,
                    model_id,
                    recovered_at: check.checked_at,
                })
            })
            .collect())
    }
}

fn skipped(rule: &AlertRule, reason: SkipReason) -> SkippedRule {
    SkippedRule {
        rule_id: rule.id,
        rule_type: rule.rule_type.clone(),
        reason,
    }
}

/// Latest check per model. Ties on timestamp go to the later record in the batch.
fn latest_per_model(checks: &[UptimeCheckRecord]) -> HashMap<ModelId, &UptimeCheckRecord> {
    let mut latest: HashMap<ModelId, &UptimeCheckRecord> = HashMap::new();
    for check in checks {
        latest
            .entry(check.model_id)
            .and_modify(|current| {
                if check.checked_at >= current.checked_at {
                    *current = check;
                }
            })
            .or_insert(check);
    }
    latest
}

fn down_reason(check: &UptimeCheckRecord) -> &str {
    check.error.as_deref().unwrap_or("Health check failed")
}

/// Alerts the rule would open for this batch, before deduplication.
fn candidates_for(
    rule: &AlertRule,
    latest: &HashMap<ModelId, &UptimeCheckRecord>,
) -> std::result::Result<Vec<Alert>, SkipReason> {
    match &rule.rule_type {
        AlertRuleType::AnyModelDown => {
            let mut down: Vec<&UptimeCheckRecord> = latest
                .values()
                .copied()
                .filter(|c| c.status == UptimeStatus::Down)
                .collect();
            down.sort_by(|a, b| a.checked_at.cmp(&b.checked_at).then(a.model_id.cmp(&b.model_id)));

            Ok(down
                .into_iter()
                .map(|c| Alert::open(rule.id, Some(c.model_id), format!("Model is down: {}", down_reason(c))))
                .collect())
        }
        AlertRuleType::SpecificModelDown => {
            let target = rule.target_model_id.ok_or(SkipReason::MissingTarget)?;
            Ok(latest
                .get(&target)
                .filter(|c| c.status == UptimeStatus::Down)
                .map(|c| {
                    Alert::open(
                        rule.id,
                        Some(target),
                        format!("Monitored model is down: {}", down_reason(c)),
                    )
                })
                .into_iter()
                .collect())
        }
        AlertRuleType::ModelUnavailableEverywhere => {
            let target = rule
                .target_model_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .ok_or(SkipReason::MissingTarget)?;
            let needle = target.to_lowercase();

            let relevant: Vec<&UptimeCheckRecord> = latest
                .values()
                .copied()
                .filter(|c| c.model_name.to_lowercase().contains(&needle))
                .collect();

            if relevant.is_empty() || relevant.iter().any(|c| c.status != UptimeStatus::Down) {
                return Ok(Vec::new());
            }

            Ok(vec![Alert::open(
                rule.id,
                None,
                format!(
                    "Model '{}' is unavailable across all {} provider(s)",
                    target,
                    relevant.len()
                ),
            )])
        }
        AlertRuleType::PerformanceDegradation | AlertRuleType::Unrecognized(_) => Err(SkipReason::Unsupported),
    }
}
