use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AlertId, ModelId, RuleId};

/// What condition an alert rule watches for.
///
/// Unknown names deserialize into [`AlertRuleType::Unrecognized`] so that a rule
/// written for a newer version is reported as unsupported instead of failing the load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertRuleType {
    /// Any enabled model's latest check is down; one incident per model
    AnyModelDown,
    /// The rule's target model's latest check is down
    SpecificModelDown,
    /// Every checked model whose provider name matches the target name is down
    ModelUnavailableEverywhere,
    /// Recognized but not evaluated
    PerformanceDegradation,
    Unrecognized(String),
}

impl AlertRuleType {
    pub fn as_str(&self) -> &str {
        match self {
            AlertRuleType::AnyModelDown => "any_model_down",
            AlertRuleType::SpecificModelDown => "specific_model_down",
            AlertRuleType::ModelUnavailableEverywhere => "model_unavailable_everywhere",
            AlertRuleType::PerformanceDegradation => "performance_degradation",
            AlertRuleType::Unrecognized(name) => name,
        }
    }
}

impl From<String> for AlertRuleType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "any_model_down" => AlertRuleType::AnyModelDown,
            "specific_model_down" => AlertRuleType::SpecificModelDown,
            "model_unavailable_everywhere" => AlertRuleType::ModelUnavailableEverywhere,
            "performance_degradation" => AlertRuleType::PerformanceDegradation,
            _ => AlertRuleType::Unrecognized(name),
        }
    }
}

impl From<AlertRuleType> for String {
    fn from(rule_type: AlertRuleType) -> Self {
        rule_type.as_str().to_string()
    }
}

impl std::fmt::Display for AlertRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRule {
    pub id: RuleId,
    pub name: String,
    pub rule_type: AlertRuleType,
    /// Used by `specific_model_down`
    pub target_model_id: Option<ModelId>,
    /// Used by `model_unavailable_everywhere`; matched case-insensitively as a substring
    pub target_model_name: Option<String>,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, rule_type: AlertRuleType) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            rule_type,
            target_model_id: None,
            target_model_name: None,
            enabled: true,
        }
    }

    pub fn any_model_down(name: impl Into<String>) -> Self {
        Self::new(name, AlertRuleType::AnyModelDown)
    }

    pub fn specific_model_down(name: impl Into<String>, model_id: ModelId) -> Self {
        Self {
            target_model_id: Some(model_id),
            ..Self::new(name, AlertRuleType::SpecificModelDown)
        }
    }

    pub fn model_unavailable_everywhere(name: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            target_model_name: Some(model_name.into()),
            ..Self::new(name, AlertRuleType::ModelUnavailableEverywhere)
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One incident notification. Open while `acknowledged` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_id: RuleId,
    /// `None` for rules that are not about a single model
    pub model_id: Option<ModelId>,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn open(rule_id: RuleId, model_id: Option<ModelId>, message: impl Into<String>) -> Self {
        Self {
            id: AlertId::new(),
            rule_id,
            model_id,
            message: message.into(),
            acknowledged: false,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this alert is the open incident for `(rule_id, model_id)`.
    pub fn is_open_for(&self, rule_id: RuleId, model_id: Option<ModelId>) -> bool {
        !self.acknowledged && self.rule_id == rule_id && self.model_id == model_id
    }
}
