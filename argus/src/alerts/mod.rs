//! Alert rules, incidents and their evaluation.

pub mod evaluator;
pub mod models;

pub use evaluator::{AlertEvaluation, AlertEvaluator, Recovery, SkipReason, SkippedRule};
pub use models::{Alert, AlertRule, AlertRuleType};
