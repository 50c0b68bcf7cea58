//! Configuration management.
//!
//! Configuration is loaded from a YAML file (default `argus.yaml`) and can be
//! overridden by environment variables prefixed with `ARGUS_`. Nested keys are
//! separated with a double underscore.
//!
//! ## Example
//!
//! ```yaml
//! log_format: json
//! throttle:
//!   global_limit: 20
//!   provider_limit: 5
//!   model_limit: 2
//! providers:
//!   - name: openai-prod
//!     provider: openai
//!     api_key_env: OPENAI_API_KEY
//!   - name: local
//!     provider: ollama
//! models:
//!   - name: gpt-4o-mini
//!     provider: openai-prod
//!   - name: llama3
//!     provider: local
//! alert_rules:
//!   - name: Anything down
//!     rule_type: any_model_down
//! ```
//!
//! ## Environment overrides
//!
//! ```bash
//! ARGUS_CONFIG=/etc/argus.yaml
//! ARGUS_THROTTLE__GLOBAL_LIMIT=10
//! ARGUS_UPTIME__TIMEOUT=30s
//! ARGUS_LOG_FORMAT=json
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use url::Url;

use crate::alerts::{AlertRule, AlertRuleType};
use crate::benchmark::BenchmarkSettings;
use crate::errors::{Error, Result};
use crate::probes::{MonitoredModel, ProbeConfig, ProviderAccount};
use crate::prompt_packs::{PromptPack, PromptPackCatalog};
use crate::provider::{ProviderCredentials, default_base_url};
use crate::throttle::ThrottleConfig;
use crate::uptime::UptimeSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "argus", version, about = "Active availability and performance probing for LLM endpoints")]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ARGUS_CONFIG", default_value = "argus.yaml")]
    pub config: String,

    /// Validate configuration and exit.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Benchmark models and print per-model statistics
    Benchmark {
        /// Models to benchmark, by label. Defaults to every enabled model.
        #[arg(short = 'm', long = "model")]
        models: Vec<String>,
        #[arg(long)]
        prompt_pack: Option<String>,
        #[arg(long)]
        runs: Option<u32>,
        #[arg(long)]
        warmup_runs: Option<u32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Run one uptime cycle and evaluate alert rules
    Check,
    /// List available prompt packs
    PromptPacks,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// One provider account.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Unique name that models refer to
    pub name: String,
    /// Provider kind, e.g. `openai`, `ollama`, `lm_studio`, `vllm`
    pub provider: String,
    /// Required for provider kinds without a well-known endpoint
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable to read the API key from
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

impl ProviderConfig {
    fn credentials(&self) -> Result<ProviderCredentials> {
        let mut credentials = ProviderCredentials::new(&self.provider);
        if let Some(base_url) = &self.base_url {
            credentials = credentials.with_base_url(base_url.clone());
        }
        let api_key = match (&self.api_key, &self.api_key_env) {
            (Some(key), _) => Some(key.clone()),
            (None, Some(var)) => Some(std::env::var(var).map_err(|_| {
                Error::invalid_config(format!(
                    "provider '{}' reads its API key from ${var}, which is not set",
                    self.name
                ))
            })?),
            (None, None) => None,
        };
        if let Some(key) = api_key {
            credentials = credentials.with_api_key(key);
        }
        Ok(credentials)
    }
}

fn enabled_by_default() -> bool {
    true
}

/// One model offered by a configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier sent to the provider
    pub name: String,
    /// Name of the provider entry offering this model
    pub provider: String,
    /// Label used in output and by rules; defaults to `name`
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl ModelConfig {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AlertRuleConfig {
    pub name: String,
    pub rule_type: AlertRuleType,
    /// Label of the watched model, for `specific_model_down`
    #[serde(default)]
    pub target_model: Option<String>,
    /// Name fragment matched against provider model names, for `model_unavailable_everywhere`
    #[serde(default)]
    pub target_model_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Main application configuration.
///
/// Every section has defaults, so an empty file is a valid (if idle) configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_format: LogFormat,
    pub throttle: ThrottleConfig,
    pub probe: ProbeConfig,
    pub benchmark: BenchmarkSettings,
    pub uptime: UptimeSettings,
    pub providers: Vec<ProviderConfig>,
    pub models: Vec<ModelConfig>,
    pub alert_rules: Vec<AlertRuleConfig>,
    /// Prompt packs added to (or replacing) the built-in ones
    pub prompt_packs: Vec<PromptPack>,
}

/// Accounts, models and rules materialized from configuration.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub accounts: Vec<ProviderAccount>,
    pub models: Vec<MonitoredModel>,
    pub rules: Vec<AlertRule>,
}

impl Inventory {
    /// Look up a model by its label.
    pub fn model(&self, label: &str) -> Option<&MonitoredModel> {
        self.models.iter().find(|m| m.display_name == label)
    }
}

impl Config {
    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("ARGUS_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn load(args: &Args) -> std::result::Result<Self, figment::Error> {
        Self::figment(args).extract()
    }

    /// Built-in prompt packs plus the configured ones.
    pub fn prompt_catalog(&self) -> PromptPackCatalog {
        self.prompt_packs
            .iter()
            .cloned()
            .fold(PromptPackCatalog::builtin(), PromptPackCatalog::with_pack)
    }

    pub fn validate(&self) -> Result<()> {
        self.throttle.validate()?;
        self.probe.validate()?;
        self.uptime.validate()?;

        if self.benchmark.runs == 0 {
            return Err(Error::invalid_config("benchmark runs must be at least 1"));
        }
        if self.benchmark.runs.checked_add(self.benchmark.warmup_runs).is_none() {
            return Err(Error::invalid_config("benchmark runs plus warmup_runs overflows"));
        }
        if self.benchmark.max_tokens == 0 {
            return Err(Error::invalid_config("benchmark max_tokens must be positive"));
        }

        let catalog = self.prompt_catalog();
        catalog.get(&self.benchmark.prompt_pack)?;
        catalog.get(&self.uptime.prompt_pack)?;

        let mut providers = HashSet::new();
        for provider in &self.providers {
            if !providers.insert(provider.name.as_str()) {
                return Err(Error::invalid_config(format!("duplicate provider '{}'", provider.name)));
            }
            if provider.base_url.is_none() && default_base_url(&provider.provider).is_none() {
                return Err(Error::invalid_config(format!(
                    "provider '{}' of kind '{}' requires a base_url",
                    provider.name, provider.provider
                )));
            }
        }

        let mut labels = HashSet::new();
        for model in &self.models {
            if !providers.contains(model.provider.as_str()) {
                return Err(Error::invalid_config(format!(
                    "model '{}' references unknown provider '{}'",
                    model.label(),
                    model.provider
                )));
            }
            if !labels.insert(model.label()) {
                return Err(Error::invalid_config(format!("duplicate model label '{}'", model.label())));
            }
        }

        for rule in &self.alert_rules {
            match rule.rule_type {
                AlertRuleType::SpecificModelDown => {
                    let target = rule.target_model.as_deref().ok_or_else(|| {
                        Error::invalid_config(format!("alert rule '{}' needs a target_model", rule.name))
                    })?;
                    if !labels.contains(target) {
                        return Err(Error::invalid_config(format!(
                            "alert rule '{}' targets unknown model '{target}'",
                            rule.name
                        )));
                    }
                }
                AlertRuleType::ModelUnavailableEverywhere => {
                    if rule.target_model_name.as_deref().is_none_or(str::is_empty) {
                        return Err(Error::invalid_config(format!(
                            "alert rule '{}' needs a target_model_name",
                            rule.name
                        )));
                    }
                }
                // Accepted here, reported as unsupported when evaluated
                AlertRuleType::AnyModelDown
                | AlertRuleType::PerformanceDegradation
                | AlertRuleType::Unrecognized(_) => {}
            }
        }

        Ok(())
    }

    /// Create provider accounts, models and alert rules with fresh identifiers.
    ///
    /// Expects a configuration that passed [`validate`](Self::validate).
    pub fn inventory(&self) -> Result<Inventory> {
        let mut accounts = Vec::with_capacity(self.providers.len());
        let mut by_name = HashMap::new();
        for provider in &self.providers {
            let account = ProviderAccount::new(&provider.name, provider.credentials()?);
            by_name.insert(provider.name.as_str(), accounts.len());
            accounts.push(account);
        }

        let mut models = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let account = by_name
                .get(model.provider.as_str())
                .map(|idx| &accounts[*idx])
                .ok_or_else(|| Error::not_found("Provider", &model.provider))?;
            let mut monitored = MonitoredModel::new(account, &model.name).with_display_name(model.label());
            if !model.enabled {
                monitored = monitored.disabled();
            }
            models.push(monitored);
        }

        let mut rules = Vec::with_capacity(self.alert_rules.len());
        for rule in &self.alert_rules {
            let target_model_id = match &rule.target_model {
                Some(label) => Some(
                    models
                        .iter()
                        .find(|m| m.display_name == *label)
                        .map(|m| m.id)
                        .ok_or_else(|| Error::not_found("Model", label))?,
                ),
                None => None,
            };
            let mut alert_rule = AlertRule::new(&rule.name, rule.rule_type.clone());
            alert_rule.target_model_id = target_model_id;
            alert_rule.target_model_name = rule.target_model_name.clone();
            alert_rule.enabled = rule.enabled;
            rules.push(alert_rule);
        }

        Ok(Inventory {
            accounts,
            models,
            rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::time::Duration;

    fn args() -> Args {
        Args {
            config: "test.yaml".to_string(),
            validate: false,
            command: None,
        }
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "{}")?;
            let config = Config::load(&args())?;

            assert_eq!(config.log_format, LogFormat::Text);
            assert_eq!(config.throttle, ThrottleConfig::default());
            assert_eq!(config.probe.timeout, Duration::from_secs(60));
            assert_eq!(config.probe.max_attempts, 3);
            assert_eq!(config.benchmark.prompt_pack, "shakespeare");
            assert_eq!(config.uptime.prompt_pack, "health_check");
            assert_eq!(config.uptime.timeout, Duration::from_secs(15));
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_full_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
log_format: json
throttle:
  global_limit: 20
  provider_limit: 5
  model_limit: 2
probe:
  timeout: 30s
  backoff: 500ms
uptime:
  latency_threshold: 8s
providers:
  - name: openai-prod
    provider: openai
    api_key: sk-test
  - name: gpu-box
    provider: vllm
    base_url: http://gpu-box:8000/v1
models:
  - name: gpt-4o-mini
    provider: openai-prod
  - name: meta-llama/Llama-3-70b
    provider: gpu-box
    display_name: llama-70b
    enabled: false
alert_rules:
  - name: Anything down
    rule_type: any_model_down
  - name: Llama down
    rule_type: specific_model_down
    target_model: llama-70b
  - name: Llama gone
    rule_type: model_unavailable_everywhere
    target_model_name: llama
  - name: Slow
    rule_type: performance_degradation
prompt_packs:
  - id: ping
    name: Ping
    prompt: Say pong.
    expected_tokens: 2
"#,
            )?;

            let config = Config::load(&args())?;
            assert_eq!(config.log_format, LogFormat::Json);
            assert_eq!(config.throttle.global_limit, 20);
            assert_eq!(config.probe.timeout, Duration::from_secs(30));
            assert_eq!(config.probe.backoff, Duration::from_millis(500));
            assert_eq!(config.probe.max_attempts, 3); // default
            assert_eq!(config.uptime.latency_threshold, Duration::from_secs(8));
            assert!(config.validate().is_ok());
            assert!(config.prompt_catalog().contains("ping"));

            let inventory = config.inventory().unwrap();
            assert_eq!(inventory.accounts.len(), 2);
            assert_eq!(inventory.models.len(), 2);
            assert!(!inventory.model("llama-70b").unwrap().enabled);
            assert_eq!(inventory.models[1].model_name, "meta-llama/Llama-3-70b");
            assert_eq!(
                inventory.rules[1].target_model_id,
                Some(inventory.model("llama-70b").unwrap().id)
            );
            assert_eq!(inventory.rules[3].rule_type, AlertRuleType::PerformanceDegradation);
            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
throttle:
  global_limit: 20
"#,
            )?;
            jail.set_env("ARGUS_THROTTLE__GLOBAL_LIMIT", "7");
            jail.set_env("ARGUS_UPTIME__TIMEOUT", "30s");
            jail.set_env("ARGUS_LOG_FORMAT", "json");

            let config = Config::load(&args())?;
            assert_eq!(config.throttle.global_limit, 7);
            assert_eq!(config.uptime.timeout, Duration::from_secs(30));
            assert_eq!(config.log_format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
throttle:
  global_limt: 20
"#,
            )?;
            assert!(Config::load(&args()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_api_key_from_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
providers:
  - name: openai-prod
    provider: openai
    api_key_env: TEST_OPENAI_KEY
"#,
            )?;
            jail.set_env("TEST_OPENAI_KEY", "sk-from-env");

            let config = Config::load(&args())?;
            let inventory = config.inventory().unwrap();
            assert_eq!(inventory.accounts[0].credentials.api_key.as_deref(), Some("sk-from-env"));
            Ok(())
        });
    }

    fn with_provider() -> Config {
        Config {
            providers: vec![ProviderConfig {
                name: "prod".into(),
                provider: "openai".into(),
                base_url: None,
                api_key: None,
                api_key_env: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_failures() {
        let mut config = with_provider();
        config.throttle.global_limit = 0;
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.probe.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.benchmark.runs = 0;
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.benchmark.runs = u32::MAX;
        config.benchmark.warmup_runs = 1;
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.benchmark.prompt_pack = "missing".into();
        assert!(matches!(config.validate(), Err(Error::UnknownPromptPack { .. })));

        let mut config = with_provider();
        config.models.push(ModelConfig {
            name: "gpt-4o".into(),
            provider: "nope".into(),
            display_name: None,
            enabled: true,
        });
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.providers[0].provider = "vllm".into();
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.alert_rules.push(AlertRuleConfig {
            name: "x".into(),
            rule_type: AlertRuleType::SpecificModelDown,
            target_model: Some("ghost".into()),
            target_model_name: None,
            enabled: true,
        });
        assert!(config.validate().is_err());

        let mut config = with_provider();
        config.alert_rules.push(AlertRuleConfig {
            name: "x".into(),
            rule_type: AlertRuleType::ModelUnavailableEverywhere,
            target_model: None,
            target_model_name: None,
            enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_config_debug_redacts_key() {
        let mut config = with_provider();
        config.providers[0].api_key = Some("sk-secret".into());
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
