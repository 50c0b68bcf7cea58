//! Hierarchical concurrency limiting for outbound probe requests.
//!
//! Every probe attempt must hold capacity on three tiers at once:
//!
//! 1. **Global**: total in-flight requests across all providers
//! 2. **Provider**: in-flight requests per provider (e.g. `openai`, `ollama`)
//! 3. **Model**: in-flight requests per model
//!
//! Tiers are always acquired in that order and released in the reverse order,
//! so two callers can never each hold a tier the other is waiting on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::{Error, Result};

/// Capacity caps for the three throttle tiers. All values must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Maximum concurrent requests across all providers and models
    pub global_limit: usize,
    /// Maximum concurrent requests per provider
    pub provider_limit: usize,
    /// Maximum concurrent requests per model
    pub model_limit: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_limit: 50,
            provider_limit: 10,
            model_limit: 3,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("global_limit", self.global_limit),
            ("provider_limit", self.provider_limit),
            ("model_limit", self.model_limit),
        ] {
            if value == 0 {
                return Err(Error::invalid_config(format!("throttle {name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Limit and currently available permits for one semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub limit: usize,
    pub available: usize,
}

/// Point-in-time view of all throttle tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    pub global: TierStats,
    pub providers: BTreeMap<String, TierStats>,
    pub models: BTreeMap<String, TierStats>,
    /// Callers currently blocked in `acquire`
    pub waiting: usize,
}

/// Three-tier semaphore set shared by all probes of one orchestration.
///
/// The controller is an explicit context object: the orchestrator (or uptime cycle)
/// creates one, hands `&ThrottleController` to every probe call and drops it when the
/// batch is done. Provider and model semaphores are created lazily on first use.
#[derive(Debug)]
pub struct ThrottleController {
    config: ThrottleConfig,
    global: Arc<Semaphore>,
    providers: DashMap<String, Arc<Semaphore>>,
    models: DashMap<String, Arc<Semaphore>>,
    waiting: AtomicUsize,
}

impl ThrottleController {
    /// Create a controller. Non-positive caps are rejected here, not at acquisition time.
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            global: Arc::new(Semaphore::new(config.global_limit)),
            providers: DashMap::new(),
            models: DashMap::new(),
            waiting: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn provider_semaphore(&self, provider: &str) -> Arc<Semaphore> {
        self.providers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.provider_limit)))
            .clone()
    }

    fn model_semaphore(&self, model: &str) -> Arc<Semaphore> {
        self.models
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.model_limit)))
            .clone()
    }

    /// Wait until all three tiers have spare capacity.
    ///
    /// Acquisition order is global, then provider, then model. The returned permit
    /// releases model, provider and global capacity (in that order) when dropped.
    /// Dropping the future while it waits releases whatever tiers it already holds,
    /// so this is safe to race against cancellation in `tokio::select!`.
    pub async fn acquire(&self, provider: &str, model: &str) -> Result<ThrottlePermit> {
        let provider_sem = self.provider_semaphore(provider);
        let model_sem = self.model_semaphore(model);

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = scopeguard::guard((), |_| {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        });

        let global = self.global.clone().acquire_owned().await.map_err(closed)?;
        let provider = provider_sem.acquire_owned().await.map_err(closed)?;
        let model = model_sem.acquire_owned().await.map_err(closed)?;

        Ok(ThrottlePermit {
            _model: model,
            _provider: provider,
            _global: global,
        })
    }

    /// Current limits and available permits on every tier.
    pub fn stats(&self) -> ThrottleStats {
        let tier = |limit: usize, sem: &Semaphore| TierStats {
            limit,
            available: sem.available_permits(),
        };

        ThrottleStats {
            global: tier(self.config.global_limit, &self.global),
            providers: self
                .providers
                .iter()
                .map(|entry| (entry.key().clone(), tier(self.config.provider_limit, entry.value())))
                .collect(),
            models: self
                .models
                .iter()
                .map(|entry| (entry.key().clone(), tier(self.config.model_limit, entry.value())))
                .collect(),
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}

fn closed(_: tokio::sync::AcquireError) -> Error {
    Error::Other(anyhow::anyhow!("throttle semaphore closed"))
}

/// RAII guard holding capacity on all three tiers.
///
/// Fields drop in declaration order, which releases model, then provider, then
/// global: the exact reverse of acquisition.
#[must_use]
#[derive(Debug)]
pub struct ThrottlePermit {
    _model: OwnedSemaphorePermit,
    _provider: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller(global: usize, provider: usize, model: usize) -> Arc<ThrottleController> {
        Arc::new(
            ThrottleController::new(ThrottleConfig {
                global_limit: global,
                provider_limit: provider,
                model_limit: model,
            })
            .unwrap(),
        )
    }

    #[test]
    fn default_profile() {
        let config = ThrottleConfig::default();
        assert_eq!(config.global_limit, 50);
        assert_eq!(config.provider_limit, 10);
        assert_eq!(config.model_limit, 3);
    }

    #[test]
    fn zero_caps_are_rejected_at_construction() {
        for config in [
            ThrottleConfig {
                global_limit: 0,
                ..Default::default()
            },
            ThrottleConfig {
                provider_limit: 0,
                ..Default::default()
            },
            ThrottleConfig {
                model_limit: 0,
                ..Default::default()
            },
        ] {
            let err = ThrottleController::new(config).unwrap_err();
            assert!(err.is_config_error(), "{err}");
        }
    }

    #[tokio::test]
    async fn acquire_single_request() {
        let throttle = controller(2, 2, 2);
        let permit = throttle.acquire("openai", "gpt-4o").await.unwrap();

        let stats = throttle.stats();
        assert_eq!(stats.global.available, 1);
        assert_eq!(stats.providers["openai"].available, 1);
        assert_eq!(stats.models["gpt-4o"].available, 1);

        drop(permit);
        let stats = throttle.stats();
        assert_eq!(stats.global.available, 2);
        assert_eq!(stats.providers["openai"].available, 2);
        assert_eq!(stats.models["gpt-4o"].available, 2);
    }

    #[tokio::test]
    async fn global_limit_blocks_across_providers() {
        let throttle = controller(1, 5, 5);
        let held = throttle.acquire("openai", "gpt-4o").await.unwrap();

        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.acquire("anthropic", "claude").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(throttle.stats().waiting, 1);

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(throttle.stats().waiting, 0);
    }

    #[tokio::test]
    async fn provider_limit_is_independent_per_provider() {
        let throttle = controller(10, 1, 5);
        let _openai = throttle.acquire("openai", "gpt-4o").await.unwrap();

        // A different provider is unaffected.
        let other = tokio::time::timeout(Duration::from_millis(100), throttle.acquire("ollama", "llama3")).await;
        assert!(other.is_ok());

        // The same provider is blocked.
        let same = tokio::time::timeout(Duration::from_millis(100), throttle.acquire("openai", "gpt-4o-mini")).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn model_limit_is_independent_per_model() {
        let throttle = controller(10, 10, 1);
        let _held = throttle.acquire("openai", "gpt-4o").await.unwrap();

        let other = tokio::time::timeout(Duration::from_millis(100), throttle.acquire("openai", "gpt-4o-mini")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(100), throttle.acquire("openai", "gpt-4o")).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn abandoned_acquire_releases_partial_capacity() {
        let throttle = controller(2, 2, 1);
        let _held = throttle.acquire("openai", "gpt-4o").await.unwrap();

        // This waiter takes a global and provider permit, then blocks on the model tier.
        let attempt = tokio::time::timeout(Duration::from_millis(50), throttle.acquire("openai", "gpt-4o")).await;
        assert!(attempt.is_err());

        let stats = throttle.stats();
        assert_eq!(stats.global.available, 1);
        assert_eq!(stats.providers["openai"].available, 1);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn hierarchical_cap_is_never_exceeded() {
        let throttle = controller(3, 2, 1);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..12 {
            let throttle = throttle.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tasks.spawn(async move {
                let provider = if i % 2 == 0 { "openai" } else { "ollama" };
                let model = format!("model-{}", i % 4);
                let _permit = throttle.acquire(provider, &model).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(throttle.stats().global.available, 3);
    }
}
