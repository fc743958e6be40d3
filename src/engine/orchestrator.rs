//! [`Orchestrator`]: runs the ordered initialization pipeline, then the engine pipeline
//! (spec.md §4.8).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::bag::{Key, SharedBag};
use crate::engine::client::LLMClient;
use crate::engine::config::EngineConfig;
use crate::engine::error::OrchestratorError;
use crate::engine::health::{HealthMetrics, HealthMonitor};
use crate::engine::portfolio::Portfolio;
use crate::engine::registry::{EngineDeps, EngineRegistry};

/// Error type every [`InitStep`] and loader returns.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// The future a [`Loader`] produces.
pub type LoaderFuture<T> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send>>;

/// An external collaborator's fetch routine, injected into a bag-populating
/// [`InitStep`] rather than hardcoded into it — fetching portfolios, profiles, or
/// regional settings is out of this crate's scope (spec.md §1), but *publishing* what
/// was fetched into the bag, in the right order, with failures aborting init, is not.
pub type Loader<T> = Arc<dyn Fn() -> LoaderFuture<T> + Send + Sync>;

/// One step of [`Orchestrator::init`]. Each step receives the bag and config and either
/// populates the bag (or orchestrator-owned resources, via its own closure captures) or
/// fails, aborting the whole initialization.
#[async_trait]
pub trait InitStep: Send + Sync {
    /// Name used in [`OrchestratorError::InitStep`] when this step fails.
    fn name(&self) -> &str;
    /// Run the step.
    async fn run(&self, bag: &SharedBag, config: &EngineConfig) -> Result<(), StepError>;
}

/// Loaders a caller must supply to [`Orchestrator::with_default_steps`] for the three
/// steps that publish externally-fetched data: profile, regional settings, and
/// portfolio. There is no built-in default for any of these — fetching them is an
/// external collaborator's job (spec.md §1) — so the pipeline fails fast if one is
/// never wired up, rather than silently doing nothing.
pub struct DefaultStepLoaders {
    /// Fetches the user-facing display/locale profile, published under [`Key::Profile`].
    pub profile: Loader<String>,
    /// Fetches regional/currency settings, published under [`Key::RegionalSettings`].
    pub regional_settings: Loader<String>,
    /// Fetches the portfolio, validated and published under [`Key::Portfolio`].
    pub portfolio: Loader<Portfolio>,
}

/// Drives initialization, then the engine pipeline, against a fixed [`SharedBag`] and
/// [`EngineConfig`].
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    bag: Arc<SharedBag>,
    steps: Vec<Box<dyn InitStep>>,
    health: Option<HealthMonitor>,
    health_metrics: Arc<HealthMetrics>,
}

impl Orchestrator {
    /// Build an orchestrator with no initialization steps configured; call
    /// [`Orchestrator::with_default_steps`] or [`Orchestrator::with_steps`] before
    /// [`Orchestrator::init`].
    pub fn new(config: EngineConfig, bag: Arc<SharedBag>) -> Self {
        Self {
            config: Arc::new(config),
            bag,
            steps: Vec::new(),
            health: None,
            health_metrics: Arc::new(HealthMetrics::default()),
        }
    }

    /// Install the default step order: health monitor → tool manager → profile →
    /// regional settings → portfolio → LLM client → prompt manager.
    ///
    /// `profile`, `regional_settings`, and `portfolio` run `loaders`' matching closure
    /// and publish the result into the bag (portfolio is additionally validated before
    /// being published). `llm_client` validates `config`'s LLM endpoint/model and
    /// publishes [`Key::BatchMode`]. `prompt_manager` reads the just-published
    /// [`Key::Portfolio`] back out and publishes its LLM-friendly projection under
    /// [`Key::NormalizedForAI`]. `health_monitor` and `tool_manager` have nothing of
    /// their own to publish — the health monitor is started as a side effect of
    /// [`Orchestrator::init`] itself, and tool registration goes straight through
    /// [`LLMClient::register_tool`](crate::engine::client::LLMClient::register_tool),
    /// not through the bag — so both stay fixed points in the ordering with an `Ok(())`
    /// body.
    pub fn with_default_steps(mut self, loaders: DefaultStepLoaders) -> Self {
        self.steps = default_step_order(loaders);
        self
    }

    /// Replace the initialization step sequence entirely.
    pub fn with_steps(mut self, steps: Vec<Box<dyn InitStep>>) -> Self {
        self.steps = steps;
        self
    }

    /// Run every configured initialization step in order, aborting on the first failure.
    ///
    /// The health monitor is started as a side effect of running the first time (it is
    /// not itself a step, since its lifetime must outlive `init` and is owned by the
    /// orchestrator rather than dropped at the end of this call).
    pub async fn init(&mut self) -> Result<(), OrchestratorError> {
        if self.health.is_none() {
            self.health = Some(HealthMonitor::start(self.bag.clone(), self.health_metrics.clone()));
        }
        for step in &self.steps {
            step.run(&self.bag, &self.config).await.map_err(|source| OrchestratorError::InitStep {
                step: step.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Build engines from `registry` and run them sequentially in registry order. An
    /// engine's error aborts the pipeline; engines before it keep whatever they already
    /// wrote to the bag.
    pub async fn execute_pipeline(
        &self,
        registry: &EngineRegistry,
        client: &LLMClient,
    ) -> Result<(), OrchestratorError> {
        let deps = EngineDeps {
            config: self.config.clone(),
            bag: self.bag.clone(),
        };
        let engines = registry.build(&deps)?;
        for engine in engines {
            engine
                .execute(client, &self.bag)
                .await
                .map_err(|source| OrchestratorError::EngineFailed {
                    engine: engine.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// The metrics instance the health monitor snapshots from; other components report
    /// call outcomes into this.
    pub fn health_metrics(&self) -> Arc<HealthMetrics> {
        self.health_metrics.clone()
    }

    /// Shared config, for callers building an [`LLMClient`] or engines directly.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.clone()
    }

    /// Shared bag, for callers building an [`LLMClient`] or engines directly.
    pub fn bag(&self) -> Arc<SharedBag> {
        self.bag.clone()
    }

    /// Stop the health monitor, if one was started. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(monitor) = self.health.take() {
            monitor.stop().await;
        }
    }
}

/// A step with genuinely nothing of its own to do: `health_monitor`'s actual work is
/// started as a side effect of [`Orchestrator::init`], and `tool_manager`'s is done by
/// callers registering tools directly against an `LLMClient`/`ToolRegistry`. Kept as
/// fixed points in the default ordering so the sequence spec.md §4.8 names stays intact.
struct FixedPointStep(&'static str);

#[async_trait]
impl InitStep for FixedPointStep {
    fn name(&self) -> &str {
        self.0
    }
    async fn run(&self, _bag: &SharedBag, _config: &EngineConfig) -> Result<(), StepError> {
        Ok(())
    }
}

/// Runs `loader` and publishes the result under `key`, failing init if the loader does.
struct LoaderStep<T> {
    name: &'static str,
    key: Key,
    loader: Loader<T>,
}

#[async_trait]
impl<T: Send + Sync + 'static> InitStep for LoaderStep<T> {
    fn name(&self) -> &str {
        self.name
    }
    async fn run(&self, bag: &SharedBag, _config: &EngineConfig) -> Result<(), StepError> {
        let value = (self.loader)().await?;
        bag.set(self.key.clone(), value);
        Ok(())
    }
}

/// Runs the portfolio loader, validates the result, then publishes it — a portfolio
/// that fails [`Portfolio::validate`] aborts initialization rather than being published
/// for downstream engines to trip over.
struct PortfolioStep {
    loader: Loader<Portfolio>,
}

#[async_trait]
impl InitStep for PortfolioStep {
    fn name(&self) -> &str {
        "portfolio"
    }
    async fn run(&self, bag: &SharedBag, _config: &EngineConfig) -> Result<(), StepError> {
        let portfolio = (self.loader)().await?;
        portfolio.validate()?;
        bag.set(Key::Portfolio, portfolio);
        Ok(())
    }
}

/// Validates that `config` describes a usable LLM endpoint, then publishes whether this
/// run operates in batch mode.
struct LlmClientStep;

#[async_trait]
impl InitStep for LlmClientStep {
    fn name(&self) -> &str {
        "llm_client"
    }
    async fn run(&self, bag: &SharedBag, config: &EngineConfig) -> Result<(), StepError> {
        if config.llm_base_url.trim().is_empty() {
            return Err("llm_base_url must not be empty".into());
        }
        if !(config.llm_base_url.starts_with("http://") || config.llm_base_url.starts_with("https://")) {
            return Err(format!("llm_base_url {:?} is not an http(s) URL", config.llm_base_url).into());
        }
        if config.default_model.trim().is_empty() {
            return Err("default_model must not be empty".into());
        }
        bag.set(Key::BatchMode, config.batch_mode);
        Ok(())
    }
}

/// Reads the portfolio the `portfolio` step just published and projects it into the
/// LLM-friendly shape engines prompt against, publishing it under
/// [`Key::NormalizedForAI`]. Requires `portfolio` to have already run.
struct PromptManagerStep;

#[async_trait]
impl InitStep for PromptManagerStep {
    fn name(&self) -> &str {
        "prompt_manager"
    }
    async fn run(&self, bag: &SharedBag, _config: &EngineConfig) -> Result<(), StepError> {
        let portfolio = bag
            .get_as::<Portfolio>(&Key::Portfolio)
            .ok_or("prompt_manager requires Key::Portfolio to already be populated")?;
        let normalized = serde_json::to_value(&portfolio)?;
        bag.set(Key::NormalizedForAI, normalized);
        Ok(())
    }
}

fn default_step_order(loaders: DefaultStepLoaders) -> Vec<Box<dyn InitStep>> {
    vec![
        Box::new(FixedPointStep("health_monitor")),
        Box::new(FixedPointStep("tool_manager")),
        Box::new(LoaderStep {
            name: "profile",
            key: Key::Profile,
            loader: loaders.profile,
        }),
        Box::new(LoaderStep {
            name: "regional_settings",
            key: Key::RegionalSettings,
            loader: loaders.regional_settings,
        }),
        Box::new(PortfolioStep { loader: loaders.portfolio }),
        Box::new(LlmClientStep),
        Box::new(PromptManagerStep),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::bag::Key;

    struct FailingStep;

    #[async_trait]
    impl InitStep for FailingStep {
        fn name(&self) -> &str {
            "failing_step"
        }
        async fn run(&self, _bag: &SharedBag, _config: &EngineConfig) -> Result<(), StepError> {
            Err("boom".into())
        }
    }

    struct WritesProfileStep;

    #[async_trait]
    impl InitStep for WritesProfileStep {
        fn name(&self) -> &str {
            "profile"
        }
        async fn run(&self, bag: &SharedBag, _config: &EngineConfig) -> Result<(), StepError> {
            bag.set(Key::Profile, "loaded".to_string());
            Ok(())
        }
    }

    fn ok_loader<T: Clone + Send + Sync + 'static>(value: T) -> Loader<T> {
        Arc::new(move || {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    fn sample_loaders() -> DefaultStepLoaders {
        DefaultStepLoaders {
            profile: ok_loader("default".to_string()),
            regional_settings: ok_loader("US".to_string()),
            portfolio: ok_loader(Portfolio {
                as_of: "2024-01-01".to_string(),
                accounts: Vec::new(),
            }),
        }
    }

    #[tokio::test]
    async fn init_runs_steps_in_order_and_populates_bag() {
        let bag = Arc::new(SharedBag::new());
        let mut orchestrator = Orchestrator::new(EngineConfig::default(), bag.clone())
            .with_steps(vec![Box::new(WritesProfileStep)]);
        orchestrator.init().await.unwrap();
        assert_eq!(bag.get_as::<String>(&Key::Profile), Some("loaded".to_string()));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn init_aborts_on_first_failing_step() {
        let bag = Arc::new(SharedBag::new());
        let mut orchestrator =
            Orchestrator::new(EngineConfig::default(), bag).with_steps(vec![Box::new(FailingStep)]);
        let err = orchestrator.init().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InitStep { step, .. } if step == "failing_step"));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn default_steps_run_without_error() {
        let bag = Arc::new(SharedBag::new());
        let mut orchestrator =
            Orchestrator::new(EngineConfig::default(), bag).with_default_steps(sample_loaders());
        orchestrator.init().await.unwrap();
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn default_steps_populate_bag_from_loaders_in_order() {
        let bag = Arc::new(SharedBag::new());
        let mut orchestrator =
            Orchestrator::new(EngineConfig::default(), bag.clone()).with_default_steps(sample_loaders());
        orchestrator.init().await.unwrap();

        assert_eq!(bag.get_as::<String>(&Key::Profile), Some("default".to_string()));
        assert_eq!(bag.get_as::<String>(&Key::RegionalSettings), Some("US".to_string()));
        assert!(bag.get_as::<Portfolio>(&Key::Portfolio).is_some());
        assert_eq!(bag.get_as::<bool>(&Key::BatchMode), Some(false));
        assert!(bag.get_as::<serde_json::Value>(&Key::NormalizedForAI).is_some());

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn llm_client_step_rejects_empty_base_url() {
        let bag = Arc::new(SharedBag::new());
        let config = EngineConfig {
            llm_base_url: String::new(),
            ..EngineConfig::default()
        };
        let mut orchestrator = Orchestrator::new(config, bag).with_default_steps(sample_loaders());
        let err = orchestrator.init().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InitStep { step, .. } if step == "llm_client"));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn portfolio_step_rejects_invalid_portfolio() {
        let bag = Arc::new(SharedBag::new());
        let mut loaders = sample_loaders();
        loaders.portfolio = ok_loader(Portfolio {
            as_of: "not-a-date".to_string(),
            accounts: Vec::new(),
        });
        let mut orchestrator =
            Orchestrator::new(EngineConfig::default(), bag).with_default_steps(loaders);
        let err = orchestrator.init().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InitStep { step, .. } if step == "portfolio"));
        orchestrator.shutdown().await;
    }
}
