//! [`EngineRegistry`] and the [`Engine`] trait (spec.md §4.7).
//!
//! An engine is the unit of work the orchestrator runs after initialization: it installs
//! a budget consumer reflecting its own tool constraints, builds a prompt, calls
//! [`LLMClient::ask`](crate::engine::client::LLMClient::ask) or `do_batch`, and writes its
//! result into the [`SharedBag`](crate::engine::bag::SharedBag) under its own
//! [`Engine::result_key`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::bag::{Key, SharedBag};
use crate::engine::client::LLMClient;
use crate::engine::config::EngineConfig;
use crate::engine::error::OrchestratorError;

/// A unit of orchestrated work.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Stable engine name, used for registry ordering and error attribution.
    fn name(&self) -> &str;
    /// The [`SharedBag`] key this engine's primary artifact is written under.
    fn result_key(&self) -> Key;
    /// Run the engine: build a prompt, call the LLM (sync or batch), write the result.
    async fn execute(
        &self,
        client: &LLMClient,
        bag: &SharedBag,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Dependencies a factory needs to construct an [`Engine`].
///
/// Deliberately a thin bundle of `Arc`s rather than a trait object, since every factory
/// in a given process shares the same concrete dependency types.
#[derive(Clone)]
pub struct EngineDeps {
    /// Ambient configuration.
    pub config: Arc<EngineConfig>,
    /// The shared state bag engines read inputs from and write results to.
    pub bag: Arc<SharedBag>,
}

type EngineFactory = Box<dyn Fn(&EngineDeps) -> Result<Box<dyn Engine>, String> + Send + Sync>;

/// A `name → factory` map plus an optional explicit construction order.
///
/// [`EngineRegistry::build`] validates that `config`/`bag`/`client` dependencies are all
/// present (the latter is asserted by the caller having one to pass to
/// [`Engine::execute`], not by this type, which only needs `config`/`bag`), then
/// constructs engines first in the explicit order (for names it recognizes), then the
/// remainder in lexicographic order.
#[derive(Default)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
    explicit_order: Vec<String>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            explicit_order: Vec::new(),
        }
    }

    /// Register a named factory.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&EngineDeps) -> Result<Box<dyn Engine>, String> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Set an explicit construction order. Names not listed here are constructed
    /// afterward in lexicographic order; names listed here that aren't registered are
    /// silently skipped.
    pub fn with_order(mut self, order: Vec<String>) -> Self {
        self.explicit_order = order;
        self
    }

    /// Construct every registered engine, explicit-order names first, then the
    /// remainder lexicographically.
    pub fn build(&self, deps: &EngineDeps) -> Result<Vec<Box<dyn Engine>>, OrchestratorError> {
        let mut built = Vec::with_capacity(self.factories.len());
        let mut remaining: Vec<&String> = self.factories.keys().collect();
        remaining.sort();

        let mut ordered_names: Vec<String> = Vec::new();
        for name in &self.explicit_order {
            if self.factories.contains_key(name) {
                ordered_names.push(name.clone());
            }
        }
        for name in remaining {
            if !ordered_names.contains(name) {
                ordered_names.push(name.clone());
            }
        }

        for name in ordered_names {
            let factory = self.factories.get(&name).expect("name came from factories' own keys");
            let engine = factory(deps).map_err(|e| {
                OrchestratorError::RegistryBuild(format!("engine \"{name}\" construction failed: {e}"))
            })?;
            built.push(engine);
        }
        Ok(built)
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True if no factories are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEngine(String);

    #[async_trait]
    impl Engine for StubEngine {
        fn name(&self) -> &str {
            &self.0
        }
        fn result_key(&self) -> Key {
            Key::EngineResult(self.0.clone())
        }
        async fn execute(
            &self,
            _client: &LLMClient,
            _bag: &SharedBag,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    fn deps() -> EngineDeps {
        EngineDeps {
            config: Arc::new(EngineConfig::default()),
            bag: Arc::new(SharedBag::new()),
        }
    }

    #[test]
    fn explicit_order_is_respected_then_lexicographic_remainder() {
        let mut registry = EngineRegistry::new();
        registry.register("tax", |_| Ok(Box::new(StubEngine("tax".into()))));
        registry.register("risk", |_| Ok(Box::new(StubEngine("risk".into()))));
        registry.register("allocation", |_| Ok(Box::new(StubEngine("allocation".into()))));
        let registry = registry.with_order(vec!["risk".to_string()]);
        let built = registry.build(&deps()).unwrap();
        let names: Vec<&str> = built.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["risk", "allocation", "tax"]);
    }

    #[test]
    fn factory_failure_aborts_build_with_named_error() {
        let mut registry = EngineRegistry::new();
        registry.register("broken", |_| Err("missing dependency".to_string()));
        let err = registry.build(&deps()).unwrap_err();
        assert!(matches!(err, OrchestratorError::RegistryBuild(msg) if msg.contains("broken")));
    }
}
