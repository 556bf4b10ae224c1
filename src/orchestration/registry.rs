//! Type-erased orchestration registry: a factory-by-name map lets the
//! runner invoke user orchestrations without the runner itself being
//! generic over every registered type.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::context::OrchestrationContext;
use super::error::OrchestrationError;

/// User-facing orchestration definition.
///
/// The single entry point is `run`: the runner drives it against history
/// through `ctx` rather than invoking per-event callbacks.
#[async_trait]
pub trait Orchestration: Send + Sync + 'static {
    const NAME: &'static str;
    type Input: serde::de::DeserializeOwned + Send;
    type Output: serde::Serialize + Send;

    async fn run(ctx: OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestrationError>;
}

/// Type-erased interface the runner invokes, hiding each orchestration's
/// concrete `Input`/`Output` types behind JSON.
#[async_trait]
pub trait AnyOrchestration: Send + Sync {
    fn orchestration_type(&self) -> &'static str;

    async fn run(&self, ctx: OrchestrationContext, input: Value) -> Result<Value, OrchestrationError>;
}

struct OrchestrationWrapper<O: Orchestration> {
    _marker: PhantomData<O>,
}

#[async_trait]
impl<O: Orchestration> AnyOrchestration for OrchestrationWrapper<O> {
    fn orchestration_type(&self) -> &'static str {
        O::NAME
    }

    async fn run(&self, ctx: OrchestrationContext, input: Value) -> Result<Value, OrchestrationError> {
        let typed_input: O::Input = serde_json::from_value(input)
            .map_err(|e| OrchestrationError::user(format!("failed to deserialize input: {e}")))?;
        let output = O::run(ctx, typed_input).await?;
        serde_json::to_value(output).map_err(|e| OrchestrationError::user(format!("failed to serialize output: {e}")))
    }
}

/// Factory function creating a fresh type-erased orchestration handler.
pub type OrchestrationFactory = Arc<dyn Fn() -> Box<dyn AnyOrchestration> + Send + Sync>;

/// Maps orchestration type names to factories. Built once at startup,
/// immutable afterward.
#[derive(Clone, Default)]
pub struct OrchestrationRegistry {
    factories: HashMap<String, OrchestrationFactory>,
}

impl OrchestrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<O: Orchestration>(&mut self) {
        let factory: OrchestrationFactory = Arc::new(|| Box::new(OrchestrationWrapper::<O> { _marker: PhantomData }));
        self.factories.insert(O::NAME.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn AnyOrchestration>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownOrchestrationType(name.to_string()))?;
        Ok(factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn orchestration_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for OrchestrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestrationRegistry")
            .field("orchestration_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown orchestration type: {0}")]
    UnknownOrchestrationType(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Input {
        name: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Output {
        greeting: String,
    }

    struct Greet;

    #[async_trait]
    impl Orchestration for Greet {
        const NAME: &'static str = "greet";
        type Input = Input;
        type Output = Output;

        async fn run(_ctx: OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestrationError> {
            Ok(Output {
                greeting: format!("Hello, {}", input.name),
            })
        }
    }

    #[test]
    fn register_and_create() {
        let mut registry = OrchestrationRegistry::new();
        registry.register::<Greet>();

        assert!(registry.contains("greet"));
        assert!(!registry.contains("unknown"));

        let handler = registry.create("greet").expect("should create");
        assert_eq!(handler.orchestration_type(), "greet");
    }

    #[test]
    fn unknown_type_errors() {
        let registry = OrchestrationRegistry::new();
        assert!(matches!(
            registry.create("unknown"),
            Err(RegistryError::UnknownOrchestrationType(_))
        ));
    }
}
