//! Type-erased activity registry, the activity-side twin of
//! `orchestration::registry` (same factory-by-name shape, grounded on the
//! teacher's `engine/registry.rs`).

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::context::ActivityContext;
use super::definition::{Activity, ActivityError};

/// Type-erased interface the activity runner invokes.
#[async_trait]
pub trait AnyActivity: Send + Sync {
    fn activity_type(&self) -> &'static str;

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

struct ActivityWrapper<A: Activity> {
    activity: A,
    _marker: PhantomData<A>,
}

#[async_trait]
impl<A: Activity> AnyActivity for ActivityWrapper<A> {
    fn activity_type(&self) -> &'static str {
        A::TYPE
    }

    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let typed_input: A::Input = serde_json::from_value(input)
            .map_err(|e| ActivityError::non_retryable(format!("failed to deserialize input: {e}")))?;
        let output = self.activity.execute(ctx, typed_input).await?;
        serde_json::to_value(output).map_err(|e| ActivityError::non_retryable(format!("failed to serialize output: {e}")))
    }
}

/// Registered activities are held as single shared instances (not
/// constructed fresh per call) since, unlike an orchestration, an
/// activity's `execute` takes `&self` and commonly wraps a long-lived
/// client (HTTP, database) rather than per-call state.
#[derive(Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn AnyActivity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Activity>(&mut self, activity: A) {
        let wrapper: Arc<dyn AnyActivity> = Arc::new(ActivityWrapper { activity, _marker: PhantomData });
        self.activities.insert(A::TYPE.to_string(), wrapper);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AnyActivity>, RegistryError> {
        self.activities
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownActivityType(name.to_string()))
    }

    pub fn activity_types(&self) -> impl Iterator<Item = &str> {
        self.activities.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activity_types", &self.activities.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown activity type: {0}")]
    UnknownActivityType(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    struct SayHello;

    #[derive(Debug, Serialize, Deserialize)]
    struct Input {
        name: String,
    }

    #[async_trait]
    impl Activity for SayHello {
        const TYPE: &'static str = "say_hello";
        type Input = Input;
        type Output = String;

        async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Self::Output, ActivityError> {
            Ok(format!("Hello, {}", input.name))
        }
    }

    #[test]
    fn register_and_create() {
        let mut registry = ActivityRegistry::new();
        registry.register(SayHello);

        assert!(registry.contains("say_hello"));
        let handler = registry.get("say_hello").expect("should get");
        assert_eq!(handler.activity_type(), "say_hello");
    }

    #[test]
    fn unknown_type_errors() {
        let registry = ActivityRegistry::new();
        assert!(matches!(registry.get("unknown"), Err(RegistryError::UnknownActivityType(_))));
    }
}
