//! Operator/connector registry.
//!
//! Grounded on `fiddler::config::{mod, registration, validate}`'s `ENV` pattern (a
//! process-wide static map keyed by item name) but narrowed to the one lookup the
//! orchestrator actually needs: resolve a `definitionName` to something invokable. Uses
//! `RwLock` throughout for a read-heavy, write-once access pattern: the table fills once
//! at startup registration and is read-only for the lifetime of the process afterward.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Error;

/// An in-process transform. Takes the component's rendered configuration (inputs already
/// resolved by the Template Renderer) and produces one output value.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn execute(&self, rendered_config: Value) -> Result<Value, Error>;

    /// Human-readable name for logging/traces; defaults to the type name is not
    /// available in stable Rust, so implementors supply it.
    fn describe(&self) -> &str;
}

/// A remote call. Connectors may support true batch semantics (one round trip for the
/// whole batch) or run element-wise; the dispatcher in `workflow/mod.rs` branches on
/// [`Connector::supports_batch`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// `inputs` holds one rendered configuration per active batch index, in order.
    /// Returns one output value per input, same order.
    async fn execute(&self, inputs: Vec<Value>, task: Option<&str>) -> Result<Vec<Value>, Error>;

    fn supports_batch(&self) -> bool {
        true
    }

    fn describe(&self) -> &str;
}

/// Either half of the `{operator, connector}` component variant.
#[derive(Clone)]
pub enum Registered {
    Operator(Arc<dyn Operator>),
    Connector(Arc<dyn Connector>),
}

/// The output type `pipeline_macros::registration_fn`-rewritten functions resolve to.
pub type ExecutionType = Value;

/// Signature a `#[pipeline_macros::registration_fn]` function is rewritten into: a
/// plain `fn(conf: Value) -> Result<ExecutionType, Error>` body boxed into a future, so
/// module authors can write a synchronous-looking registration function instead of
/// hand-implementing [`Operator`].
pub type RegisteredFn =
    fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ExecutionType, Error>> + Send>>;

/// Adapts a `#[registration_fn]` function pointer into an [`Operator`].
pub struct FnOperator {
    f: RegisteredFn,
    name: &'static str,
}

impl FnOperator {
    pub fn new(name: &'static str, f: RegisteredFn) -> Self {
        FnOperator { f, name }
    }
}

#[async_trait]
impl Operator for FnOperator {
    async fn execute(&self, rendered_config: Value) -> Result<Value, Error> {
        (self.f)(rendered_config).await
    }

    fn describe(&self) -> &str {
        self.name
    }
}

/// Process-wide dispatch table keyed by `definitionName`. Constructed once per engine
/// instance (never per-trigger) and shared via `Arc`.
#[derive(Default)]
pub struct Registry {
    items: RwLock<HashMap<String, Registered>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an operator under `operator-definitions/<name>`. `name` should not
    /// already include the `operator-definitions/` prefix.
    pub fn register_operator(&self, name: &str, op: Arc<dyn Operator>) {
        let key = format!("operator-definitions/{name}");
        self.items
            .write()
            .expect("registry lock poisoned")
            .insert(key, Registered::Operator(op));
    }

    /// Registers a connector under `connector-definitions/<name>`.
    pub fn register_connector(&self, name: &str, conn: Arc<dyn Connector>) {
        let key = format!("connector-definitions/{name}");
        self.items
            .write()
            .expect("registry lock poisoned")
            .insert(key, Registered::Connector(conn));
    }

    /// Resolves a full `definitionName` (including its `operator-definitions/` or
    /// `connector-definitions/` prefix) to the registered implementation.
    pub fn lookup(&self, definition_name: &str) -> Result<Registered, Error> {
        self.items
            .read()
            .expect("registry lock poisoned")
            .get(definition_name)
            .cloned()
            .ok_or_else(|| Error::InvalidRecipe(format!("unregistered component: {definition_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Operator for Echo {
        async fn execute(&self, rendered_config: Value) -> Result<Value, Error> {
            Ok(rendered_config)
        }

        fn describe(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn registers_and_resolves() {
        let registry = Registry::new();
        registry.register_operator("echo", Arc::new(Echo));
        match registry.lookup("operator-definitions/echo").unwrap() {
            Registered::Operator(op) => {
                let out = op.execute(serde_json::json!({"x": 1})).await.unwrap();
                assert_eq!(out, serde_json::json!({"x": 1}));
            }
            Registered::Connector(_) => panic!("expected operator"),
        }
    }

    #[pipeline_macros::registration_fn]
    fn double_fn(conf: Value) -> Result<ExecutionType, Error> {
        let n = conf.get("n").and_then(Value::as_i64).unwrap_or(0);
        Ok(serde_json::json!({ "n": n * 2 }))
    }

    #[tokio::test]
    async fn registration_fn_macro_adapts_into_operator() {
        let registry = Registry::new();
        registry.register_operator("double", Arc::new(FnOperator::new("double", double_fn)));
        match registry.lookup("operator-definitions/double").unwrap() {
            Registered::Operator(op) => {
                let out = op.execute(serde_json::json!({"n": 21})).await.unwrap();
                assert_eq!(out, serde_json::json!({"n": 42}));
            }
            Registered::Connector(_) => panic!("expected operator"),
        }
    }

    #[test]
    fn unregistered_lookup_fails() {
        let registry = Registry::new();
        assert!(registry.lookup("operator-definitions/missing").is_err());
    }
}
