//! External function registry.
//!
//! Conditions, transformers, validators and effects live behind one
//! registry, keyed by name. Function expression nodes resolve their
//! arguments and call through here; undefined arguments arrive as
//! `Value::Null`.
//!
//! The registry ships a small starter catalogue; integrations register
//! their own functions on top.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::context::EvalContext;

// ============================================================================
// FUNCTION PROTOCOL
// ============================================================================

/// A function call failed
#[derive(Debug, Clone, Error)]
pub enum FunctionError {
    #[error("function failed: {0}")]
    Failed(String),

    #[error("function '{0}' is async and was called synchronously")]
    NotSync(String),

    #[error("unknown function '{0}'")]
    Unknown(String),
}

/// Result of a function call; `None` is `undefined`
pub type FnResult = Result<Option<Value>, FunctionError>;

/// One named external function.
///
/// Sync functions implement `call_sync` and get `call` for free via the
/// wrapper types below; async functions implement `call` only.
#[async_trait]
pub trait ExternalFn: Send + Sync {
    fn is_async(&self) -> bool;

    async fn call(&self, args: &[Value], ctx: &EvalContext) -> FnResult;

    fn call_sync(&self, _args: &[Value], _ctx: &EvalContext) -> FnResult {
        Err(FunctionError::NotSync("<unnamed>".to_string()))
    }
}

type SyncBody = dyn Fn(&[Value], &EvalContext) -> FnResult + Send + Sync;
type AsyncBody =
    dyn for<'a> Fn(&'a [Value], &'a EvalContext) -> BoxFuture<'a, FnResult> + Send + Sync;

/// Synchronous function wrapper
struct SyncFn {
    body: Box<SyncBody>,
}

#[async_trait]
impl ExternalFn for SyncFn {
    fn is_async(&self) -> bool {
        false
    }

    async fn call(&self, args: &[Value], ctx: &EvalContext) -> FnResult {
        (self.body)(args, ctx)
    }

    fn call_sync(&self, args: &[Value], ctx: &EvalContext) -> FnResult {
        (self.body)(args, ctx)
    }
}

/// Asynchronous function wrapper (effects, lookups)
struct AsyncFn {
    name: String,
    body: Box<AsyncBody>,
}

#[async_trait]
impl ExternalFn for AsyncFn {
    fn is_async(&self) -> bool {
        true
    }

    async fn call(&self, args: &[Value], ctx: &EvalContext) -> FnResult {
        (self.body)(args, ctx).await
    }

    fn call_sync(&self, _args: &[Value], _ctx: &EvalContext) -> FnResult {
        Err(FunctionError::NotSync(self.name.clone()))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Name -> function map
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ExternalFn>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the starter catalogue
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn ExternalFn>) {
        self.functions.insert(name.into(), function);
    }

    /// Register a synchronous function from a closure
    pub fn register_sync<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: Fn(&[Value], &EvalContext) -> FnResult + Send + Sync + 'static,
    {
        self.register(name, Arc::new(SyncFn { body: Box::new(body) }));
    }

    /// Register an asynchronous function from a closure returning a boxed
    /// future
    pub fn register_async<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: for<'a> Fn(&'a [Value], &'a EvalContext) -> BoxFuture<'a, FnResult>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        self.register(
            name.clone(),
            Arc::new(AsyncFn {
                name,
                body: Box::new(body),
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExternalFn>> {
        self.functions.get(name).cloned()
    }

    /// Async flag for a name; unknown names are conservatively async
    pub fn is_async(&self, name: &str) -> bool {
        self.functions.get(name).map(|f| f.is_async()).unwrap_or(true)
    }
}

// ============================================================================
// VALUE COERCIONS
// ============================================================================

/// Truthiness used by conditionals and dependent gating: null, `false`,
/// empty string and zero are falsy; arrays and objects are truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Truthiness of a possibly-undefined value
pub fn truthy_opt(value: &Option<Value>) -> bool {
    value.as_ref().map(truthy).unwrap_or(false)
}

/// String coercion for template placeholders: strings pass through, null
/// and undefined become empty, everything else renders as JSON
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// BUILTINS
// ============================================================================

static NULL: Value = Value::Null;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_sync("trim", |args, _ctx| {
        Ok(match arg(args, 0) {
            Value::String(s) => Some(Value::String(s.trim().to_string())),
            Value::Null => None,
            other => Some(other.clone()),
        })
    });

    registry.register_sync("uppercase", |args, _ctx| {
        Ok(match arg(args, 0) {
            Value::String(s) => Some(Value::String(s.to_uppercase())),
            Value::Null => None,
            other => Some(other.clone()),
        })
    });

    registry.register_sync("lowercase", |args, _ctx| {
        Ok(match arg(args, 0) {
            Value::String(s) => Some(Value::String(s.to_lowercase())),
            Value::Null => None,
            other => Some(other.clone()),
        })
    });

    registry.register_sync("not", |args, _ctx| {
        Ok(Some(Value::Bool(!truthy(arg(args, 0)))))
    });

    registry.register_sync("equals", |args, _ctx| {
        Ok(Some(Value::Bool(arg(args, 0) == arg(args, 1))))
    });

    registry.register_sync("is_blank", |args, _ctx| {
        let blank = match arg(args, 0) {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        };
        Ok(Some(Value::Bool(blank)))
    });

    registry.register_sync("has_value", |args, _ctx| {
        let defined = !matches!(arg(args, 0), Value::Null);
        Ok(Some(Value::Bool(defined)))
    });

    // First defined, non-null argument
    registry.register_sync("coalesce", |args, _ctx| {
        Ok(args.iter().find(|v| !v.is_null()).cloned())
    });

    registry.register_sync("concat", |args, _ctx| {
        let joined: String = args.iter().map(coerce_string).collect();
        Ok(Some(Value::String(joined)))
    });

    registry.register_sync("length", |args, _ctx| {
        let len = match arg(args, 0) {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            _ => 0,
        };
        Ok(Some(Value::from(len)))
    });

    // Effect: write a named value into the request data bag.
    // Args: key, value.
    registry.register_sync("set_data", |args, ctx| {
        match arg(args, 0) {
            Value::String(key) => {
                ctx.set_data(key.clone(), arg(args, 1).clone());
                Ok(None)
            }
            other => Err(FunctionError::Failed(format!(
                "set_data expects a string key, got {other}"
            ))),
        }
    });

    // Effect: append an action-sourced answer mutation.
    // Args: code, value.
    registry.register_sync("set_answer", |args, ctx| {
        match arg(args, 0) {
            Value::String(code) => {
                ctx.push_action_answer(code, Some(arg(args, 1).clone()));
                Ok(None)
            }
            other => Err(FunctionError::Failed(format!(
                "set_answer expects a string code, got {other}"
            ))),
        }
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_table() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
        assert!(!truthy_opt(&None));
    }

    #[test]
    fn coerce_string_renders_json_for_composites() {
        assert_eq!(coerce_string(&json!("s")), "s");
        assert_eq!(coerce_string(&Value::Null), "");
        assert_eq!(coerce_string(&json!(3)), "3");
        assert_eq!(coerce_string(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn unknown_functions_are_conservatively_async() {
        let registry = FunctionRegistry::with_builtins();
        assert!(!registry.is_async("trim"));
        assert!(registry.is_async("no_such_fn"));
    }

    #[test]
    fn builtin_catalogue_is_registered() {
        let registry = FunctionRegistry::with_builtins();
        for name in [
            "trim",
            "uppercase",
            "lowercase",
            "not",
            "equals",
            "is_blank",
            "has_value",
            "coalesce",
            "concat",
            "length",
            "set_data",
            "set_answer",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin '{name}'");
        }
    }
}
