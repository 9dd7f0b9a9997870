//! Handlers for environmental inputs and literals.
//!
//! All four are synchronous leaves: POST body fields, URL params, data-bag
//! entries and literal values. Pseudo-node handlers always return the whole
//! value for their key; nested access belongs to reference resolution.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::EvalContext;
use crate::error::Outcome;
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node_id::NodeId;
use crate::safety::ensure_safe_key;

// ============================================================================
// POST
// ============================================================================

/// Request-body value for one field
pub struct PostHandler {
    id: NodeId,
    field: String,
}

impl PostHandler {
    pub fn new(id: NodeId, field: String) -> Self {
        Self { id, field }
    }
}

#[async_trait]
impl ThunkHandler for PostHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        self.evaluate_sync(ctx, invoker)
    }

    fn evaluate_sync(&self, ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
        if let Err(error) = ensure_safe_key(&self.field, &self.id) {
            return Outcome::err(error);
        }
        Outcome::of(ctx.request.post.get(&self.field).cloned())
    }
}

// ============================================================================
// PARAMS
// ============================================================================

/// URL route parameter
pub struct ParamsHandler {
    id: NodeId,
    name: String,
}

impl ParamsHandler {
    pub fn new(id: NodeId, name: String) -> Self {
        Self { id, name }
    }
}

#[async_trait]
impl ThunkHandler for ParamsHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        self.evaluate_sync(ctx, invoker)
    }

    fn evaluate_sync(&self, ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
        if let Err(error) = ensure_safe_key(&self.name, &self.id) {
            return Outcome::err(error);
        }
        Outcome::of(
            ctx.request
                .params
                .get(&self.name)
                .map(|s| Value::String(s.clone())),
        )
    }
}

// ============================================================================
// DATA
// ============================================================================

/// Named value in the per-request data bag
pub struct DataHandler {
    id: NodeId,
    key: String,
}

impl DataHandler {
    pub fn new(id: NodeId, key: String) -> Self {
        Self { id, key }
    }
}

#[async_trait]
impl ThunkHandler for DataHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        self.evaluate_sync(ctx, invoker)
    }

    fn evaluate_sync(&self, ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
        if let Err(error) = ensure_safe_key(&self.key, &self.id) {
            return Outcome::err(error);
        }
        Outcome::of(ctx.data(&self.key))
    }
}

// ============================================================================
// LITERAL
// ============================================================================

/// Authored constant
pub struct LiteralHandler {
    id: NodeId,
    value: Value,
}

impl LiteralHandler {
    pub fn new(id: NodeId, value: Value) -> Self {
        Self { id, value }
    }
}

#[async_trait]
impl ThunkHandler for LiteralHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        self.evaluate_sync(ctx, invoker)
    }

    fn evaluate_sync(&self, _ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
        Outcome::value(self.value.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::functions::FunctionRegistry;
    use crate::graph::DependencyGraph;
    use crate::handler::HandlerRegistry;
    use crate::node_id::IdGenerator;
    use crate::registry::NodeRegistry;
    use crate::request::Request;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn context(request: Request) -> EvalContext {
        EvalContext::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(DependencyGraph::new()),
            Arc::new(HandlerRegistry::new()),
            Arc::new(FunctionRegistry::new()),
            Arc::new(IdGenerator::new()),
            request,
            HashMap::new(),
        )
    }

    #[test]
    fn post_returns_body_value_or_undefined() {
        let ctx = context(Request::post().with_field("email", "a@b"));
        let inv = Invoker::new();

        let present = PostHandler::new(NodeId::from_raw("compile_pseudo:1"), "email".into());
        assert_eq!(present.evaluate_sync(&ctx, &inv).value, Some(json!("a@b")));

        let absent = PostHandler::new(NodeId::from_raw("compile_pseudo:2"), "town".into());
        let out = absent.evaluate_sync(&ctx, &inv);
        assert_eq!(out.value, None);
        assert!(!out.is_err());
    }

    #[test]
    fn post_rejects_unsafe_field() {
        let ctx = context(Request::post());
        let handler =
            PostHandler::new(NodeId::from_raw("compile_pseudo:1"), "__proto__".into());
        let out = handler.evaluate_sync(&ctx, &Invoker::new());
        assert_eq!(
            out.error.map(|e| e.kind),
            Some(ErrorKind::SecurityViolation)
        );
    }

    #[test]
    fn params_values_are_strings() {
        let ctx = context(Request::get().with_param("journey_id", "j42"));
        let handler =
            ParamsHandler::new(NodeId::from_raw("compile_pseudo:1"), "journey_id".into());
        assert_eq!(
            handler.evaluate_sync(&ctx, &Invoker::new()).value,
            Some(json!("j42"))
        );
    }

    #[test]
    fn data_reads_the_request_bag() {
        let ctx = context(Request::get());
        ctx.set_data("weather", json!({"summary": "rain"}));

        let handler = DataHandler::new(NodeId::from_raw("compile_pseudo:1"), "weather".into());
        assert_eq!(
            handler.evaluate_sync(&ctx, &Invoker::new()).value,
            Some(json!({"summary": "rain"}))
        );
    }

    #[test]
    fn literal_returns_its_value() {
        let ctx = context(Request::get());
        let handler = LiteralHandler::new(NodeId::from_raw("compile_ast:1"), json!(["a", "b"]));
        assert_eq!(
            handler.evaluate_sync(&ctx, &Invoker::new()).value,
            Some(json!(["a", "b"]))
        );
    }
}
