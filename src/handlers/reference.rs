//! Reference resolution.
//!
//! A reference path resolves in one of two ways:
//!
//! - Scope names (`@value`, `@index`, `@parent`) read the scope stack;
//!   `@parent` addresses the enclosing iteration frame, skipping formatter
//!   frames.
//! - Otherwise the first segment names an input domain (`post`, `params`,
//!   `answers`, `data`) and resolution goes through the pseudo-node wired
//!   to this reference during the wiring phase. No global search happens
//!   here; an unwired reference is the authored-reference-to-unknown-input
//!   case and errors at read time.
//!
//! The remainder of the path is property traversal through the resolved
//! value; pseudo-nodes always return the whole value for their key.

use async_trait::async_trait;

use crate::context::EvalContext;
use crate::error::{Outcome, ThunkError};
use crate::graph::EdgeKind;
use crate::handler::ThunkHandler;
use crate::handlers::traverse;
use crate::invoker::Invoker;
use crate::node::NodeType;
use crate::node_id::NodeId;

pub struct ReferenceHandler {
    id: NodeId,
    path: Vec<String>,
}

impl ReferenceHandler {
    pub fn new(id: NodeId, path: Vec<String>) -> Self {
        Self { id, path }
    }

    /// Pseudo-node kinds serving a path head
    fn domain_types(head: &str) -> Option<&'static [NodeType]> {
        match head {
            "post" => Some(&[NodeType::Post]),
            "params" => Some(&[NodeType::Params]),
            "answers" => Some(&[NodeType::AnswerLocal, NodeType::AnswerRemote]),
            "data" => Some(&[NodeType::Data]),
            _ => None,
        }
    }

    /// The wired producer serving this reference, if any
    fn wired_target(&self, ctx: &EvalContext, types: &[NodeType]) -> Option<NodeId> {
        ctx.producers_of(&self.id, EdgeKind::DataFlow)
            .into_iter()
            .find(|producer| {
                ctx.node(producer)
                    .map(|n| types.contains(&n.node_type()))
                    .unwrap_or(false)
            })
    }

    /// Scope resolution for `@`-prefixed heads
    fn resolve_scope(&self, ctx: &EvalContext) -> Outcome {
        let head = &self.path[0];
        let base = if head == "@parent" {
            ctx.scope.iteration_value(1)
        } else {
            ctx.scope.lookup(head)
        };
        match traverse(base, &self.path[1..], &self.id) {
            Ok(value) => Outcome::of(value),
            Err(error) => Outcome::err(error),
        }
    }

    fn finish(&self, target_outcome: Outcome) -> Outcome {
        if target_outcome.is_err() {
            return target_outcome;
        }
        let rest: &[String] = if self.path.len() > 2 {
            &self.path[2..]
        } else {
            &[]
        };
        match traverse(target_outcome.value, rest, &self.id) {
            Ok(value) => Outcome::of(value),
            Err(error) => Outcome::err(error),
        }
    }

    fn unwired(&self) -> Outcome {
        Outcome::err(ThunkError::evaluation_failed(
            &self.id,
            format!("reference '{}' has no wired input", self.path.join(".")),
        ))
    }
}

#[async_trait]
impl ThunkHandler for ReferenceHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let Some(head) = self.path.first() else {
            return Outcome::err(ThunkError::evaluation_failed(&self.id, "empty reference"));
        };
        if head.starts_with('@') {
            return self.resolve_scope(ctx);
        }
        let Some(types) = Self::domain_types(head) else {
            return self.unwired();
        };
        let Some(target) = self.wired_target(ctx, types) else {
            return self.unwired();
        };
        let outcome = invoker.invoke(&target, ctx).await;
        self.finish(outcome)
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let Some(head) = self.path.first() else {
            return Outcome::err(ThunkError::evaluation_failed(&self.id, "empty reference"));
        };
        if head.starts_with('@') {
            return self.resolve_scope(ctx);
        }
        let Some(types) = Self::domain_types(head) else {
            return self.unwired();
        };
        let Some(target) = self.wired_target(ctx, types) else {
            return self.unwired();
        };
        let outcome = invoker.invoke_sync(&target, ctx);
        self.finish(outcome)
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
    use crate::scope::ScopeFrame;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn context() -> EvalContext {
        EvalContext::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(DependencyGraph::new()),
            Arc::new(HandlerRegistry::new()),
            Arc::new(FunctionRegistry::new()),
            Arc::new(IdGenerator::new()),
            Request::get(),
            HashMap::new(),
        )
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scope_value_resolves_without_invocation() {
        let ctx = context();
        let _g = ctx
            .scope
            .push(ScopeFrame::iteration(json!({"name": "Ada"}), 0));

        let handler =
            ReferenceHandler::new(NodeId::from_raw("compile_ast:1"), path(&["@value", "name"]));
        let out = handler.evaluate_sync(&ctx, &Invoker::new());
        assert_eq!(out.value, Some(json!("Ada")));
    }

    #[test]
    fn parent_skips_formatter_frames() {
        let ctx = context();
        let _a = ctx.scope.push(ScopeFrame::iteration(json!("outer"), 0));
        let _b = ctx.scope.push(ScopeFrame::iteration(json!("inner"), 1));
        let _c = ctx.scope.push(ScopeFrame::formatter(Some(json!("fmt"))));

        let handler = ReferenceHandler::new(NodeId::from_raw("compile_ast:1"), path(&["@parent"]));
        assert_eq!(
            handler.evaluate_sync(&ctx, &Invoker::new()).value,
            Some(json!("outer"))
        );
    }

    #[test]
    fn scope_value_outside_scope_is_undefined() {
        let ctx = context();
        let handler = ReferenceHandler::new(NodeId::from_raw("compile_ast:1"), path(&["@value"]));
        let out = handler.evaluate_sync(&ctx, &Invoker::new());
        assert_eq!(out.value, None);
        assert!(!out.is_err());
    }

    #[test]
    fn unwired_reference_errors_at_read_time() {
        let ctx = context();
        let handler = ReferenceHandler::new(
            NodeId::from_raw("compile_ast:1"),
            path(&["params", "user_id"]),
        );
        let out = handler.evaluate_sync(&ctx, &Invoker::new());
        assert_eq!(
            out.error.map(|e| e.kind),
            Some(ErrorKind::EvaluationFailed)
        );
    }

    #[test]
    fn unknown_domain_errors() {
        let ctx = context();
        let handler =
            ReferenceHandler::new(NodeId::from_raw("compile_ast:1"), path(&["session", "k"]));
        assert!(handler.evaluate_sync(&ctx, &Invoker::new()).is_err());
    }
}
