//! Invocation adapter: dispatch to handlers with per-request memoisation.
//!
//! Errors propagate as values inside `Outcome`; the adapter never throws
//! through to callers. Memoisation is keyed by node id plus the current
//! scope key, so iteration and formatter bodies re-evaluate per binding
//! while step-level nodes resolve once per request.

use tracing::{debug, trace};

use crate::context::EvalContext;
use crate::error::{Outcome, ThunkError};
use crate::node_id::NodeId;

/// Stateless dispatcher; all mutable state lives in the context
#[derive(Debug, Clone, Copy, Default)]
pub struct Invoker;

impl Invoker {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a node, suspending where its handler suspends
    pub async fn invoke(&self, id: &NodeId, ctx: &EvalContext) -> Outcome {
        if ctx.is_cancelled() {
            return Outcome::err(ThunkError::cancelled(id));
        }
        if let Some(memoised) = ctx.memo_get(id) {
            trace!(node = %id, "memo hit");
            return memoised;
        }
        let handler = match ctx.handler(id) {
            Some(h) => h,
            None => {
                return Outcome::err(ThunkError::lookup_failed(
                    id,
                    "no handler registered for node",
                ))
            }
        };

        let outcome = handler.evaluate(ctx, self).await;
        if let Some(error) = &outcome.error {
            debug!(node = %id, kind = %error.kind, "evaluation returned an error");
        }
        ctx.events.emit_node_evaluated(id, false, outcome.is_err());
        ctx.memo_insert(id, outcome.clone());
        outcome
    }

    /// Strictly non-suspending evaluation.
    ///
    /// Nodes marked async by finalisation are refused with `NOT_SYNC`
    /// before their handler runs. The refusal is not memoised, so a later
    /// async `invoke` still evaluates the node.
    pub fn invoke_sync(&self, id: &NodeId, ctx: &EvalContext) -> Outcome {
        if ctx.is_cancelled() {
            return Outcome::err(ThunkError::cancelled(id));
        }
        if let Some(memoised) = ctx.memo_get(id) {
            trace!(node = %id, "memo hit");
            return memoised;
        }
        if ctx.is_async(id) {
            return Outcome::err(ThunkError::not_sync(id));
        }
        let handler = match ctx.handler(id) {
            Some(h) => h,
            None => {
                return Outcome::err(ThunkError::lookup_failed(
                    id,
                    "no handler registered for node",
                ))
            }
        };

        let outcome = handler.evaluate_sync(ctx, self);
        if let Some(error) = &outcome.error {
            debug!(node = %id, kind = %error.kind, "evaluation returned an error");
        }
        ctx.events.emit_node_evaluated(id, true, outcome.is_err());
        ctx.memo_insert(id, outcome.clone());
        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::AnswerSeed;
    use crate::error::ErrorKind;
    use crate::functions::FunctionRegistry;
    use crate::graph::DependencyGraph;
    use crate::handler::{HandlerRegistry, ThunkHandler};
    use crate::node_id::IdGenerator;
    use crate::registry::NodeRegistry;
    use crate::request::Request;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        id: NodeId,
        calls: Arc<AtomicUsize>,
        asynchronous: bool,
    }

    #[async_trait]
    impl ThunkHandler for CountingHandler {
        fn node_id(&self) -> &NodeId {
            &self.id
        }

        fn intrinsically_async(&self) -> bool {
            self.asynchronous
        }

        async fn evaluate(&self, _ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Outcome::value(json!("evaluated"))
        }

        fn evaluate_sync(&self, _ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Outcome::value(json!("evaluated"))
        }
    }

    fn context_with(handlers: HandlerRegistry) -> EvalContext {
        EvalContext::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(DependencyGraph::new()),
            Arc::new(handlers),
            Arc::new(FunctionRegistry::new()),
            Arc::new(IdGenerator::new()),
            Request::get(),
            HashMap::<String, AnswerSeed>::new(),
        )
    }

    fn counting(id: &str, asynchronous: bool) -> (Arc<CountingHandler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            id: NodeId::from_raw(id),
            calls: Arc::clone(&calls),
            asynchronous,
        });
        (handler, calls)
    }

    #[tokio::test]
    async fn results_are_memoised_within_a_request() {
        let (handler, calls) = counting("compile_ast:1", false);
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        registry.finalize(&DependencyGraph::new());
        let ctx = context_with(registry);

        let id = NodeId::from_raw("compile_ast:1");
        let inv = Invoker::new();
        let first = inv.invoke(&id, &ctx).await;
        let second = inv.invoke(&id, &ctx).await;

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_node_is_lookup_failed() {
        let ctx = context_with(HandlerRegistry::new());
        let out = Invoker::new()
            .invoke(&NodeId::from_raw("compile_ast:404"), &ctx)
            .await;
        assert_eq!(out.error.map(|e| e.kind), Some(ErrorKind::LookupFailed));
    }

    #[test]
    fn sync_entry_refuses_async_nodes_without_memoising() {
        let (handler, calls) = counting("compile_ast:1", true);
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        registry.finalize(&DependencyGraph::new());
        let ctx = context_with(registry);

        let id = NodeId::from_raw("compile_ast:1");
        let inv = Invoker::new();
        let out = inv.invoke_sync(&id, &ctx);
        assert_eq!(out.error.as_ref().map(|e| e.kind), Some(ErrorKind::NotSync));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert!(ctx.memo_get(&id).is_none());
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let (handler, calls) = counting("compile_ast:1", false);
        let mut registry = HandlerRegistry::new();
        registry.register(handler);
        registry.finalize(&DependencyGraph::new());
        let ctx = context_with(registry);
        ctx.cancel();

        let out = Invoker::new()
            .invoke(&NodeId::from_raw("compile_ast:1"), &ctx)
            .await;
        assert_eq!(out.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}
