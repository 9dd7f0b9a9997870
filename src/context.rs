//! Per-request evaluation context.
//!
//! Created at request entry, discarded at request exit. Owns everything a
//! request mutates: the answer store, the data bag, the scope stack, the
//! memoisation map and the runtime-node overlay. The compiled artifacts
//! (node registry, dependency graph, handler registry, function registry)
//! are shared read-only behind `Arc`s.
//!
//! Runtime-node expansion writes into the overlay, never into the shared
//! structures, so requests stay independent without locking discipline.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::answers::{AnswerSeed, AnswerStore, MutationSource};
use crate::error::Outcome;
use crate::event_log::EventLog;
use crate::functions::FunctionRegistry;
use crate::graph::{DependencyGraph, EdgeKind};
use crate::handler::{HandlerRegistry, ThunkHandler};
use crate::node::{Node, NodeType};
use crate::node_id::{IdCategory, IdGenerator, NodeId};
use crate::registry::{NodeLookup, NodeRegistry};
use crate::request::Request;
use crate::scope::ScopeStack;

/// Request-scoped evaluation state
pub struct EvalContext {
    registry: Arc<NodeRegistry>,
    graph: Arc<DependencyGraph>,
    handlers: Arc<HandlerRegistry>,
    functions: Arc<FunctionRegistry>,
    ids: Arc<IdGenerator>,

    pub request: Request,
    pub answers: AnswerStore,
    pub scope: ScopeStack,
    pub events: EventLog,

    data: DashMap<String, Value>,
    memo: DashMap<(NodeId, String), Outcome>,

    // Runtime-node overlay
    runtime_nodes: DashMap<NodeId, Arc<Node>>,
    runtime_order: Mutex<Vec<NodeId>>,
    runtime_graph: DependencyGraph,
    runtime_handlers: DashMap<NodeId, Arc<dyn ThunkHandler>>,
    runtime_async: DashMap<NodeId, bool>,

    cancelled: AtomicBool,
}

impl EvalContext {
    pub fn new(
        registry: Arc<NodeRegistry>,
        graph: Arc<DependencyGraph>,
        handlers: Arc<HandlerRegistry>,
        functions: Arc<FunctionRegistry>,
        ids: Arc<IdGenerator>,
        request: Request,
        seed: HashMap<String, AnswerSeed>,
    ) -> Self {
        Self {
            registry,
            graph,
            handlers,
            functions,
            ids,
            request,
            answers: AnswerStore::seeded(seed),
            scope: ScopeStack::new(),
            events: EventLog::new(),
            data: DashMap::new(),
            memo: DashMap::new(),
            runtime_nodes: DashMap::new(),
            runtime_order: Mutex::new(Vec::new()),
            runtime_graph: DependencyGraph::new(),
            runtime_handlers: DashMap::new(),
            runtime_async: DashMap::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    // ------------------------------------------------------------------
    // Node lookup (compiled registry + runtime overlay)
    // ------------------------------------------------------------------

    pub fn node(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.runtime_nodes
            .get(id)
            .map(|n| Arc::clone(&n))
            .or_else(|| self.registry.get(id))
    }

    /// Insert a node created mid-request. Visible to subsequent lookups in
    /// this context only.
    pub fn insert_runtime_node(&self, node: Node) -> Arc<Node> {
        let id = node.id.clone();
        let node = Arc::new(node);
        self.runtime_nodes.insert(id.clone(), Arc::clone(&node));
        self.runtime_order.lock().push(id.clone());
        self.runtime_graph.add_node(&id);
        node
    }

    /// Allocate a runtime node id
    pub fn next_runtime_id(&self, category: IdCategory) -> NodeId {
        self.ids.next(category)
    }

    // ------------------------------------------------------------------
    // Handlers (compiled registry + runtime overlay)
    // ------------------------------------------------------------------

    pub fn handler(&self, id: &NodeId) -> Option<Arc<dyn ThunkHandler>> {
        self.runtime_handlers
            .get(id)
            .map(|h| Arc::clone(&h))
            .or_else(|| self.handlers.get(id))
    }

    /// Async flag, consulting the runtime overlay first
    pub fn is_async(&self, id: &NodeId) -> bool {
        if let Some(flag) = self.runtime_async.get(id) {
            return *flag;
        }
        self.handlers.is_async(id)
    }

    /// Register a handler for a runtime node. Its async flag is computed
    /// now from the flags of its dependencies; unknown dependencies count
    /// as async.
    pub fn register_runtime_handler(&self, handler: Arc<dyn ThunkHandler>) {
        let id = handler.node_id().clone();
        let mut deps = handler.dependencies();
        for wired in self.producers_of(&id, EdgeKind::DataFlow) {
            if !deps.contains(&wired) {
                deps.push(wired);
            }
        }
        let any_dep_async = deps.iter().any(|d| {
            if self.runtime_async.contains_key(d) || self.handlers.contains(d) {
                self.is_async(d)
            } else {
                true
            }
        });
        let flag = handler.compute_is_async(any_dep_async);
        self.runtime_async.insert(id.clone(), flag);
        self.runtime_handlers.insert(id, handler);
    }

    // ------------------------------------------------------------------
    // Graph queries (compiled graph + runtime overlay)
    // ------------------------------------------------------------------

    /// The per-request graph overlay; scoped wiring writes here
    pub fn runtime_graph(&self) -> &DependencyGraph {
        &self.runtime_graph
    }

    pub fn producers_of(&self, consumer: &NodeId, kind: EdgeKind) -> Vec<NodeId> {
        let mut producers = self.graph.producers_of(consumer, kind);
        for p in self.runtime_graph.producers_of(consumer, kind) {
            if !producers.contains(&p) {
                producers.push(p);
            }
        }
        producers
    }

    pub fn consumers_of(&self, producer: &NodeId, kind: EdgeKind) -> Vec<NodeId> {
        let mut consumers = self.graph.consumers_of(producer, kind);
        for c in self.runtime_graph.consumers_of(producer, kind) {
            if !consumers.contains(&c) {
                consumers.push(c);
            }
        }
        consumers
    }

    // ------------------------------------------------------------------
    // Data bag
    // ------------------------------------------------------------------

    pub fn data(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.clone())
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    // ------------------------------------------------------------------
    // Answers
    // ------------------------------------------------------------------

    /// Append an answer mutation and record it in the event log
    pub fn push_answer(&self, code: &str, value: Option<Value>, source: MutationSource) {
        self.answers.push(code, value.clone(), source);
        self.events.emit_mutation(code, source);
    }

    /// Effect entry point: an `action` write that protects the field
    pub fn push_action_answer(&self, code: &str, value: Option<Value>) {
        self.push_answer(code, value, MutationSource::Action);
    }

    // ------------------------------------------------------------------
    // Memoisation
    // ------------------------------------------------------------------

    /// Memoised outcome for `id` under the current scope key
    pub fn memo_get(&self, id: &NodeId) -> Option<Outcome> {
        let key = (id.clone(), self.scope.memo_key());
        self.memo.get(&key).map(|o| o.clone())
    }

    pub fn memo_insert(&self, id: &NodeId, outcome: Outcome) {
        let key = (id.clone(), self.scope.memo_key());
        self.memo.insert(key, outcome);
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Ask the evaluation to stop at the next handler boundary
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    /// Global bag exposed to the renderer and to external functions
    pub fn globals(&self) -> Value {
        let mut data = serde_json::Map::new();
        for entry in self.data.iter() {
            data.insert(entry.key().clone(), entry.value().clone());
        }
        serde_json::json!({
            "answers": self.answers.snapshot(),
            "data": Value::Object(data),
            "csrfToken": self.request.csrf_token,
        })
    }
}

impl NodeLookup for EvalContext {
    fn node(&self, id: &NodeId) -> Option<Arc<Node>> {
        EvalContext::node(self, id)
    }

    fn nodes_of_type(&self, node_type: NodeType) -> Vec<Arc<Node>> {
        let mut nodes = self.registry.find_by_type(node_type);
        let order = self.runtime_order.lock();
        for id in order.iter() {
            if let Some(node) = self.runtime_nodes.get(id) {
                if node.node_type() == node_type {
                    nodes.push(Arc::clone(&node));
                }
            }
        }
        nodes
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, ParamsNode, ReferenceNode};
    use serde_json::json;

    fn empty_context(request: Request) -> EvalContext {
        EvalContext::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(DependencyGraph::new()),
            Arc::new(HandlerRegistry::new()),
            Arc::new(FunctionRegistry::with_builtins()),
            Arc::new(IdGenerator::new()),
            request,
            HashMap::new(),
        )
    }

    #[test]
    fn runtime_nodes_visible_after_insert() {
        let ctx = empty_context(Request::get());
        let id = ctx.next_runtime_id(IdCategory::RuntimePseudo);
        assert!(ctx.node(&id).is_none());

        ctx.insert_runtime_node(Node::new(
            id.clone(),
            NodeKind::Params(ParamsNode { name: "k".into() }),
        ));
        assert!(ctx.node(&id).is_some());
        assert_eq!(ctx.nodes_of_type(NodeType::Params).len(), 1);
    }

    #[test]
    fn runtime_nodes_listed_after_compiled_ones() {
        let ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();
        let compiled = Node::new(
            ids.next(IdCategory::CompileAst),
            NodeKind::Reference(ReferenceNode {
                path: vec!["params".into(), "a".into()],
            }),
        );
        let compiled_id = compiled.id.clone();
        registry.insert(compiled).unwrap();

        let ctx = EvalContext::new(
            Arc::new(registry),
            Arc::new(DependencyGraph::new()),
            Arc::new(HandlerRegistry::new()),
            Arc::new(FunctionRegistry::new()),
            Arc::new(ids),
            Request::get(),
            HashMap::new(),
        );

        let runtime_id = ctx.next_runtime_id(IdCategory::RuntimeAst);
        ctx.insert_runtime_node(Node::new(
            runtime_id.clone(),
            NodeKind::Reference(ReferenceNode {
                path: vec!["params".into(), "b".into()],
            }),
        ));

        let refs = ctx.nodes_of_type(NodeType::Reference);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, compiled_id);
        assert_eq!(refs[1].id, runtime_id);
    }

    #[test]
    fn globals_carry_answers_data_and_token() {
        let ctx = empty_context(Request::get().with_csrf_token("tok-1"));
        ctx.push_answer("email", Some(json!("a@b")), MutationSource::Load);
        ctx.set_data("weather", json!({"summary": "sunny"}));

        let globals = ctx.globals();
        assert_eq!(globals["answers"]["email"]["current"], "a@b");
        assert_eq!(globals["data"]["weather"]["summary"], "sunny");
        assert_eq!(globals["csrfToken"], "tok-1");
    }

    #[test]
    fn push_answer_is_recorded_in_the_event_log() {
        let ctx = empty_context(Request::post());
        ctx.push_action_answer("town", Some(json!("Leeds")));

        assert_eq!(ctx.answers.last_source("town"), Some(MutationSource::Action));
        assert_eq!(ctx.events.filter_code("town").len(), 1);
    }

    #[test]
    fn cancellation_flag_round_trips() {
        let ctx = empty_context(Request::get());
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn memo_is_scope_sensitive() {
        let ctx = empty_context(Request::get());
        let id = ctx.next_runtime_id(IdCategory::RuntimeAst);

        ctx.memo_insert(&id, Outcome::value(json!("outer")));
        {
            let _g = ctx
                .scope
                .push(crate::scope::ScopeFrame::iteration(json!("x"), 0));
            assert!(ctx.memo_get(&id).is_none());
            ctx.memo_insert(&id, Outcome::value(json!("inner")));
        }
        assert_eq!(ctx.memo_get(&id), Some(Outcome::value(json!("outer"))));
    }
}
