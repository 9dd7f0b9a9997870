//! The thunk handler protocol.
//!
//! Every node id has a handler implementing its semantics. Handlers expose
//! two execution modes: `evaluate` (async, always available) and
//! `evaluate_sync` (only meaningful when the node's whole dependency chain
//! is synchronous). Whether a node is async is not declared by the author;
//! it is computed here by a fixpoint over the dependency relation during
//! graph finalisation.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::context::EvalContext;
use crate::error::{Outcome, ThunkError};
use crate::graph::{DependencyGraph, EdgeKind};
use crate::invoker::Invoker;
use crate::node_id::NodeId;

// ============================================================================
// HANDLER TRAIT
// ============================================================================

/// Evaluator for a single node id
#[async_trait]
pub trait ThunkHandler: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// Declared dependencies, in evaluation order. Wired dependencies
    /// (reference targets, transition producers) come from the graph and
    /// are unioned in during finalisation.
    fn dependencies(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// Dependencies that may legitimately form a cycle through iteration
    /// (collection templates). Excluded from cycle detection.
    fn iteration_dependencies(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// True when the handler itself suspends, regardless of dependencies
    fn intrinsically_async(&self) -> bool {
        false
    }

    /// Async policy: async iff the handler suspends on its own or any
    /// dependency is async. Handlers may override with a stricter rule.
    fn compute_is_async(&self, any_dependency_async: bool) -> bool {
        self.intrinsically_async() || any_dependency_async
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome;

    /// Synchronous twin, called only when finalisation marked the node
    /// sync. The default refuses.
    fn evaluate_sync(&self, _ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
        Outcome::err(ThunkError::not_sync(self.node_id()))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Node id -> handler, plus the computed async flags
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeId, Arc<dyn ThunkHandler>>,
    async_flags: HashMap<NodeId, bool>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("async_flags", &self.async_flags)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its node id. A later registration for the
    /// same id overrides the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ThunkHandler>) {
        self.handlers.insert(handler.node_id().clone(), handler);
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<dyn ThunkHandler>> {
        self.handlers.get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Computed async flag. Nodes the fixpoint never saw are conservatively
    /// async.
    pub fn is_async(&self, id: &NodeId) -> bool {
        self.async_flags.get(id).copied().unwrap_or(true)
    }

    /// Effective dependency set: declared order first, then wired data-flow
    /// producers not already declared.
    fn effective_deps(&self, id: &NodeId, graph: &DependencyGraph) -> Vec<NodeId> {
        let handler = match self.handlers.get(id) {
            Some(h) => h,
            None => return Vec::new(),
        };
        let mut deps = handler.dependencies();
        for wired in graph.producers_of(id, EdgeKind::DataFlow) {
            if !deps.contains(&wired) {
                deps.push(wired);
            }
        }
        deps
    }

    /// Compute `is_async` for every registered node.
    ///
    /// A node is sync iff all of its dependencies are sync and it does not
    /// suspend itself. Unresolvable dependencies count as async. Cycles
    /// outside iteration mark every participant async.
    pub fn finalize(&mut self, graph: &DependencyGraph) {
        let ids: Vec<NodeId> = self.handlers.keys().cloned().collect();

        let cyclic = self.find_cycles(&ids, graph);

        // Start from intrinsic flags, forced-async cycle members and
        // unresolvable dependencies
        let mut flags: HashMap<NodeId, bool> = HashMap::with_capacity(ids.len());
        for id in &ids {
            let handler = &self.handlers[id];
            let missing_dep = self
                .effective_deps(id, graph)
                .iter()
                .any(|d| !self.handlers.contains_key(d));
            flags.insert(
                id.clone(),
                handler.intrinsically_async() || cyclic.contains(id) || missing_dep,
            );
        }

        // Monotone propagation to fixpoint
        loop {
            let mut changed = false;
            for id in &ids {
                if flags[id] {
                    continue;
                }
                let any_dep_async = self
                    .effective_deps(id, graph)
                    .iter()
                    .any(|d| flags.get(d).copied().unwrap_or(true));
                if self.handlers[id].compute_is_async(any_dep_async) {
                    flags.insert(id.clone(), true);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.async_flags = flags;
    }

    /// Nodes on a dependency cycle, ignoring iteration edges
    fn find_cycles(&self, ids: &[NodeId], graph: &DependencyGraph) -> HashSet<NodeId> {
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(ids.len());
        for id in ids {
            let iteration: HashSet<NodeId> = self.handlers[id]
                .iteration_dependencies()
                .into_iter()
                .collect();
            let deps: Vec<NodeId> = self
                .effective_deps(id, graph)
                .into_iter()
                .filter(|d| !iteration.contains(d))
                .filter(|d| self.handlers.contains_key(d))
                .collect();
            adjacency.insert(id.clone(), deps);
        }

        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color: HashMap<NodeId, u8> =
            ids.iter().map(|id| (id.clone(), WHITE)).collect();
        let mut cyclic: HashSet<NodeId> = HashSet::new();

        for start in ids {
            if color[start] != WHITE {
                continue;
            }
            // Iterative DFS; frames are (node, next dependency index)
            let mut stack: Vec<(NodeId, usize)> = vec![(start.clone(), 0)];
            color.insert(start.clone(), GRAY);

            while let Some((node, idx)) = stack.last().cloned() {
                let deps = adjacency.get(&node).cloned().unwrap_or_default();
                if idx >= deps.len() {
                    color.insert(node, BLACK);
                    stack.pop();
                    continue;
                }
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }

                let dep = deps[idx].clone();
                match color.get(&dep).copied().unwrap_or(BLACK) {
                    WHITE => {
                        color.insert(dep.clone(), GRAY);
                        stack.push((dep, 0));
                    }
                    GRAY => {
                        // Back edge: everything from `dep` up the stack is
                        // on the cycle
                        let mut in_cycle = false;
                        for (frame, _) in stack.iter() {
                            if *frame == dep {
                                in_cycle = true;
                            }
                            if in_cycle {
                                cyclic.insert(frame.clone());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        cyclic
    }
}

// ============================================================================
// TESTS
// ============================================================================
