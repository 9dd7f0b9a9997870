//! Dependency graph: directed edges with kinds and metadata.
//!
//! The wiring phase turns authored references into explicit edges so that
//! consumers can find producers without a global search at evaluation time.
//! The graph also feeds the sync/async fixpoint and diagnostics; it is not
//! an execution schedule.
//!
//! Interior locking lets wiring run against `&self`, both at compile time
//! and for the per-request overlay used by runtime-node expansion.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::node_id::NodeId;

// ============================================================================
// EDGES
// ============================================================================

/// What an edge means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// A value produced by the source is consumed by the target
    DataFlow,
    /// Ordering without a value
    Control,
    /// Load / action / access lifecycle
    Transition,
}

/// `producer -> consumer` with kind and optional metadata
#[derive(Debug, Clone)]
pub struct Edge {
    pub producer: NodeId,
    pub consumer: NodeId,
    pub kind: EdgeKind,
    pub metadata: Option<Value>,
}

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Debug, Default)]
struct GraphInner {
    edges: Vec<Edge>,
    /// (producer, consumer, kind) -> index into `edges`
    index: HashMap<(NodeId, NodeId, EdgeKind), usize>,
    /// producer -> edge indices, insertion order
    outgoing: HashMap<NodeId, Vec<usize>>,
    /// consumer -> edge indices, insertion order
    incoming: HashMap<NodeId, Vec<usize>>,
    nodes: Vec<NodeId>,
    node_set: HashSet<NodeId>,
}

/// Directed dependency graph over node ids
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Idempotent.
    pub fn add_node(&self, id: &NodeId) {
        let mut inner = self.inner.write();
        if inner.node_set.insert(id.clone()) {
            inner.nodes.push(id.clone());
        }
    }

    /// Add an edge. Idempotent on `(producer, consumer, kind)`; metadata
    /// from a later add overwrites (last writer wins, deterministically).
    pub fn add_edge(
        &self,
        producer: &NodeId,
        consumer: &NodeId,
        kind: EdgeKind,
        metadata: Option<Value>,
    ) {
        let mut inner = self.inner.write();
        let key = (producer.clone(), consumer.clone(), kind);
        if let Some(&idx) = inner.index.get(&key) {
            if metadata.is_some() {
                inner.edges[idx].metadata = metadata;
            }
            return;
        }

        let idx = inner.edges.len();
        inner.edges.push(Edge {
            producer: producer.clone(),
            consumer: consumer.clone(),
            kind,
            metadata,
        });
        inner.index.insert(key, idx);
        inner
            .outgoing
            .entry(producer.clone())
            .or_default()
            .push(idx);
        inner
            .incoming
            .entry(consumer.clone())
            .or_default()
            .push(idx);
    }

    pub fn contains_edge(&self, producer: &NodeId, consumer: &NodeId, kind: EdgeKind) -> bool {
        self.inner
            .read()
            .index
            .contains_key(&(producer.clone(), consumer.clone(), kind))
    }

    /// Producers feeding `consumer` through edges of `kind`, insertion order
    pub fn producers_of(&self, consumer: &NodeId, kind: EdgeKind) -> Vec<NodeId> {
        let inner = self.inner.read();
        inner
            .incoming
            .get(consumer)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &inner.edges[i])
                    .filter(|e| e.kind == kind)
                    .map(|e| e.producer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Consumers fed by `producer` through edges of `kind`, insertion order
    pub fn consumers_of(&self, producer: &NodeId, kind: EdgeKind) -> Vec<NodeId> {
        let inner = self.inner.read();
        inner
            .outgoing
            .get(producer)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &inner.edges[i])
                    .filter(|e| e.kind == kind)
                    .map(|e| e.consumer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All edges in insertion order
    pub fn edges(&self) -> Vec<Edge> {
        self.inner.read().edges.clone()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
