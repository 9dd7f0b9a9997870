//! The wiring phase: turning references into explicit edges.
//!
//! One wirer per pseudo-node kind. Each produces two classes of edges:
//!
//! - **Producer edges** into the pseudo-node, from whatever makes its value
//!   available: lifecycle transitions for remote answers and data, the POST
//!   pseudo-node / default / formatters / dependent for local answers.
//!   PARAMS and POST have no in-graph producers; their values come from the
//!   request itself.
//! - **Consumer edges** from the pseudo-node to every reference expression
//!   that reads it.
//!
//! `wire` covers the full graph; `wire_nodes` is the surgical form for
//! nodes introduced mid-request, handling new pseudo-nodes and new
//! references independently. Edge idempotency comes from the graph.
//!
//! References whose path is too short or whose key matches no pseudo-node
//! are silently left unwired; reading them later is an evaluation error,
//! not a wiring one.

use serde_json::json;
use std::sync::Arc;

use crate::graph::{DependencyGraph, EdgeKind};
use crate::node::{Node, NodeKind, NodeType};
use crate::node_id::NodeId;
use crate::registry::NodeLookup;

// ============================================================================
// TRANSITIONS
// ============================================================================

/// Lifecycle slot an effect runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Runs before field resolution
    Load,
    /// Runs after a valid POST
    Action,
}

/// Where an effect declares it writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Answer(String),
    Data(String),
}

impl WriteTarget {
    /// Parse `answers.<code>` / `data.<key>` declarations
    pub fn parse(raw: &str) -> Option<Self> {
        let (domain, key) = raw.split_once('.')?;
        if key.is_empty() {
            return None;
        }
        match domain {
            "answers" => Some(WriteTarget::Answer(key.to_string())),
            "data" => Some(WriteTarget::Data(key.to_string())),
            _ => None,
        }
    }
}

/// One effect node with its declared writes
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub effect: NodeId,
    pub kind: TransitionKind,
    pub writes: Vec<WriteTarget>,
}

// ============================================================================
// WIRING CONTEXT
// ============================================================================

/// Everything a wirer needs to see
pub struct WiringContext<'a> {
    pub lookup: &'a dyn NodeLookup,
    pub graph: &'a DependencyGraph,
    pub transitions: &'a [TransitionPlan],
}

/// References reading `<domain>.<key>`, in registry order.
///
/// Paths shorter than two segments never match; that is the
/// authored-reference-to-unknown-input case handled at read time.
pub fn find_reference_nodes(
    lookup: &dyn NodeLookup,
    domain: &str,
    key: &str,
) -> Vec<Arc<Node>> {
    lookup
        .nodes_of_type(NodeType::Reference)
        .into_iter()
        .filter(|node| {
            node.as_reference()
                .map(|r| r.path.len() >= 2 && r.path[0] == domain && r.path[1] == key)
                .unwrap_or(false)
        })
        .collect()
}

// ============================================================================
// WIRER PROTOCOL
// ============================================================================

/// Edge producer for one pseudo-node kind
pub trait Wirer {
    /// The pseudo-node kind this wirer owns
    fn node_type(&self) -> NodeType;

    /// Wire the full graph
    fn wire(&self, w: &WiringContext<'_>) {
        for pseudo in w.lookup.nodes_of_type(self.node_type()) {
            self.wire_pseudo(w, &pseudo);
        }
    }

    /// Scoped wiring for newly introduced nodes. New pseudo-nodes of this
    /// kind and new references arrive independently; both directions are
    /// handled without duplicating existing edges.
    fn wire_nodes(&self, w: &WiringContext<'_>, ids: &[NodeId]) {
        for id in ids {
            let Some(node) = w.lookup.node(id) else { continue };
            if node.node_type() == self.node_type() {
                self.wire_pseudo(w, &node);
            } else if node.node_type() == NodeType::Reference {
                self.wire_reference(w, &node);
            }
        }
    }

    /// All edges for one pseudo-node of this kind
    fn wire_pseudo(&self, w: &WiringContext<'_>, pseudo: &Node);

    /// Edges from existing pseudo-nodes of this kind to one new reference
    fn wire_reference(&self, w: &WiringContext<'_>, reference: &Node);
}

/// Consumer edges from `pseudo` to every reference reading `domain.key`
fn wire_consumers(w: &WiringContext<'_>, pseudo: &Node, domain: &str, key: &str) {
    for reference in find_reference_nodes(w.lookup, domain, key) {
        w.graph
            .add_edge(&pseudo.id, &reference.id, EdgeKind::DataFlow, None);
    }
}

/// The `domain.key` a reference reads, if it is well formed
fn reference_key<'a>(reference: &'a Node, domain: &str) -> Option<&'a str> {
    reference
        .as_reference()
        .filter(|r| r.path.len() >= 2 && r.path[0] == domain)
        .map(|r| r.path[1].as_str())
}

/// Transition producer edges into `pseudo` for effects writing `target`
fn wire_transition_producers(
    w: &WiringContext<'_>,
    pseudo: &Node,
    kind: TransitionKind,
    target: &WriteTarget,
) {
    for transition in w.transitions.iter().filter(|t| t.kind == kind) {
        if transition.writes.contains(target) {
            let metadata = match target {
                WriteTarget::Answer(code) => json!({ "write": format!("answers.{code}") }),
                WriteTarget::Data(key) => json!({ "write": format!("data.{key}") }),
            };
            w.graph.add_edge(
                &transition.effect,
                &pseudo.id,
                EdgeKind::Transition,
                Some(metadata),
            );
        }
    }
}

// ============================================================================
// PARAMS
// ============================================================================

/// URL parameters: no producers, consumers are `params.<name>` references
pub struct ParamsWirer;

impl Wirer for ParamsWirer {
    fn node_type(&self) -> NodeType {
        NodeType::Params
    }

    fn wire_pseudo(&self, w: &WiringContext<'_>, pseudo: &Node) {
        if let NodeKind::Params(p) = &pseudo.kind {
            wire_consumers(w, pseudo, "params", &p.name);
        }
    }

    fn wire_reference(&self, w: &WiringContext<'_>, reference: &Node) {
        let Some(key) = reference_key(reference, "params") else { return };
        for pseudo in w.lookup.nodes_of_type(NodeType::Params) {
            if matches!(&pseudo.kind, NodeKind::Params(p) if p.name == key) {
                w.graph
                    .add_edge(&pseudo.id, &reference.id, EdgeKind::DataFlow, None);
            }
        }
    }
}

// ============================================================================
// POST
// ============================================================================

/// Request body: no in-graph producers; consumers are `post.<field>`
/// references and the field's ANSWER_LOCAL pseudo-node
pub struct PostWirer;

impl Wirer for PostWirer {
    fn node_type(&self) -> NodeType {
        NodeType::Post
    }

    fn wire_pseudo(&self, w: &WiringContext<'_>, pseudo: &Node) {
        let NodeKind::Post(p) = &pseudo.kind else { return };
        wire_consumers(w, pseudo, "post", &p.field);

        for answer in w.lookup.nodes_of_type(NodeType::AnswerLocal) {
            if matches!(&answer.kind, NodeKind::AnswerLocal(a) if a.code == p.field) {
                w.graph
                    .add_edge(&pseudo.id, &answer.id, EdgeKind::DataFlow, None);
            }
        }
    }

    fn wire_reference(&self, w: &WiringContext<'_>, reference: &Node) {
        let Some(key) = reference_key(reference, "post") else { return };
        for pseudo in w.lookup.nodes_of_type(NodeType::Post) {
            if matches!(&pseudo.kind, NodeKind::Post(p) if p.field == key) {
                w.graph
                    .add_edge(&pseudo.id, &reference.id, EdgeKind::DataFlow, None);
            }
        }
    }
}

// ============================================================================
// ANSWER LOCAL
// ============================================================================

/// A field's answer: produced by its POST pseudo-node, default, formatters,
/// dependent expression and action effects; consumed by `answers.<code>`
/// references
pub struct AnswerLocalWirer;

impl Wirer for AnswerLocalWirer {
    fn node_type(&self) -> NodeType {
        NodeType::AnswerLocal
    }

    fn wire_pseudo(&self, w: &WiringContext<'_>, pseudo: &Node) {
        let NodeKind::AnswerLocal(a) = &pseudo.kind else { return };

        if let Some(field_node) = w.lookup.node(&a.field) {
            if let Some(field) = field_node.as_field() {
                for post in w.lookup.nodes_of_type(NodeType::Post) {
                    if matches!(&post.kind, NodeKind::Post(p) if p.field == field.code) {
                        w.graph
                            .add_edge(&post.id, &pseudo.id, EdgeKind::DataFlow, None);
                    }
                }
                if let Some(default) = &field.default_value {
                    w.graph
                        .add_edge(default, &pseudo.id, EdgeKind::DataFlow, None);
                }
                for formatter in &field.formatters {
                    w.graph
                        .add_edge(formatter, &pseudo.id, EdgeKind::DataFlow, None);
                }
                if let Some(dependent) = &field.dependent {
                    w.graph
                        .add_edge(dependent, &pseudo.id, EdgeKind::DataFlow, None);
                }
            }
        }

        wire_transition_producers(
            w,
            pseudo,
            TransitionKind::Action,
            &WriteTarget::Answer(a.code.clone()),
        );
        wire_consumers(w, pseudo, "answers", &a.code);
    }

    fn wire_reference(&self, w: &WiringContext<'_>, reference: &Node) {
        let Some(key) = reference_key(reference, "answers") else { return };
        for pseudo in w.lookup.nodes_of_type(NodeType::AnswerLocal) {
            if matches!(&pseudo.kind, NodeKind::AnswerLocal(a) if a.code == key) {
                w.graph
                    .add_edge(&pseudo.id, &reference.id, EdgeKind::DataFlow, None);
            }
        }
    }
}

// ============================================================================
// ANSWER REMOTE
// ============================================================================

/// Cross-step answers: produced by load transitions that declare the
/// write; consumed by `answers.<code>` references
pub struct AnswerRemoteWirer;

impl Wirer for AnswerRemoteWirer {
    fn node_type(&self) -> NodeType {
        NodeType::AnswerRemote
    }

    fn wire_pseudo(&self, w: &WiringContext<'_>, pseudo: &Node) {
        let NodeKind::AnswerRemote(a) = &pseudo.kind else { return };
        wire_transition_producers(
            w,
            pseudo,
            TransitionKind::Load,
            &WriteTarget::Answer(a.code.clone()),
        );
        wire_consumers(w, pseudo, "answers", &a.code);
    }

    fn wire_reference(&self, w: &WiringContext<'_>, reference: &Node) {
        let Some(key) = reference_key(reference, "answers") else { return };
        for pseudo in w.lookup.nodes_of_type(NodeType::AnswerRemote) {
            if matches!(&pseudo.kind, NodeKind::AnswerRemote(a) if a.code == key) {
                w.graph
                    .add_edge(&pseudo.id, &reference.id, EdgeKind::DataFlow, None);
            }
        }
    }
}

// ============================================================================
// DATA
// ============================================================================

/// Named request data: produced by load transitions; consumed by
/// `data.<key>` references
pub struct DataWirer;

impl Wirer for DataWirer {
    fn node_type(&self) -> NodeType {
        NodeType::Data
    }

    fn wire_pseudo(&self, w: &WiringContext<'_>, pseudo: &Node) {
        let NodeKind::Data(d) = &pseudo.kind else { return };
        wire_transition_producers(
            w,
            pseudo,
            TransitionKind::Load,
            &WriteTarget::Data(d.key.clone()),
        );
        wire_consumers(w, pseudo, "data", &d.key);
    }

    fn wire_reference(&self, w: &WiringContext<'_>, reference: &Node) {
        let Some(key) = reference_key(reference, "data") else { return };
        for pseudo in w.lookup.nodes_of_type(NodeType::Data) {
            if matches!(&pseudo.kind, NodeKind::Data(d) if d.key == key) {
                w.graph
                    .add_edge(&pseudo.id, &reference.id, EdgeKind::DataFlow, None);
            }
        }
    }
}

// ============================================================================
// DRIVERS
// ============================================================================

/// One wirer per pseudo-node kind
pub fn all_wirers() -> Vec<Box<dyn Wirer>> {
    vec![
        Box::new(ParamsWirer),
        Box::new(PostWirer),
        Box::new(AnswerLocalWirer),
        Box::new(AnswerRemoteWirer),
        Box::new(DataWirer),
    ]
}

/// Full-graph wiring
pub fn wire(w: &WiringContext<'_>) {
    for wirer in all_wirers() {
        wirer.wire(w);
    }
}

/// Scoped wiring for newly introduced nodes
pub fn wire_nodes(w: &WiringContext<'_>, ids: &[NodeId]) {
    for wirer in all_wirers() {
        wirer.wire_nodes(w, ids);
    }
}

// ============================================================================
// TESTS
// ============================================================================
