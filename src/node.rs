//! Typed nodes of the form graph.
//!
//! Two top-level families share one namespace and one registry:
//!
//! - **AST nodes**, authored by the form builder: field blocks, step blocks,
//!   and expression nodes (literal, reference, function, conditional, format,
//!   collection).
//! - **Pseudo-nodes**, synthesised at compile time so environmental inputs
//!   (request body, URL params, answers, named data) are first-class graph
//!   participants with wired edges instead of ambient lookups.
//!
//! Nodes are immutable once inserted; everything mutable lives in the
//! per-request evaluation context.

use serde_json::Value;

use crate::node_id::NodeId;

// ============================================================================
// NODE TYPE TAG
// ============================================================================

/// Fieldless discriminant for registry queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Field,
    Block,
    Literal,
    Reference,
    Function,
    Conditional,
    Format,
    Collection,
    Post,
    Params,
    AnswerLocal,
    AnswerRemote,
    Data,
}

impl NodeType {
    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            NodeType::Post
                | NodeType::Params
                | NodeType::AnswerLocal
                | NodeType::AnswerRemote
                | NodeType::Data
        )
    }
}

// ============================================================================
// AST PAYLOADS
// ============================================================================

/// A form field block
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Answer code, unique across the form
    pub code: String,
    /// The field's ANSWER_LOCAL pseudo-node
    pub answer: NodeId,
    /// Expression node supplying the default, if any
    pub default_value: Option<NodeId>,
    /// Formatter expressions, applied in order on POST
    pub formatters: Vec<NodeId>,
    /// Condition gating the field; falsy clears the answer
    pub dependent: Option<NodeId>,
    /// HTML-escape string POST values unless explicitly opted out
    pub sanitize: bool,
}

/// A block with child slots (step roots)
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub children: Vec<NodeId>,
}

/// A reference expression, e.g. `answers.email` or `@value`
#[derive(Debug, Clone)]
pub struct ReferenceNode {
    /// Path segments; the first selects the input domain or a scope name
    pub path: Vec<String>,
}

/// A call into the external function registry
#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub name: String,
    pub args: Vec<NodeId>,
}

/// `when` / `then` / `else`; either branch may be absent
#[derive(Debug, Clone)]
pub struct ConditionalNode {
    pub when: NodeId,
    pub then_branch: Option<NodeId>,
    pub else_branch: Option<NodeId>,
}

/// Template substitution with `%1`, `%2`, ... placeholders
#[derive(Debug, Clone)]
pub struct FormatNode {
    pub template: String,
    pub args: Vec<NodeId>,
}

/// Iteration over an array-producing expression
#[derive(Debug, Clone)]
pub struct CollectionNode {
    pub collection: NodeId,
    /// Evaluated once per element with an iteration frame in scope
    pub templates: Vec<NodeId>,
    /// Emitted instead when the collection is empty or not an array
    pub fallback: Vec<NodeId>,
}

// ============================================================================
// PSEUDO PAYLOADS
// ============================================================================

/// Request-body input for one field
#[derive(Debug, Clone)]
pub struct PostNode {
    pub field: String,
}

/// URL route parameter
#[derive(Debug, Clone)]
pub struct ParamsNode {
    pub name: String,
}

/// A field's resolved answer on the current step
#[derive(Debug, Clone)]
pub struct AnswerLocalNode {
    /// The owning field block
    pub field: NodeId,
    pub code: String,
}

/// A cross-step answer, seeded or produced by transitions
#[derive(Debug, Clone)]
pub struct AnswerRemoteNode {
    pub code: String,
}

/// Named value in the per-request data bag
#[derive(Debug, Clone)]
pub struct DataNode {
    pub key: String,
}

// ============================================================================
// NODE
// ============================================================================

#[derive(Debug, Clone)]
pub enum NodeKind {
    Field(FieldNode),
    Block(BlockNode),
    Literal(Value),
    Reference(ReferenceNode),
    Function(FunctionNode),
    Conditional(ConditionalNode),
    Format(FormatNode),
    Collection(CollectionNode),
    Post(PostNode),
    Params(ParamsNode),
    AnswerLocal(AnswerLocalNode),
    AnswerRemote(AnswerRemoteNode),
    Data(DataNode),
}

/// One graph node: id plus typed payload
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self { id, kind }
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Field(_) => NodeType::Field,
            NodeKind::Block(_) => NodeType::Block,
            NodeKind::Literal(_) => NodeType::Literal,
            NodeKind::Reference(_) => NodeType::Reference,
            NodeKind::Function(_) => NodeType::Function,
            NodeKind::Conditional(_) => NodeType::Conditional,
            NodeKind::Format(_) => NodeType::Format,
            NodeKind::Collection(_) => NodeType::Collection,
            NodeKind::Post(_) => NodeType::Post,
            NodeKind::Params(_) => NodeType::Params,
            NodeKind::AnswerLocal(_) => NodeType::AnswerLocal,
            NodeKind::AnswerRemote(_) => NodeType::AnswerRemote,
            NodeKind::Data(_) => NodeType::Data,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.node_type().is_pseudo()
    }

    /// Reference payload, when this is a reference node
    pub fn as_reference(&self) -> Option<&ReferenceNode> {
        match &self.kind {
            NodeKind::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Field payload, when this is a field block
    pub fn as_field(&self) -> Option<&FieldNode> {
        match &self.kind {
            NodeKind::Field(f) => Some(f),
            _ => None,
        }
    }

    /// Declared dependencies in evaluation order.
    ///
    /// Wired edges (references to pseudo-nodes, transition producers) are
    /// not listed here; those come from the dependency graph.
    pub fn declared_dependencies(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Field(f) => vec![f.answer.clone()],
            NodeKind::Block(b) => b.children.clone(),
            NodeKind::Function(f) => f.args.clone(),
            NodeKind::Conditional(c) => {
                let mut deps = vec![c.when.clone()];
                deps.extend(c.then_branch.clone());
                deps.extend(c.else_branch.clone());
                deps
            }
            NodeKind::Format(f) => f.args.clone(),
            NodeKind::Collection(c) => {
                let mut deps = vec![c.collection.clone()];
                deps.extend(c.templates.iter().cloned());
                deps.extend(c.fallback.iter().cloned());
                deps
            }
            NodeKind::AnswerLocal(_) => Vec::new(),
            NodeKind::Literal(_)
            | NodeKind::Reference(_)
            | NodeKind::Post(_)
            | NodeKind::Params(_)
            | NodeKind::AnswerRemote(_)
            | NodeKind::Data(_) => Vec::new(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::{IdCategory, IdGenerator};

    #[test]
    fn type_tags_match_kinds() {
        let ids = IdGenerator::new();
        let node = Node::new(
            ids.next(IdCategory::CompilePseudo),
            NodeKind::Params(ParamsNode {
                name: "journey_id".into(),
            }),
        );
        assert_eq!(node.node_type(), NodeType::Params);
        assert!(node.is_pseudo());
    }

    #[test]
    fn conditional_dependencies_in_declared_order() {
        let ids = IdGenerator::new();
        let when = ids.next(IdCategory::CompileAst);
        let then_branch = ids.next(IdCategory::CompileAst);

        let node = Node::new(
            ids.next(IdCategory::CompileAst),
            NodeKind::Conditional(ConditionalNode {
                when: when.clone(),
                then_branch: Some(then_branch.clone()),
                else_branch: None,
            }),
        );
        assert_eq!(node.declared_dependencies(), vec![when, then_branch]);
    }

    #[test]
    fn references_declare_no_dependencies() {
        let ids = IdGenerator::new();
        let node = Node::new(
            ids.next(IdCategory::CompileAst),
            NodeKind::Reference(ReferenceNode {
                path: vec!["params".into(), "journey_id".into()],
            }),
        );
        assert!(node.declared_dependencies().is_empty());
    }
}
