//! Node registry: typed lookup of nodes by id and by node type.
//!
//! The compile-time registry is built once per form and shared read-only
//! across requests. Runtime-node expansion never touches it; the evaluation
//! context layers a per-request overlay on top (see `context`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::node::{Node, NodeType};
use crate::node_id::NodeId;

/// Lookup surface shared by the compile-time registry and the per-request
/// context view. Wiring runs against either.
pub trait NodeLookup {
    fn node(&self, id: &NodeId) -> Option<Arc<Node>>;

    /// Nodes of one type, in insertion order
    fn nodes_of_type(&self, node_type: NodeType) -> Vec<Arc<Node>>;
}

/// Compile-time node store, insertion ordered
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, Arc<Node>>,
    order: Vec<NodeId>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Re-inserting an existing id is rejected; ids are
    /// unique within a graph snapshot.
    pub fn insert(&mut self, node: Node) -> Result<(), DuplicateNode> {
        let id = node.id.clone();
        if self.nodes.contains_key(&id) {
            return Err(DuplicateNode(id));
        }
        self.nodes.insert(id.clone(), Arc::new(node));
        self.order.push(id);
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.nodes.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = Arc<Node>> + '_ {
        self.order.iter().filter_map(|id| self.nodes.get(id).cloned())
    }

    pub fn find_by_type(&self, node_type: NodeType) -> Vec<Arc<Node>> {
        self.iter()
            .filter(|n| n.node_type() == node_type)
            .collect()
    }
}

impl NodeLookup for NodeRegistry {
    fn node(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.get(id)
    }

    fn nodes_of_type(&self, node_type: NodeType) -> Vec<Arc<Node>> {
        self.find_by_type(node_type)
    }
}

/// A node id was inserted twice
#[derive(Debug, thiserror::Error)]
#[error("node id '{0}' already registered")]
pub struct DuplicateNode(pub NodeId);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeKind, ParamsNode, ReferenceNode};
    use crate::node_id::{IdCategory, IdGenerator};

    fn reference(ids: &IdGenerator, path: &[&str]) -> Node {
        Node::new(
            ids.next(IdCategory::CompileAst),
            NodeKind::Reference(ReferenceNode {
                path: path.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    #[test]
    fn get_after_insert() {
        let ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();
        let node = reference(&ids, &["params", "journey_id"]);
        let id = node.id.clone();
        registry.insert(node).unwrap();

        assert!(registry.get(&id).is_some());
        assert!(registry.get(&ids.next(IdCategory::CompileAst)).is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();
        let node = reference(&ids, &["params", "a"]);
        let dup = Node::new(node.id.clone(), node.kind.clone());

        registry.insert(node).unwrap();
        assert!(registry.insert(dup).is_err());
    }

    #[test]
    fn find_by_type_preserves_insertion_order() {
        let ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();

        let first = reference(&ids, &["post", "a"]);
        let pseudo = Node::new(
            ids.next(IdCategory::CompilePseudo),
            NodeKind::Params(ParamsNode { name: "k".into() }),
        );
        let second = reference(&ids, &["post", "b"]);

        let first_id = first.id.clone();
        let second_id = second.id.clone();
        registry.insert(first).unwrap();
        registry.insert(pseudo).unwrap();
        registry.insert(second).unwrap();

        let refs = registry.find_by_type(NodeType::Reference);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, first_id);
        assert_eq!(refs[1].id, second_id);
    }
}
