//! Handler implementations, one per node kind.
//!
//! `for_node` is the default type-to-handler assignment used by the
//! compiler; per-id overrides are layered on top at registration time.

mod answer;
mod collection;
mod conditional;
mod format;
mod function;
mod input;
mod reference;
mod structure;

pub use answer::{AnswerLocalHandler, AnswerRemoteHandler};
pub use collection::CollectionHandler;
pub use conditional::ConditionalHandler;
pub use format::FormatHandler;
pub use function::FunctionExprHandler;
pub use input::{DataHandler, LiteralHandler, ParamsHandler, PostHandler};
pub use reference::ReferenceHandler;
pub use structure::{BlockHandler, FieldHandler};

use serde_json::Value;
use std::sync::Arc;

use crate::error::ThunkError;
use crate::functions::FunctionRegistry;
use crate::handler::ThunkHandler;
use crate::node::{Node, NodeKind};
use crate::node_id::NodeId;
use crate::safety::ensure_safe_key;

/// Default handler for a node, by its type
pub fn for_node(node: &Node, functions: &Arc<FunctionRegistry>) -> Arc<dyn ThunkHandler> {
    match &node.kind {
        NodeKind::Field(f) => Arc::new(FieldHandler::new(node.id.clone(), f.answer.clone())),
        NodeKind::Block(b) => Arc::new(BlockHandler::new(node.id.clone(), b.children.clone())),
        NodeKind::Literal(v) => Arc::new(LiteralHandler::new(node.id.clone(), v.clone())),
        NodeKind::Reference(r) => {
            Arc::new(ReferenceHandler::new(node.id.clone(), r.path.clone()))
        }
        NodeKind::Function(f) => Arc::new(FunctionExprHandler::new(
            node.id.clone(),
            f.name.clone(),
            f.args.clone(),
            Arc::clone(functions),
        )),
        NodeKind::Conditional(c) => Arc::new(ConditionalHandler::new(
            node.id.clone(),
            c.when.clone(),
            c.then_branch.clone(),
            c.else_branch.clone(),
        )),
        NodeKind::Format(f) => Arc::new(FormatHandler::new(
            node.id.clone(),
            f.template.clone(),
            f.args.clone(),
        )),
        NodeKind::Collection(c) => Arc::new(CollectionHandler::new(
            node.id.clone(),
            c.collection.clone(),
            c.templates.clone(),
            c.fallback.clone(),
        )),
        NodeKind::Post(p) => Arc::new(PostHandler::new(node.id.clone(), p.field.clone())),
        NodeKind::Params(p) => Arc::new(ParamsHandler::new(node.id.clone(), p.name.clone())),
        NodeKind::AnswerLocal(a) => {
            Arc::new(AnswerLocalHandler::new(node.id.clone(), a.field.clone()))
        }
        NodeKind::AnswerRemote(a) => {
            Arc::new(AnswerRemoteHandler::new(node.id.clone(), a.code.clone()))
        }
        NodeKind::Data(d) => Arc::new(DataHandler::new(node.id.clone(), d.key.clone())),
    }
}

/// Property-path traversal through a resolved value.
///
/// Each segment is safe-key checked; object segments index fields, numeric
/// segments index arrays. A missing step resolves to undefined rather than
/// an error.
pub(crate) fn traverse(
    value: Option<Value>,
    segments: &[String],
    node_id: &NodeId,
) -> Result<Option<Value>, ThunkError> {
    let mut current = value;
    for segment in segments {
        ensure_safe_key(segment, node_id)?;
        current = match current {
            Some(v) => {
                if let Ok(index) = segment.parse::<usize>() {
                    v.get(index).cloned()
                } else {
                    v.get(segment).cloned()
                }
            }
            None => None,
        };
        if current.is_none() {
            break;
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> NodeId {
        NodeId::from_raw("compile_ast:1")
    }

    #[test]
    fn traverse_objects_and_arrays() {
        let value = json!({"items": [{"name": "first"}, {"name": "second"}]});
        let path = ["items".to_string(), "1".to_string(), "name".to_string()];
        let out = traverse(Some(value), &path, &id()).unwrap();
        assert_eq!(out, Some(json!("second")));
    }

    #[test]
    fn traverse_missing_step_is_undefined() {
        let value = json!({"a": 1});
        let out = traverse(Some(value), &["b".to_string()], &id()).unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn traverse_rejects_unsafe_segments() {
        let value = json!({"a": 1});
        let out = traverse(Some(value), &["__proto__".to_string()], &id());
        assert!(out.is_err());
    }
}
