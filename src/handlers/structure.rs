//! Structural nodes: field blocks and step blocks.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::EvalContext;
use crate::error::Outcome;
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node_id::NodeId;

/// A field block resolves to its answer; the state machine lives behind
/// the wired ANSWER_LOCAL pseudo-node.
pub struct FieldHandler {
    id: NodeId,
    answer: NodeId,
}

impl FieldHandler {
    pub fn new(id: NodeId, answer: NodeId) -> Self {
        Self { id, answer }
    }
}

#[async_trait]
impl ThunkHandler for FieldHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn dependencies(&self) -> Vec<NodeId> {
        vec![self.answer.clone()]
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        invoker.invoke(&self.answer, ctx).await
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        invoker.invoke_sync(&self.answer, ctx)
    }
}

/// A block evaluates its children in order and collects their values.
/// A child error does not abort the block; the failing child contributes
/// null and its error stays visible on the child's own outcome.
pub struct BlockHandler {
    id: NodeId,
    children: Vec<NodeId>,
}

impl BlockHandler {
    pub fn new(id: NodeId, children: Vec<NodeId>) -> Self {
        Self { id, children }
    }
}

#[async_trait]
impl ThunkHandler for BlockHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn dependencies(&self) -> Vec<NodeId> {
        self.children.clone()
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let mut values = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let outcome = invoker.invoke(child, ctx).await;
            values.push(outcome.value.unwrap_or(Value::Null));
        }
        Outcome::value(Value::Array(values))
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let values: Vec<Value> = self
            .children
            .iter()
            .map(|child| {
                invoker
                    .invoke_sync(child, ctx)
                    .value
                    .unwrap_or(Value::Null)
            })
            .collect();
        Outcome::value(Value::Array(values))
    }
}
