//! `when` / `then` / `else` branching.
//!
//! Errors from the condition and from the taken branch surface unchanged;
//! an absent branch yields undefined.

use async_trait::async_trait;

use crate::context::EvalContext;
use crate::error::Outcome;
use crate::functions::truthy_opt;
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node_id::NodeId;

pub struct ConditionalHandler {
    id: NodeId,
    when: NodeId,
    then_branch: Option<NodeId>,
    else_branch: Option<NodeId>,
}

impl ConditionalHandler {
    pub fn new(
        id: NodeId,
        when: NodeId,
        then_branch: Option<NodeId>,
        else_branch: Option<NodeId>,
    ) -> Self {
        Self {
            id,
            when,
            then_branch,
            else_branch,
        }
    }

    fn branch(&self, condition: &Outcome) -> Option<&NodeId> {
        if truthy_opt(&condition.value) {
            self.then_branch.as_ref()
        } else {
            self.else_branch.as_ref()
        }
    }
}

#[async_trait]
impl ThunkHandler for ConditionalHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn dependencies(&self) -> Vec<NodeId> {
        let mut deps = vec![self.when.clone()];
        deps.extend(self.then_branch.clone());
        deps.extend(self.else_branch.clone());
        deps
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let condition = invoker.invoke(&self.when, ctx).await;
        if condition.is_err() {
            return condition;
        }
        match self.branch(&condition) {
            Some(node) => invoker.invoke(node, ctx).await,
            None => Outcome::undefined(),
        }
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let condition = invoker.invoke_sync(&self.when, ctx);
        if condition.is_err() {
            return condition;
        }
        match self.branch(&condition) {
            Some(node) => invoker.invoke_sync(node, ctx),
            None => Outcome::undefined(),
        }
    }
}
