//! Iteration over a collection expression.
//!
//! Each element gets an iteration scope frame (`@value`, `@index`) pushed
//! around the template evaluations; template outputs are concatenated with
//! one level of flattening. An empty or non-array collection emits the
//! fallback nodes instead, or an empty array when there is no fallback.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::EvalContext;
use crate::error::Outcome;
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node_id::NodeId;
use crate::scope::ScopeFrame;

pub struct CollectionHandler {
    id: NodeId,
    collection: NodeId,
    templates: Vec<NodeId>,
    fallback: Vec<NodeId>,
}

impl CollectionHandler {
    pub fn new(
        id: NodeId,
        collection: NodeId,
        templates: Vec<NodeId>,
        fallback: Vec<NodeId>,
    ) -> Self {
        Self {
            id,
            collection,
            templates,
            fallback,
        }
    }
}

/// Flatten one level: arrays extend, scalars append, undefined is skipped
fn accumulate(results: &mut Vec<Value>, value: Option<Value>) {
    match value {
        Some(Value::Array(items)) => results.extend(items),
        Some(other) => results.push(other),
        None => {}
    }
}

#[async_trait]
impl ThunkHandler for CollectionHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn dependencies(&self) -> Vec<NodeId> {
        let mut deps = vec![self.collection.clone()];
        deps.extend(self.templates.iter().cloned());
        deps.extend(self.fallback.iter().cloned());
        deps
    }

    fn iteration_dependencies(&self) -> Vec<NodeId> {
        self.templates.clone()
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let collection = invoker.invoke(&self.collection, ctx).await;
        if collection.is_err() {
            return collection;
        }

        let mut results = Vec::new();
        match collection.value {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let _frame = ctx.scope.push(ScopeFrame::iteration(item, index));
                    for template in &self.templates {
                        let outcome = invoker.invoke(template, ctx).await;
                        if outcome.is_err() {
                            return outcome;
                        }
                        accumulate(&mut results, outcome.value);
                    }
                }
            }
            _ => {
                // Empty or non-array: the fallback stands in
                for node in &self.fallback {
                    let outcome = invoker.invoke(node, ctx).await;
                    if outcome.is_err() {
                        return outcome;
                    }
                    accumulate(&mut results, outcome.value);
                }
            }
        }
        Outcome::value(Value::Array(results))
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let collection = invoker.invoke_sync(&self.collection, ctx);
        if collection.is_err() {
            return collection;
        }

        let mut results = Vec::new();
        match collection.value {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let _frame = ctx.scope.push(ScopeFrame::iteration(item, index));
                    for template in &self.templates {
                        let outcome = invoker.invoke_sync(template, ctx);
                        if outcome.is_err() {
                            return outcome;
                        }
                        accumulate(&mut results, outcome.value);
                    }
                }
            }
            _ => {
                for node in &self.fallback {
                    let outcome = invoker.invoke_sync(node, ctx);
                    if outcome.is_err() {
                        return outcome;
                    }
                    accumulate(&mut results, outcome.value);
                }
            }
        }
        Outcome::value(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulate_flattens_one_level() {
        let mut results = Vec::new();
        accumulate(&mut results, Some(json!([1, [2]])));
        accumulate(&mut results, Some(json!(3)));
        accumulate(&mut results, None);
        assert_eq!(results, vec![json!(1), json!([2]), json!(3)]);
    }
}
