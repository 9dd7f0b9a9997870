//! Function expression calls into the external registry.
//!
//! Arguments resolve in declared order and surface their errors; the
//! resolved values (undefined as `null`) are handed to the named function.
//! A node is synchronous iff the function is marked sync and every argument
//! node is sync, which the registry fixpoint works out from
//! `intrinsically_async` plus the dependency list.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::EvalContext;
use crate::error::{ErrorKind, Outcome, ThunkError};
use crate::functions::{FunctionError, FunctionRegistry};
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node_id::NodeId;

pub struct FunctionExprHandler {
    id: NodeId,
    name: String,
    args: Vec<NodeId>,
    functions: Arc<FunctionRegistry>,
}

impl FunctionExprHandler {
    pub fn new(
        id: NodeId,
        name: String,
        args: Vec<NodeId>,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            id,
            name,
            args,
            functions,
        }
    }

    fn map_error(&self, error: FunctionError) -> ThunkError {
        match error {
            FunctionError::NotSync(_) => ThunkError::not_sync(&self.id),
            other => ThunkError::new(ErrorKind::EvaluationFailed, &self.id, other.to_string()),
        }
    }
}

#[async_trait]
impl ThunkHandler for FunctionExprHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn dependencies(&self) -> Vec<NodeId> {
        self.args.clone()
    }

    fn intrinsically_async(&self) -> bool {
        self.functions.is_async(&self.name)
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let mut values = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let outcome = invoker.invoke(arg, ctx).await;
            if let Some(error) = outcome.error {
                return Outcome::err(error);
            }
            values.push(outcome.value.unwrap_or(Value::Null));
        }

        let Some(function) = self.functions.get(&self.name) else {
            return Outcome::err(ThunkError::evaluation_failed(
                &self.id,
                format!("unknown function '{}'", self.name),
            ));
        };
        match function.call(&values, ctx).await {
            Ok(value) => Outcome::of(value),
            Err(error) => Outcome::err(self.map_error(error)),
        }
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let mut values = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let outcome = invoker.invoke_sync(arg, ctx);
            if let Some(error) = outcome.error {
                return Outcome::err(error);
            }
            values.push(outcome.value.unwrap_or(Value::Null));
        }

        let Some(function) = self.functions.get(&self.name) else {
            return Outcome::err(ThunkError::evaluation_failed(
                &self.id,
                format!("unknown function '{}'", self.name),
            ));
        };
        match function.call_sync(&values, ctx) {
            Ok(value) => Outcome::of(value),
            Err(error) => Outcome::err(self.map_error(error)),
        }
    }
}
