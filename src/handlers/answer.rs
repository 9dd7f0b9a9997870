//! Answer resolution.
//!
//! `AnswerLocalHandler` is the state machine deciding what a field's answer
//! is on this request, appending source-tagged mutations as it goes:
//!
//! - **POST**: action-protection check, raw POST read, sanitisation,
//!   formatter pipeline, dependent gating.
//! - **GET**: existing answer wins, otherwise the default value resolves.
//!
//! The machine is deliberately generous: POST errors, formatter errors,
//! dependent errors and default errors are absorbed so a single misbehaving
//! sub-expression never prevents a field from resolving. Only a missing
//! field node or an unsafe field code is fatal.
//!
//! `AnswerRemoteHandler` is the read-only sibling for cross-step answers.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::answers::MutationSource;
use crate::context::EvalContext;
use crate::error::{Outcome, ThunkError};
use crate::functions::truthy_opt;
use crate::graph::EdgeKind;
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node::{FieldNode, NodeType};
use crate::node_id::NodeId;
use crate::safety::{ensure_safe_key, escape_html};
use crate::scope::ScopeFrame;

// ============================================================================
// ANSWER LOCAL
// ============================================================================

/// Resolves a field's answer on the current step
pub struct AnswerLocalHandler {
    id: NodeId,
    field_id: NodeId,
}

impl AnswerLocalHandler {
    pub fn new(id: NodeId, field_id: NodeId) -> Self {
        Self { id, field_id }
    }

    /// Field block this pseudo-node stands for. Missing or mistyped nodes
    /// are the one fatal lookup.
    fn field(&self, ctx: &EvalContext) -> Result<FieldNode, ThunkError> {
        let node = ctx.node(&self.field_id).ok_or_else(|| {
            ThunkError::lookup_failed(
                &self.id,
                format!("field node '{}' not found", self.field_id),
            )
        })?;
        let field = node.as_field().ok_or_else(|| {
            ThunkError::lookup_failed(
                &self.id,
                format!("node '{}' is not a field block", self.field_id),
            )
        })?;
        ensure_safe_key(&field.code, &self.id)?;
        Ok(field.clone())
    }

    /// The POST pseudo-node wired as this answer's producer
    fn post_pseudo(&self, ctx: &EvalContext) -> Option<NodeId> {
        ctx.producers_of(&self.id, EdgeKind::DataFlow)
            .into_iter()
            .find(|producer| {
                ctx.node(producer)
                    .map(|n| n.node_type() == NodeType::Post)
                    .unwrap_or(false)
            })
    }

    /// Sanitisation step: strings are HTML-escaped; everything else passes
    /// through untouched. Returns the new current value when it changed.
    fn sanitized(current: &Option<Value>) -> Option<Value> {
        match current {
            Some(Value::String(s)) => {
                let escaped = escape_html(s);
                if escaped != *s {
                    Some(Value::String(escaped.into_owned()))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // POST flow
    // ------------------------------------------------------------------

    async fn resolve_post(
        &self,
        field: &FieldNode,
        ctx: &EvalContext,
        invoker: &Invoker,
    ) -> Outcome {
        // Action-protected: POST may not override an effect's write
        if ctx.answers.last_source(&field.code) == Some(MutationSource::Action) {
            return Outcome::of(ctx.answers.current(&field.code));
        }

        // Raw POST read; errors are absorbed into undefined
        let mut current = match self.post_pseudo(ctx) {
            Some(post_id) => {
                let raw = invoker.invoke(&post_id, ctx).await;
                if let Some(error) = &raw.error {
                    debug!(code = %field.code, %error, "post read failed, treating as undefined");
                    None
                } else {
                    raw.value
                }
            }
            None => {
                debug!(code = %field.code, "no post pseudo-node wired, treating as undefined");
                None
            }
        };
        ctx.push_answer(&field.code, current.clone(), MutationSource::Post);

        if field.sanitize {
            if let Some(clean) = Self::sanitized(&current) {
                current = Some(clean);
                ctx.push_answer(&field.code, current.clone(), MutationSource::Sanitized);
            }
        }

        if !field.formatters.is_empty() {
            let before = current.clone();
            for formatter in &field.formatters {
                let outcome = {
                    let _frame = ctx.scope.push(ScopeFrame::formatter(current.clone()));
                    invoker.invoke(formatter, ctx).await
                };
                // Errors and undefined results are ignored; the previous
                // value survives
                if outcome.error.is_none() && outcome.value.is_some() {
                    current = outcome.value;
                }
            }
            if current != before {
                ctx.push_answer(&field.code, current.clone(), MutationSource::Processed);
            }
        }

        if let Some(dependent) = &field.dependent {
            let outcome = invoker.invoke(dependent, ctx).await;
            // Dependent errors fail open: the value is kept
            if outcome.error.is_none() && !truthy_opt(&outcome.value) {
                ctx.push_answer(&field.code, None, MutationSource::Dependent);
                return Outcome::undefined();
            }
        }

        Outcome::of(current)
    }

    fn resolve_post_sync(
        &self,
        field: &FieldNode,
        ctx: &EvalContext,
        invoker: &Invoker,
    ) -> Outcome {
        if ctx.answers.last_source(&field.code) == Some(MutationSource::Action) {
            return Outcome::of(ctx.answers.current(&field.code));
        }

        let mut current = match self.post_pseudo(ctx) {
            Some(post_id) => {
                let raw = invoker.invoke_sync(&post_id, ctx);
                if let Some(error) = &raw.error {
                    debug!(code = %field.code, %error, "post read failed, treating as undefined");
                    None
                } else {
                    raw.value
                }
            }
            None => {
                debug!(code = %field.code, "no post pseudo-node wired, treating as undefined");
                None
            }
        };
        ctx.push_answer(&field.code, current.clone(), MutationSource::Post);

        if field.sanitize {
            if let Some(clean) = Self::sanitized(&current) {
                current = Some(clean);
                ctx.push_answer(&field.code, current.clone(), MutationSource::Sanitized);
            }
        }

        if !field.formatters.is_empty() {
            let before = current.clone();
            for formatter in &field.formatters {
                let outcome = {
                    let _frame = ctx.scope.push(ScopeFrame::formatter(current.clone()));
                    invoker.invoke_sync(formatter, ctx)
                };
                if outcome.error.is_none() && outcome.value.is_some() {
                    current = outcome.value;
                }
            }
            if current != before {
                ctx.push_answer(&field.code, current.clone(), MutationSource::Processed);
            }
        }

        if let Some(dependent) = &field.dependent {
            let outcome = invoker.invoke_sync(dependent, ctx);
            if outcome.error.is_none() && !truthy_opt(&outcome.value) {
                ctx.push_answer(&field.code, None, MutationSource::Dependent);
                return Outcome::undefined();
            }
        }

        Outcome::of(current)
    }

    // ------------------------------------------------------------------
    // GET flow
    // ------------------------------------------------------------------

    async fn resolve_get(
        &self,
        field: &FieldNode,
        ctx: &EvalContext,
        invoker: &Invoker,
    ) -> Outcome {
        if let Some(existing) = ctx.answers.current(&field.code) {
            return Outcome::value(existing);
        }

        match &field.default_value {
            Some(default) => {
                let outcome = invoker.invoke(default, ctx).await;
                if outcome.error.is_none() && outcome.value.is_some() {
                    ctx.push_answer(&field.code, outcome.value.clone(), MutationSource::Default);
                    Outcome::of(outcome.value)
                } else {
                    ctx.push_answer(&field.code, None, MutationSource::Default);
                    Outcome::undefined()
                }
            }
            None => {
                ctx.push_answer(&field.code, None, MutationSource::Default);
                Outcome::undefined()
            }
        }
    }

    fn resolve_get_sync(
        &self,
        field: &FieldNode,
        ctx: &EvalContext,
        invoker: &Invoker,
    ) -> Outcome {
        if let Some(existing) = ctx.answers.current(&field.code) {
            return Outcome::value(existing);
        }

        match &field.default_value {
            Some(default) => {
                let outcome = invoker.invoke_sync(default, ctx);
                if outcome.error.is_none() && outcome.value.is_some() {
                    ctx.push_answer(&field.code, outcome.value.clone(), MutationSource::Default);
                    Outcome::of(outcome.value)
                } else {
                    ctx.push_answer(&field.code, None, MutationSource::Default);
                    Outcome::undefined()
                }
            }
            None => {
                ctx.push_answer(&field.code, None, MutationSource::Default);
                Outcome::undefined()
            }
        }
    }
}

#[async_trait]
impl ThunkHandler for AnswerLocalHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let field = match self.field(ctx) {
            Ok(f) => f,
            Err(error) => return Outcome::err(error),
        };
        if ctx.request.method.is_post() {
            self.resolve_post(&field, ctx, invoker).await
        } else {
            self.resolve_get(&field, ctx, invoker).await
        }
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let field = match self.field(ctx) {
            Ok(f) => f,
            Err(error) => return Outcome::err(error),
        };
        if ctx.request.method.is_post() {
            self.resolve_post_sync(&field, ctx, invoker)
        } else {
            self.resolve_get_sync(&field, ctx, invoker)
        }
    }
}

// ============================================================================
// ANSWER REMOTE
// ============================================================================

/// Read-only view of a cross-step answer
pub struct AnswerRemoteHandler {
    id: NodeId,
    code: String,
}

impl AnswerRemoteHandler {
    pub fn new(id: NodeId, code: String) -> Self {
        Self { id, code }
    }
}

#[async_trait]
impl ThunkHandler for AnswerRemoteHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        self.evaluate_sync(ctx, invoker)
    }

    fn evaluate_sync(&self, ctx: &EvalContext, _invoker: &Invoker) -> Outcome {
        if let Err(error) = ensure_safe_key(&self.code, &self.id) {
            return Outcome::err(error);
        }
        Outcome::of(ctx.answers.current(&self.code))
    }
}
