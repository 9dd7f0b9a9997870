//! Top-level step evaluation.
//!
//! Per request: run the step's load effects, resolve every node the step
//! needs into a `Rendered` map, run the validation pass on POST, fire
//! submit effects on a valid POST, and choose the navigation outcome.
//!
//! Both an async and a strictly non-suspending entry point exist; the sync
//! form is for render-path contexts where suspension is undesirable and
//! refuses async nodes with `NOT_SYNC` outcomes rather than blocking.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

use crate::compile::CompiledForm;
use crate::context::EvalContext;
use crate::error::{ErrorKind, Outcome, ThunkError};
use crate::event_log::EventKind;
use crate::functions::truthy_opt;
use crate::invoker::Invoker;
use crate::node_id::NodeId;

// ============================================================================
// OUTPUTS
// ============================================================================

/// Resolved values for the renderer, keyed by node id
#[derive(Debug, Clone, Default)]
pub struct Rendered(HashMap<NodeId, Outcome>);

impl Rendered {
    pub fn insert(&mut self, id: NodeId, outcome: Outcome) {
        self.0.insert(id, outcome);
    }

    pub fn get(&self, id: &NodeId) -> Option<&Outcome> {
        self.0.get(id)
    }

    /// Value for a node, when it resolved without error
    pub fn value(&self, id: &NodeId) -> Option<&Value> {
        self.0.get(id).and_then(|o| o.ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Outcome)> {
        self.0.iter()
    }
}

/// Where the request goes next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// GET: render the step
    Render,
    /// POST with validation errors, or no onward step
    Stay,
    /// Valid POST continuing to another step
    Next(String),
}

impl Navigation {
    fn label(&self) -> String {
        match self {
            Navigation::Render => "render".to_string(),
            Navigation::Stay => "stay".to_string(),
            Navigation::Next(slug) => format!("next:{slug}"),
        }
    }
}

/// Everything one request evaluation produced
#[derive(Debug)]
pub struct Evaluation {
    pub rendered: Rendered,
    /// Validation failures, field code -> messages
    pub errors: BTreeMap<String, Vec<String>>,
    pub navigation: Navigation,
}

// ============================================================================
// ASYNC ENTRY POINT
// ============================================================================

/// Evaluate one step of a compiled form
#[instrument(skip(form, ctx), fields(form = %form.name))]
pub async fn evaluate(
    form: &CompiledForm,
    slug: &str,
    ctx: &EvalContext,
) -> Result<Evaluation, ThunkError> {
    let step = form.step(slug).ok_or_else(|| unknown_step(slug))?;
    ctx.events.emit_request_started(slug, ctx.request.method);
    let invoker = Invoker::new();

    for effect in &step.on_load {
        let outcome = invoker.invoke(effect, ctx).await;
        emit_effect(ctx, effect, &outcome);
    }

    let mut rendered = Rendered::default();
    let entry_outcome = invoker.invoke(&step.entry, ctx).await;
    rendered.insert(step.entry.clone(), entry_outcome);
    for field in &step.fields {
        let outcome = invoker.invoke(field, ctx).await;
        rendered.insert(field.clone(), outcome);
    }

    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if ctx.request.method.is_post() {
        for rule in &step.validations {
            let outcome = invoker.invoke(&rule.condition, ctx).await;
            record_validation(ctx, rule, &outcome, &mut errors);
        }
    }

    let navigation = if !ctx.request.method.is_post() {
        Navigation::Render
    } else if !errors.is_empty() {
        Navigation::Stay
    } else {
        for effect in &step.on_submit {
            let outcome = invoker.invoke(effect, ctx).await;
            emit_effect(ctx, effect, &outcome);
        }
        step.next.clone().map(Navigation::Next).unwrap_or(Navigation::Stay)
    };

    finish(ctx, rendered, errors, navigation)
}

// ============================================================================
// SYNC ENTRY POINT
// ============================================================================

/// Strictly non-suspending twin of [`evaluate`]
#[instrument(skip(form, ctx), fields(form = %form.name))]
pub fn evaluate_sync(
    form: &CompiledForm,
    slug: &str,
    ctx: &EvalContext,
) -> Result<Evaluation, ThunkError> {
    let step = form.step(slug).ok_or_else(|| unknown_step(slug))?;
    ctx.events.emit_request_started(slug, ctx.request.method);
    let invoker = Invoker::new();

    for effect in &step.on_load {
        let outcome = invoker.invoke_sync(effect, ctx);
        emit_effect(ctx, effect, &outcome);
    }

    let mut rendered = Rendered::default();
    let entry_outcome = invoker.invoke_sync(&step.entry, ctx);
    rendered.insert(step.entry.clone(), entry_outcome);
    for field in &step.fields {
        let outcome = invoker.invoke_sync(field, ctx);
        rendered.insert(field.clone(), outcome);
    }

    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if ctx.request.method.is_post() {
        for rule in &step.validations {
            let outcome = invoker.invoke_sync(&rule.condition, ctx);
            record_validation(ctx, rule, &outcome, &mut errors);
        }
    }

    let navigation = if !ctx.request.method.is_post() {
        Navigation::Render
    } else if !errors.is_empty() {
        Navigation::Stay
    } else {
        for effect in &step.on_submit {
            let outcome = invoker.invoke_sync(effect, ctx);
            emit_effect(ctx, effect, &outcome);
        }
        step.next.clone().map(Navigation::Next).unwrap_or(Navigation::Stay)
    };

    finish(ctx, rendered, errors, navigation)
}

// ============================================================================
// SHARED PIECES
// ============================================================================

fn unknown_step(slug: &str) -> ThunkError {
    ThunkError {
        kind: ErrorKind::LookupFailed,
        node_id: format!("step:{slug}"),
        message: format!("step '{slug}' is not part of this form"),
    }
}

fn emit_effect(ctx: &EvalContext, effect: &NodeId, outcome: &Outcome) {
    if let Some(error) = &outcome.error {
        debug!(node = %effect, %error, "effect failed");
    }
    ctx.events.emit(EventKind::EffectRan {
        node_id: effect.to_string(),
        had_error: outcome.is_err(),
    });
}

/// A rule fails when its condition is defined falsy; condition errors fail
/// open and the field counts as valid
fn record_validation(
    ctx: &EvalContext,
    rule: &crate::compile::ValidationPlan,
    outcome: &Outcome,
    errors: &mut BTreeMap<String, Vec<String>>,
) {
    if outcome.error.is_none() && !truthy_opt(&outcome.value) {
        errors
            .entry(rule.code.clone())
            .or_default()
            .push(rule.message.clone());
        ctx.events.emit(EventKind::ValidationFailed {
            code: rule.code.clone(),
            message: rule.message.clone(),
        });
    }
}

fn finish(
    ctx: &EvalContext,
    rendered: Rendered,
    errors: BTreeMap<String, Vec<String>>,
    navigation: Navigation,
) -> Result<Evaluation, ThunkError> {
    ctx.events.emit(EventKind::NavigationChosen {
        outcome: navigation.label(),
    });
    debug_assert!(ctx.scope.is_empty(), "scope stack not empty after evaluate");
    Ok(Evaluation {
        rendered,
        errors,
        navigation,
    })
}
