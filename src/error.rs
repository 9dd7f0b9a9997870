//! Error types for the evaluation core.
//!
//! Two layers coexist:
//!
//! 1. **`ThunkError` / `Outcome`**: evaluation failures carried as *values*
//!    through the handler protocol. Handlers never panic and never propagate
//!    errors via `?` across handler boundaries; an `Outcome` envelope holds
//!    either a resolved value, an error, or neither (`undefined`).
//! 2. **`FormworkError`**: the top-level crate error for everything outside
//!    a single node's evaluation: definition parsing, compilation, IO.
//!
//! Every error can provide a fix suggestion via the [`FixSuggestion`] trait
//! so callers can print actionable diagnostics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::node_id::NodeId;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Evaluation error taxonomy.
///
/// Serialises to SCREAMING_SNAKE_CASE for the wire envelope
/// (`{ "error": { "type": "LOOKUP_FAILED", ... } }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A referenced node id is not in the registry.
    LookupFailed,
    /// An unsafe key was used to index into request data or answers.
    SecurityViolation,
    /// A handler's own logic produced an error, including propagated
    /// failures from external functions.
    EvaluationFailed,
    /// A synchronous entry point reached an async-only handler.
    NotSync,
    /// Cooperative cancellation was observed.
    Cancelled,
}

impl ErrorKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LookupFailed => "LOOKUP_FAILED",
            ErrorKind::SecurityViolation => "SECURITY_VIOLATION",
            ErrorKind::EvaluationFailed => "EVALUATION_FAILED",
            ErrorKind::NotSync => "NOT_SYNC",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// THUNK ERROR
// ============================================================================

/// An evaluation failure attached to a node.
///
/// Carried inside [`Outcome`] envelopes rather than returned through `?`,
/// so a failing sub-expression can be absorbed or surfaced per the policy
/// of the consuming handler.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} at {node_id}: {message}")]
pub struct ThunkError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub message: String,
}

impl ThunkError {
    pub fn new(kind: ErrorKind, node_id: &NodeId, message: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: node_id.to_string(),
            message: message.into(),
        }
    }

    pub fn lookup_failed(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LookupFailed, node_id, message)
    }

    pub fn security_violation(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityViolation, node_id, message)
    }

    pub fn evaluation_failed(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EvaluationFailed, node_id, message)
    }

    pub fn not_sync(node_id: &NodeId) -> Self {
        Self::new(
            ErrorKind::NotSync,
            node_id,
            "synchronous invocation of an async handler",
        )
    }

    pub fn cancelled(node_id: &NodeId) -> Self {
        Self::new(ErrorKind::Cancelled, node_id, "evaluation cancelled")
    }

    /// Wrap into the wire envelope: `{ "error": { type, nodeId, message } }`
    pub fn to_envelope(&self) -> Value {
        serde_json::json!({ "error": self })
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// Discriminated result of evaluating one node.
///
/// `value: None` models `undefined`; `Value::Null` stays a real authored
/// null. An outcome with an error may still carry no value at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub value: Option<Value>,
    pub error: Option<ThunkError>,
}

impl Outcome {
    /// A defined value
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// The `undefined` outcome
    pub fn undefined() -> Self {
        Self::default()
    }

    /// A possibly-undefined value
    pub fn of(value: Option<Value>) -> Self {
        Self { value, error: None }
    }

    /// A failed outcome
    pub fn err(error: ThunkError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Value reference, only when no error is present
    pub fn ok(&self) -> Option<&Value> {
        if self.error.is_some() {
            None
        } else {
            self.value.as_ref()
        }
    }
}

// ============================================================================
// COMPILE ERROR
// ============================================================================

/// Failures while lowering a form definition into a node graph
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("duplicate field code '{0}'")]
    DuplicateField(String),

    #[error("duplicate step slug '{0}'")]
    DuplicateStep(String),

    #[error("form '{0}' has no steps")]
    EmptyForm(String),

    #[error("field code '{0}' fails the safe-key check")]
    UnsafeFieldCode(String),

    #[error("node id '{0}' registered twice")]
    DuplicateNodeId(String),
}

// ============================================================================
// FORMWORK ERROR (top-level)
// ============================================================================

/// Top-level error type wrapping the per-module errors
#[derive(Debug, Error)]
pub enum FormworkError {
    /// Definition could not be deserialised from YAML
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Definition could not be deserialised from JSON
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lowering the definition into a graph failed
    #[error("{0}")]
    Compile(#[from] CompileError),

    /// A fatal evaluation error surfaced to the caller
    #[error("{0}")]
    Evaluation(#[from] ThunkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// FIX SUGGESTION
// ============================================================================

/// Trait for errors that can provide fix suggestions
pub trait FixSuggestion {
    /// Get a fix suggestion for this error, if available
    fn fix_suggestion(&self) -> Option<&str>;
}

impl FixSuggestion for ThunkError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self.kind {
            ErrorKind::LookupFailed => {
                "Check that the referenced node exists. Runtime nodes must be \
                 inserted before they are invoked"
            }
            ErrorKind::SecurityViolation => {
                "Use alphanumeric keys with underscores and dots only. \
                 '__proto__' and 'constructor' are rejected"
            }
            ErrorKind::EvaluationFailed => {
                "Inspect the node's expression and the functions it calls. \
                 References must name a wired input (post, params, answers, data)"
            }
            ErrorKind::NotSync => {
                "Use the async evaluate path, or remove async functions from \
                 this node's dependency chain"
            }
            ErrorKind::Cancelled => "The caller cancelled the request. Retry if appropriate",
        })
    }
}

impl FixSuggestion for CompileError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            CompileError::DuplicateField(_) => "Field codes must be unique across the form",
            CompileError::DuplicateStep(_) => "Step slugs must be unique across the form",
            CompileError::EmptyForm(_) => "Add at least one step with at least one field",
            CompileError::UnsafeFieldCode(_) => {
                "Field codes may contain alphanumerics, underscores and dots only"
            }
            CompileError::DuplicateNodeId(_) => {
                "Allocate node ids through the form's id generator"
            }
        })
    }
}

impl FixSuggestion for FormworkError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            FormworkError::Yaml(_) => {
                Some("Check YAML syntax: ensure proper indentation and quoting")
            }
            FormworkError::Json(_) => Some("Check JSON syntax"),
            FormworkError::Compile(e) => e.fix_suggestion(),
            FormworkError::Evaluation(e) => e.fix_suggestion(),
            FormworkError::Io(_) => Some("Check file path exists and has correct permissions"),
        }
    }
}

/// Format an error with its fix suggestion for display
pub fn format_error_with_suggestion<E: std::error::Error + FixSuggestion>(error: &E) -> String {
    let mut result = error.to_string();
    if let Some(suggestion) = error.fix_suggestion() {
        result.push_str("\n  Fix: ");
        result.push_str(suggestion);
    }
    result
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::{IdCategory, IdGenerator};

    fn node_id() -> NodeId {
        IdGenerator::new().next(IdCategory::CompileAst)
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(ErrorKind::LookupFailed.as_str(), "LOOKUP_FAILED");
        assert_eq!(ErrorKind::NotSync.as_str(), "NOT_SYNC");
    }

    #[test]
    fn envelope_shape() {
        let err = ThunkError::lookup_failed(&node_id(), "missing field node");
        let envelope = err.to_envelope();

        assert_eq!(envelope["error"]["type"], "LOOKUP_FAILED");
        assert!(envelope["error"]["nodeId"]
            .as_str()
            .unwrap()
            .starts_with("compile_ast:"));
        assert_eq!(envelope["error"]["message"], "missing field node");
    }

    #[test]
    fn outcome_ok_hides_value_on_error() {
        let mut out = Outcome::value(serde_json::json!(1));
        assert_eq!(out.ok(), Some(&serde_json::json!(1)));

        out.error = Some(ThunkError::cancelled(&node_id()));
        assert_eq!(out.ok(), None);
    }

    #[test]
    fn undefined_is_not_an_error() {
        let out = Outcome::undefined();
        assert!(!out.is_err());
        assert_eq!(out.value, None);
    }

    #[test]
    fn all_kinds_have_suggestions() {
        for kind in [
            ErrorKind::LookupFailed,
            ErrorKind::SecurityViolation,
            ErrorKind::EvaluationFailed,
            ErrorKind::NotSync,
            ErrorKind::Cancelled,
        ] {
            let err = ThunkError::new(kind, &node_id(), "x");
            assert!(err.fix_suggestion().is_some(), "missing suggestion: {kind}");
        }
    }

    #[test]
    fn display_includes_node_and_kind() {
        let err = ThunkError::security_violation(&node_id(), "bad key '__proto__'");
        let text = err.to_string();
        assert!(text.contains("SECURITY_VIOLATION"));
        assert!(text.contains("__proto__"));
    }
}
