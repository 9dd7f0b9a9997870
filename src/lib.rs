//! # Formwork
//!
//! Request-scoped evaluation core for declarative form journeys.
//!
//! ## Overview
//!
//! A form compiles into a directed graph of typed nodes. Authored AST nodes
//! (fields, blocks, expressions) share one namespace with *pseudo-nodes*
//! synthesised at compile time to stand in for environmental inputs, so
//! request body, URL parameters, answers and named data all participate in
//! the dependency graph with explicit wired edges.
//!
//! Per HTTP request the engine resolves every node the current step needs,
//! pushes source-tagged mutations into the answer store, runs validation
//! and chooses a navigation outcome.
//!
//! ## Node kinds
//!
//! | Kind | Family | Description |
//! |------|--------|-------------|
//! | `Field` | AST | A form field block with default, formatters, dependent gate |
//! | `Block` | AST | Step root with child slots |
//! | `Literal` / `Reference` / `Function` / `Conditional` / `Format` / `Collection` | AST | Expression nodes |
//! | `Post` | pseudo | One request-body field |
//! | `Params` | pseudo | One URL route parameter |
//! | `AnswerLocal` | pseudo | A field's resolved answer on this step |
//! | `AnswerRemote` | pseudo | A cross-step answer |
//! | `Data` | pseudo | Named per-request data |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use formwork::{compile, engine, FormDefinition, FunctionRegistry, Request};
//! use std::sync::Arc;
//!
//! let yaml = std::fs::read_to_string("contact.form.yaml")?;
//! let definition = FormDefinition::from_yaml(&yaml)?;
//! let form = compile(&definition, Arc::new(FunctionRegistry::with_builtins()))?;
//!
//! let request = Request::post().with_field("email", "  a@b.example  ");
//! let ctx = form.context(request, session_answers);
//! let evaluation = engine::evaluate(&form, "details", &ctx).await?;
//!
//! match evaluation.navigation {
//!     formwork::Navigation::Next(slug) => redirect(&slug),
//!     _ => render(&evaluation.rendered, &ctx.globals()),
//! }
//! # Ok::<(), formwork::FormworkError>(())
//! ```
//!
//! ## Modules
//!
//! - [`definition`] - serde model of authored forms
//! - [`compile`] - lowering into registry, graph, pseudo-nodes and handlers
//! - [`wiring`] - reference-to-edge wiring, full and scoped
//! - [`handler`] / [`handlers`] - the thunk handler protocol and the
//!   per-kind implementations, including the answer state machine
//! - [`invoker`] - dispatch with per-request memoisation
//! - [`context`] - per-request state: answers, scope stack, data bag
//! - [`engine`] - step evaluation, validation, navigation
//!
//! Evaluation errors are values, never panics: every node resolves to an
//! [`Outcome`] holding a value, an error envelope, or neither.

pub mod answers;
pub mod compile;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod functions;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod invoker;
pub mod node;
pub mod node_id;
pub mod registry;
pub mod request;
pub mod safety;
pub mod scope;
pub mod wiring;

pub use answers::{AnswerHistory, AnswerSeed, AnswerStore, Mutation, MutationSource};
pub use compile::{compile, CompiledForm, StepPlan, ValidationPlan};
pub use context::EvalContext;
pub use definition::{ExprDef, FieldDef, FormDefinition, StepDef};
pub use engine::{evaluate, evaluate_sync, Evaluation, Navigation, Rendered};
pub use error::{ErrorKind, FixSuggestion, FormworkError, Outcome, ThunkError};
pub use event_log::{Event, EventKind, EventLog};
pub use functions::{ExternalFn, FunctionError, FunctionRegistry};
pub use graph::{DependencyGraph, Edge, EdgeKind};
pub use handler::{HandlerRegistry, ThunkHandler};
pub use invoker::Invoker;
pub use node::{Node, NodeKind, NodeType};
pub use node_id::{IdCategory, IdGenerator, NodeId};
pub use registry::{NodeLookup, NodeRegistry};
pub use request::{Method, Request};
pub use scope::{FrameKind, ScopeFrame, ScopeStack};
