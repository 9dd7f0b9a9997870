//! Compilation: lowering a form definition into an evaluatable graph.
//!
//! For every field the compiler synthesises a POST pseudo-node and an
//! ANSWER_LOCAL pseudo-node; a post-pass scans the lowered references and
//! synthesises one PARAMS pseudo-node per distinct route parameter, one
//! DATA pseudo-node per distinct data key, and ANSWER_REMOTE pseudo-nodes
//! for answer codes with no field in this form. Wiring then turns every
//! reference into explicit edges, and the handler registry computes the
//! sync/async split.
//!
//! Compile-time artifacts are immutable afterwards and shared across
//! requests behind `Arc`s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::answers::AnswerSeed;
use crate::context::EvalContext;
use crate::definition::{EffectDef, ExprDef, FieldDef, FormDefinition, StepDef};
use crate::error::CompileError;
use crate::functions::FunctionRegistry;
use crate::graph::DependencyGraph;
use crate::handler::{HandlerRegistry, ThunkHandler};
use crate::handlers;
use crate::node::{
    AnswerLocalNode, AnswerRemoteNode, BlockNode, CollectionNode, ConditionalNode, DataNode,
    FieldNode, FormatNode, FunctionNode, Node, NodeKind, NodeType, ParamsNode, PostNode,
    ReferenceNode,
};
use crate::node_id::{IdCategory, IdGenerator, NodeId};
use crate::registry::NodeRegistry;
use crate::request::Request;
use crate::safety::is_safe_key;
use crate::wiring::{self, TransitionKind, TransitionPlan, WiringContext, WriteTarget};

// ============================================================================
// COMPILED ARTIFACTS
// ============================================================================

/// One validation rule lowered to a condition node
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub code: String,
    pub condition: NodeId,
    pub message: String,
}

/// One step, lowered
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub slug: String,
    /// Block node whose children are the step's fields
    pub entry: NodeId,
    pub fields: Vec<NodeId>,
    pub next: Option<String>,
    pub on_load: Vec<NodeId>,
    pub on_submit: Vec<NodeId>,
    pub validations: Vec<ValidationPlan>,
}

/// A compiled form, shared read-only across requests
#[derive(Debug)]
pub struct CompiledForm {
    pub name: String,
    pub registry: Arc<NodeRegistry>,
    pub graph: Arc<DependencyGraph>,
    pub handlers: Arc<HandlerRegistry>,
    pub functions: Arc<FunctionRegistry>,
    pub ids: Arc<IdGenerator>,
    pub steps: Vec<StepPlan>,
    pub transitions: Vec<TransitionPlan>,
}

impl CompiledForm {
    pub fn step(&self, slug: &str) -> Option<&StepPlan> {
        self.steps.iter().find(|s| s.slug == slug)
    }

    /// Fresh evaluation context for one request
    pub fn context(&self, request: Request, seed: HashMap<String, AnswerSeed>) -> EvalContext {
        EvalContext::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.graph),
            Arc::clone(&self.handlers),
            Arc::clone(&self.functions),
            Arc::clone(&self.ids),
            request,
            seed,
        )
    }

    /// First pseudo-node of `node_type` keyed by `key` (field code,
    /// parameter name or data key)
    pub fn find_pseudo(&self, node_type: NodeType, key: &str) -> Option<NodeId> {
        self.registry
            .find_by_type(node_type)
            .into_iter()
            .find(|node| match &node.kind {
                NodeKind::Post(p) => p.field == key,
                NodeKind::Params(p) => p.name == key,
                NodeKind::AnswerLocal(a) => a.code == key,
                NodeKind::AnswerRemote(a) => a.code == key,
                NodeKind::Data(d) => d.key == key,
                _ => false,
            })
            .map(|node| node.id.clone())
    }

    /// Per-id handler override. The replacement registry is re-finalised so
    /// async flags stay consistent.
    pub fn override_handler(&mut self, handler: Arc<dyn ThunkHandler>) {
        let mut handlers = (*self.handlers).clone();
        handlers.register(handler);
        handlers.finalize(&self.graph);
        self.handlers = Arc::new(handlers);
    }
}

// ============================================================================
// COMPILER
// ============================================================================

/// Compile a definition against a function registry
pub fn compile(
    definition: &FormDefinition,
    functions: Arc<FunctionRegistry>,
) -> Result<CompiledForm, CompileError> {
    if definition.steps.is_empty() {
        return Err(CompileError::EmptyForm(definition.name.clone()));
    }

    let mut lowering = Lowering {
        ids: IdGenerator::new(),
        registry: NodeRegistry::new(),
        graph: DependencyGraph::new(),
        handlers: HandlerRegistry::new(),
        functions,
        field_codes: HashSet::new(),
    };

    let mut steps = Vec::with_capacity(definition.steps.len());
    let mut transitions = Vec::new();
    let mut slugs = HashSet::new();

    for step in &definition.steps {
        if !slugs.insert(step.slug.clone()) {
            return Err(CompileError::DuplicateStep(step.slug.clone()));
        }
        steps.push(lowering.lower_step(step, &mut transitions)?);
    }

    lowering.synthesise_input_pseudos()?;

    let w = WiringContext {
        lookup: &lowering.registry,
        graph: &lowering.graph,
        transitions: &transitions,
    };
    wiring::wire(&w);

    lowering.handlers.finalize(&lowering.graph);

    Ok(CompiledForm {
        name: definition.name.clone(),
        registry: Arc::new(lowering.registry),
        graph: Arc::new(lowering.graph),
        handlers: Arc::new(lowering.handlers),
        functions: lowering.functions,
        ids: Arc::new(lowering.ids),
        steps,
        transitions,
    })
}

struct Lowering {
    ids: IdGenerator,
    registry: NodeRegistry,
    graph: DependencyGraph,
    handlers: HandlerRegistry,
    functions: Arc<FunctionRegistry>,
    field_codes: HashSet<String>,
}

impl Lowering {
    /// Insert a node, registering it with the graph and its handler
    fn insert(&mut self, node: Node) -> Result<NodeId, CompileError> {
        let id = node.id.clone();
        self.graph.add_node(&id);
        self.handlers
            .register(handlers::for_node(&node, &self.functions));
        self.registry
            .insert(node)
            .map_err(|e| CompileError::DuplicateNodeId(e.0.to_string()))?;
        Ok(id)
    }

    fn add(&mut self, kind: NodeKind, category: IdCategory) -> Result<NodeId, CompileError> {
        self.insert(Node::new(self.ids.next(category), kind))
    }

    fn lower_step(
        &mut self,
        step: &StepDef,
        transitions: &mut Vec<TransitionPlan>,
    ) -> Result<StepPlan, CompileError> {
        let mut fields = Vec::with_capacity(step.fields.len());
        let mut validations = Vec::new();

        for field in &step.fields {
            let field_id = self.lower_field(field, &mut validations)?;
            fields.push(field_id);
        }

        let entry = self.add(
            NodeKind::Block(BlockNode {
                children: fields.clone(),
            }),
            IdCategory::CompileAst,
        )?;

        let on_load = self.lower_effects(&step.on_load, TransitionKind::Load, transitions)?;
        let on_submit =
            self.lower_effects(&step.on_submit, TransitionKind::Action, transitions)?;

        Ok(StepPlan {
            slug: step.slug.clone(),
            entry,
            fields,
            next: step.next.clone(),
            on_load,
            on_submit,
            validations,
        })
    }

    fn lower_field(
        &mut self,
        field: &FieldDef,
        validations: &mut Vec<ValidationPlan>,
    ) -> Result<NodeId, CompileError> {
        if !is_safe_key(&field.code) {
            return Err(CompileError::UnsafeFieldCode(field.code.clone()));
        }
        if !self.field_codes.insert(field.code.clone()) {
            return Err(CompileError::DuplicateField(field.code.clone()));
        }

        let default_value = match &field.default {
            Some(expr) => Some(self.lower_expr(expr)?),
            None => None,
        };
        let formatters = field
            .formatters
            .iter()
            .map(|f| self.lower_formatter(f))
            .collect::<Result<Vec<_>, _>>()?;
        let dependent = match &field.dependent {
            Some(expr) => Some(self.lower_expr(expr)?),
            None => None,
        };

        // The field block and its pseudo-nodes point at each other, so both
        // ids are allocated up front
        let field_id = self.ids.next(IdCategory::CompileAst);
        let answer_id = self.ids.next(IdCategory::CompilePseudo);

        self.insert(Node::new(
            field_id.clone(),
            NodeKind::Field(FieldNode {
                code: field.code.clone(),
                answer: answer_id.clone(),
                default_value,
                formatters,
                dependent,
                sanitize: field.sanitize,
            }),
        ))?;
        self.insert(Node::new(
            answer_id,
            NodeKind::AnswerLocal(AnswerLocalNode {
                field: field_id.clone(),
                code: field.code.clone(),
            }),
        ))?;
        self.add(
            NodeKind::Post(PostNode {
                field: field.code.clone(),
            }),
            IdCategory::CompilePseudo,
        )?;

        for rule in &field.validate {
            let condition = self.lower_expr(&rule.when)?;
            validations.push(ValidationPlan {
                code: field.code.clone(),
                condition,
                message: rule.message.clone(),
            });
        }

        Ok(field_id)
    }

    fn lower_effects(
        &mut self,
        effects: &[EffectDef],
        kind: TransitionKind,
        transitions: &mut Vec<TransitionPlan>,
    ) -> Result<Vec<NodeId>, CompileError> {
        let mut nodes = Vec::with_capacity(effects.len());
        for effect in effects {
            let node = self.lower_expr(&effect.run)?;
            let writes = effect
                .writes
                .iter()
                .filter_map(|raw| {
                    let parsed = WriteTarget::parse(raw);
                    if parsed.is_none() {
                        debug!(declaration = %raw, "ignoring unparseable write declaration");
                    }
                    parsed
                })
                .collect();
            transitions.push(TransitionPlan {
                effect: node.clone(),
                kind,
                writes,
            });
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn lower_expr(&mut self, expr: &ExprDef) -> Result<NodeId, CompileError> {
        match expr {
            ExprDef::Literal(value) => {
                self.add(NodeKind::Literal(value.clone()), IdCategory::CompileAst)
            }
            ExprDef::Reference(r) => self.add(
                NodeKind::Reference(ReferenceNode {
                    path: r.segments(),
                }),
                IdCategory::CompileAst,
            ),
            ExprDef::Function(f) => {
                let args = f
                    .args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.add(
                    NodeKind::Function(FunctionNode {
                        name: f.name.clone(),
                        args,
                    }),
                    IdCategory::CompileAst,
                )
            }
            ExprDef::Conditional(c) => {
                let when = self.lower_expr(&c.when)?;
                let then_branch = match &c.then_branch {
                    Some(b) => Some(self.lower_expr(b)?),
                    None => None,
                };
                let else_branch = match &c.else_branch {
                    Some(b) => Some(self.lower_expr(b)?),
                    None => None,
                };
                self.add(
                    NodeKind::Conditional(ConditionalNode {
                        when,
                        then_branch,
                        else_branch,
                    }),
                    IdCategory::CompileAst,
                )
            }
            ExprDef::Format(f) => {
                let args = f
                    .args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.add(
                    NodeKind::Format(FormatNode {
                        template: f.format.clone(),
                        args,
                    }),
                    IdCategory::CompileAst,
                )
            }
            ExprDef::Collection(c) => {
                let collection = self.lower_expr(&c.each)?;
                let templates = c
                    .body
                    .iter()
                    .map(|t| self.lower_expr(t))
                    .collect::<Result<Vec<_>, _>>()?;
                let fallback = c
                    .fallback
                    .iter()
                    .map(|t| self.lower_expr(t))
                    .collect::<Result<Vec<_>, _>>()?;
                self.add(
                    NodeKind::Collection(CollectionNode {
                        collection,
                        templates,
                        fallback,
                    }),
                    IdCategory::CompileAst,
                )
            }
        }
    }

    /// Formatter shorthand: `{ fn: trim }` with no args receives the value
    /// under transformation
    fn lower_formatter(&mut self, expr: &ExprDef) -> Result<NodeId, CompileError> {
        match expr {
            ExprDef::Function(f) if f.args.is_empty() => {
                let value_ref = self.add(
                    NodeKind::Reference(ReferenceNode {
                        path: vec!["@value".to_string()],
                    }),
                    IdCategory::CompileAst,
                )?;
                self.add(
                    NodeKind::Function(FunctionNode {
                        name: f.name.clone(),
                        args: vec![value_ref],
                    }),
                    IdCategory::CompileAst,
                )
            }
            other => self.lower_expr(other),
        }
    }

    /// Post-pass: synthesise pseudo-nodes for every environmental input the
    /// lowered references read
    fn synthesise_input_pseudos(&mut self) -> Result<(), CompileError> {
        let mut params: Vec<String> = Vec::new();
        let mut data_keys: Vec<String> = Vec::new();
        let mut remote_codes: Vec<String> = Vec::new();

        for reference in self.registry.find_by_type(NodeType::Reference) {
            let Some(r) = reference.as_reference() else { continue };
            if r.path.len() < 2 {
                continue;
            }
            let key = r.path[1].clone();
            match r.path[0].as_str() {
                "params" if !params.contains(&key) => params.push(key),
                "data" if !data_keys.contains(&key) => data_keys.push(key),
                "answers" if !self.field_codes.contains(&key) && !remote_codes.contains(&key) => {
                    remote_codes.push(key)
                }
                _ => {}
            }
        }

        for name in params {
            self.add(
                NodeKind::Params(ParamsNode { name }),
                IdCategory::CompilePseudo,
            )?;
        }
        for key in data_keys {
            self.add(NodeKind::Data(DataNode { key }), IdCategory::CompilePseudo)?;
        }
        for code in remote_codes {
            self.add(
                NodeKind::AnswerRemote(AnswerRemoteNode { code }),
                IdCategory::CompilePseudo,
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_yaml(yaml: &str) -> Result<CompiledForm, CompileError> {
        let definition = FormDefinition::from_yaml(yaml).expect("definition parses");
        compile(&definition, Arc::new(FunctionRegistry::with_builtins()))
    }

    #[test]
    fn field_gets_post_and_answer_pseudos() {
        let form = compile_yaml(
            r#"
name: contact
steps:
  - slug: details
    fields:
      - code: email
"#,
        )
        .unwrap();

        assert!(form.find_pseudo(NodeType::Post, "email").is_some());
        assert!(form.find_pseudo(NodeType::AnswerLocal, "email").is_some());
        assert_eq!(form.steps.len(), 1);
        assert_eq!(form.step("details").unwrap().fields.len(), 1);
    }

    #[test]
    fn referenced_params_become_pseudo_nodes() {
        let form = compile_yaml(
            r#"
name: journeys
steps:
  - slug: start
    fields:
      - code: city
        default: { ref: params.city_hint }
"#,
        )
        .unwrap();

        assert!(form.find_pseudo(NodeType::Params, "city_hint").is_some());
        assert!(form.find_pseudo(NodeType::Params, "unused").is_none());
    }

    #[test]
    fn answer_refs_without_local_field_become_remote() {
        let form = compile_yaml(
            r#"
name: journey
steps:
  - slug: here
    fields:
      - code: town
        default: { ref: answers.country }
"#,
        )
        .unwrap();

        assert!(form.find_pseudo(NodeType::AnswerRemote, "country").is_some());
        // The local field keeps its local pseudo
        assert!(form.find_pseudo(NodeType::AnswerLocal, "town").is_some());
        assert!(form.find_pseudo(NodeType::AnswerRemote, "town").is_none());
    }

    #[test]
    fn duplicate_field_codes_rejected() {
        let err = compile_yaml(
            r#"
name: dup
steps:
  - slug: a
    fields:
      - code: email
  - slug: b
    fields:
      - code: email
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateField(code) if code == "email"));
    }

    #[test]
    fn duplicate_step_slugs_rejected() {
        let err = compile_yaml(
            r#"
name: dup
steps:
  - slug: a
    fields: [ { code: x } ]
  - slug: a
    fields: [ { code: y } ]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateStep(slug) if slug == "a"));
    }

    #[test]
    fn empty_form_rejected() {
        let err = compile_yaml("name: hollow\nsteps: []").unwrap_err();
        assert!(matches!(err, CompileError::EmptyForm(_)));
    }

    #[test]
    fn unsafe_field_code_rejected() {
        let err = compile_yaml(
            r#"
name: sneaky
steps:
  - slug: a
    fields:
      - code: __proto__
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnsafeFieldCode(_)));
    }

    #[test]
    fn sync_field_chain_is_sync() {
        let form = compile_yaml(
            r#"
name: contact
steps:
  - slug: details
    fields:
      - code: email
        formatters: [ { fn: trim } ]
"#,
        )
        .unwrap();

        let answer = form.find_pseudo(NodeType::AnswerLocal, "email").unwrap();
        assert!(!form.handlers.is_async(&answer));
    }

    #[test]
    fn unknown_function_forces_async() {
        let form = compile_yaml(
            r#"
name: contact
steps:
  - slug: details
    fields:
      - code: email
        formatters: [ { fn: imported_later } ]
"#,
        )
        .unwrap();

        let answer = form.find_pseudo(NodeType::AnswerLocal, "email").unwrap();
        assert!(form.handlers.is_async(&answer));
    }
}
