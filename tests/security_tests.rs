//! Security tests for the evaluation core.
//!
//! These tests verify that prototype-pollution style keys, path traversal
//! and unescaped markup cannot travel from request data into answers.

use formwork::answers::MutationSource;
use formwork::engine;
use formwork::error::ErrorKind;
use formwork::{compile, CompiledForm, FormDefinition, FunctionRegistry, Request};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn compile_yaml(yaml: &str) -> CompiledForm {
    let definition = FormDefinition::from_yaml(yaml).expect("definition parses");
    compile(&definition, Arc::new(FunctionRegistry::with_builtins())).expect("form compiles")
}

// ============================================================================
// UNSAFE KEY TESTS
// ============================================================================

/// Field codes that smell like prototype pollution are rejected at compile
/// time, before any request is evaluated
#[test]
fn test_polluting_field_codes_rejected_at_compile_time() {
    for code in ["__proto__", "constructor", "prototype", "a..b"] {
        let yaml = format!(
            r#"
name: sneaky
steps:
  - slug: a
    fields:
      - code: "{code}"
"#
        );
        let definition = FormDefinition::from_yaml(&yaml).unwrap();
        let result = compile(&definition, Arc::new(FunctionRegistry::with_builtins()));
        assert!(result.is_err(), "code '{code}' should not compile");
    }
}

/// A reference traversing into a denied property name is a SECURITY_VIOLATION
/// for that node; the answer machine absorbs it into undefined instead of
/// exposing anything
#[tokio::test]
async fn test_denied_traversal_segment_never_resolves() {
    let form = compile_yaml(
        r#"
name: traversal
steps:
  - slug: a
    on_load:
      - run: { fn: set_data, args: [ "cfg", { safe: 1 } ] }
        writes: [ data.cfg ]
    fields:
      - code: probe
        default: { ref: data.cfg.__proto__ }
"#,
    );
    let ctx = form.context(Request::get(), HashMap::new());
    engine::evaluate(&form, "a", &ctx).await.unwrap();

    // Default errored and was absorbed: one undefined default mutation
    assert_eq!(ctx.answers.current("probe"), None);
    let history = ctx.answers.history("probe").unwrap();
    assert_eq!(history.mutations().len(), 1);
    assert_eq!(history.last_source(), Some(MutationSource::Default));
}

/// The same traversal read directly surfaces the violation
#[tokio::test]
async fn test_direct_unsafe_traversal_is_security_violation() {
    use formwork::node::{NodeKind, ReferenceNode};
    use formwork::node_id::IdCategory;
    use formwork::{Invoker, Node};

    let form = compile_yaml(
        r#"
name: traversal
steps:
  - slug: a
    fields:
      - code: host
        default: { ref: data.cfg }
"#,
    );
    let ctx = form.context(Request::get(), HashMap::new());
    ctx.set_data("cfg", json!({"safe": 1}));

    let id = ctx.next_runtime_id(IdCategory::RuntimeAst);
    let node = Node::new(
        id.clone(),
        NodeKind::Reference(ReferenceNode {
            path: vec!["data".into(), "cfg".into(), "constructor".into()],
        }),
    );
    ctx.insert_runtime_node(node.clone());
    let w = formwork::wiring::WiringContext {
        lookup: &ctx,
        graph: ctx.runtime_graph(),
        transitions: &form.transitions,
    };
    formwork::wiring::wire_nodes(&w, &[id.clone()]);
    ctx.register_runtime_handler(formwork::handlers::for_node(&node, &form.functions));

    let outcome = Invoker::new().invoke(&id, &ctx).await;
    assert_eq!(
        outcome.error.map(|e| e.kind),
        Some(ErrorKind::SecurityViolation)
    );
}

// ============================================================================
// SANITISATION TESTS
// ============================================================================

/// Script tags in POST bodies arrive entity-escaped in the answer store
#[tokio::test]
async fn test_markup_in_post_is_escaped() {
    let form = compile_yaml(
        r#"
name: xss
steps:
  - slug: a
    fields:
      - code: comment
"#,
    );
    let payload = r#"<script>alert("x")</script>"#;
    let ctx = form.context(Request::post().with_field("comment", payload), HashMap::new());
    engine::evaluate(&form, "a", &ctx).await.unwrap();

    let stored = ctx.answers.current("comment").unwrap();
    let text = stored.as_str().unwrap();
    assert!(!text.contains('<'));
    assert!(!text.contains('>'));
    assert!(!text.contains('"'));
    assert_eq!(
        text,
        "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
    );
}

/// Re-submitting an already-escaped value does not double escape it
#[tokio::test]
async fn test_escaping_is_idempotent_across_requests() {
    let form = compile_yaml(
        r#"
name: xss
steps:
  - slug: a
    fields:
      - code: comment
"#,
    );

    let first = form.context(
        Request::post().with_field("comment", "<b>bold</b>"),
        HashMap::new(),
    );
    engine::evaluate(&form, "a", &first).await.unwrap();
    let escaped_once = first.answers.current("comment").unwrap();

    // The renderer round-trips the stored value into the next POST body
    let second = form.context(
        Request::post().with_field("comment", escaped_once.clone()),
        HashMap::new(),
    );
    engine::evaluate(&form, "a", &second).await.unwrap();

    assert_eq!(second.answers.current("comment"), Some(escaped_once));
}

// ============================================================================
// DEFINITION LOADING
// ============================================================================

/// Forms load from disk the way the surrounding service does it
#[test]
fn test_definition_loads_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("contact.form.yaml");
    fs::write(
        &path,
        r#"
name: contact
steps:
  - slug: details
    fields:
      - code: email
"#,
    )
    .unwrap();

    let source = fs::read_to_string(&path).unwrap();
    let definition = FormDefinition::from_yaml(&source).unwrap();
    let form = compile(&definition, Arc::new(FunctionRegistry::with_builtins())).unwrap();
    assert!(form.step("details").is_some());
}
