//! Quick benchmark to verify evaluation performance

use formwork::{compile, engine, FormDefinition, FunctionRegistry, Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const FORM: &str = r#"
name: bench
steps:
  - slug: details
    next: summary
    fields:
      - code: email
        formatters: [ { fn: trim }, { fn: lowercase } ]
        validate:
          - when: { fn: not, args: [ { fn: is_blank, args: [ { ref: answers.email } ] } ] }
            message: Enter an email address
      - code: town
        default: { ref: params.town_hint }
      - code: country
        default: "UK"
  - slug: summary
    fields:
      - code: confirmed
"#;

fn main() {
    let definition = FormDefinition::from_yaml(FORM).expect("definition parses");
    let form = compile(&definition, Arc::new(FunctionRegistry::with_builtins()))
        .expect("form compiles");

    println!("Step Evaluation Performance Test");
    println!("================================\n");

    // Warm up
    for _ in 0..100 {
        let ctx = form.context(
            Request::post().with_field("email", "  A@B.example  "),
            HashMap::new(),
        );
        let _ = engine::evaluate_sync(&form, "details", &ctx);
    }

    let iterations = 10_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let ctx = form.context(
            Request::post()
                .with_field("email", "  A@B.example  ")
                .with_param("town_hint", "Leeds"),
            HashMap::new(),
        );
        let evaluation = engine::evaluate_sync(&form, "details", &ctx).expect("evaluates");
        assert!(evaluation.errors.is_empty());
    }
    let elapsed = start.elapsed();

    println!(
        "{} sync evaluations in {:?} ({:.1} us/request)",
        iterations,
        elapsed,
        elapsed.as_micros() as f64 / iterations as f64
    );
}
