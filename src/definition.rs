//! Declarative form definitions.
//!
//! The compiler consumes this serde model; authoring tools produce it as
//! YAML or JSON. Expressions use untagged enums, so a bare scalar is a
//! literal and objects are discriminated by their required key:
//!
//! ```yaml
//! name: contact
//! steps:
//!   - slug: details
//!     next: summary
//!     fields:
//!       - code: email
//!         formatters: [ { fn: trim } ]
//!         validate:
//!           - when: { fn: not, args: [ { fn: is_blank, args: [ { ref: answers.email } ] } ] }
//!             message: Enter an email address
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::error::FormworkError;

// ============================================================================
// FORM / STEP / FIELD
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FormDefinition {
    pub name: String,
    pub steps: Vec<StepDef>,
}

impl FormDefinition {
    pub fn from_yaml(source: &str) -> Result<Self, FormworkError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json(source: &str) -> Result<Self, FormworkError> {
        Ok(serde_json::from_str(source)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDef {
    pub slug: String,
    /// Step to continue to after a valid POST
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Effects run before field resolution
    #[serde(default)]
    pub on_load: Vec<EffectDef>,
    /// Effects run after a valid POST
    #[serde(default)]
    pub on_submit: Vec<EffectDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub code: String,
    #[serde(default)]
    pub default: Option<ExprDef>,
    /// Applied in order on POST; an entry with no args receives the
    /// current value
    #[serde(default)]
    pub formatters: Vec<ExprDef>,
    /// Falsy clears the answer on POST
    #[serde(default)]
    pub dependent: Option<ExprDef>,
    #[serde(default = "default_sanitize")]
    pub sanitize: bool,
    #[serde(default)]
    pub validate: Vec<ValidateDef>,
}

fn default_sanitize() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateDef {
    /// The field is valid when this is truthy
    pub when: ExprDef,
    pub message: String,
}

/// An effect expression plus the targets it declares it writes, as
/// `answers.<code>` / `data.<key>` strings. The declarations drive
/// transition wiring.
#[derive(Debug, Clone, Deserialize)]
pub struct EffectDef {
    pub run: ExprDef,
    #[serde(default)]
    pub writes: Vec<String>,
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Expression forms, auto-detected via untagged serde.
///
/// Order matters: object forms are tried by their required key first;
/// `Literal` is last because a JSON value matches anything.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExprDef {
    /// `{ ref: "answers.email" }`
    Reference(RefDef),
    /// `{ fn: trim, args: [...] }`
    Function(FnDef),
    /// `{ when: ..., then: ..., else: ... }`
    Conditional(IfDef),
    /// `{ format: "%1 %2", args: [...] }`
    Format(FormatDef),
    /// `{ each: ..., do: [...], fallback: [...] }`
    Collection(EachDef),
    /// Bare scalar or any other JSON value
    Literal(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefDef {
    /// Dotted path, e.g. `answers.email` or `params.journey_id`
    #[serde(rename = "ref")]
    pub target: String,
}

impl RefDef {
    pub fn segments(&self) -> Vec<String> {
        self.target.split('.').map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FnDef {
    #[serde(rename = "fn")]
    pub name: String,
    #[serde(default)]
    pub args: Vec<ExprDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IfDef {
    pub when: Box<ExprDef>,
    #[serde(default, rename = "then")]
    pub then_branch: Option<Box<ExprDef>>,
    #[serde(default, rename = "else")]
    pub else_branch: Option<Box<ExprDef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatDef {
    pub format: String,
    #[serde(default)]
    pub args: Vec<ExprDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EachDef {
    pub each: Box<ExprDef>,
    #[serde(rename = "do")]
    pub body: Vec<ExprDef>,
    #[serde(default)]
    pub fallback: Vec<ExprDef>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_form() {
        let yaml = r#"
name: contact
steps:
  - slug: details
    fields:
      - code: email
"#;
        let form = FormDefinition::from_yaml(yaml).unwrap();
        assert_eq!(form.name, "contact");
        assert_eq!(form.steps.len(), 1);
        assert_eq!(form.steps[0].fields[0].code, "email");
        assert!(form.steps[0].fields[0].sanitize);
    }

    #[test]
    fn expression_forms_discriminate() {
        let yaml = r#"
- "plain"
- 42
- { ref: answers.email }
- { fn: trim }
- { when: true, then: "yes", else: "no" }
- { format: "%1", args: [ { ref: params.id } ] }
- { each: { ref: data.items }, do: [ { ref: "@value" } ] }
"#;
        let exprs: Vec<ExprDef> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(exprs[0], ExprDef::Literal(_)));
        assert!(matches!(exprs[1], ExprDef::Literal(_)));
        assert!(matches!(exprs[2], ExprDef::Reference(_)));
        assert!(matches!(exprs[3], ExprDef::Function(_)));
        assert!(matches!(exprs[4], ExprDef::Conditional(_)));
        assert!(matches!(exprs[5], ExprDef::Format(_)));
        assert!(matches!(exprs[6], ExprDef::Collection(_)));
    }

    #[test]
    fn ref_segments_split_on_dots() {
        let r = RefDef {
            target: "answers.address.postcode".into(),
        };
        assert_eq!(r.segments(), vec!["answers", "address", "postcode"]);
    }

    #[test]
    fn effects_with_writes() {
        let yaml = r#"
slug: details
on_load:
  - run: { fn: fetch_weather }
    writes: [ data.weather ]
on_submit:
  - run: { fn: set_answer, args: [ "city", "Leeds" ] }
    writes: [ answers.city ]
"#;
        let step: StepDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.on_load.len(), 1);
        assert_eq!(step.on_load[0].writes, vec!["data.weather"]);
        assert_eq!(step.on_submit[0].writes, vec!["answers.city"]);
    }

    #[test]
    fn sanitize_opt_out() {
        let yaml = r#"
code: html_snippet
sanitize: false
"#;
        let field: FieldDef = serde_yaml::from_str(yaml).unwrap();
        assert!(!field.sanitize);
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let err = FormDefinition::from_yaml(": not yaml").unwrap_err();
        assert!(err.to_string().contains("YAML"));
    }
}
