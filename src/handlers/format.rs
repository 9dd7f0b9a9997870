//! Template formatting with positional placeholders.
//!
//! Arguments evaluate left to right, then `%1`, `%2`, ... substitute their
//! string coercions into the template. Placeholders may repeat;
//! out-of-range placeholders and errored arguments become empty strings.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::EvalContext;
use crate::error::Outcome;
use crate::functions::coerce_string;
use crate::handler::ThunkHandler;
use crate::invoker::Invoker;
use crate::node_id::NodeId;

pub struct FormatHandler {
    id: NodeId,
    template: String,
    args: Vec<NodeId>,
}

impl FormatHandler {
    pub fn new(id: NodeId, template: String, args: Vec<NodeId>) -> Self {
        Self { id, template, args }
    }
}

/// Substitute `%N` placeholders. `%` not followed by a digit is literal.
fn substitute(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut number = String::new();
        while let Some((_, d)) = chars.peek() {
            if d.is_ascii_digit() {
                number.push(*d);
                chars.next();
            } else {
                break;
            }
        }
        if number.is_empty() {
            out.push('%');
            continue;
        }
        // Placeholders are 1-based; out of range resolves to empty
        if let Ok(n) = number.parse::<usize>() {
            if n >= 1 {
                if let Some(arg) = args.get(n - 1) {
                    out.push_str(arg);
                }
            }
        }
    }
    out
}

/// Errored or undefined arguments render as empty strings
fn coerce_outcome(outcome: &Outcome) -> String {
    match outcome.ok() {
        Some(value) => coerce_string(value),
        None => String::new(),
    }
}

#[async_trait]
impl ThunkHandler for FormatHandler {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    fn dependencies(&self) -> Vec<NodeId> {
        self.args.clone()
    }

    async fn evaluate(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let mut rendered = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let outcome = invoker.invoke(arg, ctx).await;
            rendered.push(coerce_outcome(&outcome));
        }
        Outcome::value(Value::String(substitute(&self.template, &rendered)))
    }

    fn evaluate_sync(&self, ctx: &EvalContext, invoker: &Invoker) -> Outcome {
        let rendered: Vec<String> = self
            .args
            .iter()
            .map(|arg| coerce_outcome(&invoker.invoke_sync(arg, ctx)))
            .collect();
        Outcome::value(Value::String(substitute(&self.template, &rendered)))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placeholders_substitute_in_order() {
        assert_eq!(
            substitute("%1 of %2", &strings(&["1", "10"])),
            "1 of 10"
        );
    }

    #[test]
    fn placeholders_may_repeat() {
        assert_eq!(substitute("%1 and %1", &strings(&["x"])), "x and x");
    }

    #[test]
    fn out_of_range_is_empty() {
        assert_eq!(substitute("a%9z", &strings(&["x"])), "az");
    }

    #[test]
    fn bare_percent_is_literal() {
        assert_eq!(substitute("100% done %1", &strings(&["ok"])), "100% done ok");
    }

    #[test]
    fn multi_digit_placeholders() {
        let args: Vec<String> = (1..=12).map(|n| n.to_string()).collect();
        assert_eq!(substitute("%12", &args), "12");
    }
}
