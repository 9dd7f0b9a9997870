//! Safety utilities at the request boundary.
//!
//! Two concerns: property keys used to index into POST/params/answers maps
//! must pass a conservative allowlist, and string values lifted from POST
//! are HTML-entity escaped unless the field opts out.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

use crate::error::ThunkError;
use crate::node_id::NodeId;

/// Allowlist for property keys: alphanumerics, underscore, dot
static SAFE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.]*$").expect("safe-key pattern is valid")
});

/// Keys that smell like prototype pollution, rejected outright
const DENIED_KEYS: &[&str] = &["__proto__", "prototype", "constructor"];

/// Check a property key against the allowlist.
///
/// Rejects empty keys, non-allowlisted characters, the denied names and
/// anything containing a `..` traversal.
pub fn is_safe_key(key: &str) -> bool {
    if !SAFE_KEY.is_match(key) {
        return false;
    }
    if key.contains("..") {
        return false;
    }
    !DENIED_KEYS.iter().any(|denied| key == *denied)
}

/// `is_safe_key` as a handler-friendly error
pub fn ensure_safe_key(key: &str, node_id: &NodeId) -> Result<(), ThunkError> {
    if is_safe_key(key) {
        Ok(())
    } else {
        Err(ThunkError::security_violation(
            node_id,
            format!("unsafe property key '{key}'"),
        ))
    }
}

/// HTML-entity escape `&`, `<`, `>`, `"` and `'`.
///
/// Idempotent: an ampersand that already begins one of the five entities is
/// left alone, so escaping twice equals escaping once.
pub fn escape_html(input: &str) -> Cow<'_, str> {
    const ENTITIES: &[&str] = &["amp;", "lt;", "gt;", "quot;", "#39;"];

    let needs_escape = input
        .chars()
        .any(|c| matches!(c, '&' | '<' | '>' | '"' | '\''));
    if !needs_escape {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 8);
    for (i, c) in input.char_indices() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '&' => {
                let rest = &input[i + 1..];
                if ENTITIES.iter().any(|e| rest.starts_with(e)) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_keys() {
        for key in ["email", "journey_id", "address.line1", "a1_b2", "X"] {
            assert!(is_safe_key(key), "expected '{key}' to be safe");
        }
    }

    #[test]
    fn rejects_pollution_and_traversal() {
        for key in [
            "__proto__",
            "constructor",
            "prototype",
            "a..b",
            "../etc/passwd",
            "",
            "a b",
            "a-b",
            "<script>",
            ".leading",
        ] {
            assert!(!is_safe_key(key), "expected '{key}' to be rejected");
        }
    }

    #[test]
    fn dotted_paths_stay_safe() {
        assert!(is_safe_key("answers.address.postcode"));
    }

    #[test]
    fn escape_covers_the_five_characters() {
        assert_eq!(
            escape_html(r#"<b a="x">&'</b>"#),
            "&lt;b a=&quot;x&quot;&gt;&amp;&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn escape_is_idempotent() {
        let inputs = [
            "<b>a@b</b>",
            "already &amp; escaped &lt;tag&gt;",
            "mixed & <raw> with &quot;entities&quot;",
            "plain text",
            "unicode £€ <tag>",
        ];
        for input in inputs {
            let once = escape_html(input).into_owned();
            let twice = escape_html(&once).into_owned();
            assert_eq!(once, twice, "double escape changed: {input}");
        }
    }

    #[test]
    fn clean_strings_borrow() {
        assert!(matches!(escape_html("no markup"), Cow::Borrowed(_)));
    }

    #[test]
    fn lone_ampersand_is_escaped() {
        assert_eq!(escape_html("fish & chips"), "fish &amp; chips");
        // An ampersand that begins an entity is not double escaped
        assert_eq!(escape_html("&amp;"), "&amp;");
    }
}
