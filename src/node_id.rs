//! Categorised node identifiers.
//!
//! Ids have the shape `<category>:<counter>`. Compile-time categories are
//! stable across requests; runtime categories are handed out when the graph
//! is extended mid-request (dynamic collections, test scaffolding). Consumers
//! treat the numeric suffix as opaque.
//!
//! `NodeId` wraps `Arc<str>` so cloning an id is a refcount bump, the same
//! trick the rest of the crate uses for hot identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// CATEGORY
// ============================================================================

/// The four id namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdCategory {
    /// Authored nodes created when the form is compiled
    CompileAst,
    /// Pseudo-nodes synthesised during compilation
    CompilePseudo,
    /// Authored-shape nodes created inside a request
    RuntimeAst,
    /// Pseudo-nodes created inside a request
    RuntimePseudo,
}

impl IdCategory {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdCategory::CompileAst => "compile_ast",
            IdCategory::CompilePseudo => "compile_pseudo",
            IdCategory::RuntimeAst => "runtime_ast",
            IdCategory::RuntimePseudo => "runtime_pseudo",
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, IdCategory::RuntimeAst | IdCategory::RuntimePseudo)
    }
}

// ============================================================================
// NODE ID
// ============================================================================

/// Globally unique node identifier within a graph snapshot
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Build an id from a raw string.
    ///
    /// Normal code obtains ids from [`IdGenerator`]; this exists for seeding
    /// stores and for tests.
    pub fn from_raw(raw: impl AsRef<str>) -> Self {
        NodeId(Arc::from(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Category parsed back from the prefix, if the id is well-formed
    pub fn category(&self) -> Option<IdCategory> {
        let prefix = self.0.split(':').next()?;
        match prefix {
            "compile_ast" => Some(IdCategory::CompileAst),
            "compile_pseudo" => Some(IdCategory::CompilePseudo),
            "runtime_ast" => Some(IdCategory::RuntimeAst),
            "runtime_pseudo" => Some(IdCategory::RuntimePseudo),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Debug prints the bare id; the prefix already carries the type information.
impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Issues ids with one monotonic counter per category.
///
/// Counters are atomics so runtime allocation can happen from `&self`
/// behind an `Arc` shared with the evaluation context.
#[derive(Debug, Default)]
pub struct IdGenerator {
    compile_ast: AtomicU64,
    compile_pseudo: AtomicU64,
    runtime_ast: AtomicU64,
    runtime_pseudo: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id in the given category
    pub fn next(&self, category: IdCategory) -> NodeId {
        let counter = match category {
            IdCategory::CompileAst => &self.compile_ast,
            IdCategory::CompilePseudo => &self.compile_pseudo,
            IdCategory::RuntimeAst => &self.runtime_ast,
            IdCategory::RuntimePseudo => &self.runtime_pseudo,
        };
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        NodeId(Arc::from(format!("{}:{}", category.prefix(), n).as_str()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn id_format_has_category_prefix() {
        let ids = IdGenerator::new();
        let id = ids.next(IdCategory::CompilePseudo);
        assert!(id.as_str().starts_with("compile_pseudo:"));
        assert_eq!(id.category(), Some(IdCategory::CompilePseudo));
    }

    #[test]
    fn counters_are_per_category() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next(IdCategory::CompileAst).as_str(), "compile_ast:1");
        assert_eq!(ids.next(IdCategory::RuntimeAst).as_str(), "runtime_ast:1");
        assert_eq!(ids.next(IdCategory::CompileAst).as_str(), "compile_ast:2");
    }

    #[test]
    fn ids_are_unique_within_a_generator() {
        let ids = IdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            for cat in [
                IdCategory::CompileAst,
                IdCategory::CompilePseudo,
                IdCategory::RuntimeAst,
                IdCategory::RuntimePseudo,
            ] {
                assert!(seen.insert(ids.next(cat)));
            }
        }
    }

    #[test]
    fn runtime_categories_flagged() {
        assert!(IdCategory::RuntimePseudo.is_runtime());
        assert!(!IdCategory::CompileAst.is_runtime());
    }

    #[test]
    fn raw_ids_round_trip_category() {
        let id = NodeId::from_raw("runtime_pseudo:42");
        assert_eq!(id.category(), Some(IdCategory::RuntimePseudo));
        assert_eq!(NodeId::from_raw("bogus:1").category(), None);
    }
}
