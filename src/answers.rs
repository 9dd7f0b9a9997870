//! Source-tagged answer histories.
//!
//! Each field code owns an append-only mutation log; the current value is
//! always the value of the last mutation. The log is the authoritative
//! record and the precedence mechanism: a trailing `action` mutation
//! protects the field from POST overwrites.
//!
//! `load` entries are synthesised at context construction from the seeded
//! store; everything else is appended by the answer state machine and by
//! action effects during the request.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// MUTATIONS
// ============================================================================

/// Where a mutation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationSource {
    /// Seeded from the external store before the request
    Load,
    /// Set by an effect; protects the field from POST
    Action,
    /// Raw POST body value
    Post,
    /// HTML-escaped from post
    Sanitized,
    /// Formatter output
    Processed,
    /// From the field's default value
    Default,
    /// Cleared because a dependent condition was false
    Dependent,
}

impl fmt::Display for MutationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationSource::Load => "load",
            MutationSource::Action => "action",
            MutationSource::Post => "post",
            MutationSource::Sanitized => "sanitized",
            MutationSource::Processed => "processed",
            MutationSource::Default => "default",
            MutationSource::Dependent => "dependent",
        };
        f.write_str(name)
    }
}

/// One history entry. `value: None` records an undefined write; it
/// serialises as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub value: Option<Value>,
    pub source: MutationSource,
}

// ============================================================================
// HISTORY
// ============================================================================

/// Append-only mutation log for one field code
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnswerHistory {
    current: Option<Value>,
    mutations: Vec<Mutation>,
}

impl AnswerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History with a single `load` entry
    pub fn loaded(value: Value) -> Self {
        let mut history = Self::new();
        history.push(Some(value), MutationSource::Load);
        history
    }

    /// Append a mutation; `current` tracks the last entry by construction
    pub fn push(&mut self, value: Option<Value>, source: MutationSource) {
        self.current = value.clone();
        self.mutations.push(Mutation { value, source });
    }

    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn last_source(&self) -> Option<MutationSource> {
        self.mutations.last().map(|m| m.source)
    }
}

// ============================================================================
// SEED
// ============================================================================

/// Seed entry: either a full history record or a bare value.
///
/// Untagged, so order matters: a history object is tried first, anything
/// else falls through to a bare value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnswerSeed {
    History(AnswerHistory),
    Value(Value),
}

// ============================================================================
// STORE
// ============================================================================

/// Per-request answer store, code -> history.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct AnswerStore {
    histories: Arc<DashMap<String, AnswerHistory>>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialise a seed map. Bare values become single `load` entries;
    /// full histories are taken as-is.
    pub fn seeded(seed: HashMap<String, AnswerSeed>) -> Self {
        let store = Self::new();
        for (code, entry) in seed {
            let history = match entry {
                AnswerSeed::History(h) => h,
                AnswerSeed::Value(v) => AnswerHistory::loaded(v),
            };
            store.histories.insert(code, history);
        }
        store
    }

    /// Append a mutation for `code`, creating the history if needed
    pub fn push(&self, code: &str, value: Option<Value>, source: MutationSource) {
        self.histories
            .entry(code.to_string())
            .or_default()
            .push(value, source);
    }

    pub fn current(&self, code: &str) -> Option<Value> {
        self.histories
            .get(code)
            .and_then(|h| h.current().cloned())
    }

    pub fn history(&self, code: &str) -> Option<AnswerHistory> {
        self.histories.get(code).map(|h| h.clone())
    }

    pub fn last_source(&self, code: &str) -> Option<MutationSource> {
        self.histories.get(code).and_then(|h| h.last_source())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.histories.contains_key(code)
    }

    /// Full store as a JSON object for the global bag
    pub fn snapshot(&self) -> Value {
        let mut map = serde_json::Map::new();
        for entry in self.histories.iter() {
            let value = serde_json::to_value(entry.value()).unwrap_or(Value::Null);
            map.insert(entry.key().clone(), value);
        }
        Value::Object(map)
    }
}

// ============================================================================
// TESTS
// ============================================================================
