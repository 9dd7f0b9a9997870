//! Scope stack for iteration and formatter evaluation.
//!
//! Frames bind names like `@value` and `@index` for the expressions beneath
//! them. The stack is explicit (not closure captured) because iteration
//! frames must be addressable by depth for parent lookups, and tagged by
//! kind so resolvers can skip formatter frames when walking parents.
//!
//! Pushing returns a guard that pops on drop, so every push is matched by a
//! pop on all exit paths, including error paths.

use serde_json::Value;
use std::collections::HashMap;
use parking_lot::Mutex;

// ============================================================================
// FRAMES
// ============================================================================

/// What pushed the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Iteration,
    Formatter,
}

/// One scope frame: a kind tag plus name bindings
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    pub kind: FrameKind,
    values: HashMap<String, Value>,
}

impl ScopeFrame {
    /// Frame for one collection element
    pub fn iteration(value: Value, index: usize) -> Self {
        let mut values = HashMap::new();
        values.insert("@value".to_string(), value);
        values.insert("@index".to_string(), Value::from(index));
        Self {
            kind: FrameKind::Iteration,
            values,
        }
    }

    /// Frame for a formatter body; `@value` is the value being transformed.
    /// An undefined current value leaves `@value` unbound.
    pub fn formatter(value: Option<Value>) -> Self {
        let mut values = HashMap::new();
        if let Some(v) = value {
            values.insert("@value".to_string(), v);
        }
        Self {
            kind: FrameKind::Formatter,
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

// ============================================================================
// STACK
// ============================================================================

/// Strictly LIFO stack of scope frames
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Mutex<Vec<ScopeFrame>>,
}

/// Pops its frame when dropped
pub struct ScopeGuard<'a> {
    stack: &'a ScopeStack,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.stack.frames.lock().pop();
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame; the returned guard pops it on drop
    #[must_use = "dropping the guard pops the frame"]
    pub fn push(&self, frame: ScopeFrame) -> ScopeGuard<'_> {
        self.frames.lock().push(frame);
        ScopeGuard { stack: self }
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Innermost binding of `name`, searching top-down
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let frames = self.frames.lock();
        frames.iter().rev().find_map(|f| f.get(name).cloned())
    }

    /// `@value` of the nth iteration frame from the top, skipping formatter
    /// frames. Depth 0 is the current item, 1 its parent.
    pub fn iteration_value(&self, depth: usize) -> Option<Value> {
        let frames = self.frames.lock();
        frames
            .iter()
            .rev()
            .filter(|f| f.kind == FrameKind::Iteration)
            .nth(depth)
            .and_then(|f| f.get("@value").cloned())
    }

    /// Memoisation discriminator for the current stack.
    ///
    /// Empty when no frames are open, so step-level results share one memo
    /// slot. Iteration frames contribute their index, formatter frames the
    /// value under transformation, so bodies re-evaluate per binding.
    pub fn memo_key(&self) -> String {
        let frames = self.frames.lock();
        if frames.is_empty() {
            return String::new();
        }
        let mut key = String::new();
        for frame in frames.iter() {
            match frame.kind {
                FrameKind::Iteration => {
                    key.push_str("i:");
                    if let Some(idx) = frame.get("@index") {
                        key.push_str(&idx.to_string());
                    }
                }
                FrameKind::Formatter => {
                    key.push_str("f:");
                    if let Some(v) = frame.get("@value") {
                        key.push_str(&v.to_string());
                    }
                }
            }
            key.push('|');
        }
        key
    }
}

// ============================================================================
// TESTS
// ============================================================================
