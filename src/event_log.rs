//! Event sourcing for request evaluation.
//!
//! An append-only audit trail of what the evaluator did: which nodes ran,
//! which mutations were appended, which effects fired, what navigation was
//! chosen. Events carry a monotonic sequence id and the time since the log
//! was created.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::answers::MutationSource;
use crate::node_id::NodeId;
use crate::request::Method;

/// Single event in the evaluation log
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonic sequence id (for ordering)
    pub id: u64,
    /// Time since context creation (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// Everything the log records
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    RequestStarted {
        step: String,
        method: String,
    },
    NodeEvaluated {
        node_id: String,
        sync: bool,
        had_error: bool,
    },
    MutationAppended {
        code: String,
        source: MutationSource,
    },
    EffectRan {
        node_id: String,
        had_error: bool,
    },
    ValidationFailed {
        code: String,
        message: String,
    },
    NavigationChosen {
        outcome: String,
    },
}

/// Thread-safe, append-only event log.
///
/// Clones share the same buffer.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    next_id: Arc<AtomicU64>,
    start: Instant,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            start: Instant::now(),
        }
    }

    /// Append an event, stamping id and elapsed time
    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: self.start.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
    }

    pub fn emit_request_started(&self, step: &str, method: Method) {
        self.emit(EventKind::RequestStarted {
            step: step.to_string(),
            method: match method {
                Method::Get => "GET".to_string(),
                Method::Post => "POST".to_string(),
            },
        });
    }

    pub fn emit_node_evaluated(&self, node_id: &NodeId, sync: bool, had_error: bool) {
        self.emit(EventKind::NodeEvaluated {
            node_id: node_id.to_string(),
            sync,
            had_error,
        });
    }

    pub fn emit_mutation(&self, code: &str, source: MutationSource) {
        self.emit(EventKind::MutationAppended {
            code: code.to_string(),
            source,
        });
    }

    /// Snapshot of all events so far
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events touching one field code
    pub fn filter_code(&self, code: &str) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| match &e.kind {
                EventKind::MutationAppended { code: c, .. } => c == code,
                EventKind::ValidationFailed { code: c, .. } => c == code,
                _ => false,
            })
            .cloned()
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let log = EventLog::new();
        log.emit_request_started("details", Method::Get);
        log.emit_mutation("email", MutationSource::Post);
        log.emit_mutation("email", MutationSource::Sanitized);

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn clones_share_the_buffer() {
        let log = EventLog::new();
        let clone = log.clone();
        clone.emit_mutation("town", MutationSource::Action);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn filter_by_code() {
        let log = EventLog::new();
        log.emit_mutation("email", MutationSource::Post);
        log.emit_mutation("town", MutationSource::Post);
        log.emit(EventKind::ValidationFailed {
            code: "email".to_string(),
            message: "required".to_string(),
        });

        assert_eq!(log.filter_code("email").len(), 2);
        assert_eq!(log.filter_code("town").len(), 1);
    }

    #[test]
    fn events_serialise_with_tag() {
        let log = EventLog::new();
        log.emit(EventKind::NavigationChosen {
            outcome: "next:summary".to_string(),
        });
        let json = serde_json::to_value(&log.events()[0]).unwrap();
        assert_eq!(json["kind"]["event"], "navigation_chosen");
    }
}
