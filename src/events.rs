//! Analysis events for push notifications to hosts
//!
//! The proxy emits JSON events as work completes so an editor frontend can
//! refresh without polling. Each event serializes to a single JSON object
//! with a `type` field (JSON Lines friendly):
//!
//! ```json
//! {"type":"reparse_finished","unit":3,"filename":"/src/main.cpp",...}
//! ```
//!
//! Listeners are registered per [`EventBus`] instance and keyed by the
//! [`SubscriptionId`] returned at registration; there is no global emitter.
//! Dropping the id without unsubscribing leaks the listener for the bus's
//! lifetime, nothing worse.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::engine::{Diagnostic, Position};

/// Trait for events the proxy can emit
pub trait AnalysisEvent: Serialize {
    fn event_type() -> &'static str;
}

/// Wrapper adding the `type` discriminant field
#[derive(Serialize)]
struct EventEnvelope<'a, P: Serialize> {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(flatten)]
    payload: &'a P,
}

/// A serialized event as delivered to listeners
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub event_type: &'static str,
    /// Full JSON object including the `type` field
    pub json: String,
}

/// Key for one registered listener; consumed by unsubscribe
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&EmittedEvent) + Send + Sync>;

/// Per-proxy event fan-out
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; keep the returned id to unsubscribe later
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&EmittedEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Box::new(listener)));
        SubscriptionId(id)
    }

    /// Remove a listener; returns false if the id was already removed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        listeners.len() != before
    }

    /// Serialize and deliver an event to every listener
    pub fn emit<E: AnalysisEvent>(&self, event: &E) {
        let listeners = self.listeners.lock();
        if listeners.is_empty() {
            return;
        }

        let envelope = EventEnvelope {
            event_type: E::event_type(),
            payload: event,
        };
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(event = E::event_type(), %err, "failed to serialize event");
                return;
            }
        };

        let emitted = EmittedEvent {
            event_type: E::event_type(),
            json,
        };
        for (_, listener) in listeners.iter() {
            listener(&emitted);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// Event Types
// ============================================================================

/// A pool slot was (re)assigned to a freshly parsed file
#[derive(Debug, Clone, Serialize)]
pub struct UnitCreatedEvent {
    pub unit: usize,
    pub filename: String,
    /// Whether the initial parse produced a usable handle
    pub parsed: bool,
    pub timestamp: String,
}

impl AnalysisEvent for UnitCreatedEvent {
    fn event_type() -> &'static str {
        "unit_created"
    }
}

impl UnitCreatedEvent {
    pub fn new(unit: usize, filename: &str, parsed: bool) -> Self {
        Self {
            unit,
            filename: filename.to_string(),
            parsed,
            timestamp: timestamp(),
        }
    }
}

/// An incremental reparse finished (successfully or not)
#[derive(Debug, Clone, Serialize)]
pub struct ReparseFinishedEvent {
    pub unit: usize,
    pub filename: String,
    pub ok: bool,
    pub timestamp: String,
}

impl AnalysisEvent for ReparseFinishedEvent {
    fn event_type() -> &'static str {
        "reparse_finished"
    }
}

impl ReparseFinishedEvent {
    pub fn new(unit: usize, filename: &str, ok: bool) -> Self {
        Self {
            unit,
            filename: filename.to_string(),
            ok,
            timestamp: timestamp(),
        }
    }
}

/// A code-completion query produced its result
#[derive(Debug, Clone, Serialize)]
pub struct CodeCompleteFinishedEvent {
    pub unit: usize,
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub candidates: usize,
    pub timestamp: String,
}

impl AnalysisEvent for CodeCompleteFinishedEvent {
    fn event_type() -> &'static str {
        "code_complete_finished"
    }
}

impl CodeCompleteFinishedEvent {
    pub fn new(unit: usize, filename: &str, position: Position, candidates: usize) -> Self {
        Self {
            unit,
            filename: filename.to_string(),
            line: position.line,
            column: position.column,
            candidates,
            timestamp: timestamp(),
        }
    }
}

/// An occurrences query produced its result
#[derive(Debug, Clone, Serialize)]
pub struct OccurrencesFinishedEvent {
    pub unit: usize,
    pub filename: String,
    pub identifier: String,
    pub occurrences: usize,
    pub timestamp: String,
}

impl AnalysisEvent for OccurrencesFinishedEvent {
    fn event_type() -> &'static str {
        "occurrences_finished"
    }
}

impl OccurrencesFinishedEvent {
    pub fn new(unit: usize, filename: &str, identifier: &str, occurrences: usize) -> Self {
        Self {
            unit,
            filename: filename.to_string(),
            identifier: identifier.to_string(),
            occurrences,
            timestamp: timestamp(),
        }
    }
}

/// Fresh diagnostics are available after a parse or reparse.
///
/// Carries the full diagnostic payloads so hosts can render squiggles
/// straight from the event without a follow-up query.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsUpdatedEvent {
    pub unit: usize,
    pub filename: String,
    pub diagnostics: Vec<Diagnostic>,
    pub timestamp: String,
}

impl AnalysisEvent for DiagnosticsUpdatedEvent {
    fn event_type() -> &'static str {
        "diagnostics_updated"
    }
}

impl DiagnosticsUpdatedEvent {
    pub fn new(unit: usize, filename: &str, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            unit,
            filename: filename.to_string(),
            diagnostics,
            timestamp: timestamp(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
