//! Process-wide publish/subscribe channel for experiment outcomes
//!
//! The runner publishes `skip`, `result`, and `error` events here;
//! subscribers (loggers, dashboards) consume them independently of the
//! runner's control flow. Publishing is fire-and-forget: a subscriber
//! failure never aborts the runner or affects the caller's return value.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::error::Phase;
use crate::domain::experiment::behavior::panic_message;

// ============================================================================
// Event payloads
// ============================================================================

/// The kinds of event the runner publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An experiment was disabled; only the control ran
    Skip,
    /// An experiment completed and its candidates were classified
    Result,
    /// An engine-internal error occurred in a configured transform
    Error,
}

/// Published when a disabled experiment runs only its control
#[derive(Debug, Clone, Serialize)]
pub struct SkipEvent {
    /// Experiment name
    pub experiment: String,
    /// Context attached by the configurator
    pub context: Map<String, Value>,
}

/// A captured failure in published form
#[derive(Debug, Clone, Serialize)]
pub struct PublishedFailure {
    /// Failure kind (error type name, or "panic")
    pub kind: String,
    /// Failure message
    pub message: String,
}

/// An observation in published form
///
/// Values pass through the experiment's cleaner before publication; the
/// default rendition is the serde_json serialization of the mapped value.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedObservation {
    /// Behavior name
    pub name: String,
    /// Cleaned value, present only if the behavior succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Captured failure, present only if the behavior failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PublishedFailure>,
    /// When the behavior started executing
    pub started_at: DateTime<Utc>,
    /// How long the behavior ran, in milliseconds
    pub duration_ms: u64,
}

/// Published when an experiment completes
#[derive(Debug, Clone, Serialize)]
pub struct ResultEvent {
    /// Experiment name
    pub experiment: String,
    /// Context attached by the configurator
    pub context: Map<String, Value>,
    /// The control observation
    pub control: PublishedObservation,
    /// Candidates whose outcomes matched the control's
    pub matched: Vec<PublishedObservation>,
    /// Candidates whose outcomes mismatched the control's
    pub mismatched: Vec<PublishedObservation>,
    /// Mismatched candidates downgraded by an ignore rule
    pub ignored: Vec<PublishedObservation>,
}

/// Published when a configured transform fails inside the engine
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    /// Experiment name
    pub experiment: String,
    /// Phase in which the error occurred
    pub phase: Phase,
    /// Description of the underlying failure
    pub message: String,
}

/// An event published by the runner
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A disabled experiment ran only its control
    Skip(SkipEvent),
    /// An experiment completed with a classified result
    Result(ResultEvent),
    /// An engine-internal error occurred
    Error(ErrorEvent),
}

impl Event {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Skip(_) => EventKind::Skip,
            Self::Result(_) => EventKind::Result,
            Self::Error(_) => EventKind::Error,
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Multi-subscriber publish channel
///
/// A process-wide default instance backs the crate-level entry points;
/// tests construct a fresh bus per runner to observe events in isolation.
/// Handlers are invoked in registration order and cannot be removed.
pub struct EventBus {
    handlers: RwLock<Vec<(EventKind, Handler)>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe a handler to one event kind
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .expect("event bus lock poisoned")
            .push((kind, Arc::new(handler)));
    }

    /// Publish an event to every subscriber of its kind
    ///
    /// A panicking subscriber is caught and logged; remaining subscribers
    /// still run.
    pub fn publish(&self, event: &Event) {
        let subscribers: Vec<Handler> = {
            let handlers = self.handlers.read().expect("event bus lock poisoned");
            handlers
                .iter()
                .filter(|(kind, _)| *kind == event.kind())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in subscribers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                warn!(
                    kind = ?event.kind(),
                    "event subscriber panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_BUS: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

/// Get the process-wide default bus
///
/// Initialized once on first use and torn down only at process exit.
pub fn default_bus() -> Arc<EventBus> {
    Arc::clone(&DEFAULT_BUS)
}
