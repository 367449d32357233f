//! Observation of a single behavior execution

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::behavior::Failure;

// ============================================================================
// Observation
// ============================================================================

/// The recorded outcome of executing one behavior once
///
/// Value and failure are mutually exclusive; timing metadata is recorded
/// regardless of outcome. Observations are immutable after creation and
/// owned by the result that contains them.
pub struct Observation<T> {
    name: String,
    outcome: Result<T, Failure>,
    started_at: DateTime<Utc>,
    duration: Duration,
}

impl<T> Observation<T> {
    /// Record a completed behavior execution
    pub fn new(
        name: impl Into<String>,
        outcome: Result<T, Failure>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            outcome,
            started_at,
            duration,
        }
    }

    /// Get the behavior name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the observed value, if the behavior succeeded
    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// Get the captured failure, if the behavior failed
    pub fn failure(&self) -> Option<&Failure> {
        self.outcome.as_ref().err()
    }

    /// Check whether the behavior failed
    pub fn is_failed(&self) -> bool {
        self.outcome.is_err()
    }

    /// Get when the behavior started executing
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get how long the behavior ran
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Consume the observation, yielding its outcome
    pub fn into_outcome(self) -> Result<T, Failure> {
        self.outcome
    }

    /// Apply a fallible transform to the observed value, preserving the
    /// name and timing metadata
    ///
    /// Failed observations pass through unchanged; a transform failure
    /// replaces the value with the captured failure.
    pub(crate) fn map_value(
        self,
        transform: impl FnOnce(T) -> Result<T, Failure>,
    ) -> Self {
        let outcome = match self.outcome {
            Ok(value) => transform(value),
            Err(failure) => Err(failure),
        };
        Self { outcome, ..self }
    }
}
