//! Core error taxonomy for the experiment engine

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::domain::experiment::Failure;

// ============================================================================
// ScienceError
// ============================================================================

/// Errors surfaced to the caller of the entry point
///
/// Candidate failures and engine-internal errors never appear here; they are
/// observable only through published events. The caller sees the same
/// success/failure shape it would see calling the control directly, plus
/// configuration errors raised before anything executes.
#[derive(Debug, Error)]
pub enum ScienceError {
    /// The experiment was misconfigured; nothing executed
    #[error("Experiment configuration failed: {0}")]
    Configuration(#[source] anyhow::Error),

    /// The control behavior failed; re-raised after publication
    #[error("Control behavior failed: {0}")]
    Control(Failure),
}

impl ScienceError {
    /// Wrap a configuration failure
    pub fn configuration(error: impl Into<anyhow::Error>) -> Self {
        Self::Configuration(error.into())
    }

    /// Check whether this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Get the control failure, if that is what this error carries
    pub fn control_failure(&self) -> Option<&Failure> {
        match self {
            Self::Control(failure) => Some(failure),
            Self::Configuration(_) => None,
        }
    }
}

// ============================================================================
// Phase
// ============================================================================

/// The engine phase in which an internal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Configurator or experiment validation
    Configuration,
    /// Mapper applied to an observed value
    Mapping,
    /// Comparator, failure comparator, or ignore rule evaluation
    Comparison,
    /// Cleaner applied for event publication
    Cleaning,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Mapping => write!(f, "mapping"),
            Self::Comparison => write!(f, "comparison"),
            Self::Cleaning => write!(f, "cleaning"),
        }
    }
}

// ============================================================================
// EngineError
// ============================================================================

/// An engine-internal error raised by a configured transform
///
/// These are published on the error channel and never interrupt the caller's
/// return of the control's outcome. A transform failure during comparison
/// leaves the affected candidate classified as mismatched, never silently
/// matched.
#[derive(Debug, Error, Clone)]
#[error("{phase} failed: {message}")]
pub struct EngineError {
    /// Phase in which the error occurred
    pub phase: Phase,
    /// Description of the underlying failure
    pub message: String,
}

impl EngineError {
    /// Record an engine-internal error
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}
