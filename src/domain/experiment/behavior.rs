//! Behavior outcomes and captured failures

use std::any::Any;
use std::fmt;

// ============================================================================
// Failure
// ============================================================================

/// Failure kind recorded for behaviors that panicked instead of returning
/// an error
pub const PANIC_KIND: &str = "panic";

/// A failure captured from a single behavior execution (or from the mapper
/// applied to its value)
///
/// The `kind` is the concrete Rust type name of the error the behavior
/// returned, or [`PANIC_KIND`] for a caught panic. The default
/// failure-equivalence rule compares kinds, so two candidates failing with
/// different error types classify independently.
pub struct Failure {
    kind: String,
    message: String,
    cause: FailureCause,
}

/// The underlying cause of a captured failure
pub enum FailureCause {
    /// An error returned by the behavior, erased to `anyhow::Error`
    Error(anyhow::Error),
    /// A panic payload caught at the behavior boundary
    Panic(Box<dyn Any + Send>),
}

impl Failure {
    /// Capture a typed error, recording its concrete type name as the kind
    pub fn from_error<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        let error = error.into();
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            cause: FailureCause::Error(error),
        }
    }

    /// Capture a panic payload caught at a behavior boundary
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self {
            kind: PANIC_KIND.to_string(),
            message: panic_message(payload.as_ref()),
            cause: FailureCause::Panic(payload),
        }
    }

    /// Get the failure kind (error type name, or [`PANIC_KIND`])
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Get the failure message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check whether this failure was a caught panic
    pub fn is_panic(&self) -> bool {
        matches!(self.cause, FailureCause::Panic(_))
    }

    /// Get the underlying error, if the behavior returned one
    pub fn error(&self) -> Option<&anyhow::Error> {
        match &self.cause {
            FailureCause::Error(error) => Some(error),
            FailureCause::Panic(_) => None,
        }
    }

    /// Attempt to downcast the underlying error to a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Consume the failure, yielding its cause for re-raising
    pub fn into_cause(self) -> FailureCause {
        self.cause
    }

    /// Split into a resumable panic payload, or the failure itself when the
    /// behavior returned an error
    pub(crate) fn into_panic(self) -> Result<Box<dyn Any + Send>, Failure> {
        match self.cause {
            FailureCause::Panic(payload) => Ok(payload),
            cause => Err(Self { cause, ..self }),
        }
    }

    /// Check whether two failures have the same kind
    ///
    /// This is the default failure-equivalence rule: same error type (or
    /// both panics) means the failures are considered equivalent.
    pub fn same_kind(&self, other: &Failure) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

// ============================================================================
// IntoOutcome
// ============================================================================

/// Conversion from a behavior's return value into an outcome
///
/// Behaviors may return either a plain value or a `Result`; both shapes are
/// accepted by the registration methods on an experiment. Errors are erased
/// to [`Failure`] at the registration boundary, where the concrete error
/// type is still known.
pub trait IntoOutcome<T> {
    /// Convert the return value into an outcome
    fn into_outcome(self) -> Result<T, Failure>;
}

impl<T> IntoOutcome<T> for T {
    fn into_outcome(self) -> Result<T, Failure> {
        Ok(self)
    }
}

impl<T, E> IntoOutcome<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn into_outcome(self) -> Result<T, Failure> {
        self.map_err(Failure::from_error)
    }
}
