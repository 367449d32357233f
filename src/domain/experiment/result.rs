//! Experiment result construction and candidate classification

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::{Map, Value};

use super::behavior::panic_message;
use super::entity::Protocol;
use super::observation::Observation;
use crate::domain::error::{EngineError, Phase};

// ============================================================================
// Classification
// ============================================================================

/// How a candidate observation compared against the control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The candidate's outcome was equivalent to the control's
    Matched,
    /// The candidate's outcome differed from the control's
    Mismatched,
    /// The candidate mismatched but an ignore rule downgraded it
    Ignored,
}

// ============================================================================
// ExperimentResult
// ============================================================================

/// The aggregate of one control observation and all candidate observations,
/// classified into matched, mismatched, and ignored
///
/// Constructed once per runner invocation, published to the event bus, then
/// discarded. The matched, mismatched, and ignored sequences are pairwise
/// disjoint and together partition the candidates.
pub struct ExperimentResult<T> {
    experiment: String,
    context: Map<String, Value>,
    control: Observation<T>,
    candidates: Vec<(Observation<T>, Classification)>,
}

impl<T> ExperimentResult<T> {
    /// Build a result, classifying every candidate against the control
    ///
    /// Engine-internal errors raised by the comparator, the failure
    /// comparator, or an ignore rule are collected for publication; the
    /// affected candidate stays mismatched.
    pub(crate) fn build(
        experiment: impl Into<String>,
        context: Map<String, Value>,
        control: Observation<T>,
        candidates: Vec<Observation<T>>,
        protocol: &Protocol<T>,
    ) -> (Self, Vec<EngineError>) {
        let mut issues = Vec::new();
        let candidates = candidates
            .into_iter()
            .map(|candidate| {
                let classification = classify(&control, &candidate, protocol, &mut issues);
                (candidate, classification)
            })
            .collect();

        let result = Self {
            experiment: experiment.into(),
            context,
            control,
            candidates,
        };
        (result, issues)
    }

    /// Get the experiment name
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Get the attached context
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Get the control observation
    pub fn control(&self) -> &Observation<T> {
        &self.control
    }

    /// Get all candidate observations in execution order
    pub fn candidates(&self) -> impl Iterator<Item = &Observation<T>> {
        self.candidates.iter().map(|(obs, _)| obs)
    }

    /// Get the candidates whose outcomes matched the control's
    pub fn matched(&self) -> Vec<&Observation<T>> {
        self.with_classification(Classification::Matched)
    }

    /// Get the candidates whose outcomes mismatched the control's
    pub fn mismatched(&self) -> Vec<&Observation<T>> {
        self.with_classification(Classification::Mismatched)
    }

    /// Get the mismatched candidates downgraded by an ignore rule
    pub fn ignored(&self) -> Vec<&Observation<T>> {
        self.with_classification(Classification::Ignored)
    }

    /// Get candidate observations paired with their classification
    pub fn classified(&self) -> impl Iterator<Item = (&Observation<T>, Classification)> {
        self.candidates.iter().map(|(obs, c)| (obs, *c))
    }

    /// Consume the result, yielding the control observation
    pub(crate) fn into_control(self) -> Observation<T> {
        self.control
    }

    fn with_classification(&self, wanted: Classification) -> Vec<&Observation<T>> {
        self.candidates
            .iter()
            .filter(|(_, c)| *c == wanted)
            .map(|(obs, _)| obs)
            .collect()
    }
}

// ============================================================================
// Classification algorithm
// ============================================================================

/// Classify one candidate against the control
///
/// Both values: the comparator decides. Both failures: the
/// failure-equivalence rule decides. Otherwise the candidate is tentatively
/// mismatched. Tentatively mismatched candidates run through the ignore
/// rules in registration order, values passed verbatim even when one side
/// failed; the first matching rule downgrades to ignored.
fn classify<T>(
    control: &Observation<T>,
    candidate: &Observation<T>,
    protocol: &Protocol<T>,
    issues: &mut Vec<EngineError>,
) -> Classification {
    let equivalent = match (control.value(), candidate.value()) {
        (Some(control_value), Some(candidate_value)) => guard(
            || (protocol.comparator)(control_value, candidate_value),
            Phase::Comparison,
            "comparator",
            issues,
        ),
        (None, None) => {
            // Both sides failed; value() is None exactly when failure() is set
            let control_failure = control.failure().expect("failed observation");
            let candidate_failure = candidate.failure().expect("failed observation");
            guard(
                || (protocol.failure_comparator)(control_failure, candidate_failure),
                Phase::Comparison,
                "failure comparator",
                issues,
            )
        }
        _ => false,
    };

    if equivalent {
        return Classification::Matched;
    }

    for rule in &protocol.ignore_rules {
        let ignored = guard(
            || rule(control.value(), candidate.value()),
            Phase::Comparison,
            "ignore rule",
            issues,
        );
        if ignored {
            return Classification::Ignored;
        }
    }

    Classification::Mismatched
}

/// Run a configured predicate, converting a panic into an engine error
///
/// A panicking predicate counts as false: the candidate is never silently
/// matched or ignored on the strength of a broken transform.
fn guard(
    predicate: impl FnOnce() -> bool,
    phase: Phase,
    what: &str,
    issues: &mut Vec<EngineError>,
) -> bool {
    match catch_unwind(AssertUnwindSafe(predicate)) {
        Ok(verdict) => verdict,
        Err(payload) => {
            issues.push(EngineError::new(
                phase,
                format!("{what} panicked: {}", panic_message(payload.as_ref())),
            ));
            false
        }
    }
}
