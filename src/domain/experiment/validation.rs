//! Experiment configuration validation

use thiserror::Error;

/// Reserved behavior name for the control
pub const CONTROL_NAME: &str = "control";

/// Default name for candidates registered without an explicit name
pub const DEFAULT_CANDIDATE_NAME: &str = "candidate";

/// Configuration errors for experiments
///
/// All of these surface before any behavior executes; a misconfigured
/// experiment never runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExperimentConfigError {
    #[error("Experiment name cannot be empty")]
    EmptyExperimentName,

    #[error("A control behavior is already registered")]
    DuplicateControl,

    #[error("Experiment has no control behavior")]
    MissingControl,

    #[error("Candidate name cannot be empty")]
    EmptyCandidateName,

    #[error("Candidate name '{0}' is reserved for the control")]
    ReservedName(String),

    #[error("Duplicate candidate name: '{0}'")]
    DuplicateCandidate(String),
}

/// Validate an experiment name
pub fn validate_experiment_name(name: &str) -> Result<(), ExperimentConfigError> {
    if name.trim().is_empty() {
        return Err(ExperimentConfigError::EmptyExperimentName);
    }
    Ok(())
}

/// Validate a candidate name against the names already registered
pub fn validate_candidate_name(
    name: &str,
    existing: &[String],
) -> Result<(), ExperimentConfigError> {
    if name.trim().is_empty() {
        return Err(ExperimentConfigError::EmptyCandidateName);
    }

    if name == CONTROL_NAME {
        return Err(ExperimentConfigError::ReservedName(name.to_string()));
    }

    if existing.iter().any(|n| n == name) {
        return Err(ExperimentConfigError::DuplicateCandidate(name.to_string()));
    }

    Ok(())
}
