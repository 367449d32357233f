//! Experiment domain module
//!
//! This module provides the configuration, observation, and classification
//! types for running a trusted control behavior alongside experimental
//! candidates and comparing their outcomes.

pub(crate) mod behavior;
mod entity;
mod observation;
mod result;
mod validation;

pub(crate) use entity::{AsyncBehavior, AsyncMapper, Cleaner, Protocol, SyncBehavior, SyncMapper};

// Re-export all public types
pub use behavior::{Failure, FailureCause, IntoOutcome, PANIC_KIND};
pub use entity::{AsyncExperiment, Experiment};
pub use observation::Observation;
pub use result::{Classification, ExperimentResult};
pub use validation::{
    CONTROL_NAME, DEFAULT_CANDIDATE_NAME, ExperimentConfigError, validate_candidate_name,
    validate_experiment_name,
};
