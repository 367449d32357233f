//! Domain layer - experiment configuration, observations, and classification

pub mod error;
pub mod experiment;

pub use error::{EngineError, Phase, ScienceError};
pub use experiment::{
    AsyncExperiment, Classification, Experiment, ExperimentConfigError, ExperimentResult, Failure,
    IntoOutcome, Observation,
};
