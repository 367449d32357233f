//! Labcoat
//!
//! An experiment engine for refactoring critical paths: run a trusted
//! control behavior alongside one or more candidate behaviors, compare
//! their outcomes, and return only the control's outcome to the caller.
//! Candidates run in randomized order, their failures are contained, and
//! every run publishes `skip`, `result`, or `error` events for downstream
//! analysis:
//! - Sync and async behaviors, returning plain values or `Result`s
//! - Configurable comparison, value mapping, ignore rules, and cleaning
//!   of published values
//! - Enablement predicates for gradual rollout
//!
//! ```no_run
//! let total = labcoat::run("sum-order-items", |experiment| {
//!     experiment.context("order", "legacy-batch");
//!     experiment.control(|| 6)?;
//!     experiment.candidate(|| 6)?;
//!     Ok::<_, anyhow::Error>(())
//! })?;
//! # Ok::<(), labcoat::ScienceError>(())
//! ```

pub mod domain;
pub mod infrastructure;

pub use domain::{
    AsyncExperiment, Classification, EngineError, Experiment, ExperimentConfigError,
    ExperimentResult, Failure, IntoOutcome, Observation, Phase, ScienceError,
};
pub use domain::experiment::{CONTROL_NAME, DEFAULT_CANDIDATE_NAME, FailureCause, PANIC_KIND};
pub use infrastructure::events::{
    ErrorEvent, Event, EventBus, EventKind, PublishedFailure, PublishedObservation, ResultEvent,
    SkipEvent, default_bus,
};
pub use infrastructure::logging::{LogFormat, LoggingConfig, init_logging};
pub use infrastructure::runner::Science;

use serde::Serialize;

/// Run a synchronous experiment on the process-wide default bus
///
/// Shorthand for `Science::default().run(name, configure)`.
pub fn run<T, C, E>(name: &str, configure: C) -> Result<T, ScienceError>
where
    T: Serialize + 'static,
    C: FnOnce(&mut Experiment<T>) -> Result<(), E>,
    E: Into<anyhow::Error>,
{
    Science::default().run(name, configure)
}

/// Run an asynchronous experiment on the process-wide default bus
///
/// Shorthand for `Science::default().run_async(name, configure)`.
pub async fn run_async<T, C, E>(name: &str, configure: C) -> Result<T, ScienceError>
where
    T: Serialize + 'static,
    C: FnOnce(&mut AsyncExperiment<T>) -> Result<(), E>,
    E: Into<anyhow::Error>,
{
    Science::default().run_async(name, configure).await
}

/// Subscribe a handler to one event kind on the process-wide default bus
pub fn on<F>(kind: EventKind, handler: F)
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    default_bus().on(kind, handler);
}
