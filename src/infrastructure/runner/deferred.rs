//! Deferred experiment execution
//!
//! The async counterpart of the synchronous run: behaviors produce futures,
//! every future is awaited together, and the mapper is itself deferred so
//! configurators can compose further asynchronous steps. Classification and
//! publication are shared with the synchronous path.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use tracing::debug;

use crate::domain::error::{EngineError, Phase, ScienceError};
use crate::domain::experiment::behavior::panic_message;
use crate::domain::experiment::{
    AsyncBehavior, AsyncExperiment, AsyncMapper, CONTROL_NAME, ExperimentConfigError, Failure,
    Observation, validate_experiment_name,
};
use crate::infrastructure::events::{Event, SkipEvent};

use super::Science;

impl Science {
    /// Run an asynchronous experiment
    ///
    /// Same contract as [`Science::run`], with behaviors that return
    /// futures. All behavior futures are started in randomized order and
    /// awaited together; the control's outcome is returned (or its failure
    /// re-raised) once every candidate has settled and the result has been
    /// published.
    pub async fn run_async<T, C, E>(&self, name: &str, configure: C) -> Result<T, ScienceError>
    where
        T: Serialize + 'static,
        C: FnOnce(&mut AsyncExperiment<T>) -> Result<(), E>,
        E: Into<anyhow::Error>,
    {
        let experiment = self.configure_deferred(name, configure)?;
        let AsyncExperiment {
            name: _,
            control,
            candidates,
            context,
            mapper,
            enabled,
            protocol,
        } = experiment;

        let Some(control) = control else {
            return Err(self.config_failure(name, ExperimentConfigError::MissingControl.into()));
        };

        if !enabled() {
            debug!(experiment = name, "experiment disabled, running control only");
            self.bus().publish(&Event::Skip(SkipEvent {
                experiment: name.to_string(),
                context,
            }));
            return control().await.map_err(ScienceError::Control);
        }

        let mut plan: Vec<(String, AsyncBehavior<T>)> = Vec::with_capacity(candidates.len() + 1);
        plan.push((CONTROL_NAME.to_string(), control));
        plan.extend(candidates);
        self.shuffle(&mut plan);
        debug!(experiment = name, behaviors = plan.len(), "running deferred experiment");

        let mut observations = join_all(
            plan.into_iter()
                .map(|(behavior_name, behavior)| execute_deferred(behavior_name, behavior)),
        )
        .await;

        let mut issues = Vec::new();
        if let Some(mapper) = &mapper {
            let mut mapped = Vec::with_capacity(observations.len());
            for observation in observations {
                mapped.push(apply_deferred_mapper(observation, mapper, &mut issues).await);
            }
            observations = mapped;
        }

        self.settle(name, context, observations, &protocol, issues)
    }

    /// Run the configurator against a fresh deferred experiment
    fn configure_deferred<T, C, E>(
        &self,
        name: &str,
        configure: C,
    ) -> Result<AsyncExperiment<T>, ScienceError>
    where
        T: Serialize + 'static,
        C: FnOnce(&mut AsyncExperiment<T>) -> Result<(), E>,
        E: Into<anyhow::Error>,
    {
        validate_experiment_name(name).map_err(|e| self.config_failure(name, e.into()))?;

        let mut experiment = AsyncExperiment::new(name);
        match catch_unwind(AssertUnwindSafe(|| configure(&mut experiment))) {
            Ok(Ok(())) => Ok(experiment),
            Ok(Err(error)) => Err(self.config_failure(name, error.into())),
            Err(payload) => Err(self.config_failure(
                name,
                anyhow::anyhow!("configurator panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }
}

/// Execute one deferred behavior in isolation
///
/// Panics are caught both when the behavior is invoked to produce its
/// future and while that future is polled.
async fn execute_deferred<T>(name: String, behavior: AsyncBehavior<T>) -> Observation<T> {
    let started_at = Utc::now();
    let timer = Instant::now();
    let outcome = match catch_unwind(AssertUnwindSafe(behavior)) {
        Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(Failure::from_panic(payload)),
        },
        Err(payload) => Err(Failure::from_panic(payload)),
    };
    Observation::new(name, outcome, started_at, timer.elapsed())
}

/// Apply the deferred mapper to a successful observation
///
/// Timing metadata still describes the behavior execution, not the mapping.
async fn apply_deferred_mapper<T>(
    observation: Observation<T>,
    mapper: &AsyncMapper<T>,
    issues: &mut Vec<EngineError>,
) -> Observation<T> {
    let name = observation.name().to_string();
    let started_at = observation.started_at();
    let duration = observation.duration();

    match observation.into_outcome() {
        Ok(value) => {
            let outcome = match catch_unwind(AssertUnwindSafe(|| mapper(value))) {
                Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(Failure::from_panic(payload)),
                },
                Err(payload) => Err(Failure::from_panic(payload)),
            };
            if let Err(failure) = &outcome {
                issues.push(EngineError::new(
                    Phase::Mapping,
                    format!("mapper failed for '{name}': {failure}"),
                ));
            }
            Observation::new(name, outcome, started_at, duration)
        }
        Err(failure) => Observation::new(name, Err(failure), started_at, duration),
    }
}
