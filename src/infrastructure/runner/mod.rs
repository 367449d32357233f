//! Experiment runner
//!
//! The runner orchestrates one experiment invocation: it populates a fresh
//! experiment through the caller's configurator, decides whether candidates
//! run at all, executes every behavior in randomized order, classifies the
//! outcomes, publishes events, and returns the control's outcome unchanged.

mod deferred;

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{SeedableRng, thread_rng};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::error::{EngineError, Phase, ScienceError};
use crate::domain::experiment::behavior::panic_message;
use crate::domain::experiment::{
    CONTROL_NAME, Classification, Cleaner, Experiment, ExperimentConfigError, ExperimentResult,
    Failure, Observation, Protocol, SyncBehavior, SyncMapper, validate_experiment_name,
};
use crate::infrastructure::events::{
    ErrorEvent, Event, EventBus, PublishedFailure, PublishedObservation, ResultEvent, SkipEvent,
    default_bus,
};

// ============================================================================
// Science
// ============================================================================

/// The experiment runner
///
/// Holds the bus on which events are published and an optional seed for the
/// execution-order shuffle. `Science::default()` binds the process-wide bus
/// with ambient randomness; tests construct one against a fresh bus and a
/// fixed seed for deterministic ordering.
pub struct Science {
    bus: Arc<EventBus>,
    seed: Option<u64>,
}

impl Science {
    /// Create a runner publishing on the given bus
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, seed: None }
    }

    /// Fix the execution-order shuffle seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Get the bus this runner publishes on
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run a synchronous experiment
    ///
    /// The configurator registers the control and candidates on a fresh
    /// [`Experiment`]; any failure there is a configuration error and
    /// nothing executes. A disabled experiment runs only the control and
    /// publishes `skip`. Otherwise every behavior runs in randomized order,
    /// candidates are classified, `result` is published, and the control's
    /// value is returned (or its failure re-raised) regardless of what the
    /// candidates did.
    pub fn run<T, C, E>(&self, name: &str, configure: C) -> Result<T, ScienceError>
    where
        T: Serialize + 'static,
        C: FnOnce(&mut Experiment<T>) -> Result<(), E>,
        E: Into<anyhow::Error>,
    {
        let experiment = self.configure_sync(name, configure)?;
        let Experiment {
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
            self.bus.publish(&Event::Skip(SkipEvent {
                experiment: name.to_string(),
                context,
            }));
            return control().map_err(ScienceError::Control);
        }

        let mut plan: Vec<(String, SyncBehavior<T>)> = Vec::with_capacity(candidates.len() + 1);
        plan.push((CONTROL_NAME.to_string(), control));
        plan.extend(candidates);
        self.shuffle(&mut plan);
        debug!(experiment = name, behaviors = plan.len(), "running experiment");

        let mut observations: Vec<Observation<T>> = plan
            .into_iter()
            .map(|(behavior_name, behavior)| execute(behavior_name, behavior))
            .collect();

        let mut issues = Vec::new();
        if let Some(mapper) = &mapper {
            observations = observations
                .into_iter()
                .map(|observation| apply_mapper(observation, mapper, &mut issues))
                .collect();
        }

        self.settle(name, context, observations, &protocol, issues)
    }

    /// Run the configurator against a fresh experiment
    fn configure_sync<T, C, E>(&self, name: &str, configure: C) -> Result<Experiment<T>, ScienceError>
    where
        T: Serialize + 'static,
        C: FnOnce(&mut Experiment<T>) -> Result<(), E>,
        E: Into<anyhow::Error>,
    {
        validate_experiment_name(name).map_err(|e| self.config_failure(name, e.into()))?;

        let mut experiment = Experiment::new(name);
        match catch_unwind(AssertUnwindSafe(|| configure(&mut experiment))) {
            Ok(Ok(())) => Ok(experiment),
            Ok(Err(error)) => Err(self.config_failure(name, error.into())),
            Err(payload) => Err(self.config_failure(
                name,
                anyhow::anyhow!("configurator panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }

    /// Shuffle the execution plan to avoid ordering bias
    fn shuffle<B>(&self, plan: &mut [(String, B)]) {
        match self.seed {
            Some(seed) => plan.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => plan.shuffle(&mut thread_rng()),
        }
    }

    /// Classify, publish, and resolve the control's outcome
    ///
    /// Shared tail of the sync and async runs. Engine-internal issues are
    /// published on the error channel before the result; the control's
    /// failure, if any, is re-raised after publication.
    fn settle<T>(
        &self,
        experiment: &str,
        context: Map<String, Value>,
        observations: Vec<Observation<T>>,
        protocol: &Protocol<T>,
        mut issues: Vec<EngineError>,
    ) -> Result<T, ScienceError>
    where
        T: Serialize + 'static,
    {
        let mut control = None;
        let mut candidates = Vec::new();
        for observation in observations {
            if observation.name() == CONTROL_NAME {
                control = Some(observation);
            } else {
                candidates.push(observation);
            }
        }
        // Every execution plan carries the control under CONTROL_NAME
        debug_assert!(control.is_some(), "control observation missing");
        let Some(control) = control else {
            return Err(self.config_failure(
                experiment,
                ExperimentConfigError::MissingControl.into(),
            ));
        };

        let (result, comparison_issues) =
            ExperimentResult::build(experiment, context, control, candidates, protocol);
        issues.extend(comparison_issues);

        let (event, cleaning_issues) = result_event(&result, protocol);
        issues.extend(cleaning_issues);

        for issue in &issues {
            warn!(experiment, phase = %issue.phase, "engine transform failed: {}", issue.message);
            self.bus.publish(&Event::Error(ErrorEvent {
                experiment: experiment.to_string(),
                phase: issue.phase,
                message: issue.message.clone(),
            }));
        }
        self.bus.publish(&Event::Result(event));

        match result.into_control().into_outcome() {
            Ok(value) => Ok(value),
            Err(failure) => match failure.into_panic() {
                Ok(payload) => resume_unwind(payload),
                Err(failure) => Err(ScienceError::Control(failure)),
            },
        }
    }

    /// Publish and wrap a configuration failure
    fn config_failure(&self, experiment: &str, error: anyhow::Error) -> ScienceError {
        warn!(experiment, "experiment configuration failed: {error}");
        self.bus.publish(&Event::Error(ErrorEvent {
            experiment: experiment.to_string(),
            phase: Phase::Configuration,
            message: error.to_string(),
        }));
        ScienceError::Configuration(error)
    }
}

impl Default for Science {
    fn default() -> Self {
        Self::new(default_bus())
    }
}

// ============================================================================
// Behavior execution
// ============================================================================

/// Execute one behavior in isolation, recording its outcome and timing
///
/// Panics are caught at this boundary; a candidate panic never aborts
/// sibling executions or the caller.
fn execute<T>(name: String, behavior: SyncBehavior<T>) -> Observation<T> {
    let started_at = Utc::now();
    let timer = Instant::now();
    let outcome = match catch_unwind(AssertUnwindSafe(behavior)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(Failure::from_panic(payload)),
    };
    Observation::new(name, outcome, started_at, timer.elapsed())
}

/// Apply the mapper to a successful observation
///
/// A mapper failure becomes the observation's failure and is additionally
/// reported on the error channel: a control-mapper failure then behaves
/// like a control failure, a candidate-mapper failure like a candidate
/// failure.
fn apply_mapper<T>(
    observation: Observation<T>,
    mapper: &SyncMapper<T>,
    issues: &mut Vec<EngineError>,
) -> Observation<T> {
    let was_ok = !observation.is_failed();
    let observation = observation.map_value(|value| {
        match catch_unwind(AssertUnwindSafe(|| mapper(value))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(Failure::from_panic(payload)),
        }
    });
    if was_ok {
        if let Some(failure) = observation.failure() {
            issues.push(EngineError::new(
                Phase::Mapping,
                format!("mapper failed for '{}': {failure}", observation.name()),
            ));
        }
    }
    observation
}

// ============================================================================
// Event construction
// ============================================================================

/// Build the published rendition of a completed result
fn result_event<T: Serialize>(
    result: &ExperimentResult<T>,
    protocol: &Protocol<T>,
) -> (ResultEvent, Vec<EngineError>) {
    let mut issues = Vec::new();
    let control = publish_observation(result.control(), protocol, &mut issues);

    let mut matched = Vec::new();
    let mut mismatched = Vec::new();
    let mut ignored = Vec::new();
    for (observation, classification) in result.classified() {
        let published = publish_observation(observation, protocol, &mut issues);
        match classification {
            Classification::Matched => matched.push(published),
            Classification::Mismatched => mismatched.push(published),
            Classification::Ignored => ignored.push(published),
        }
    }

    let event = ResultEvent {
        experiment: result.experiment().to_string(),
        context: result.context().clone(),
        control,
        matched,
        mismatched,
        ignored,
    };
    (event, issues)
}

/// Convert an observation into its published form
fn publish_observation<T: Serialize>(
    observation: &Observation<T>,
    protocol: &Protocol<T>,
    issues: &mut Vec<EngineError>,
) -> PublishedObservation {
    let value = observation
        .value()
        .map(|value| clean_value(observation.name(), value, protocol.cleaner.as_ref(), issues));
    let failure = observation.failure().map(|failure| PublishedFailure {
        kind: failure.kind().to_string(),
        message: failure.message().to_string(),
    });
    PublishedObservation {
        name: observation.name().to_string(),
        value,
        failure,
        started_at: observation.started_at(),
        duration_ms: observation.duration().as_millis() as u64,
    }
}

/// Produce the published rendition of a value
///
/// A failing cleaner is reported on the error channel and the default
/// serde_json rendition is used instead.
fn clean_value<T: Serialize>(
    name: &str,
    value: &T,
    cleaner: Option<&Cleaner<T>>,
    issues: &mut Vec<EngineError>,
) -> Value {
    if let Some(cleaner) = cleaner {
        match catch_unwind(AssertUnwindSafe(|| cleaner(value))) {
            Ok(Ok(cleaned)) => return cleaned,
            Ok(Err(error)) => issues.push(EngineError::new(
                Phase::Cleaning,
                format!("cleaner failed for '{name}': {error}"),
            )),
            Err(payload) => issues.push(EngineError::new(
                Phase::Cleaning,
                format!("cleaner panicked for '{name}': {}", panic_message(payload.as_ref())),
            )),
        }
    }

    match serde_json::to_value(value) {
        Ok(rendition) => rendition,
        Err(error) => {
            issues.push(EngineError::new(
                Phase::Cleaning,
                format!("value for '{name}' is not serializable: {error}"),
            ));
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::PANIC_KIND;
    use crate::infrastructure::events::EventKind;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[derive(Debug, Error)]
    #[error("type error")]
    struct TypeBoom;

    /// Runner against a fresh bus with a fixed shuffle seed, plus a sink
    /// collecting every published event
    fn fresh() -> (Science, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Skip, EventKind::Result, EventKind::Error] {
            let sink = Arc::clone(&events);
            bus.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
        }
        (Science::new(bus).with_seed(7), events)
    }

    fn result_events(events: &Arc<Mutex<Vec<Event>>>) -> Vec<ResultEvent> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Event::Result(result) => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    fn error_events(events: &Arc<Mutex<Vec<Event>>>) -> Vec<ErrorEvent> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Event::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    fn skip_events(events: &Arc<Mutex<Vec<Event>>>) -> Vec<SkipEvent> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                Event::Skip(skip) => Some(skip.clone()),
                _ => None,
            })
            .collect()
    }

    mod enablement_tests {
        use super::*;

        #[test]
        fn test_disabled_experiment_runs_only_control() {
            let (science, events) = fresh();
            let candidate_ran = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&candidate_ran);

            let value = science
                .run("disabled", move |experiment| {
                    experiment.context("reason", "rollout");
                    experiment.run_if(|| false);
                    experiment.control(|| 1)?;
                    experiment.candidate(move || {
                        flag.store(true, Ordering::SeqCst);
                        2
                    })?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            assert_eq!(value, 1);
            assert!(!candidate_ran.load(Ordering::SeqCst));
            let skips = skip_events(&events);
            assert_eq!(skips.len(), 1);
            assert_eq!(skips[0].experiment, "disabled");
            assert_eq!(skips[0].context.get("reason"), Some(&json!("rollout")));
            assert!(result_events(&events).is_empty());
        }

        #[test]
        fn test_disabled_experiment_reraises_control_failure() {
            let (science, _) = fresh();
            let error = science
                .run::<i32, _, _>("disabled", |experiment| {
                    experiment.run_if(|| false);
                    experiment.control(|| Err::<i32, _>(Boom))?;
                    experiment.candidate(|| 2)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();

            let failure = error.control_failure().unwrap();
            assert!(failure.downcast_ref::<Boom>().is_some());
        }
    }

    mod classification_flow_tests {
        use super::*;

        #[test]
        fn test_all_matching_candidates() {
            let (science, events) = fresh();
            let value = science
                .run("sum-list", |experiment| {
                    experiment.control(|| 6)?;
                    experiment.candidate_named("fold", || 6)?;
                    experiment.candidate_named("loop", || 6)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            assert_eq!(value, 6);
            let results = result_events(&events);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].matched.len(), 2);
            assert!(results[0].mismatched.is_empty());
            assert!(results[0].ignored.is_empty());
        }

        #[test]
        fn test_mismatched_candidate_recorded() {
            let (science, events) = fresh();
            let value = science
                .run("sum-list", |experiment| {
                    experiment.control(|| 6)?;
                    experiment.candidate(|| 7)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            assert_eq!(value, 6);
            let results = result_events(&events);
            assert_eq!(results[0].mismatched.len(), 1);
            assert_eq!(results[0].mismatched[0].name, "candidate");
            assert_eq!(results[0].mismatched[0].value, Some(json!(7)));
        }

        #[test]
        fn test_ignore_rule_downgrades_candidate() {
            let (science, events) = fresh();
            science
                .run("search", |experiment| {
                    experiment.control(|| 6)?;
                    experiment.candidate(|| 7)?;
                    experiment.ignore(|control, _| control == Some(&6));
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            let results = result_events(&events);
            assert_eq!(results[0].ignored.len(), 1);
            assert!(results[0].mismatched.is_empty());
        }

        #[test]
        fn test_context_passes_through_to_result() {
            let (science, events) = fresh();
            science
                .run("search", |experiment| {
                    experiment.context("terms", "test");
                    experiment.control(|| 1)?;
                    experiment.candidate(|| 1)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            let results = result_events(&events);
            assert_eq!(results[0].context.get("terms"), Some(&json!("test")));
        }

        #[test]
        fn test_repeat_runs_classify_identically() {
            let run = |science: &Science| {
                science
                    .run("stable", |experiment| {
                        experiment.control(|| 1)?;
                        experiment.candidate_named("same", || 1)?;
                        experiment.candidate_named("different", || 2)?;
                        Ok::<_, anyhow::Error>(())
                    })
                    .unwrap()
            };

            let (science, events) = fresh();
            assert_eq!(run(&science), 1);
            assert_eq!(run(&science), 1);

            let results = result_events(&events);
            assert_eq!(results.len(), 2);
            for result in results {
                assert_eq!(result.matched[0].name, "same");
                assert_eq!(result.mismatched[0].name, "different");
            }
        }
    }

    mod failure_tests {
        use super::*;

        #[test]
        fn test_control_failure_reraised_after_publication() {
            let (science, events) = fresh();
            let error = science
                .run::<i32, _, _>("errors", |experiment| {
                    experiment.control(|| Err::<i32, _>(Boom))?;
                    experiment.candidate(|| 2)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();

            let failure = error.control_failure().unwrap();
            assert!(failure.downcast_ref::<Boom>().is_some());

            // Published before the re-raise: control failed, candidate has a value
            let results = result_events(&events);
            assert_eq!(results.len(), 1);
            assert!(results[0].control.failure.is_some());
            assert_eq!(results[0].mismatched.len(), 1);
            assert_eq!(results[0].mismatched[0].value, Some(json!(2)));
        }

        #[test]
        fn test_candidate_failure_never_reaches_caller() {
            let (science, events) = fresh();
            let value = science
                .run("errors", |experiment| {
                    experiment.control(|| 1)?;
                    experiment.candidate(|| Err::<i32, _>(Boom))?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            assert_eq!(value, 1);
            let results = result_events(&events);
            let failure = results[0].mismatched[0].failure.as_ref().unwrap();
            assert!(failure.kind.ends_with("Boom"));
        }

        #[test]
        fn test_candidate_panic_captured() {
            let (science, events) = fresh();
            let value = science
                .run("errors", |experiment| {
                    experiment.control(|| 1)?;
                    experiment.candidate(|| -> i32 { panic!("candidate exploded") })?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            assert_eq!(value, 1);
            let results = result_events(&events);
            let failure = results[0].mismatched[0].failure.as_ref().unwrap();
            assert_eq!(failure.kind, PANIC_KIND);
            assert_eq!(failure.message, "candidate exploded");
        }

        #[test]
        fn test_failing_candidates_classified_independently() {
            let (science, events) = fresh();
            let error = science
                .run::<i32, _, _>("throwing errors", |experiment| {
                    experiment.control(|| Err::<i32, _>(Boom))?;
                    experiment.candidate_named("same-kind", || Err::<i32, _>(Boom))?;
                    experiment.candidate_named("other-kind", || Err::<i32, _>(TypeBoom))?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();

            assert!(error.control_failure().is_some());
            let results = result_events(&events);
            assert_eq!(results[0].matched.len(), 1);
            assert_eq!(results[0].matched[0].name, "same-kind");
            assert_eq!(results[0].mismatched.len(), 1);
            assert_eq!(results[0].mismatched[0].name, "other-kind");
        }

        #[test]
        fn test_failure_comparator_override() {
            let (science, events) = fresh();
            science
                .run::<i32, _, _>("errors", |experiment| {
                    experiment.compare_failures(|a, b| a.message() == b.message());
                    experiment.control(|| Err::<i32, _>(Boom))?;
                    experiment.candidate(|| Err::<i32, _>(anyhow::anyhow!("boom")))?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();

            let results = result_events(&events);
            assert_eq!(results[0].matched.len(), 1);
        }
    }

    mod configuration_tests {
        use super::*;

        #[test]
        fn test_duplicate_control_is_configuration_error() {
            let (science, events) = fresh();
            let ran = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&ran);

            let error = science
                .run::<i32, _, _>("broken", move |experiment| {
                    experiment.control(move || {
                        flag.store(true, Ordering::SeqCst);
                        1
                    })?;
                    experiment.control(|| 2)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();

            assert!(error.is_configuration());
            // The experiment never ran
            assert!(!ran.load(Ordering::SeqCst));
            assert!(result_events(&events).is_empty());
            let errors = error_events(&events);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].phase, Phase::Configuration);
        }

        #[test]
        fn test_missing_control_is_configuration_error() {
            let (science, _) = fresh();
            let error = science
                .run::<i32, _, _>("broken", |experiment| {
                    experiment.candidate(|| 1)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();
            assert!(error.is_configuration());
        }

        #[test]
        fn test_empty_experiment_name_rejected() {
            let (science, _) = fresh();
            let error = science
                .run::<i32, _, _>("", |experiment| {
                    experiment.control(|| 1)?;
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();
            assert!(error.is_configuration());
        }

        #[test]
        fn test_configurator_panic_is_configuration_error() {
            let (science, _) = fresh();
            let error = science
                .run::<i32, _, _>("broken", |_| -> Result<(), anyhow::Error> {
                    panic!("bad setup")
                })
                .unwrap_err();
            assert!(error.is_configuration());
            assert!(error.to_string().contains("bad setup"));
        }
    }

    mod transform_tests {
        use super::*;

        #[test]
        fn test_mapper_output_reaches_comparator() {
            let (science, events) = fresh();
            let value = science
                .run("search", |experiment| {
                    experiment.control(|| {
                        json!({"users": [{"id": 1}, {"id": 2}], "count": 2, "ts": 100})
                    })?;
                    experiment.candidate(|| {
                        json!({"users": [{"id": 1}, {"id": 2}], "count": 2, "ts": 200})
                    })?;
                    // Drop the timestamp so comparison sees only the stable shape
                    experiment.map(|raw| {
                        json!({
                            "users": raw["users"]
                                .as_array()
                                .map(|users| users.iter().map(|u| u["id"].clone()).collect::<Vec<_>>())
                                .unwrap_or_default(),
                            "count": raw["count"],
                        })
                    });
                    experiment.compare(|control, candidate| {
                        // The raw timestamp never reaches the comparator
                        assert!(control.get("ts").is_none());
                        control == candidate
                    });
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            // The caller receives the mapped control value
            assert_eq!(value, json!({"users": [1, 2], "count": 2}));
            let results = result_events(&events);
            assert_eq!(results[0].matched.len(), 1);
        }

        #[test]
        fn test_control_mapper_failure_behaves_like_control_failure() {
            let (science, events) = fresh();
            let error = science
                .run::<i32, _, _>("mapped", |experiment| {
                    experiment.control(|| 1)?;
                    experiment.candidate(|| 1)?;
                    experiment.map(|_| Err::<i32, _>(Boom));
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap_err();

            assert!(error.control_failure().is_some());
            let errors = error_events(&events);
            // One mapping report per observation the mapper broke
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().all(|e| e.phase == Phase::Mapping));
        }

        #[test]
        fn test_cleaner_shapes_published_values_only() {
            let (science, events) = fresh();
            let value = science
                .run("search", |experiment| {
                    experiment.control(|| vec![2, 1])?;
                    experiment.candidate(|| vec![2, 1])?;
                    experiment.clean(|values| {
                        let mut sorted = values.clone();
                        sorted.sort_unstable();
                        sorted
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join(",")
                    });
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            // The caller sees the raw value, events see the cleaned one
            assert_eq!(value, vec![2, 1]);
            let results = result_events(&events);
            assert_eq!(results[0].control.value, Some(json!("1,2")));
            assert_eq!(results[0].matched[0].value, Some(json!("1,2")));
        }

        #[test]
        fn test_comparator_panic_publishes_error_and_mismatches() {
            let (science, events) = fresh();
            let value = science
                .run("broken-compare", |experiment| {
                    experiment.control(|| 1)?;
                    experiment.candidate(|| 1)?;
                    experiment.compare(|_, _| panic!("comparator exploded"));
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            // The caller is unaffected
            assert_eq!(value, 1);
            let errors = error_events(&events);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].phase, Phase::Comparison);
            let results = result_events(&events);
            assert_eq!(results[0].mismatched.len(), 1);
        }

        #[test]
        fn test_cleaner_panic_falls_back_to_default_rendition() {
            let (science, events) = fresh();
            science
                .run("broken-clean", |experiment| {
                    experiment.control(|| 1)?;
                    experiment.candidate(|| 1)?;
                    experiment.clean(|_| -> i32 { panic!("cleaner exploded") });
                    Ok::<_, anyhow::Error>(())
                })
                .unwrap();

            let errors = error_events(&events);
            assert!(errors.iter().all(|e| e.phase == Phase::Cleaning));
            assert!(!errors.is_empty());
            let results = result_events(&events);
            assert_eq!(results[0].control.value, Some(json!(1)));
        }
    }
}
