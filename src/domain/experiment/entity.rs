//! Experiment configuration entities
//!
//! An experiment is pure configuration state: it registers the control and
//! named candidate behaviors together with the comparison protocol, and is
//! consumed by the runner. It performs no execution itself.

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};

use super::behavior::{Failure, IntoOutcome};
use super::validation::{
    DEFAULT_CANDIDATE_NAME, ExperimentConfigError, validate_candidate_name,
};

// ============================================================================
// Behavior and transform types
// ============================================================================

/// A registered synchronous behavior, erased to an outcome-producing call
pub(crate) type SyncBehavior<T> = Box<dyn FnOnce() -> Result<T, Failure>>;

/// A registered deferred behavior, producing a future when invoked
pub(crate) type AsyncBehavior<T> =
    Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<T, Failure>>>;

/// Transform applied to every observed value before comparison
pub(crate) type SyncMapper<T> = Box<dyn Fn(T) -> Result<T, Failure>>;

/// Deferred transform applied to every observed value before comparison
pub(crate) type AsyncMapper<T> =
    Box<dyn Fn(T) -> LocalBoxFuture<'static, Result<T, Failure>>>;

/// Binary predicate deciding whether a candidate value matches the control's
pub(crate) type Comparator<T> = Box<dyn Fn(&T, &T) -> bool>;

/// Binary predicate deciding whether two captured failures are equivalent
pub(crate) type FailureComparator = Box<dyn Fn(&Failure, &Failure) -> bool>;

/// Transform producing the published rendition of a value
pub(crate) type Cleaner<T> = Box<dyn Fn(&T) -> Result<Value, serde_json::Error>>;

/// Predicate downgrading a mismatched candidate to ignored
pub(crate) type IgnoreRule<T> = Box<dyn Fn(Option<&T>, Option<&T>) -> bool>;

// ============================================================================
// Protocol
// ============================================================================

/// The comparison protocol shared by sync and async experiments
pub(crate) struct Protocol<T> {
    pub(crate) comparator: Comparator<T>,
    pub(crate) failure_comparator: FailureComparator,
    pub(crate) cleaner: Option<Cleaner<T>>,
    pub(crate) ignore_rules: Vec<IgnoreRule<T>>,
}

impl<T: Serialize + 'static> Protocol<T> {
    pub(crate) fn new() -> Self {
        Self {
            comparator: Box::new(default_compare::<T>),
            failure_comparator: Box::new(|a, b| a.same_kind(b)),
            cleaner: None,
            ignore_rules: Vec::new(),
        }
    }
}

/// Default comparator: deep structural equality over the serde_json
/// rendition of the mapped values
///
/// A value that fails to serialize never matches; mismatches fail toward
/// visibility rather than silently passing.
fn default_compare<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ============================================================================
// Experiment
// ============================================================================

/// A synchronous experiment configuration
///
/// Behaviors may return a plain value or a `Result`; thrown panics are
/// caught at the execution boundary by the runner. Registration fails if a
/// control is registered twice or a candidate name is reused.
pub struct Experiment<T> {
    pub(crate) name: String,
    pub(crate) control: Option<SyncBehavior<T>>,
    pub(crate) candidates: Vec<(String, SyncBehavior<T>)>,
    pub(crate) context: Map<String, Value>,
    pub(crate) mapper: Option<SyncMapper<T>>,
    pub(crate) enabled: Box<dyn Fn() -> bool>,
    pub(crate) protocol: Protocol<T>,
}

impl<T: Serialize + 'static> Experiment<T> {
    /// Create an empty experiment; only the runner constructs these
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            control: None,
            candidates: Vec::new(),
            context: Map::new(),
            mapper: None,
            enabled: Box::new(|| true),
            protocol: Protocol::new(),
        }
    }

    /// Get the experiment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the control behavior
    pub fn control<F, R>(&mut self, behavior: F) -> Result<&mut Self, ExperimentConfigError>
    where
        F: FnOnce() -> R + 'static,
        R: IntoOutcome<T>,
    {
        if self.control.is_some() {
            return Err(ExperimentConfigError::DuplicateControl);
        }
        self.control = Some(Box::new(move || behavior().into_outcome()));
        Ok(self)
    }

    /// Register a candidate under the conventional name "candidate"
    pub fn candidate<F, R>(&mut self, behavior: F) -> Result<&mut Self, ExperimentConfigError>
    where
        F: FnOnce() -> R + 'static,
        R: IntoOutcome<T>,
    {
        self.candidate_named(DEFAULT_CANDIDATE_NAME, behavior)
    }

    /// Register a candidate under an explicit name
    pub fn candidate_named<F, R>(
        &mut self,
        name: impl Into<String>,
        behavior: F,
    ) -> Result<&mut Self, ExperimentConfigError>
    where
        F: FnOnce() -> R + 'static,
        R: IntoOutcome<T>,
    {
        let name = name.into();
        let existing: Vec<String> = self.candidates.iter().map(|(n, _)| n.clone()).collect();
        validate_candidate_name(&name, &existing)?;
        self.candidates
            .push((name, Box::new(move || behavior().into_outcome())));
        Ok(self)
    }

    /// Attach a context entry; repeated calls merge keys
    pub fn context(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Override the value comparator
    pub fn compare<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.protocol.comparator = Box::new(comparator);
        self
    }

    /// Override the failure-equivalence rule (default: same failure kind)
    pub fn compare_failures<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&Failure, &Failure) -> bool + 'static,
    {
        self.protocol.failure_comparator = Box::new(comparator);
        self
    }

    /// Set the mapper applied to every observed value before comparison
    pub fn map<F, R>(&mut self, mapper: F) -> &mut Self
    where
        F: Fn(T) -> R + 'static,
        R: IntoOutcome<T>,
    {
        self.mapper = Some(Box::new(move |value| mapper(value).into_outcome()));
        self
    }

    /// Set the cleaner producing the published rendition of a value
    ///
    /// Cleaned values appear only in published events, never in comparison.
    pub fn clean<F, V>(&mut self, cleaner: F) -> &mut Self
    where
        F: Fn(&T) -> V + 'static,
        V: Serialize,
    {
        self.protocol.cleaner = Some(Box::new(move |value| serde_json::to_value(cleaner(value))));
        self
    }

    /// Append an ignore rule; rules are evaluated in registration order and
    /// the first match wins
    pub fn ignore<F>(&mut self, rule: F) -> &mut Self
    where
        F: Fn(Option<&T>, Option<&T>) -> bool + 'static,
    {
        self.protocol.ignore_rules.push(Box::new(rule));
        self
    }

    /// Set the enablement predicate (default: always enabled)
    pub fn run_if<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn() -> bool + 'static,
    {
        self.enabled = Box::new(predicate);
        self
    }
}

// ============================================================================
// AsyncExperiment
// ============================================================================

/// An asynchronous experiment configuration
///
/// Behaviors return futures; the runner normalizes every behavior to the
/// deferred execution model and awaits them together. The mapper is itself
/// asynchronous so further deferred steps can be composed before the runner
/// performs the final await.
pub struct AsyncExperiment<T> {
    pub(crate) name: String,
    pub(crate) control: Option<AsyncBehavior<T>>,
    pub(crate) candidates: Vec<(String, AsyncBehavior<T>)>,
    pub(crate) context: Map<String, Value>,
    pub(crate) mapper: Option<AsyncMapper<T>>,
    pub(crate) enabled: Box<dyn Fn() -> bool>,
    pub(crate) protocol: Protocol<T>,
}

impl<T: Serialize + 'static> AsyncExperiment<T> {
    /// Create an empty experiment; only the runner constructs these
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            control: None,
            candidates: Vec::new(),
            context: Map::new(),
            mapper: None,
            enabled: Box::new(|| true),
            protocol: Protocol::new(),
        }
    }

    /// Get the experiment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the control behavior
    pub fn control<F, Fut, R>(&mut self, behavior: F) -> Result<&mut Self, ExperimentConfigError>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: IntoOutcome<T>,
    {
        if self.control.is_some() {
            return Err(ExperimentConfigError::DuplicateControl);
        }
        self.control = Some(Box::new(move || {
            async move { behavior().await.into_outcome() }.boxed_local()
        }));
        Ok(self)
    }

    /// Register a candidate under the conventional name "candidate"
    pub fn candidate<F, Fut, R>(&mut self, behavior: F) -> Result<&mut Self, ExperimentConfigError>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: IntoOutcome<T>,
    {
        self.candidate_named(DEFAULT_CANDIDATE_NAME, behavior)
    }

    /// Register a candidate under an explicit name
    pub fn candidate_named<F, Fut, R>(
        &mut self,
        name: impl Into<String>,
        behavior: F,
    ) -> Result<&mut Self, ExperimentConfigError>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: IntoOutcome<T>,
    {
        let name = name.into();
        let existing: Vec<String> = self.candidates.iter().map(|(n, _)| n.clone()).collect();
        validate_candidate_name(&name, &existing)?;
        self.candidates.push((
            name,
            Box::new(move || async move { behavior().await.into_outcome() }.boxed_local()),
        ));
        Ok(self)
    }

    /// Attach a context entry; repeated calls merge keys
    pub fn context(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Override the value comparator
    pub fn compare<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.protocol.comparator = Box::new(comparator);
        self
    }

    /// Override the failure-equivalence rule (default: same failure kind)
    pub fn compare_failures<F>(&mut self, comparator: F) -> &mut Self
    where
        F: Fn(&Failure, &Failure) -> bool + 'static,
    {
        self.protocol.failure_comparator = Box::new(comparator);
        self
    }

    /// Set the deferred mapper applied to every observed value
    ///
    /// The mapper returns a future, so the configurator can chain further
    /// asynchronous steps; the runner awaits the fully composed value before
    /// building the observation.
    pub fn map<F, Fut, R>(&mut self, mapper: F) -> &mut Self
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: IntoOutcome<T>,
    {
        self.mapper = Some(Box::new(move |value| {
            let fut = mapper(value);
            async move { fut.await.into_outcome() }.boxed_local()
        }));
        self
    }

    /// Set the cleaner producing the published rendition of a value
    pub fn clean<F, V>(&mut self, cleaner: F) -> &mut Self
    where
        F: Fn(&T) -> V + 'static,
        V: Serialize,
    {
        self.protocol.cleaner = Some(Box::new(move |value| serde_json::to_value(cleaner(value))));
        self
    }

    /// Append an ignore rule; rules are evaluated in registration order and
    /// the first match wins
    pub fn ignore<F>(&mut self, rule: F) -> &mut Self
    where
        F: Fn(Option<&T>, Option<&T>) -> bool + 'static,
    {
        self.protocol.ignore_rules.push(Box::new(rule));
        self
    }

    /// Set the enablement predicate (default: always enabled)
    pub fn run_if<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn() -> bool + 'static,
    {
        self.enabled = Box::new(predicate);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod registration_tests {
        use super::*;

        #[test]
        fn test_duplicate_control_rejected() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.control(|| 1).unwrap();
            assert_eq!(
                exp.control(|| 2).map(|_| ()).unwrap_err(),
                ExperimentConfigError::DuplicateControl
            );
        }

        #[test]
        fn test_default_candidate_name_conflicts_on_reuse() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.candidate(|| 1).unwrap();
            assert_eq!(
                exp.candidate(|| 2).map(|_| ()).unwrap_err(),
                ExperimentConfigError::DuplicateCandidate("candidate".to_string())
            );
        }

        #[test]
        fn test_reserved_name_rejected() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            assert_eq!(
                exp.candidate_named("control", || 1).map(|_| ()).unwrap_err(),
                ExperimentConfigError::ReservedName("control".to_string())
            );
        }

        #[test]
        fn test_candidate_registration_order_preserved() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.candidate_named("first", || 1).unwrap();
            exp.candidate_named("second", || 2).unwrap();
            let names: Vec<&str> = exp.candidates.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["first", "second"]);
        }

        #[test]
        fn test_behaviors_may_return_results() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.control(|| Ok::<_, std::fmt::Error>(1)).unwrap();
            exp.candidate(|| Err::<i32, _>(std::fmt::Error)).unwrap();
        }

        #[test]
        fn test_async_duplicate_candidate_rejected() {
            let mut exp: AsyncExperiment<i32> = AsyncExperiment::new("test");
            exp.candidate_named("a", || async { 1 }).unwrap();
            assert_eq!(
                exp.candidate_named("a", || async { 2 }).map(|_| ()).unwrap_err(),
                ExperimentConfigError::DuplicateCandidate("a".to_string())
            );
        }
    }

    mod context_tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_context_entries_merge() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.context("terms", "query").context("page", 2);
            assert_eq!(exp.context.get("terms"), Some(&json!("query")));
            assert_eq!(exp.context.get("page"), Some(&json!(2)));
        }

        #[test]
        fn test_context_overwrites_same_key() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.context("page", 1).context("page", 2);
            assert_eq!(exp.context.get("page"), Some(&json!(2)));
        }
    }

    mod protocol_tests {
        use super::*;

        #[test]
        fn test_default_comparator_is_structural() {
            let protocol: Protocol<Vec<i32>> = Protocol::new();
            assert!((protocol.comparator)(&vec![1, 2], &vec![1, 2]));
            assert!(!(protocol.comparator)(&vec![1, 2], &vec![2, 1]));
        }

        #[test]
        fn test_default_failure_comparator_uses_kind() {
            let protocol: Protocol<i32> = Protocol::new();
            let a = Failure::from_error(std::fmt::Error);
            let b = Failure::from_error(std::fmt::Error);
            let c = Failure::from_error(anyhow::anyhow!("other"));
            assert!((protocol.failure_comparator)(&a, &b));
            assert!(!(protocol.failure_comparator)(&a, &c));
        }

        #[test]
        fn test_compare_override_replaces_default() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.compare(|a, b| (a - b).abs() <= 1);
            assert!((exp.protocol.comparator)(&4, &5));
        }

        #[test]
        fn test_ignore_rules_append_in_order() {
            let mut exp: Experiment<i32> = Experiment::new("test");
            exp.ignore(|_, _| false).ignore(|_, _| true);
            assert_eq!(exp.protocol.ignore_rules.len(), 2);
        }
    }
}
