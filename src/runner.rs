//! A minimal sequential host for tests and suites.
//!
//! [`Runner::run_test`] executes one test on the current thread: it builds a
//! fresh [`TestEnvironment`], drives the body and its tasks on virtual time,
//! runs the finalizers, then cancels whatever is left in the background.

use std::fmt;
use std::time::Duration;

use crate::config::{Config, IdleTimeout, RandomSeed, Tag};
use crate::environment::TestEnvironment;
use crate::error::Error;
use crate::executor::{Scheduler, Scope};
use crate::fixture::SharedRegistry;
use crate::random::{SeedInfo, SeedOrigin};
use crate::suite::{PlannedCase, SkipReason, SuiteNode, TestBody, TestPlan};

/// Options of a [`Runner`].
///
/// ```rust
/// use testkit_prepared::runner::RunnerConfig;
///
/// let config = RunnerConfig::new()
///     .include_tag("unit")
///     .exclude_tag("slow");
/// ```
#[derive(Clone, Debug, Default)]
pub struct RunnerConfig {
    include_tags: Vec<String>,
    exclude_tags: Vec<String>,
    registry: SharedRegistry,
}

impl RunnerConfig {
    /// No tag filter and a fresh [`SharedRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only runs cases carrying at least one of the included tags.
    #[must_use]
    pub fn include_tag(mut self, tag: impl Into<String>) -> Self {
        self.include_tags.push(tag.into());
        self
    }

    /// Skips cases carrying this tag.
    #[must_use]
    pub fn exclude_tag(mut self, tag: impl Into<String>) -> Self {
        self.exclude_tags.push(tag.into());
        self
    }

    /// Resolves shared values against `registry`.
    #[must_use]
    pub fn registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn accepts(&self, config: &Config) -> bool {
        let tags = config.get_all::<Tag>();
        let has = |wanted: &String| tags.iter().any(|tag| tag.name() == wanted);
        let included = self.include_tags.is_empty() || self.include_tags.iter().any(has);
        included && !self.exclude_tags.iter().any(has)
    }
}

/// Why a test failed, as reported by a [`Runner`].
#[derive(Clone, Debug)]
pub struct TestFailure {
    /// Name of the test.
    pub test: String,
    /// The failure of the body, or else of a finalizer.
    pub cause: Error,
    /// The random seed of the run, if the test used randomness.
    pub seed: Option<SeedInfo>,
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test '{}' failed: {}", self.test, self.cause)?;
        if let Some(seed) = self.seed.filter(|seed| seed.origin == SeedOrigin::Generated) {
            write!(f, "\n{seed}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TestFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Outcome of a case in a [`SuiteReport`].
#[derive(Clone, Debug)]
pub enum CaseOutcome {
    /// The case ran and succeeded.
    Passed,
    /// The case ran and failed.
    Failed(TestFailure),
    /// The case did not run.
    Skipped(SkipReason),
}

/// Outcomes of every case of a suite, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct SuiteReport {
    /// Full case names and their outcomes.
    pub cases: Vec<(String, CaseOutcome)>,
}

impl SuiteReport {
    /// Number of cases that succeeded.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, CaseOutcome::Passed))
    }

    /// Number of cases that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, CaseOutcome::Failed(_)))
    }

    /// Number of cases that did not run.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, CaseOutcome::Skipped(_)))
    }

    /// Returns `true` if no case failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// The outcome of the case named `name`.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&CaseOutcome> {
        self.cases
            .iter()
            .find(|(case, _)| case == name)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, predicate: impl Fn(&CaseOutcome) -> bool) -> usize {
        self.cases.iter().filter(|(_, outcome)| predicate(outcome)).count()
    }
}

/// Runs tests one after the other on the calling thread.
#[derive(Clone, Debug, Default)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    /// A runner with the given options.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Runs a single test.
    ///
    /// The body runs as a foreground task. If it succeeds, the run waits for
    /// the other foreground tasks; if anything fails, they are cancelled. The
    /// finalizers then run, as a foreground task with time control, and the
    /// background tasks are cancelled last.
    ///
    /// # Errors
    ///
    /// Returns the failure of the body (an error, a panic, or the idle
    /// timeout) or, if the body succeeded, the first finalizer failure.
    pub fn run_test(&self, name: &str, config: &Config, body: &TestBody) -> Result<(), TestFailure> {
        let span = tracing::info_span!("test", name);
        let _entered = span.enter();

        let scheduler = Scheduler::new();
        let env = TestEnvironment::new(name, config.clone(), scheduler.clone(), self.config.registry.clone());
        let idle_timeout = IdleTimeout::effective(config);
        tracing::debug!(?config, ?idle_timeout, "starting test");

        let outcome = match config.get::<RandomSeed>() {
            Some(RandomSeed(seed)) => env.random().set_seed(*seed),
            None => Ok(()),
        }
        .and_then(|()| {
            let body_env = env.clone();
            let body = body.clone();
            let reporter = scheduler.clone();
            scheduler.spawn_named(Scope::Foreground, name, async move {
                if let Err(error) = body.call(body_env).await {
                    reporter.fail(error);
                }
            });
            scheduler.drive(idle_timeout)
        });

        if outcome.is_err() {
            scheduler.cancel_scope(Scope::Foreground);
        }
        let teardown = Self::tear_down(&scheduler, &env, outcome.is_ok(), idle_timeout);
        scheduler.cancel_scope(Scope::Background);
        scheduler.cancel_scope(Scope::Foreground);

        match outcome.and(teardown) {
            Ok(()) => {
                tracing::info!("✓ '{name}' passed");
                Ok(())
            }
            Err(cause) => {
                let failure = TestFailure {
                    test: name.to_string(),
                    cause,
                    seed: env.random().seed(),
                };
                tracing::info!("✗ {failure}");
                Err(failure)
            }
        }
    }

    fn tear_down(
        scheduler: &Scheduler,
        env: &TestEnvironment,
        succeeded: bool,
        idle_timeout: Duration,
    ) -> Result<(), Error> {
        let finalizers = env.finalizers().clone();
        let reporter = scheduler.clone();
        scheduler.spawn_named(Scope::Foreground, "finalizers", async move {
            if let Err(error) = finalizers.drain(succeeded).await {
                reporter.fail(error);
            }
        });
        scheduler.drive(idle_timeout)
    }

    fn run_case(&self, case: &PlannedCase) -> CaseOutcome {
        if let Some(reason) = case.skip {
            tracing::info!(test = %case.name, ?reason, "skipping");
            return CaseOutcome::Skipped(reason);
        }
        if !self.config.accepts(&case.config) {
            tracing::info!(test = %case.name, "skipping, excluded by tag filters");
            return CaseOutcome::Skipped(SkipReason::FilteredByTag);
        }
        match self.run_test(&case.name, &case.config, &case.body) {
            Ok(()) => CaseOutcome::Passed,
            Err(failure) => CaseOutcome::Failed(failure),
        }
    }

    /// Runs every case of `tree`, honoring ignored and focused cases and the
    /// tag filters.
    #[must_use]
    pub fn run_suite(&self, tree: &SuiteNode) -> SuiteReport {
        let plan = TestPlan::from_tree(tree);
        let cases = plan
            .cases()
            .iter()
            .map(|case| (case.name.clone(), self.run_case(case)))
            .collect();
        let report = SuiteReport { cases };
        tracing::info!(
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "suite '{}' finished",
            tree.name()
        );
        report
    }

    /// Runs a single test from a Tokio runtime.
    ///
    /// The test is driven on a blocking thread, so virtual time never stalls
    /// the runtime's workers.
    ///
    /// # Errors
    ///
    /// Same as [`run_test`](Self::run_test).
    #[cfg(feature = "tokio")]
    pub async fn run_test_async(
        &self,
        name: impl Into<String>,
        config: Config,
        body: TestBody,
    ) -> Result<(), TestFailure> {
        let name = name.into();
        let runner = self.clone();
        let test = name.clone();
        match tokio::task::spawn_blocking(move || runner.run_test(&test, &config, &body)).await {
            Ok(outcome) => outcome,
            Err(error) => Err(TestFailure {
                test: name.clone(),
                cause: Error::Panicked {
                    task: name,
                    message: error.to_string(),
                },
                seed: None,
            }),
        }
    }
}

/// Runs a test declared with `#[testkit_prepared::test]`, panicking on failure.
#[doc(hidden)]
pub fn run_attributed_test(name: &str, config: Config, body: TestBody) {
    let runner = Runner::new(RunnerConfig::new().registry(SharedRegistry::global().clone()));
    if let Err(failure) = runner.run_test(name, &config, &body) {
        panic!("{failure}");
    }
}
