//! The per-test environment handed to test bodies and fixtures.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{BoxError, Result};
use crate::executor::{JoinHandle, Scheduler, Scope};
use crate::finalizer::FinalizerStack;
use crate::fixture::{FixtureCache, Prepared, Shared, SharedRegistry};
use crate::random::Random;
use crate::time::Time;

/// Everything a single test run owns: its name and configuration, its clock
/// and scheduler, its fixture cache, finalizers and random generator, and the
/// shared registry it was given.
///
/// A fresh environment is created for every test. Cloning is cheap; clones
/// refer to the same run.
#[derive(Clone)]
pub struct TestEnvironment {
    inner: Arc<EnvironmentInner>,
}

struct EnvironmentInner {
    name: String,
    config: Config,
    time: Time,
    cache: FixtureCache,
    finalizers: FinalizerStack,
    random: Random,
    registry: SharedRegistry,
}

impl TestEnvironment {
    pub(crate) fn new(
        name: impl Into<String>,
        config: Config,
        scheduler: Scheduler,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(EnvironmentInner {
                name: name.into(),
                config,
                time: Time::with_scheduler(scheduler),
                cache: FixtureCache::new(),
                finalizers: FinalizerStack::new(),
                random: Random::new(),
                registry,
            }),
        }
    }

    /// The name of the test.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration of the test, merged with that of its suites.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Virtual time control.
    #[must_use]
    pub fn time(&self) -> &Time {
        &self.inner.time
    }

    /// The test's random generator.
    #[must_use]
    pub fn random(&self) -> &Random {
        &self.inner.random
    }

    /// The registry shared values are resolved against.
    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }

    pub(crate) fn cache(&self) -> &FixtureCache {
        &self.inner.cache
    }

    pub(crate) fn finalizers(&self) -> &FinalizerStack {
        &self.inner.finalizers
    }

    /// Resolves a prepared value for this test. Same as [`Prepared::resolve`].
    ///
    /// # Errors
    ///
    /// Fails if the value's computation failed.
    pub async fn prepared<T>(&self, value: &Prepared<T>) -> Result<T>
    where
        T: Clone + fmt::Debug + Send + Sync + 'static,
    {
        value.resolve(self).await
    }

    /// Resolves a shared value against this test's registry.
    ///
    /// # Errors
    ///
    /// Fails if the value's computation failed, in this test or an earlier one.
    pub async fn shared<T>(&self, value: &Shared<T>) -> Result<T>
    where
        T: Clone + fmt::Debug + Send + Sync + 'static,
    {
        value.resolve(self.registry()).await
    }

    /// Registers `action` to run when the test ends, whatever its outcome.
    ///
    /// Actions run in reverse registration order, after the test body and its
    /// foreground tasks, with time control still available.
    pub fn clean_up<F, Fut, E>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.clean_up_when(name, true, true, action);
    }

    /// Registers `action` to run when the test ends, only if it succeeded
    /// (`on_success`) or failed (`on_failure`).
    pub fn clean_up_when<F, Fut, E>(
        &self,
        name: impl Into<String>,
        on_success: bool,
        on_failure: bool,
        action: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner
            .finalizers
            .register(name, on_success, on_failure, action);
    }

    /// Starts a task the test waits for before finishing.
    pub fn launch<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.launch_named("launched", future)
    }

    /// Starts a named task the test waits for before finishing.
    pub fn launch_named<F, T>(&self, name: &str, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.time()
            .scheduler()
            .spawn_named(Scope::Foreground, name, future)
    }

    /// Starts a task that is cancelled when the test finishes.
    ///
    /// Background tasks never keep the test alive, and their timers do not
    /// count as pending work for [`Time::advance_until_idle`].
    pub fn launch_in_background<F, T>(&self, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.time()
            .scheduler()
            .spawn_named(Scope::Background, "background", future)
    }

    /// Writes `value` to the test log and returns it.
    pub fn log<T: fmt::Debug>(&self, value: T) -> T {
        tracing::info!(test = self.name(), "» Logged '{value:?}'");
        value
    }

    /// Writes `value` to the test log with a description, and returns it.
    pub fn log_with<T: fmt::Debug>(&self, value: T, info: impl FnOnce() -> String) -> T {
        let info = info().replace("\n\n", "\n").replace('\n', "\n  ");
        tracing::info!(test = self.name(), "» Logged '{value:?}'\n  {info}");
        value
    }
}

impl fmt::Debug for TestEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestEnvironment")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("time", &self.inner.time.now())
            .finish_non_exhaustive()
    }
}
