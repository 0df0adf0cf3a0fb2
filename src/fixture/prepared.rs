//! Values computed lazily, at most once per test.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::cache::FixtureId;
use crate::display::{default_policy, DisplayPolicy};
use crate::environment::TestEnvironment;
use crate::error::{BoxError, FixtureKind, Result};

type Compute<T> =
    dyn Fn(TestEnvironment) -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync;

fn boxed<T, F, Fut, E>(block: F) -> Arc<Compute<T>>
where
    F: Fn(TestEnvironment) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move |env| {
        let future = block(env);
        Box::pin(async move { future.await.map_err(Into::into) })
    })
}

/// A value computed on first use within a test, then reused for the rest of
/// that test.
///
/// Every test gets its own value: a second test resolving the same `Prepared`
/// recomputes it. The computation receives the test's [`TestEnvironment`], so
/// it may read the clock, draw random numbers, register finalizers or resolve
/// other prepared values.
///
/// Cloning keeps the identity: a clone resolves to the same cached value.
///
/// # Example
///
/// ```rust
/// use testkit_prepared::prelude::*;
///
/// let number = Prepared::new("number", |env: TestEnvironment| async move {
///     Ok::<_, Error>(env.random().next_i32_in(0..10))
/// });
///
/// let runner = Runner::new(RunnerConfig::new());
/// let outcome = runner.run_test("prepared values are memoized", &Config::empty(), &TestBody::new(move |env| {
///     let number = number.clone();
///     async move {
///         let first = number.resolve(&env).await?;
///         let second = number.resolve(&env).await?;
///         assert_eq!(first, second);
///         Ok::<_, Error>(())
///     }
/// }));
/// assert!(outcome.is_ok());
/// ```
pub struct Prepared<T> {
    id: FixtureId,
    name: Arc<str>,
    display: Arc<dyn DisplayPolicy>,
    compute: Arc<Compute<T>>,
}

impl<T> Clone for Prepared<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            display: Arc::clone(&self.display),
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<T> Prepared<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Declares a prepared value computed by `block`.
    pub fn new<F, Fut, E>(name: impl Into<String>, block: F) -> Self
    where
        F: Fn(TestEnvironment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::from_parts(name.into(), default_policy(), boxed(block))
    }

    fn from_parts(name: String, display: Arc<dyn DisplayPolicy>, compute: Arc<Compute<T>>) -> Self {
        Self {
            id: FixtureId::next(),
            name: name.into(),
            display,
            compute,
        }
    }

    /// Changes how the value is rendered in the test log.
    #[must_use]
    pub fn with_display(mut self, display: impl DisplayPolicy + 'static) -> Self {
        self.display = Arc::new(display);
        self
    }

    /// The identity under which the value is cached.
    #[must_use]
    pub fn id(&self) -> FixtureId {
        self.id
    }

    /// The name shown in logs and failures.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value for the test owning `env`, computing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fixture`](crate::Error::Fixture) if the computation
    /// failed, now or earlier in the same test. Every call observes the same
    /// captured failure.
    pub async fn resolve(&self, env: &TestEnvironment) -> Result<T> {
        let (outcome, initialized) = env
            .cache()
            .get_or_compute(self.id, &self.name, FixtureKind::Prepared, || {
                (self.compute)(env.clone())
            })
            .await;

        if initialized {
            match &outcome {
                Ok(value) => tracing::info!(
                    test = env.name(),
                    "» Prepared '{}': {}",
                    self.name,
                    self.display.render(value)
                ),
                Err(error) => tracing::info!(
                    test = env.name(),
                    "» Prepared '{}' failed: {}",
                    self.name,
                    error
                ),
            }
        }
        outcome
    }

    /// Derives a prepared value computed from this one.
    ///
    /// The derived value has its own identity; resolving it resolves `self`
    /// through the cache.
    pub fn map<U, F>(&self, name: impl Into<String>, f: F) -> Prepared<U>
    where
        U: Clone + fmt::Debug + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Prepared::new(name, move |env: TestEnvironment| {
            let source = source.clone();
            let f = Arc::clone(&f);
            async move { source.resolve(&env).await.map(|value| f(value)) }
        })
    }
}

impl<T> fmt::Debug for Prepared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepared")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A recipe for [`Prepared`] values.
///
/// Each call to [`named`](Self::named) creates an independent value: two
/// prepared values built from the same provider are computed separately.
///
/// ```rust
/// use testkit_prepared::prelude::*;
///
/// let dice = prepared(|env: TestEnvironment| async move {
///     Ok::<_, Error>(env.random().next_i32_in(1..7))
/// });
///
/// let first = dice.named("first throw");
/// let second = dice.named("second throw");
/// assert_ne!(first.id(), second.id());
/// ```
pub struct PreparedProvider<T> {
    display: Arc<dyn DisplayPolicy>,
    compute: Arc<Compute<T>>,
}

impl<T> Clone for PreparedProvider<T> {
    fn clone(&self) -> Self {
        Self {
            display: Arc::clone(&self.display),
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<T> PreparedProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// A provider computing its values with `block`.
    pub fn new<F, Fut, E>(block: F) -> Self
    where
        F: Fn(TestEnvironment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            display: default_policy(),
            compute: boxed(block),
        }
    }

    /// Changes how the values are rendered in the test log.
    #[must_use]
    pub fn with_display(mut self, display: impl DisplayPolicy + 'static) -> Self {
        self.display = Arc::new(display);
        self
    }

    /// Creates a new, independent prepared value.
    #[must_use]
    pub fn named(&self, name: impl Into<String>) -> Prepared<T> {
        Prepared::from_parts(
            name.into(),
            Arc::clone(&self.display),
            Arc::clone(&self.compute),
        )
    }

    /// A provider whose values are this provider's values passed through `f`.
    pub fn map<U, F>(&self, f: F) -> PreparedProvider<U>
    where
        U: Clone + fmt::Debug + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let compute = Arc::clone(&self.compute);
        let f = Arc::new(f);
        PreparedProvider::new(move |env: TestEnvironment| {
            let future = compute(env);
            let f = Arc::clone(&f);
            async move { future.await.map(|value| f(value)) }
        })
    }
}

impl<T> fmt::Debug for PreparedProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedProvider").finish_non_exhaustive()
    }
}

/// Shorthand for [`PreparedProvider::new`].
pub fn prepared<T, F, Fut, E>(block: F) -> PreparedProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
    F: Fn(TestEnvironment) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    PreparedProvider::new(block)
}
