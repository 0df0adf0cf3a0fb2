//! Values computed at most once for every test using the same registry.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;

use super::cache::{FixtureCache, FixtureId};
use crate::display::{default_policy, DisplayPolicy};
use crate::error::{BoxError, FixtureKind, Result};

type Compute<T> = dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync;

/// Storage for [`Shared`] values.
///
/// Hosts create one registry and hand it to every test run that should see the
/// same shared values. It is the only state that outlives a single test.
#[derive(Clone, Debug, Default)]
pub struct SharedRegistry {
    cache: FixtureCache,
}

impl SharedRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by the `#[testkit_prepared::test]` host.
    #[must_use]
    pub fn global() -> &'static SharedRegistry {
        static GLOBAL: OnceLock<SharedRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SharedRegistry::new)
    }

    /// Number of shared values computed or being computed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if no shared value was requested yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// A value computed once, then shared by every test resolving it from the same
/// [`SharedRegistry`].
///
/// The computation takes no argument: per-test services such as time, random
/// or finalizers are out of its reach, since the value outlives the test that
/// happened to compute it. Failures are captured and replayed to every test.
///
/// ```rust
/// use testkit_prepared::fixture::{Shared, SharedRegistry};
///
/// let answer = Shared::new("answer", || async { Ok::<_, std::io::Error>(42) });
/// let registry = SharedRegistry::new();
///
/// let value = futures::executor::block_on(answer.resolve(&registry));
/// assert_eq!(value.unwrap(), 42);
/// ```
pub struct Shared<T> {
    id: FixtureId,
    name: Arc<str>,
    display: Arc<dyn DisplayPolicy>,
    compute: Arc<Compute<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            display: Arc::clone(&self.display),
            compute: Arc::clone(&self.compute),
        }
    }
}

fn boxed<T, F, Fut, E>(block: F) -> Arc<Compute<T>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    Arc::new(move || {
        let future = block();
        Box::pin(async move { future.await.map_err(Into::into) })
    })
}

impl<T> Shared<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Declares a shared value computed by `block`.
    pub fn new<F, Fut, E>(name: impl Into<String>, block: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            id: FixtureId::next(),
            name: name.into().into(),
            display: default_policy(),
            compute: boxed(block),
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

    /// Returns the value stored in `registry`, computing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fixture`](crate::Error::Fixture) if the computation
    /// failed, in this call or in any earlier one against `registry`.
    pub async fn resolve(&self, registry: &SharedRegistry) -> Result<T> {
        let (outcome, initialized) = registry
            .cache
            .get_or_compute(self.id, &self.name, FixtureKind::Shared, || (self.compute)())
            .await;

        let origin = if initialized {
            "initialized by this test"
        } else {
            "reusing an already initialized value"
        };
        match &outcome {
            Ok(value) => tracing::info!(
                "» Shared '{}': {} ({origin})",
                self.name,
                self.display.render(value)
            ),
            Err(error) => tracing::info!("» Shared '{}' failed: {error} ({origin})", self.name),
        }
        outcome
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A recipe for [`Shared`] values: each [`named`](Self::named) call declares
/// an independent shared value.
pub struct SharedProvider<T> {
    compute: Arc<Compute<T>>,
}

impl<T> Clone for SharedProvider<T> {
    fn clone(&self) -> Self {
        Self {
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<T> SharedProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    /// A provider computing its values with `block`.
    pub fn new<F, Fut, E>(block: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            compute: boxed(block),
        }
    }

    /// Declares a new, independent shared value.
    #[must_use]
    pub fn named(&self, name: impl Into<String>) -> Shared<T> {
        Shared {
            id: FixtureId::next(),
            name: name.into().into(),
            display: default_policy(),
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<T> fmt::Debug for SharedProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedProvider").finish_non_exhaustive()
    }
}

/// Shorthand for [`SharedProvider::new`].
pub fn shared<T, F, Fut, E>(block: F) -> SharedProvider<T>
where
    T: Clone + fmt::Debug + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
{
    SharedProvider::new(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_computed_once_per_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = Shared::new("counter", move || {
            let counter = Arc::clone(&counter);
            async move { Ok::<_, BoxError>(counter.fetch_add(1, Ordering::SeqCst)) }
        });

        let registry = SharedRegistry::new();
        assert_eq!(block_on(value.resolve(&registry)).unwrap(), 0);
        assert_eq!(block_on(value.resolve(&registry)).unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other = SharedRegistry::new();
        assert_eq!(block_on(value.resolve(&other)).unwrap(), 1);
    }

    #[test]
    fn test_provider_values_are_independent() {
        let provider = shared(|| async { Ok::<_, BoxError>("x".to_string()) });
        let a = provider.named("a");
        let b = provider.named("b");
        assert_ne!(a.id(), b.id());

        let registry = SharedRegistry::new();
        block_on(a.resolve(&registry)).unwrap();
        block_on(b.resolve(&registry)).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_threads_compute_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = Shared::new("slow", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok::<_, BoxError>(7)
            }
        });
        let registry = SharedRegistry::new();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let value = value.clone();
                let registry = registry.clone();
                std::thread::spawn(move || block_on(value.resolve(&registry)).unwrap())
            })
            .collect();

        for thread in threads {
            assert_eq!(thread.join().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
