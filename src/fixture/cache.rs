//! Keyed single-flight store for fixture outcomes.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_lock::OnceCell;
use parking_lot::Mutex;

use crate::error::{BoxError, Error, FixtureFailure, FixtureKind, Result};

/// Identity of a fixture. Allocated once per fixture instance, never derived
/// from its name: two fixtures with the same name are still distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixtureId(u64);

impl FixtureId {
    /// Allocates a new, never used identity.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixture({})", self.0)
    }
}

type Outcome<T> = std::result::Result<T, Arc<FixtureFailure>>;
type Slot = Arc<OnceCell<Arc<dyn Any + Send + Sync>>>;

/// Memoizes fixture outcomes, successful or not, by [`FixtureId`].
///
/// Each id is computed at most once. Concurrent requesters of an id that is
/// being computed wait for that computation instead of starting their own.
/// A failure is wrapped once and the same [`Arc<FixtureFailure>`] is handed
/// to every later requester.
#[derive(Clone, Default)]
pub struct FixtureCache {
    slots: Arc<Mutex<HashMap<FixtureId, Slot>>>,
}

impl FixtureCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids that have a slot, computed or in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` if nothing was ever requested from this cache.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the outcome stored under `id`, computing it first if needed.
    ///
    /// The boolean is `true` when this call ran `compute`.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        id: FixtureId,
        name: &str,
        kind: FixtureKind,
        compute: F,
    ) -> (Result<T>, bool)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let slot = Arc::clone(
            self.slots
                .lock()
                .entry(id)
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        let mut initialized = false;
        let stored = slot
            .get_or_init(|| async {
                initialized = true;
                let outcome: Outcome<T> = compute()
                    .await
                    .map_err(|cause| Arc::new(FixtureFailure::new(name, kind, cause)));
                Arc::new(outcome) as Arc<dyn Any + Send + Sync>
            })
            .await;

        let outcome = match stored.downcast_ref::<Outcome<T>>() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(failure)) => Err(Error::Fixture(Arc::clone(failure))),
            None => Err(Error::CacheTypeMismatch(id.as_u64())),
        };
        (outcome, initialized)
    }
}

impl fmt::Debug for FixtureCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureCache")
            .field("entries", &self.len())
            .finish()
    }
}
