//! Error definitions
//!
//! This module provides the error types shared by every part of testkit-prepared.
//! Fixture failures are captured once and replayed: the same [`Arc`] is handed
//! to every later caller, so `Arc::ptr_eq` holds between two accesses.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::random::SeedOrigin;

/// Boxed error accepted from user code (fixture blocks, test bodies, finalizers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reference-counted error, used where a failure is replayed to several callers.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for testkit-prepared
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A prepared or shared value failed to compute.
    #[error(transparent)]
    Fixture(Arc<FixtureFailure>),

    /// Attempted to fix the random seed after it was already fixed.
    #[error(
        "The random generator already uses the seed {seed} ({origin}), cannot override it with {requested}"
    )]
    SeedAlreadyFixed {
        /// The seed in use.
        seed: u64,
        /// How the seed in use was chosen.
        origin: SeedOrigin,
        /// The seed that was rejected.
        requested: u64,
    },

    /// Assertion failed
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// A finalizer failed while tearing down a test.
    #[error("Finalizer '{name}' failed: {cause}")]
    Finalizer {
        /// Name of the finalizer.
        name: String,
        /// What went wrong.
        cause: SharedError,
    },

    /// No foreground progress happened within the configured idle timeout.
    #[error("No foreground progress for {0:?}, the test was stopped")]
    Timeout(Duration),

    /// Virtual time was asked to move backwards.
    #[error("Cannot move virtual time back from {now:?} to {requested:?}")]
    BackwardsTime {
        /// Current virtual time.
        now: Duration,
        /// The rejected target.
        requested: Duration,
    },

    /// A [`Time::timeout`](crate::time::Time::timeout) deadline elapsed.
    #[error("Operation timed out after {0:?} of virtual time")]
    Elapsed(Duration),

    /// A task panicked.
    #[error("Task '{task}' panicked: {message}")]
    Panicked {
        /// Name of the task (the test name for the test body).
        task: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The awaited task was cancelled before it completed.
    #[error("Task was cancelled before completing")]
    Cancelled,

    /// Failure raised by user code.
    #[error("{0}")]
    Failed(SharedError),

    /// A cache slot held a value of another type than the one requested.
    #[error("Cache entry {0} holds a value of an unexpected type")]
    CacheTypeMismatch(u64),
}

impl Error {
    /// Create an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Converts an arbitrary boxed error, keeping it as-is when it already is an [`Error`].
    #[must_use]
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<Error>() {
            Ok(error) => *error,
            Err(other) => Self::Failed(Arc::from(other)),
        }
    }

    /// Returns the captured fixture failure, if this error is one.
    #[must_use]
    pub fn as_fixture_failure(&self) -> Option<&Arc<FixtureFailure>> {
        match self {
            Self::Fixture(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Which kind of fixture produced a [`FixtureFailure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixtureKind {
    /// Memoized per test.
    Prepared,
    /// Memoized for the life of a [`SharedRegistry`](crate::fixture::SharedRegistry).
    Shared,
}

impl fmt::Display for FixtureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureKind::Prepared => write!(f, "prepared value"),
            FixtureKind::Shared => write!(f, "shared value"),
        }
    }
}

/// The captured failure of a fixture computation.
///
/// Created once, when the computation fails, then replayed to every caller.
#[derive(Debug)]
pub struct FixtureFailure {
    fixture: String,
    kind: FixtureKind,
    cause: SharedError,
}

impl FixtureFailure {
    pub(crate) fn new(fixture: impl Into<String>, kind: FixtureKind, cause: BoxError) -> Self {
        Self {
            fixture: fixture.into(),
            kind,
            cause: Arc::from(cause),
        }
    }

    /// Name of the fixture that failed.
    #[must_use]
    pub fn fixture(&self) -> &str {
        &self.fixture
    }

    /// Kind of the fixture that failed.
    #[must_use]
    pub fn kind(&self) -> FixtureKind {
        self.kind
    }

    /// The error returned by the computation.
    #[must_use]
    pub fn cause(&self) -> &SharedError {
        &self.cause
    }
}

impl fmt::Display for FixtureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to compute the {} '{}': {}", self.kind, self.fixture, self.cause)
    }
}

impl std::error::Error for FixtureFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
