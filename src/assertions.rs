//! Failure-checking helpers for test bodies.
//!
//! Each helper turns an unexpected outcome into an [`Error::Assertion`], so it
//! composes with `?` inside a test body:
//!
//! ```rust
//! use testkit_prepared::prelude::*;
//!
//! # futures::executor::block_on(async {
//! let outcome: Result<u32> = Err(Error::assertion("boom"));
//! let error = check_err(outcome)?;
//! assert_eq!(error.to_string(), "Assertion failed: boom");
//!
//! let message = check_panics(async { panic!("exploded") }).await?;
//! assert_eq!(message, "exploded");
//! # Ok::<_, Error>(())
//! # }).unwrap();
//! ```

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{Error, Result};
use crate::executor::panic_message;

/// Returns the error of `result`.
///
/// # Errors
///
/// Fails with an assertion error naming the value if `result` is `Ok`.
pub fn check_err<T: Debug, E>(result: std::result::Result<T, E>) -> Result<E> {
    match result {
        Ok(value) => Err(Error::assertion(format!(
            "Expected a failure, but got the value {value:?}"
        ))),
        Err(error) => Ok(error),
    }
}

/// Returns the error of `result` as an `E`.
///
/// The error matches if it is an `E` itself, or if it wraps one: a user error
/// ([`Error::Failed`]), the cause of a fixture failure, or the cause of a
/// finalizer failure.
///
/// # Errors
///
/// Fails with an assertion error if `result` is `Ok`, or if its error is not
/// an `E`.
pub fn check_fails_with<E, T>(result: Result<T>) -> Result<E>
where
    E: std::error::Error + Clone + 'static,
    T: Debug,
{
    let error = check_err(result)?;
    if let Some(expected) = (&error as &dyn Any).downcast_ref::<E>() {
        return Ok(expected.clone());
    }

    let cause = match &error {
        Error::Failed(cause) | Error::Finalizer { cause, .. } => Some(cause),
        Error::Fixture(failure) => Some(failure.cause()),
        _ => None,
    };
    cause
        .and_then(|cause| cause.downcast_ref::<E>())
        .cloned()
        .ok_or_else(|| {
            Error::assertion(format!(
                "Expected a failure of type {}, but got: {error}",
                std::any::type_name::<E>()
            ))
        })
}

/// Awaits `future` and returns the message of the panic it raised.
///
/// # Errors
///
/// Fails with an assertion error if `future` completes without panicking.
pub async fn check_panics<F>(future: F) -> Result<String>
where
    F: Future,
    F::Output: Debug,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(value) => Err(Error::assertion(format!(
            "Expected a panic, but completed with {value:?}"
        ))),
        Err(payload) => Ok(panic_message(payload.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::executor::block_on;

    use super::*;
    use crate::error::{FixtureFailure, FixtureKind};

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    #[error("not found: {0}")]
    struct NotFound(String);

    #[test]
    fn test_check_err() {
        let failed: std::result::Result<(), &str> = Err("nope");
        assert_eq!(check_err(failed).unwrap(), "nope");

        let error = check_err(Ok::<_, ()>(3)).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Assertion failed: Expected a failure, but got the value 3"
        );
    }

    #[test]
    fn test_check_fails_with_finds_wrapped_errors() {
        let user: Result<()> = Err(Error::Failed(Arc::new(NotFound("a".into()))));
        assert_eq!(check_fails_with::<NotFound, _>(user).unwrap(), NotFound("a".into()));

        let fixture: Result<()> = Err(Error::Fixture(Arc::new(FixtureFailure::new(
            "db",
            FixtureKind::Prepared,
            Box::new(NotFound("b".into())),
        ))));
        assert_eq!(check_fails_with::<NotFound, _>(fixture).unwrap(), NotFound("b".into()));

        let own: Result<()> = Err(Error::Cancelled);
        assert!(matches!(check_fails_with::<Error, _>(own), Ok(Error::Cancelled)));
    }

    #[test]
    fn test_check_fails_with_rejects_other_errors() {
        let other: Result<()> = Err(Error::assertion("different"));
        let error = check_fails_with::<NotFound, _>(other).unwrap_err();
        assert!(error.to_string().contains("Expected a failure of type"));
        assert!(error.to_string().contains("different"));
    }

    #[test]
    fn test_check_panics() {
        let message = block_on(check_panics(async { panic!("exploded") })).unwrap();
        assert_eq!(message, "exploded");

        let error = block_on(check_panics(async { 5 })).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Assertion failed: Expected a panic, but completed with 5"
        );
    }
}
