//! Cleanup actions run when a test ends.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::error::{BoxError, Error, Result, SharedError};
use crate::executor::panic_message;

type Action = Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send>;

struct Finalizer {
    name: String,
    on_success: bool,
    on_failure: bool,
    action: Action,
}

impl Finalizer {
    fn applies(&self, succeeded: bool) -> bool {
        if succeeded {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

/// The cleanup actions registered during one test.
///
/// Actions run once, when the test ends, in reverse registration order. Each
/// one is gated on the outcome of the test. A failing action does not stop the
/// others from running.
#[derive(Clone, Default)]
pub struct FinalizerStack {
    entries: Arc<Mutex<Vec<Finalizer>>>,
}

impl FinalizerStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action`, to run if the test succeeds (`on_success`) or
    /// fails (`on_failure`).
    pub fn register<F, Fut, E>(
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
        let action: Action = Box::new(move || {
            let future = action();
            Box::pin(async move { future.await.map_err(Into::into) })
        });
        self.entries.lock().push(Finalizer {
            name: name.into(),
            on_success,
            on_failure,
            action,
        });
    }

    /// Number of actions not yet run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no action is waiting to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every pending action whose gate matches `succeeded`, newest first.
    ///
    /// Actions registered while draining run too. Every failure is logged; the
    /// first one is returned as [`Error::Finalizer`] once all actions ran.
    pub async fn drain(&self, succeeded: bool) -> Result<()> {
        let mut first_failure = None;
        loop {
            let next = self.entries.lock().pop();
            let Some(finalizer) = next else {
                break;
            };
            if !finalizer.applies(succeeded) {
                tracing::debug!(finalizer = %finalizer.name, succeeded, "skipping finalizer");
                continue;
            }

            tracing::info!("» Finalizing '{}'", finalizer.name);
            let Finalizer { name, action, .. } = finalizer;
            let outcome = AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await;
            let cause: SharedError = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => Arc::from(error),
                Err(payload) => Arc::new(Error::Panicked {
                    task: name.clone(),
                    message: panic_message(payload.as_ref()),
                }),
            };
            tracing::error!(finalizer = %name, error = %cause, "finalizer failed");
            first_failure.get_or_insert(Error::Finalizer { name, cause });
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for FinalizerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerStack")
            .field("pending", &self.len())
            .finish()
    }
}
