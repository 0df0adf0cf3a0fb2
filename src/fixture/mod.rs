//! Lazily computed test fixtures
//!
//! - [`Prepared`] values are computed on first use inside a test and reused
//!   for the rest of that test.
//! - [`Shared`] values are computed once per [`SharedRegistry`] and reused by
//!   every test of the run.
//!
//! Both are memoized by a [`FixtureId`] allocated when they are declared, and
//! computed under single-flight: concurrent requesters wait for the first
//! computation. Failures are captured and replayed to every requester.

mod cache;
mod prepared;
mod shared;

pub use cache::{FixtureCache, FixtureId};
pub use prepared::{prepared, Prepared, PreparedProvider};
pub use shared::{shared, Shared, SharedProvider, SharedRegistry};
