//! # testkit-prepared 🧰
//!
//! > Lazily-prepared fixtures, virtual time and reproducible randomness for async Rust tests
//!
//! **testkit-prepared** is the engine under a test runner. Every test runs in
//! its own [`TestEnvironment`](environment::TestEnvironment): a virtual clock
//! and cooperative scheduler, a cache of prepared values, a stack of
//! finalizers, and a seeded random generator.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_prepared::prelude::*;
//!
//! let database = prepared(|env: TestEnvironment| async move {
//!     env.clean_up("close database", || async { Ok::<_, Error>(()) });
//!     Ok::<_, Error>(vec!["alice".to_string()])
//! })
//! .named("database");
//!
//! let runner = Runner::new(RunnerConfig::new());
//! let body = TestBody::new(move |env| {
//!     let database = database.clone();
//!     async move {
//!         let users = env.prepared(&database).await?;
//!         env.time().delay(Duration::from_secs(60)).await;
//!         assert_eq!(env.time().now(), Duration::from_secs(60));
//!         assert_eq!(users.len(), 1);
//!         Ok::<_, Error>(())
//!     }
//! });
//! runner.run_test("users", &Config::empty(), &body).unwrap();
//! ```
//!
//! ## Features
//!
//! - 🧪 **Prepared values** - Lazy per-test fixtures, computed once per test
//! - 🤝 **Shared values** - Lazy fixtures computed once for many tests
//! - 🧹 **Finalizers** - Clean-up actions run in reverse order
//! - ⏱️ **Virtual time** - Delays complete instantly, in deterministic order
//! - 🎲 **Reproducible random** - Seeds are logged and can be replayed
//! - 🌳 **Suites** - Nested suites with merged configuration, focus and ignore

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assertions;
pub mod config;
pub mod display;
pub mod environment;
pub mod error;
pub mod executor;
pub mod finalizer;
pub mod fixture;
pub mod random;
pub mod runner;
pub mod suite;
pub mod time;

/// Prelude for convenient imports
///
/// ```rust
/// use testkit_prepared::prelude::*;
/// ```
pub mod prelude {
    pub use crate::assertions::{check_err, check_fails_with, check_panics};
    pub use crate::config::{only_if, Config, IdleTimeout, Ignored, RandomSeed, Tag};
    pub use crate::display::{FullDisplay, ShortDisplay};
    pub use crate::environment::TestEnvironment;
    pub use crate::error::{Error, Result};
    pub use crate::fixture::{
        prepared, shared, Prepared, PreparedProvider, Shared, SharedProvider, SharedRegistry,
    };
    pub use crate::random::{
        random_bits, random_bool, random_f32, random_f64, random_f64_in, random_i32,
        random_i32_in, random_i64, random_i64_in, Random,
    };
    pub use crate::runner::{Runner, RunnerConfig};
    pub use crate::suite::{SuiteDsl, SuiteTree, TestBody, TestPlan};
    pub use crate::time::Time;
}

// Re-exports
pub use error::{Error, Result};

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use testkit_prepared_macros::test;
