//! Test suites
//!
//! A suite is a tree: suites group tests and other suites, and each node
//! carries a [`Config`] merged into every test below it. Test authors declare
//! suites through [`SuiteDsl`]; runners implement it to receive them.
//!
//! [`SuiteTree`] records a declaration into a [`SuiteNode`] that can be
//! replayed into any runner, and [`TestPlan`] flattens a tree into the list of
//! cases to run.
//!
//! # Example
//!
//! ```rust
//! use testkit_prepared::prelude::*;
//!
//! let tree = SuiteTree::build("math", Config::empty(), |suite| {
//!     suite.test("addition", Config::empty(), TestBody::new(|_env| async {
//!         assert_eq!(1 + 1, 2);
//!         Ok::<_, Error>(())
//!     }));
//!     suite.suite("division", Config::of(Tag::new("slow")), &mut |suite| {
//!         suite.test("by one", Config::empty(), TestBody::new(|_env| async { Ok::<_, Error>(()) }));
//!     });
//! });
//!
//! let plan = TestPlan::from_tree(&tree);
//! let names: Vec<_> = plan.cases().iter().map(|case| case.name.as_str()).collect();
//! assert_eq!(names, ["math • addition", "math • division • by one"]);
//! ```

mod plan;

pub use plan::{compose_name, PlannedCase, SkipReason, TestPlan, SEPARATOR};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::Config;
use crate::environment::TestEnvironment;
use crate::error::{BoxError, Error, Result};

type Body = dyn Fn(TestEnvironment) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// The code of a test.
///
/// It runs once per execution of the test, with a fresh [`TestEnvironment`].
/// Returning an error or panicking fails the test.
#[derive(Clone)]
pub struct TestBody(Arc<Body>);

impl TestBody {
    /// Wraps an async test function.
    pub fn new<F, Fut, E>(body: F) -> Self
    where
        F: Fn(TestEnvironment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self(Arc::new(move |env| {
            let future = body(env);
            Box::pin(async move { future.await.map_err(|error| Error::from_boxed(error.into())) })
        }))
    }

    pub(crate) fn call(&self, env: TestEnvironment) -> BoxFuture<'static, Result<()>> {
        (self.0)(env)
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestBody")
    }
}

/// Declares suites and tests.
///
/// Test authors call it; runners implement it. Names are given relative to
/// the enclosing suite, and `config` is combined with the enclosing suites'
/// configuration (`suite + test`).
pub trait SuiteDsl {
    /// Declares a nested suite whose content is declared by `block`.
    fn suite(&mut self, name: &str, config: Config, block: &mut dyn FnMut(&mut dyn SuiteDsl));

    /// Declares a test.
    fn test(&mut self, name: &str, config: Config, body: TestBody);
}

/// A recorded suite declaration.
#[derive(Clone, Debug)]
pub enum SuiteNode {
    /// A group of tests.
    Suite {
        /// Name relative to the parent.
        name: String,
        /// Configuration applied to every node below.
        config: Config,
        /// Nested nodes, in declaration order.
        children: Vec<SuiteNode>,
    },
    /// A single test.
    Test {
        /// Name relative to the parent.
        name: String,
        /// The test's own configuration.
        config: Config,
        /// The test's code.
        body: TestBody,
    },
}

impl SuiteNode {
    /// The node's name, relative to its parent.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            SuiteNode::Suite { name, .. } | SuiteNode::Test { name, .. } => name,
        }
    }

    /// Declares this node into `dsl`, as if it was written against it.
    pub fn replay(&self, dsl: &mut dyn SuiteDsl) {
        match self {
            SuiteNode::Suite {
                name,
                config,
                children,
            } => dsl.suite(name, config.clone(), &mut |inner| {
                for child in children {
                    child.replay(inner);
                }
            }),
            SuiteNode::Test { name, config, body } => dsl.test(name, config.clone(), body.clone()),
        }
    }

    /// Number of tests in this subtree.
    #[must_use]
    pub fn test_count(&self) -> usize {
        match self {
            SuiteNode::Suite { children, .. } => children.iter().map(SuiteNode::test_count).sum(),
            SuiteNode::Test { .. } => 1,
        }
    }
}

/// Records declarations made through [`SuiteDsl`].
#[derive(Debug, Default)]
pub struct SuiteTree {
    frames: Vec<Vec<SuiteNode>>,
}

impl SuiteTree {
    /// Records the suite declared by `block`.
    pub fn build(
        name: impl Into<String>,
        config: Config,
        block: impl FnOnce(&mut dyn SuiteDsl),
    ) -> SuiteNode {
        let mut tree = SuiteTree {
            frames: vec![Vec::new()],
        };
        block(&mut tree);
        SuiteNode::Suite {
            name: name.into(),
            config,
            children: tree.frames.pop().unwrap_or_default(),
        }
    }

    fn push(&mut self, node: SuiteNode) {
        match self.frames.last_mut() {
            Some(frame) => frame.push(node),
            None => self.frames.push(vec![node]),
        }
    }
}

impl SuiteDsl for SuiteTree {
    fn suite(&mut self, name: &str, config: Config, block: &mut dyn FnMut(&mut dyn SuiteDsl)) {
        self.frames.push(Vec::new());
        block(self);
        let children = self.frames.pop().unwrap_or_default();
        self.push(SuiteNode::Suite {
            name: name.to_string(),
            config,
            children,
        });
    }

    fn test(&mut self, name: &str, config: Config, body: TestBody) {
        self.push(SuiteNode::Test {
            name: name.to_string(),
            config,
            body,
        });
    }
}
