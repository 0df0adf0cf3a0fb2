//! Flattening a suite tree into the cases a runner executes.

use super::{SuiteDsl, SuiteNode, TestBody};
use crate::config::{Config, Ignored, Tag};

/// Joins the names of nested suites and tests.
pub const SEPARATOR: &str = " • ";

const FOCUS_PREFIX: &str = "f:";
const BANG_PREFIX: &str = "!";

/// Appends `name` to `prefix`.
///
/// A name starting with the focus (`f:`) or bang (`!`) marker moves the marker
/// to the front of the composed name, so that it applies to the whole path.
///
/// ```rust
/// use testkit_prepared::suite::compose_name;
///
/// assert_eq!(compose_name(None, "test"), "test");
/// assert_eq!(compose_name(Some("suite"), "test"), "suite • test");
/// assert_eq!(compose_name(Some("suite"), "f:test"), "f:suite • f:test");
/// assert_eq!(compose_name(Some("suite"), "!test"), "!suite • !test");
/// ```
#[must_use]
pub fn compose_name(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        None => name.to_string(),
        Some(prefix) if name.starts_with(FOCUS_PREFIX) => {
            format!("{FOCUS_PREFIX}{prefix}{SEPARATOR}{name}")
        }
        Some(prefix) if name.starts_with(BANG_PREFIX) => {
            format!("{BANG_PREFIX}{prefix}{SEPARATOR}{name}")
        }
        Some(prefix) => format!("{prefix}{SEPARATOR}{name}"),
    }
}

/// Why a case does not run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The case, or a suite around it, is [`Ignored`] or named with a `!` prefix.
    Ignored,
    /// Another case is focused with an `f:` prefix.
    NotFocused,
    /// The runner's tag filters exclude the case.
    FilteredByTag,
}

/// A test with its full name and its configuration merged with its suites'.
#[derive(Clone, Debug)]
pub struct PlannedCase {
    /// Full name, suite names included.
    pub name: String,
    /// Configuration of the enclosing suites, then of the test.
    pub config: Config,
    /// The test's code.
    pub body: TestBody,
    /// Set when the case must not run.
    pub skip: Option<SkipReason>,
    /// Set when the test or one of its suites is named with an `f:` prefix.
    pub focused: bool,
}

impl PlannedCase {
    /// Returns `true` if the test or one of its suites carries the focus marker.
    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Tags of the case and of its suites, outermost first.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.config.get_all::<Tag>().into_iter().map(Tag::name).collect()
    }
}

/// The flattened list of cases declared by a suite tree.
#[derive(Clone, Debug, Default)]
pub struct TestPlan {
    cases: Vec<PlannedCase>,
}

impl TestPlan {
    /// Flattens `tree`, then decides which cases are skipped.
    ///
    /// A case is ignored if its merged configuration holds [`Ignored`] or the
    /// test or any suite around it is named with a `!` prefix. If any runnable
    /// case is focused, unfocused cases are skipped. Ignoring wins over focusing.
    #[must_use]
    pub fn from_tree(tree: &SuiteNode) -> Self {
        let mut flattener = Flattener::default();
        tree.replay(&mut flattener);
        let mut cases = flattener.cases;

        for case in &mut cases {
            if case.config.get::<Ignored>().is_some() {
                case.skip = Some(SkipReason::Ignored);
            }
        }

        let focus_mode = cases.iter().any(|case| case.skip.is_none() && case.is_focused());
        if focus_mode {
            for case in cases.iter_mut().filter(|case| case.skip.is_none()) {
                if !case.is_focused() {
                    case.skip = Some(SkipReason::NotFocused);
                }
            }
        }

        Self { cases }
    }

    /// Every declared case, in declaration order.
    #[must_use]
    pub fn cases(&self) -> &[PlannedCase] {
        &self.cases
    }

    /// The cases that are not skipped.
    pub fn runnable(&self) -> impl Iterator<Item = &PlannedCase> {
        self.cases.iter().filter(|case| case.skip.is_none())
    }
}

/// Markers inherited from the enclosing suites.
#[derive(Clone, Copy, Default)]
struct Markers {
    disabled: bool,
    focused: bool,
}

impl Markers {
    fn with(self, name: &str) -> Self {
        Self {
            disabled: self.disabled || name.starts_with(BANG_PREFIX),
            focused: self.focused || name.starts_with(FOCUS_PREFIX),
        }
    }
}

#[derive(Default)]
struct Flattener {
    prefix: Option<String>,
    config: Config,
    markers: Markers,
    cases: Vec<PlannedCase>,
}

impl SuiteDsl for Flattener {
    fn suite(&mut self, name: &str, config: Config, block: &mut dyn FnMut(&mut dyn SuiteDsl)) {
        let composed = compose_name(self.prefix.as_deref(), name);
        let outer_prefix = self.prefix.replace(composed);
        let outer_config = self.config.clone();
        self.config = outer_config.clone() + config;
        let outer_markers = self.markers;
        self.markers = outer_markers.with(name);

        block(self);

        self.prefix = outer_prefix;
        self.config = outer_config;
        self.markers = outer_markers;
    }

    fn test(&mut self, name: &str, config: Config, body: TestBody) {
        let markers = self.markers.with(name);
        self.cases.push(PlannedCase {
            name: compose_name(self.prefix.as_deref(), name),
            config: self.config.clone() + config,
            body,
            skip: markers.disabled.then_some(SkipReason::Ignored),
            focused: markers.focused,
        });
    }
}
