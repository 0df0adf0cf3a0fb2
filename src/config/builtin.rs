//! Configuration elements understood by the runner.

use std::time::Duration;

use super::{Config, ConfigElement, Multi, Unique};

/// Marks a test or an entire suite as disabled.
///
/// ```rust
/// use testkit_prepared::config::{Config, Ignored};
///
/// let config = Config::of(Ignored);
/// assert!(config.get::<Ignored>().is_some());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ignored;

impl ConfigElement for Ignored {
    type Uniqueness = Unique;
}

impl Ignored {
    /// Disables the test or suite if `predicate` returns `true`.
    ///
    /// Unlike not declaring the test at all, the test still shows up as skipped.
    pub fn when(predicate: impl FnOnce() -> bool) -> Config {
        if predicate() {
            Config::of(Ignored)
        } else {
            Config::empty()
        }
    }
}

/// Runs the test or suite only if `predicate` returns `true`. Opposite of [`Ignored::when`].
pub fn only_if(predicate: impl FnOnce() -> bool) -> Config {
    Ignored::when(|| !predicate())
}

/// Tags a test or a suite. Runners may filter on tags.
///
/// A test accumulates the tags of all its enclosing suites.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(pub String);

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The tag's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl ConfigElement for Tag {
    type Uniqueness = Multi;
}

/// For how long, in virtual time, foreground work may make no progress
/// before the test is stopped with [`Error::Timeout`](crate::Error::Timeout).
///
/// A test looping on `delay` is making progress and is never stopped by this
/// timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeout(pub Duration);

impl IdleTimeout {
    /// Applied when no `IdleTimeout` is configured.
    pub const DEFAULT: Duration = Duration::from_secs(10);

    /// The timeout configured in `config`, or [`IdleTimeout::DEFAULT`].
    #[must_use]
    pub fn effective(config: &Config) -> Duration {
        config
            .get::<IdleTimeout>()
            .map_or(Self::DEFAULT, |timeout| timeout.0)
    }
}

impl ConfigElement for IdleTimeout {
    type Uniqueness = Unique;
}

/// Fixes the random seed of the test before its body starts.
///
/// Equivalent to calling [`Random::set_seed`](crate::random::Random::set_seed)
/// as the first statement of the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomSeed(pub u64);

impl ConfigElement for RandomSeed {
    type Uniqueness = Unique;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_when() {
        assert!(Ignored::when(|| true).get::<Ignored>().is_some());
        assert!(Ignored::when(|| false).is_empty());
    }

    #[test]
    fn test_only_if() {
        assert!(only_if(|| false).get::<Ignored>().is_some());
        assert!(only_if(|| true).is_empty());
    }

    #[test]
    fn test_tags_accumulate() {
        let config = Config::of(Tag::new("slow")) + Config::of(Tag::new("frontend"));
        let names: Vec<_> = config.get_all::<Tag>().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["slow", "frontend"]);
    }

    #[test]
    fn test_effective_timeout() {
        assert_eq!(IdleTimeout::effective(&Config::empty()), IdleTimeout::DEFAULT);
        let config = Config::of(IdleTimeout(Duration::from_secs(1)));
        assert_eq!(IdleTimeout::effective(&config), Duration::from_secs(1));
    }
}
