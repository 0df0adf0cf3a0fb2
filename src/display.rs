//! Rendering of fixture values in the test log.

use std::fmt;
use std::sync::Arc;

/// Converts a fixture value into the text written to the test log.
pub trait DisplayPolicy: Send + Sync + fmt::Debug {
    /// Renders `value`.
    fn render(&self, value: &dyn fmt::Debug) -> String;
}

/// Renders values on a single line, truncated to [`ShortDisplay::LIMIT`] characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortDisplay;

impl ShortDisplay {
    /// Number of characters kept before truncating.
    pub const LIMIT: usize = 256;
}

impl DisplayPolicy for ShortDisplay {
    fn render(&self, value: &dyn fmt::Debug) -> String {
        let text = format!("{value:?}").replace('\n', " / ");
        match text.char_indices().nth(Self::LIMIT) {
            Some((cut, _)) => format!(
                "{}… (use FullDisplay to view the full value)",
                &text[..cut]
            ),
            None => text,
        }
    }
}

/// Renders values with their full `Debug` representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullDisplay;

impl DisplayPolicy for FullDisplay {
    fn render(&self, value: &dyn fmt::Debug) -> String {
        format!("{value:?}")
    }
}

pub(crate) fn default_policy() -> Arc<dyn DisplayPolicy> {
    Arc::new(ShortDisplay)
}
