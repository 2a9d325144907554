//! Reload rules and the URL matching policy.
//!
//! A [`Rule`] maps a URL substring to a reload interval. Rules are kept in
//! a user-defined order, and that order matters: when several patterns are
//! substrings of the same URL, the **last** matching rule in list order
//! wins (see [`match_rule`]). Editing a broad rule near the top of the list
//! therefore never shadows a more specific rule added after it.
//!
//! Each rule also has a stable [`pattern_id`], a URL-safe encoding of its
//! pattern that is used as the join key against remote backup items.

use serde::{Deserialize, Serialize};

/// Milliseconds per minute.
const MINUTE_MS: u64 = 60_000;

/// Validation failures for rule input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// The URL pattern is empty after trimming.
    #[error("URL pattern must not be empty")]
    EmptyPattern,

    /// The interval is below one minute.
    #[error("interval must be at least 1 minute (got {0})")]
    InvalidInterval(u32),

    /// Another rule already uses this pattern.
    #[error("URL pattern already exists: {0}")]
    Duplicate(String),

    /// The rule being edited no longer exists.
    #[error("no rule with URL pattern: {0}")]
    NotFound(String),
}

/// A user-defined URL pattern to reload interval mapping.
///
/// Identity is the `url_pattern`; no two rules in a list share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Substring matched against tab URLs.
    pub url_pattern: String,
    /// Reload interval in whole minutes (always > 0 for a valid rule).
    pub interval_minutes: u32,
}

impl Rule {
    /// Create a rule with a trimmed pattern, validating both fields.
    pub fn new(url_pattern: impl AsRef<str>, interval_minutes: u32) -> Result<Self, RuleError> {
        let rule = Self {
            url_pattern: url_pattern.as_ref().trim().to_owned(),
            interval_minutes,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Check the pattern is non-empty and the interval positive.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.url_pattern.trim().is_empty() {
            return Err(RuleError::EmptyPattern);
        }
        if self.interval_minutes < 1 {
            return Err(RuleError::InvalidInterval(self.interval_minutes));
        }
        Ok(())
    }

    /// Reload interval in milliseconds.
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        u64::from(self.interval_minutes) * MINUTE_MS
    }

    /// Returns `true` if this rule's pattern occurs anywhere in `url`.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        !self.url_pattern.is_empty() && url.contains(self.url_pattern.as_str())
    }

    /// Stable join key for remote backup items.
    #[must_use]
    pub fn pattern_id(&self) -> String {
        pattern_id(&self.url_pattern)
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}m)", self.url_pattern, self.interval_minutes)
    }
}

/// Select the rule that governs `url`.
///
/// Rules are visited in stored order and the **last** rule whose pattern is
/// a substring of `url` is returned. This is deliberately not first-match:
/// later entries override earlier ones when patterns overlap, so list order
/// acts as the tie-break. Rules with disjoint patterns can be reordered
/// freely without changing any outcome.
#[must_use]
pub fn match_rule<'a>(rules: &'a [Rule], url: &str) -> Option<&'a Rule> {
    rules.iter().rev().find(|rule| rule.matches(url))
}

/// Encode a URL pattern into its URL-safe pattern id.
///
/// The encoding matches the `encodeURIComponent` character set (letters,
/// digits and `-_.!~*'()` stay literal) so that ids written by earlier
/// clients keep joining against the same remote items.
#[must_use]
pub fn pattern_id(url_pattern: &str) -> String {
    urlencoding::encode(url_pattern)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

/// Decode a pattern id back into the URL pattern it was built from.
#[must_use]
pub fn decode_pattern_id(pattern_id: &str) -> Option<String> {
    urlencoding::decode(pattern_id)
        .ok()
        .map(std::borrow::Cow::into_owned)
}

/// Returns the first pattern that appears more than once, if any.
pub(crate) fn first_duplicate(rules: &[Rule]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    rules
        .iter()
        .map(|rule| rule.url_pattern.as_str())
        .find(|pattern| !seen.insert(*pattern))
}
