//! String and regular-expression comparisons shared by matchers and rules.

use idpfilter_core::{CoreError, CoreResult};
use regex::Regex;

/// Literal comparison, optionally case-insensitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringCompare {
    value: String,
    ignore_case: bool,
}

impl StringCompare {
    /// Case-sensitive comparison against `value`
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ignore_case: false,
        }
    }

    /// Set case sensitivity
    #[must_use]
    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    /// Configured literal
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether `input` equals the literal
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        if self.ignore_case {
            self.value.to_lowercase() == input.to_lowercase()
        } else {
            self.value == input
        }
    }
}

/// Whole-string regular expression match
#[derive(Debug, Clone)]
pub struct RegexCompare {
    pattern: String,
    regex: Regex,
}

impl RegexCompare {
    /// Compile a pattern. The pattern must match the entire input.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the pattern does not compile
    pub fn new(pattern: impl Into<String>) -> CoreResult<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| CoreError::Validation {
            field: "regex".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, regex })
    }

    /// Source pattern as configured
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern matches all of `input`
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }
}

impl PartialEq for RegexCompare {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for RegexCompare {}

/// Either kind of string comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueCompare {
    /// Literal
    Exact(StringCompare),
    /// Regular expression
    Regex(RegexCompare),
}

impl ValueCompare {
    /// Whether `input` satisfies the comparison
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Self::Exact(c) => c.matches(input),
            Self::Regex(c) => c.matches(input),
        }
    }
}

impl From<StringCompare> for ValueCompare {
    fn from(c: StringCompare) -> Self {
        Self::Exact(c)
    }
}

impl From<RegexCompare> for ValueCompare {
    fn from(c: RegexCompare) -> Self {
        Self::Regex(c)
    }
}

impl std::fmt::Display for ValueCompare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(c) => write!(f, "'{}'", c.value),
            Self::Regex(c) => write!(f, "/{}/", c.pattern),
        }
    }
}
