//! Three-valued logic for policy decisions.

use serde::{Deserialize, Serialize};

/// Outcome of a policy requirement rule.
///
/// `Fail` means the rule could not be evaluated and must never be treated
/// as `False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tristate {
    /// Rule matched
    True,
    /// Rule evaluated and did not match
    False,
    /// Rule could not be evaluated
    Fail,
}

impl Tristate {
    /// Whether this is `True`
    #[must_use]
    pub fn is_true(self) -> bool {
        self == Self::True
    }

    /// Whether this is `Fail`
    #[must_use]
    pub fn is_fail(self) -> bool {
        self == Self::Fail
    }

    /// Logical negation; `Fail` stays `Fail`
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Fail => Self::Fail,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl std::fmt::Display for Tristate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "TRUE"),
            Self::False => write!(f, "FALSE"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}
