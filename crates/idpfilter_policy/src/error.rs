//! Engine-level errors.

use idpfilter_core::CoreError;

/// Result of a filtering operation
pub type FilterResult<T> = Result<T, FilterError>;

/// Filtering error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// A policy's requirement rule could not be evaluated
    #[error("{policy}: policy requirement rule failed, aborting attribute filtering")]
    PolicyRuleFailed {
        /// Policy that failed
        policy: String,
    },

    /// A component was misused or misconfigured
    #[error(transparent)]
    Component(#[from] CoreError),

    /// The policy configuration is invalid
    #[error("invalid filter configuration: {0}")]
    Config(String),
}

impl FilterError {
    /// Whether this error comes from configuration rather than a request
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
            || matches!(self, Self::Component(CoreError::Initialization { .. } | CoreError::Validation { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = FilterError::PolicyRuleFailed {
            policy: "Attribute Filter Policy 'p1'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Attribute Filter Policy 'p1': policy requirement rule failed, aborting attribute filtering"
        );
    }

    #[test]
    fn test_from_core() {
        let err: FilterError = CoreError::contract("bad").into();
        assert!(matches!(err, FilterError::Component(CoreError::ContractViolation { .. })));
        assert!(!err.is_config());
        assert!(FilterError::Config("x".to_string()).is_config());
    }
}
