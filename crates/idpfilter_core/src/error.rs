//! Core error types for the attribute filter.
//!
//! These are contract and lifecycle errors: they signal a programming or
//! configuration defect, never a policy outcome. Policy outcomes travel as
//! [`Tristate`](crate::Tristate) values or failed match results.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Component used before `initialize()`
    Uninitialized {
        /// Log prefix or id of the offending component
        component: String,
    },

    /// Component used, or re-initialized, after `destroy()`
    Destroyed {
        /// Log prefix or id of the offending component
        component: String,
    },

    /// Attempt to modify a component after initialization
    Unmodifiable {
        /// Log prefix or id of the offending component
        component: String,
    },

    /// Component failed to initialize
    Initialization {
        /// Log prefix or id of the offending component
        component: String,
        /// Why initialization failed
        reason: String,
    },

    /// Caller broke an argument or state contract
    ContractViolation {
        /// Description of the broken contract
        reason: String,
    },

    /// Invalid ID format
    InvalidId {
        /// Why the identifier was rejected
        reason: String,
    },

    /// Validation error
    Validation {
        /// Offending field
        field: String,
        /// Failure reason
        reason: String,
    },
}

impl CoreError {
    /// Shorthand for a contract violation
    #[must_use]
    pub fn contract(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            reason: reason.into(),
        }
    }

    /// Shorthand for an initialization failure
    #[must_use]
    pub fn initialization(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Initialization {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized { component } => {
                write!(f, "Component has not been initialized: {}", component)
            }
            Self::Destroyed { component } => {
                write!(f, "Component has been destroyed: {}", component)
            }
            Self::Unmodifiable { component } => {
                write!(f, "Component is unmodifiable once initialized: {}", component)
            }
            Self::Initialization { component, reason } => {
                write!(f, "Initialization failed for {}: {}", component, reason)
            }
            Self::ContractViolation { reason } => write!(f, "Contract violation: {}", reason),
            Self::InvalidId { reason } => write!(f, "Invalid ID: {}", reason),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Destroyed {
            component: "Attribute Rule 'r1'".to_string(),
        };
        assert_eq!(format!("{}", err), "Component has been destroyed: Attribute Rule 'r1'");

        let err = CoreError::Validation {
            field: "attribute_id".to_string(),
            reason: "cannot be empty".to_string(),
        };
        assert_eq!(format!("{}", err), "Validation failed for attribute_id: cannot be empty");
    }

    #[test]
    fn test_initialization_error() {
        let err = CoreError::initialization("Policy 'p1'", "no attribute rules");
        let s = format!("{}", err);
        assert!(s.contains("Policy 'p1'"));
        assert!(s.contains("no attribute rules"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::contract("x");
        let err2 = CoreError::contract("x");
        assert_eq!(err1, err2);

        let err3 = CoreError::contract("y");
        assert_ne!(err1, err3);
    }
}
