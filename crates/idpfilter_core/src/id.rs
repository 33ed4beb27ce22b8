//! Component identifiers.
//!
//! Every configured rule, matcher, policy and engine carries an identifier
//! used only for diagnostics. Identifiers are trimmed and never empty.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Identifier of a configured component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId(String);

impl ComponentId {
    /// Create an identifier, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns error if the trimmed identifier is empty
    pub fn new(id: impl AsRef<str>) -> CoreResult<Self> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidId {
                reason: "identifier cannot be empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ComponentId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.0
    }
}

impl AsRef<str> for ComponentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim a string, mapping blank input to `None`
#[must_use]
pub fn trim_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_trims() {
        let id = ComponentId::new("  releaseToAnyone ").unwrap();
        assert_eq!(id.as_str(), "releaseToAnyone");
        assert_eq!(format!("{}", id), "releaseToAnyone");
    }

    #[test]
    fn test_id_rejects_blank() {
        assert!(ComponentId::new("").is_err());
        assert!(ComponentId::new("   ").is_err());
    }

    #[test]
    fn test_id_serde() {
        let id: ComponentId = serde_json::from_str("\"policy1\"").unwrap();
        assert_eq!(id.as_str(), "policy1");
        assert!(serde_json::from_str::<ComponentId>("\" \"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"policy1\"");
    }

    #[test]
    fn test_trim_or_none() {
        assert_eq!(trim_or_none(" a "), Some("a".to_string()));
        assert_eq!(trim_or_none("  "), None);
    }
}
