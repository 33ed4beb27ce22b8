//! Identity attributes and their typed values.
//!
//! An attribute's value list is never mutated by filtering; the filter
//! builds a new attribute holding the surviving subset.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Kind of empty value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyKind {
    /// A value that was explicitly null
    NullValue,
    /// A zero-length string
    ZeroLengthValue,
}

/// A single typed attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Plain string
    String {
        /// The string
        value: String,
    },
    /// String qualified by a scope, e.g. `staff@example.edu`
    ScopedString {
        /// Unscoped part
        value: String,
        /// Scope
        scope: String,
    },
    /// Opaque bytes
    Bytes {
        /// The bytes
        value: Vec<u8>,
    },
    /// Serialized XML fragment
    Xml {
        /// The XML text
        value: String,
    },
    /// Empty value
    Empty {
        /// Why the value is empty
        kind: EmptyKind,
    },
}

impl AttributeValue {
    /// Create a plain string value
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
        }
    }

    /// Create a scoped string value
    #[must_use]
    pub fn scoped(value: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::ScopedString {
            value: value.into(),
            scope: scope.into(),
        }
    }

    /// Create a byte value
    #[must_use]
    pub fn bytes(value: Vec<u8>) -> Self {
        Self::Bytes { value }
    }

    /// Create an XML value
    #[must_use]
    pub fn xml(value: impl Into<String>) -> Self {
        Self::Xml {
            value: value.into(),
        }
    }

    /// The string that string and regex matchers compare against.
    ///
    /// Scoped strings compare on their unscoped part. Bytes, XML and
    /// empty values have no comparable string.
    #[must_use]
    pub fn comparable_str(&self) -> Option<&str> {
        match self {
            Self::String { value } | Self::ScopedString { value, .. } => Some(value),
            Self::Bytes { .. } | Self::Xml { .. } | Self::Empty { .. } => None,
        }
    }

    /// Scope, for scoped strings
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::ScopedString { scope, .. } => Some(scope),
            _ => None,
        }
    }

    /// Short type name, used in logs and script bindings
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::ScopedString { .. } => "scoped_string",
            Self::Bytes { .. } => "bytes",
            Self::Xml { .. } => "xml",
            Self::Empty { .. } => "empty",
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String { value } | Self::Xml { value } => f.write_str(value),
            Self::ScopedString { value, scope } => write!(f, "{}@{}", value, scope),
            Self::Bytes { value } => write!(f, "{}", hex::encode(value)),
            Self::Empty { kind } => write!(f, "<{:?}>", kind),
        }
    }
}

/// Wire protocol of an attribute encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingProtocol {
    /// SAML 1 (name + namespace)
    Saml1,
    /// SAML 2 (name + name format)
    Saml2,
}

/// How an attribute is named on the wire.
///
/// Used to locate the attribute among a relying party's requested
/// attributes when no explicit name is configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeEncoding {
    /// Protocol
    pub protocol: EncodingProtocol,
    /// Attribute name on the wire
    pub name: String,
    /// SAML 2 name format or SAML 1 namespace
    #[serde(default)]
    pub name_format: Option<String>,
}

impl AttributeEncoding {
    /// Create a SAML 2 encoding
    #[must_use]
    pub fn saml2(name: impl Into<String>, name_format: Option<String>) -> Self {
        Self {
            protocol: EncodingProtocol::Saml2,
            name: name.into(),
            name_format,
        }
    }

    /// Create a SAML 1 encoding
    #[must_use]
    pub fn saml1(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            protocol: EncodingProtocol::Saml1,
            name: name.into(),
            name_format: namespace,
        }
    }
}

/// A named, multi-valued identity attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdpAttribute")]
pub struct IdpAttribute {
    id: String,
    #[serde(default)]
    values: Vec<AttributeValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    encodings: Vec<AttributeEncoding>,
}

/// Wire form of [`IdpAttribute`], validated on conversion
#[derive(Deserialize)]
struct RawIdpAttribute {
    id: String,
    #[serde(default)]
    values: Vec<AttributeValue>,
    #[serde(default)]
    encodings: Vec<AttributeEncoding>,
}

impl TryFrom<RawIdpAttribute> for IdpAttribute {
    type Error = CoreError;

    fn try_from(raw: RawIdpAttribute) -> CoreResult<Self> {
        let mut attribute = Self::new(raw.id)?.with_values(raw.values);
        attribute.encodings = raw.encodings;
        Ok(attribute)
    }
}

impl IdpAttribute {
    /// Create an attribute with no values
    ///
    /// # Errors
    ///
    /// Returns error if the trimmed id is empty
    pub fn new(id: impl AsRef<str>) -> CoreResult<Self> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(CoreError::InvalidId {
                reason: "attribute id cannot be empty".to_string(),
            });
        }
        Ok(Self {
            id: id.to_string(),
            values: Vec::new(),
            encodings: Vec::new(),
        })
    }

    /// Set the values
    #[must_use]
    pub fn with_values(mut self, values: impl IntoIterator<Item = AttributeValue>) -> Self {
        self.values = values.into_iter().collect();
        self
    }

    /// Set string values
    #[must_use]
    pub fn with_strings<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_values(values.into_iter().map(AttributeValue::string))
    }

    /// Add an encoding
    #[must_use]
    pub fn with_encoding(mut self, encoding: AttributeEncoding) -> Self {
        self.encodings.push(encoding);
        self
    }

    /// Attribute id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Values in their original order
    #[must_use]
    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    /// Wire encodings
    #[must_use]
    pub fn encodings(&self) -> &[AttributeEncoding] {
        &self.encodings
    }

    /// Whether `value` is one of this attribute's values
    #[must_use]
    pub fn contains(&self, value: &AttributeValue) -> bool {
        self.values.contains(value)
    }

    /// Copy of this attribute keeping only values accepted by `keep`,
    /// in original order
    #[must_use]
    pub fn retain_values<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&AttributeValue) -> bool,
    {
        Self {
            id: self.id.clone(),
            values: self.values.iter().filter(|v| keep(v)).cloned().collect(),
            encodings: self.encodings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_new() {
        let attr = IdpAttribute::new(" mail ").unwrap();
        assert_eq!(attr.id(), "mail");
        assert!(attr.values().is_empty());
        assert!(IdpAttribute::new("  ").is_err());
    }

    #[test]
    fn test_retain_values_keeps_order() {
        let attr = IdpAttribute::new("affiliation")
            .unwrap()
            .with_strings(["employee", "staff", "illegalValue"]);
        let kept = attr.retain_values(|v| v.comparable_str() != Some("employee"));
        let names: Vec<_> = kept.values().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["staff", "illegalValue"]);
        assert_eq!(attr.values().len(), 3);
    }

    #[test]
    fn test_comparable_str() {
        assert_eq!(AttributeValue::string("a").comparable_str(), Some("a"));
        assert_eq!(AttributeValue::scoped("staff", "example.edu").comparable_str(), Some("staff"));
        assert_eq!(AttributeValue::bytes(vec![1, 2]).comparable_str(), None);
        assert_eq!(AttributeValue::scoped("staff", "example.edu").scope(), Some("example.edu"));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(AttributeValue::scoped("staff", "example.edu").to_string(), "staff@example.edu");
        assert_eq!(AttributeValue::bytes(vec![0xab, 0x01]).to_string(), "ab01");
    }

    #[test]
    fn test_value_serde() {
        let v: AttributeValue =
            serde_json::from_str(r#"{"type":"scoped_string","value":"staff","scope":"example.edu"}"#)
                .unwrap();
        assert_eq!(v, AttributeValue::scoped("staff", "example.edu"));

        let attr: IdpAttribute =
            serde_json::from_str(r#"{"id":"uid","values":[{"type":"string","value":"jsmith"}]}"#).unwrap();
        assert_eq!(attr.values(), &[AttributeValue::string("jsmith")]);
    }

    #[test]
    fn test_deserialize_validates_id() {
        let attr: IdpAttribute = serde_json::from_str(r#"{"id":" mail "}"#).unwrap();
        assert_eq!(attr.id(), "mail");

        let err = serde_json::from_str::<IdpAttribute>(r#"{"id":"","values":[]}"#).unwrap_err();
        assert!(err.to_string().contains("attribute id cannot be empty"));
        assert!(serde_json::from_str::<IdpAttribute>(r#"{"id":"   "}"#).is_err());
    }
}
