//! Read-only view of SAML metadata for a peer entity.
//!
//! Metadata is resolved upstream; the filter only reads the parts that
//! policy rules and matchers consult.

use idpfilter_core::AttributeValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// SAML 2 name format meaning "no particular format"
pub const UNSPECIFIED_NAME_FORMAT: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:unspecified";

/// `mdrpi:RegistrationInfo` extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationInfo {
    /// Registration authority URI
    pub registration_authority: String,
}

/// An attribute from an `mdattr:EntityAttributes` extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAttribute {
    /// Attribute name
    pub name: String,
    /// Attribute name format
    #[serde(default)]
    pub name_format: Option<String>,
    /// Text values
    #[serde(default)]
    pub values: Vec<String>,
}

/// An enclosing `EntitiesDescriptor`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntitiesGroup {
    /// Group name
    #[serde(default)]
    pub name: Option<String>,
    /// Registration information on the group
    #[serde(default)]
    pub registration_info: Option<RegistrationInfo>,
}

/// An `EntityDescriptor`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity ID
    pub entity_id: String,
    /// Entity attributes from the first `EntityAttributes` extension
    #[serde(default)]
    pub entity_attributes: Vec<EntityAttribute>,
    /// Registration information on the entity itself
    #[serde(default)]
    pub registration_info: Option<RegistrationInfo>,
    /// Enclosing groups, innermost first
    #[serde(default)]
    pub groups: Vec<EntitiesGroup>,
}

impl EntityDescriptor {
    /// Create a descriptor with no extensions
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_attributes: Vec::new(),
            registration_info: None,
            groups: Vec::new(),
        }
    }

    /// Add an entity attribute
    #[must_use]
    pub fn with_entity_attribute(mut self, attribute: EntityAttribute) -> Self {
        self.entity_attributes.push(attribute);
        self
    }

    /// Set the entity's own registration authority
    #[must_use]
    pub fn with_registration_authority(mut self, authority: impl Into<String>) -> Self {
        self.registration_info = Some(RegistrationInfo {
            registration_authority: authority.into(),
        });
        self
    }

    /// Add an enclosing group (call innermost first)
    #[must_use]
    pub fn with_group(mut self, group: EntitiesGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Registration info on the entity, else on the nearest group carrying one
    #[must_use]
    pub fn effective_registration_info(&self) -> Option<&RegistrationInfo> {
        self.registration_info
            .as_ref()
            .or_else(|| self.groups.iter().find_map(|g| g.registration_info.as_ref()))
    }

    /// Whether any enclosing group has this name
    #[must_use]
    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name.as_deref() == Some(name))
    }
}

/// Kind of role descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// `SPSSODescriptor`
    SpSso,
    /// `IDPSSODescriptor`
    IdpSso,
    /// `AttributeAuthorityDescriptor`
    AttributeAuthority,
}

impl RoleKind {
    /// Whether this is an SSO role (and so lists NameID formats)
    #[must_use]
    pub fn is_sso(self) -> bool {
        matches!(self, Self::SpSso | Self::IdpSso)
    }
}

/// The role descriptor selected for this request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    /// Role kind
    pub kind: RoleKind,
    /// Supported NameID formats
    #[serde(default)]
    pub name_id_formats: Vec<String>,
}

/// A `md:RequestedAttribute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAttribute {
    /// Attribute name
    pub name: String,
    /// Attribute name format
    #[serde(default)]
    pub name_format: Option<String>,
    /// Friendly name
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// `isRequired`
    #[serde(default)]
    pub is_required: bool,
    /// Text values, if the peer restricts acceptable values
    #[serde(default)]
    pub values: Vec<String>,
}

impl RequestedAttribute {
    /// Create an optional requested attribute with no values
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_format: None,
            friendly_name: None,
            is_required: false,
            values: Vec::new(),
        }
    }

    /// Set `isRequired`
    #[must_use]
    pub fn required(mut self, is_required: bool) -> Self {
        self.is_required = is_required;
        self
    }

    /// Set the name format
    #[must_use]
    pub fn with_name_format(mut self, format: impl Into<String>) -> Self {
        self.name_format = Some(format.into());
        self
    }

    /// Add an acceptable value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Whether this entry matches a name and optional name format.
    ///
    /// An absent or unspecified format on either side matches any format.
    #[must_use]
    pub fn matches_name(&self, name: &str, name_format: Option<&str>) -> bool {
        if self.name != name {
            return false;
        }
        match (name_format, self.name_format.as_deref()) {
            (None, _) | (_, None) => true,
            (_, Some(UNSPECIFIED_NAME_FORMAT)) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
        }
    }
}

/// A `md:AttributeConsumingService`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeConsumingService {
    /// Requested attributes
    #[serde(default)]
    pub requested_attributes: Vec<RequestedAttribute>,
}

impl AttributeConsumingService {
    /// First requested attribute matching name and format
    #[must_use]
    pub fn find(&self, name: &str, name_format: Option<&str>) -> Option<&RequestedAttribute> {
        self.requested_attributes
            .iter()
            .find(|r| r.matches_name(name, name_format))
    }
}

/// A requested attribute already decoded into the IdP's attribute namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedRequestedAttribute {
    /// `isRequired`
    #[serde(default)]
    pub is_required: bool,
    /// Decoded acceptable values; empty means any value
    #[serde(default)]
    pub values: Vec<AttributeValue>,
}

/// Metadata resolved for one peer in the current request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataContext {
    /// The peer's entity descriptor
    #[serde(default)]
    pub entity: Option<EntityDescriptor>,
    /// The role descriptor in use
    #[serde(default)]
    pub role: Option<RoleDescriptor>,
    /// The attribute consuming service selected for the request
    #[serde(default)]
    pub attribute_consuming_service: Option<AttributeConsumingService>,
    /// Requested attributes mapped to IdP attribute ids
    #[serde(default)]
    pub mapped_attributes: Option<IndexMap<String, Vec<MappedRequestedAttribute>>>,
}

impl MetadataContext {
    /// Create a context for an entity
    #[must_use]
    pub fn for_entity(entity: EntityDescriptor) -> Self {
        Self {
            entity: Some(entity),
            ..Self::default()
        }
    }

    /// Set the role descriptor
    #[must_use]
    pub fn with_role(mut self, role: RoleDescriptor) -> Self {
        self.role = Some(role);
        self
    }

    /// Set the attribute consuming service
    #[must_use]
    pub fn with_attribute_consuming_service(mut self, service: AttributeConsumingService) -> Self {
        self.attribute_consuming_service = Some(service);
        self
    }

    /// Set the mapped requested attributes
    #[must_use]
    pub fn with_mapped_attributes(
        mut self,
        mapped: IndexMap<String, Vec<MappedRequestedAttribute>>,
    ) -> Self {
        self.mapped_attributes = Some(mapped);
        self
    }
}
