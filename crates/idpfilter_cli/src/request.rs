//! Request file model.

use idpfilter_core::IdpAttribute;
use idpfilter_policy::{FilterContext, MetadataContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A filtering request as read from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFile {
    /// Attributes to filter
    #[serde(default)]
    pub attributes: Vec<IdpAttribute>,
    /// Principal name
    #[serde(default)]
    pub principal: Option<String>,
    /// Attribute issuer id
    #[serde(default)]
    pub issuer: Option<String>,
    /// Attribute requester id
    #[serde(default)]
    pub requester: Option<String>,
    /// Principal authentication method
    #[serde(default)]
    pub authentication_method: Option<String>,
    /// Requester metadata
    #[serde(default)]
    pub requester_metadata: Option<MetadataContext>,
    /// Issuer metadata
    #[serde(default)]
    pub issuer_metadata: Option<MetadataContext>,
    /// Profile context exposed to scripts
    #[serde(default)]
    pub profile_context: Option<Value>,
}

impl RequestFile {
    /// Build the filter context for this request
    #[must_use]
    pub fn into_context(self) -> FilterContext {
        let mut ctx = FilterContext::new().with_attributes(self.attributes);
        if let Some(principal) = self.principal {
            ctx = ctx.with_principal(principal);
        }
        if let Some(issuer) = self.issuer {
            ctx = ctx.with_issuer(issuer);
        }
        if let Some(requester) = self.requester {
            ctx = ctx.with_recipient(requester);
        }
        if let Some(method) = self.authentication_method {
            ctx = ctx.with_authentication_method(method);
        }
        if let Some(metadata) = self.requester_metadata {
            ctx = ctx.with_requester_metadata(metadata);
        }
        if let Some(metadata) = self.issuer_metadata {
            ctx = ctx.with_issuer_metadata(metadata);
        }
        if let Some(profile) = self.profile_context {
            ctx = ctx.with_profile_context(profile);
        }
        ctx
    }
}
