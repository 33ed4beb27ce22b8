//! Per-request filter state.
//!
//! A [`FilterContext`] belongs to exactly one request. It carries the
//! attributes to filter, request metadata, and the filtered result. A
//! [`WorkContext`] accumulates permitted and denied values during a single
//! filtering pass.

use crate::metadata::MetadataContext;
use idpfilter_core::{AttributeValue, CoreError, CoreResult, IdpAttribute};
use indexmap::{IndexMap, IndexSet};
use once_cell::unsync::OnceCell;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;

/// Set of attribute values
pub type ValueSet = HashSet<AttributeValue>;

/// Strategy locating a peer's metadata for the current request
pub type MetadataLookup = Arc<dyn Fn(&FilterContext) -> Option<MetadataContext> + Send + Sync>;

/// Strategy locating the profile request context exposed to scripts
pub type ProfileContextLookup = Arc<dyn Fn(&FilterContext) -> Option<Value> + Send + Sync>;

/// Filter state for one request
pub struct FilterContext {
    prefiltered: IndexMap<String, IdpAttribute>,
    filtered: IndexMap<String, IdpAttribute>,
    failed: IndexSet<String>,
    principal: Option<String>,
    attribute_issuer_id: Option<String>,
    attribute_recipient_id: Option<String>,
    principal_authentication_method: Option<String>,
    profile_context: Option<Value>,
    requester_metadata_lookup: Option<MetadataLookup>,
    issuer_metadata_lookup: Option<MetadataLookup>,
    requester_metadata: OnceCell<Option<MetadataContext>>,
    issuer_metadata: OnceCell<Option<MetadataContext>>,
}

impl FilterContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefiltered: IndexMap::new(),
            filtered: IndexMap::new(),
            failed: IndexSet::new(),
            principal: None,
            attribute_issuer_id: None,
            attribute_recipient_id: None,
            principal_authentication_method: None,
            profile_context: None,
            requester_metadata_lookup: None,
            issuer_metadata_lookup: None,
            requester_metadata: OnceCell::new(),
            issuer_metadata: OnceCell::new(),
        }
    }

    /// Set the attributes to filter. A later attribute with a duplicate id
    /// replaces an earlier one.
    #[must_use]
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = IdpAttribute>) -> Self {
        self.set_prefiltered_attributes(attributes);
        self
    }

    /// Replace the attributes to filter
    pub fn set_prefiltered_attributes(&mut self, attributes: impl IntoIterator<Item = IdpAttribute>) {
        self.prefiltered = attributes
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
    }

    /// Set the principal name
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Set the attribute issuer (the IdP's entity id)
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.attribute_issuer_id = Some(issuer.into());
        self
    }

    /// Set the attribute recipient (the requester's entity id)
    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.attribute_recipient_id = Some(recipient.into());
        self
    }

    /// Set the principal's authentication method
    #[must_use]
    pub fn with_authentication_method(mut self, method: impl Into<String>) -> Self {
        self.principal_authentication_method = Some(method.into());
        self
    }

    /// Set the profile context value exposed to scripts
    #[must_use]
    pub fn with_profile_context(mut self, profile: Value) -> Self {
        self.profile_context = Some(profile);
        self
    }

    /// Set the requester metadata lookup strategy
    #[must_use]
    pub fn with_requester_metadata_lookup(mut self, lookup: MetadataLookup) -> Self {
        self.requester_metadata_lookup = Some(lookup);
        self.requester_metadata = OnceCell::new();
        self
    }

    /// Set the issuer metadata lookup strategy
    #[must_use]
    pub fn with_issuer_metadata_lookup(mut self, lookup: MetadataLookup) -> Self {
        self.issuer_metadata_lookup = Some(lookup);
        self.issuer_metadata = OnceCell::new();
        self
    }

    /// Use fixed requester metadata
    #[must_use]
    pub fn with_requester_metadata(self, metadata: MetadataContext) -> Self {
        self.with_requester_metadata_lookup(Arc::new(move |_: &FilterContext| Some(metadata.clone())))
    }

    /// Use fixed issuer metadata
    #[must_use]
    pub fn with_issuer_metadata(self, metadata: MetadataContext) -> Self {
        self.with_issuer_metadata_lookup(Arc::new(move |_: &FilterContext| Some(metadata.clone())))
    }

    /// Attributes to filter
    #[must_use]
    pub fn prefiltered_attributes(&self) -> &IndexMap<String, IdpAttribute> {
        &self.prefiltered
    }

    /// Filtering result
    #[must_use]
    pub fn filtered_attributes(&self) -> &IndexMap<String, IdpAttribute> {
        &self.filtered
    }

    /// Attributes whose value matching failed in the last pass
    #[must_use]
    pub fn failed_attributes(&self) -> &IndexSet<String> {
        &self.failed
    }

    pub(crate) fn finish(&mut self, filtered: IndexMap<String, IdpAttribute>, failed: IndexSet<String>) {
        self.filtered = filtered;
        self.failed = failed;
    }

    /// Principal name
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Attribute issuer id
    #[must_use]
    pub fn attribute_issuer_id(&self) -> Option<&str> {
        self.attribute_issuer_id.as_deref()
    }

    /// Attribute recipient id
    #[must_use]
    pub fn attribute_recipient_id(&self) -> Option<&str> {
        self.attribute_recipient_id.as_deref()
    }

    /// Principal authentication method
    #[must_use]
    pub fn principal_authentication_method(&self) -> Option<&str> {
        self.principal_authentication_method.as_deref()
    }

    /// Profile context value
    #[must_use]
    pub fn profile_context(&self) -> Option<&Value> {
        self.profile_context.as_ref()
    }

    /// Requester metadata, resolved on first use
    #[must_use]
    pub fn requester_metadata(&self) -> Option<&MetadataContext> {
        self.requester_metadata
            .get_or_init(|| self.requester_metadata_lookup.as_ref().and_then(|f| f(self)))
            .as_ref()
    }

    /// Issuer metadata, resolved on first use
    #[must_use]
    pub fn issuer_metadata(&self) -> Option<&MetadataContext> {
        self.issuer_metadata
            .get_or_init(|| self.issuer_metadata_lookup.as_ref().and_then(|f| f(self)))
            .as_ref()
    }

    /// JSON view exposed to scripts as `filterContext`
    #[must_use]
    pub fn script_view(&self) -> Value {
        let attributes: serde_json::Map<String, Value> = self
            .prefiltered
            .iter()
            .map(|(id, attr)| {
                let values = attr.values().iter().map(|v| Value::String(v.to_string())).collect();
                (id.clone(), Value::Array(values))
            })
            .collect();

        json!({
            "principal": self.principal,
            "attributeIssuerId": self.attribute_issuer_id,
            "attributeRecipientId": self.attribute_recipient_id,
            "principalAuthenticationMethod": self.principal_authentication_method,
            "prefilteredAttributes": attributes,
        })
    }
}

impl Default for FilterContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterContext")
            .field("prefiltered", &self.prefiltered.keys().collect::<Vec<_>>())
            .field("filtered", &self.filtered.keys().collect::<Vec<_>>())
            .field("principal", &self.principal)
            .field("attribute_issuer_id", &self.attribute_issuer_id)
            .field("attribute_recipient_id", &self.attribute_recipient_id)
            .finish_non_exhaustive()
    }
}

/// Permitted and denied values accumulated during one filtering pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkContext {
    permitted: IndexMap<String, ValueSet>,
    denied: IndexMap<String, ValueSet>,
    failed: IndexSet<String>,
}

impl WorkContext {
    /// Create an empty work context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record values permitted for an attribute
    ///
    /// # Errors
    ///
    /// Returns error if the attribute is not in the pre-filtered set or a
    /// value is not one of its current values
    pub fn add_permitted<'a>(
        &mut self,
        ctx: &FilterContext,
        attribute_id: &str,
        values: impl IntoIterator<Item = &'a AttributeValue>,
    ) -> CoreResult<()> {
        Self::accumulate(&mut self.permitted, ctx, attribute_id, values, "permitted")
    }

    /// Record values denied for an attribute
    ///
    /// # Errors
    ///
    /// Returns error if the attribute is not in the pre-filtered set or a
    /// value is not one of its current values
    pub fn add_denied<'a>(
        &mut self,
        ctx: &FilterContext,
        attribute_id: &str,
        values: impl IntoIterator<Item = &'a AttributeValue>,
    ) -> CoreResult<()> {
        Self::accumulate(&mut self.denied, ctx, attribute_id, values, "denied")
    }

    /// Record that value matching failed for an attribute
    pub fn mark_failed(&mut self, attribute_id: &str) {
        self.failed.insert(attribute_id.to_string());
    }

    /// Values permitted so far, by attribute id
    #[must_use]
    pub fn permitted(&self) -> &IndexMap<String, ValueSet> {
        &self.permitted
    }

    /// Values denied so far, by attribute id
    #[must_use]
    pub fn denied(&self) -> &IndexMap<String, ValueSet> {
        &self.denied
    }

    /// Attributes whose value matching failed
    #[must_use]
    pub fn failed(&self) -> &IndexSet<String> {
        &self.failed
    }

    pub(crate) fn into_failed(self) -> IndexSet<String> {
        self.failed
    }

    fn accumulate<'a>(
        target: &mut IndexMap<String, ValueSet>,
        ctx: &FilterContext,
        attribute_id: &str,
        values: impl IntoIterator<Item = &'a AttributeValue>,
        polarity: &str,
    ) -> CoreResult<()> {
        let id = attribute_id.trim();
        if id.is_empty() {
            return Err(CoreError::contract("attribute id cannot be empty"));
        }
        let attribute = ctx.prefiltered_attributes().get(id).ok_or_else(|| {
            CoreError::contract(format!(
                "no attribute with id {} exists in the pre-filtered attribute set",
                id
            ))
        })?;

        let values: Vec<&AttributeValue> = values.into_iter().collect();
        if values.is_empty() {
            return Ok(());
        }
        if values.iter().any(|v| !attribute.contains(v)) {
            return Err(CoreError::contract(format!(
                "{} value is not a current value of attribute {}",
                polarity, id
            )));
        }

        target
            .entry(id.to_string())
            .or_default()
            .extend(values.into_iter().cloned());
        Ok(())
    }
}
