//! Value matchers.
//!
//! A matcher selects which values of one attribute satisfy a condition.
//! `Ok(None)` is the failure result: the matcher could not decide, which
//! composites propagate and attribute rules treat as "deny everything".
//! `Err` is reserved for contract and lifecycle violations.

use crate::compare::{RegexCompare, StringCompare};
use crate::context::{FilterContext, ValueSet};
use crate::metadata::UNSPECIFIED_NAME_FORMAT;
use crate::rule::PolicyRequirementRule;
use crate::script::ScriptHook;
use idpfilter_core::{AttributeValue, ComponentId, CoreResult, IdpAttribute, Lifecycle, Tristate, trim_or_none};

const LABEL: &str = "Matcher";

/// Matching against the requester's requested attributes in SAML metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMatch {
    only_if_required: bool,
    match_if_metadata_silent: bool,
    attribute_name: Option<String>,
    attribute_name_format: Option<String>,
}

impl MetadataMatch {
    /// Required-only matching, nothing matched when metadata is silent
    #[must_use]
    pub fn new() -> Self {
        Self {
            only_if_required: true,
            match_if_metadata_silent: false,
            attribute_name: None,
            attribute_name_format: None,
        }
    }

    /// Only consider requested attributes flagged `isRequired`
    #[must_use]
    pub fn only_if_required(mut self, only_if_required: bool) -> Self {
        self.only_if_required = only_if_required;
        self
    }

    /// Match every value when the metadata requests nothing at all
    #[must_use]
    pub fn match_if_metadata_silent(mut self, silent: bool) -> Self {
        self.match_if_metadata_silent = silent;
        self
    }

    /// Look the attribute up by this SAML name instead of its encodings
    #[must_use]
    pub fn with_attribute_name(mut self, name: impl AsRef<str>) -> Self {
        self.attribute_name = trim_or_none(name.as_ref());
        self
    }

    /// Name format for the explicit name; the unspecified format counts as none
    #[must_use]
    pub fn with_attribute_name_format(mut self, format: impl AsRef<str>) -> Self {
        self.attribute_name_format =
            trim_or_none(format.as_ref()).filter(|f| f != UNSPECIFIED_NAME_FORMAT);
        self
    }

    fn matching_values(&self, prefix: &str, attribute: &IdpAttribute, ctx: &FilterContext) -> ValueSet {
        let service = ctx
            .requester_metadata()
            .and_then(|m| m.attribute_consuming_service.as_ref());
        let Some(service) = service else {
            tracing::debug!(
                "{} peer metadata has no requested attribute information, match_if_metadata_silent={}",
                prefix,
                self.match_if_metadata_silent
            );
            return if self.match_if_metadata_silent {
                all_values(attribute)
            } else {
                ValueSet::new()
            };
        };

        let requested = match &self.attribute_name {
            Some(name) => service.find(name, self.attribute_name_format.as_deref()),
            None => attribute
                .encodings()
                .iter()
                .find_map(|e| service.find(&e.name, e.name_format.as_deref())),
        };
        let shown = self.attribute_name.as_deref().unwrap_or(attribute.id());

        let Some(requested) = requested else {
            tracing::debug!("{} attribute {} not found in metadata", prefix, shown);
            return ValueSet::new();
        };
        if self.only_if_required && !requested.is_required {
            tracing::debug!("{} attribute {} found in metadata but not required", prefix, shown);
            return ValueSet::new();
        }
        if requested.values.is_empty() {
            return all_values(attribute);
        }

        select(attribute, |v| {
            v.comparable_str()
                .is_some_and(|s| requested.values.iter().any(|r| r == s))
        })
    }
}

impl Default for MetadataMatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Matching against requested attributes already mapped to IdP attribute ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedMetadataMatch {
    only_if_required: bool,
    match_if_metadata_silent: bool,
}

impl MappedMetadataMatch {
    /// Required-only matching, nothing matched when metadata is silent
    #[must_use]
    pub fn new() -> Self {
        Self {
            only_if_required: true,
            match_if_metadata_silent: false,
        }
    }

    /// Only consider requested attributes flagged `isRequired`
    #[must_use]
    pub fn only_if_required(mut self, only_if_required: bool) -> Self {
        self.only_if_required = only_if_required;
        self
    }

    /// Match every value when no mapped requested attributes exist
    #[must_use]
    pub fn match_if_metadata_silent(mut self, silent: bool) -> Self {
        self.match_if_metadata_silent = silent;
        self
    }

    fn matching_values(&self, prefix: &str, attribute: &IdpAttribute, ctx: &FilterContext) -> ValueSet {
        let mapped = ctx
            .requester_metadata()
            .and_then(|m| m.mapped_attributes.as_ref())
            .filter(|m| !m.is_empty());
        let Some(mapped) = mapped else {
            return if self.match_if_metadata_silent {
                all_values(attribute)
            } else {
                ValueSet::new()
            };
        };

        let Some(requested) = mapped.get(attribute.id()) else {
            tracing::debug!("{} attribute {} not found in metadata", prefix, attribute.id());
            return ValueSet::new();
        };

        let mut values = ValueSet::new();
        for entry in requested {
            if self.only_if_required && !entry.is_required {
                continue;
            }
            if entry.values.is_empty() {
                return all_values(attribute);
            }
            values.extend(select(attribute, |v| entry.values.contains(v)));
        }
        values
    }
}

impl Default for MappedMetadataMatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Matcher variants
#[derive(Debug, Clone)]
pub enum MatcherKind {
    /// Every value
    MatchesAll,
    /// No value
    MatchesNone,
    /// Always fails
    Fail,
    /// Value equals a literal
    ValueString(StringCompare),
    /// Value matches a regular expression
    ValueRegex(RegexCompare),
    /// Scope equals a literal
    ScopeString(StringCompare),
    /// Scope matches a regular expression
    ScopeRegex(RegexCompare),
    /// Value is requested in the requester's metadata
    InMetadata(MetadataMatch),
    /// Value is requested in the requester's mapped metadata
    MappedInMetadata(MappedMetadataMatch),
    /// All values when a policy rule holds
    FromPolicyRule(Box<PolicyRequirementRule>),
    /// Per-value script predicate
    Scripted(ScriptHook),
    /// Intersection of children
    And(Vec<Matcher>),
    /// Union of children
    Or(Vec<Matcher>),
    /// Values the child does not match
    Not(Box<Matcher>),
}

/// A value matcher with its lifecycle
#[derive(Debug, Clone)]
pub struct Matcher {
    lifecycle: Lifecycle,
    kind: MatcherKind,
}

impl Matcher {
    /// Matches every value
    pub const MATCHES_ALL: Self = Self {
        lifecycle: Lifecycle::initialized("Matches All"),
        kind: MatcherKind::MatchesAll,
    };

    /// Matches no value
    pub const MATCHES_NONE: Self = Self {
        lifecycle: Lifecycle::initialized("Matches None"),
        kind: MatcherKind::MatchesNone,
    };

    /// Always fails
    pub const FAIL: Self = Self {
        lifecycle: Lifecycle::initialized("Fail Matcher"),
        kind: MatcherKind::Fail,
    };

    /// Wrap a matcher kind in an uninitialized lifecycle
    #[must_use]
    pub fn new(kind: MatcherKind) -> Self {
        Self {
            lifecycle: Lifecycle::new(LABEL),
            kind,
        }
    }

    /// Value equals `value`
    #[must_use]
    pub fn value_string(value: impl Into<String>, ignore_case: bool) -> Self {
        Self::new(MatcherKind::ValueString(StringCompare::new(value).ignore_case(ignore_case)))
    }

    /// Value matches `pattern`
    ///
    /// # Errors
    ///
    /// Returns error if the pattern does not compile
    pub fn value_regex(pattern: impl Into<String>) -> CoreResult<Self> {
        Ok(Self::new(MatcherKind::ValueRegex(RegexCompare::new(pattern)?)))
    }

    /// Scope equals `scope`
    #[must_use]
    pub fn scope_string(scope: impl Into<String>, ignore_case: bool) -> Self {
        Self::new(MatcherKind::ScopeString(StringCompare::new(scope).ignore_case(ignore_case)))
    }

    /// Scope matches `pattern`
    ///
    /// # Errors
    ///
    /// Returns error if the pattern does not compile
    pub fn scope_regex(pattern: impl Into<String>) -> CoreResult<Self> {
        Ok(Self::new(MatcherKind::ScopeRegex(RegexCompare::new(pattern)?)))
    }

    /// Value is requested in metadata
    #[must_use]
    pub fn in_metadata(spec: MetadataMatch) -> Self {
        Self::new(MatcherKind::InMetadata(spec))
    }

    /// Value is requested in mapped metadata
    #[must_use]
    pub fn mapped_in_metadata(spec: MappedMetadataMatch) -> Self {
        Self::new(MatcherKind::MappedInMetadata(spec))
    }

    /// All values when `rule` is TRUE, none when FALSE
    #[must_use]
    pub fn from_policy_rule(rule: PolicyRequirementRule) -> Self {
        Self::new(MatcherKind::FromPolicyRule(Box::new(rule)))
    }

    /// Values for which the script returns true
    #[must_use]
    pub fn scripted(hook: ScriptHook) -> Self {
        Self::new(MatcherKind::Scripted(hook))
    }

    /// Intersection of the present children
    #[must_use]
    pub fn and(children: impl IntoIterator<Item = Option<Matcher>>) -> Self {
        Self::new(MatcherKind::And(children.into_iter().flatten().collect()))
    }

    /// Union of the present children
    #[must_use]
    pub fn or(children: impl IntoIterator<Item = Option<Matcher>>) -> Self {
        Self::new(MatcherKind::Or(children.into_iter().flatten().collect()))
    }

    /// Values `child` does not match
    #[must_use]
    pub fn not(child: Matcher) -> Self {
        Self::new(MatcherKind::Not(Box::new(child)))
    }

    /// Set the identifier
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank or the matcher is already initialized
    pub fn with_id(mut self, id: impl AsRef<str>) -> CoreResult<Self> {
        self.set_id(id)?;
        Ok(self)
    }

    /// Set the identifier
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank or the matcher is already initialized
    pub fn set_id(&mut self, id: impl AsRef<str>) -> CoreResult<()> {
        self.lifecycle.set_id(ComponentId::new(id)?)
    }

    /// Identifier, if set
    #[must_use]
    pub fn id(&self) -> Option<&ComponentId> {
        self.lifecycle.id()
    }

    /// Lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Variant
    #[must_use]
    pub fn kind(&self) -> &MatcherKind {
        &self.kind
    }

    /// Whether this is the matches-all sentinel
    #[must_use]
    pub fn is_matches_all(&self) -> bool {
        matches!(self.kind, MatcherKind::MatchesAll)
    }

    /// Whether this is the matches-none sentinel
    #[must_use]
    pub fn is_matches_none(&self) -> bool {
        matches!(self.kind, MatcherKind::MatchesNone)
    }

    /// Whether this is the failing sentinel
    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self.kind, MatcherKind::Fail)
    }

    /// Composite children, in order
    #[must_use]
    pub fn children(&self) -> &[Matcher] {
        match &self.kind {
            MatcherKind::And(c) | MatcherKind::Or(c) => c,
            MatcherKind::Not(c) => std::slice::from_ref(c),
            _ => &[],
        }
    }

    /// Initialize this matcher and everything beneath it. Repeat calls are
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns error if the matcher, or a child, has been destroyed
    pub fn initialize(&mut self) -> CoreResult<()> {
        if !self.lifecycle.needs_initialize()? {
            return Ok(());
        }
        match &mut self.kind {
            MatcherKind::And(children) | MatcherKind::Or(children) => {
                for child in children {
                    child.initialize()?;
                }
            }
            MatcherKind::Not(child) => child.initialize()?,
            MatcherKind::FromPolicyRule(rule) => rule.initialize()?,
            _ => {}
        }
        self.lifecycle.mark_initialized();
        Ok(())
    }

    /// Destroy this matcher and everything beneath it
    pub fn destroy(&mut self) {
        match &mut self.kind {
            MatcherKind::And(children) | MatcherKind::Or(children) => {
                children.iter_mut().for_each(Matcher::destroy);
            }
            MatcherKind::Not(child) => child.destroy(),
            MatcherKind::FromPolicyRule(rule) => rule.destroy(),
            _ => {}
        }
        self.lifecycle.destroy();
    }

    /// Values of `attribute` this matcher selects, or `None` if it cannot
    /// decide.
    ///
    /// # Errors
    ///
    /// Returns error if the matcher is not initialized or is destroyed
    pub fn get_matching_values(
        &self,
        attribute: &IdpAttribute,
        ctx: &FilterContext,
    ) -> CoreResult<Option<ValueSet>> {
        self.lifecycle.ensure_usable()?;
        let prefix = self.lifecycle.log_prefix();

        let result = match &self.kind {
            MatcherKind::MatchesAll => Some(all_values(attribute)),
            MatcherKind::MatchesNone => Some(ValueSet::new()),
            MatcherKind::Fail => None,
            MatcherKind::ValueString(c) => Some(select(attribute, |v| {
                v.comparable_str().is_some_and(|s| c.matches(s))
            })),
            MatcherKind::ValueRegex(c) => Some(select(attribute, |v| {
                v.comparable_str().is_some_and(|s| c.matches(s))
            })),
            MatcherKind::ScopeString(c) => Some(select(attribute, |v| v.scope().is_some_and(|s| c.matches(s)))),
            MatcherKind::ScopeRegex(c) => Some(select(attribute, |v| v.scope().is_some_and(|s| c.matches(s)))),
            MatcherKind::InMetadata(m) => Some(m.matching_values(prefix, attribute, ctx)),
            MatcherKind::MappedInMetadata(m) => Some(m.matching_values(prefix, attribute, ctx)),
            MatcherKind::FromPolicyRule(rule) => match rule.matches(ctx)? {
                Tristate::True => Some(all_values(attribute)),
                Tristate::False => Some(ValueSet::new()),
                Tristate::Fail => {
                    tracing::warn!("{} policy rule failed for attribute {}", prefix, attribute.id());
                    None
                }
            },
            MatcherKind::Scripted(hook) => scripted_values(prefix, hook, attribute, ctx),
            MatcherKind::And(children) => {
                let mut acc: Option<ValueSet> = None;
                let mut failed = false;
                for child in children {
                    match child.get_matching_values(attribute, ctx)? {
                        None => failed = true,
                        Some(values) => {
                            acc = Some(match acc {
                                None => values,
                                Some(prev) => prev.intersection(&values).cloned().collect(),
                            });
                        }
                    }
                }
                if failed { None } else { Some(acc.unwrap_or_default()) }
            }
            MatcherKind::Or(children) => {
                let mut acc = ValueSet::new();
                let mut succeeded = children.is_empty();
                for child in children {
                    if let Some(values) = child.get_matching_values(attribute, ctx)? {
                        acc.extend(values);
                        succeeded = true;
                    }
                }
                succeeded.then_some(acc)
            }
            MatcherKind::Not(child) => child.get_matching_values(attribute, ctx)?.map(|matched| {
                select(attribute, |v| !matched.contains(v))
            }),
        };

        if result.is_none() {
            tracing::debug!("{} matching failed for attribute {}", prefix, attribute.id());
        }
        Ok(result)
    }
}

fn all_values(attribute: &IdpAttribute) -> ValueSet {
    attribute.values().iter().cloned().collect()
}

fn select<F>(attribute: &IdpAttribute, mut keep: F) -> ValueSet
where
    F: FnMut(&AttributeValue) -> bool,
{
    attribute.values().iter().filter(|v| keep(v)).cloned().collect()
}

fn scripted_values(
    prefix: &str,
    hook: &ScriptHook,
    attribute: &IdpAttribute,
    ctx: &FilterContext,
) -> Option<ValueSet> {
    let mut values = ValueSet::new();
    for value in attribute.values() {
        match hook.evaluate_bool(ctx, Some(attribute), Some(value)) {
            Ok(true) => {
                values.insert(value.clone());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!("{} {} failed on attribute {}: {}", prefix, hook.describe(), attribute.id(), e);
                return None;
            }
        }
    }
    Some(values)
}
