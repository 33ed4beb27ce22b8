//! Policy requirement rules.
//!
//! A rule decides whether a filter policy applies to the current request.
//! It answers with a [`Tristate`]; `Err` is reserved for contract and
//! lifecycle violations.

use crate::compare::ValueCompare;
use crate::context::FilterContext;
use crate::matcher::Matcher;
use crate::metadata::MetadataContext;
use crate::script::ScriptHook;
use idpfilter_core::{ComponentId, CoreError, CoreResult, Lifecycle, Tristate};
use serde::{Deserialize, Serialize};

const LABEL: &str = "Policy Rule";

/// Request string a context rule compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    /// Attribute issuer id
    Issuer,
    /// Attribute requester (recipient) id
    Requester,
    /// Principal name
    Principal,
    /// Principal authentication method
    AuthenticationMethod,
}

impl ContextField {
    fn read(self, ctx: &FilterContext) -> Option<&str> {
        match self {
            Self::Issuer => ctx.attribute_issuer_id(),
            Self::Requester => ctx.attribute_recipient_id(),
            Self::Principal => ctx.principal(),
            Self::AuthenticationMethod => ctx.principal_authentication_method(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Issuer => "attribute issuer",
            Self::Requester => "attribute requester",
            Self::Principal => "principal",
            Self::AuthenticationMethod => "authentication method",
        }
    }
}

/// Whose metadata a metadata rule reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataTarget {
    /// The relying party
    #[default]
    Requester,
    /// The issuing IdP
    Issuer,
}

impl MetadataTarget {
    fn read(self, ctx: &FilterContext) -> Option<&MetadataContext> {
        match self {
            Self::Requester => ctx.requester_metadata(),
            Self::Issuer => ctx.issuer_metadata(),
        }
    }
}

/// Rule variants
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Always TRUE
    MatchesAll,
    /// Always FALSE
    MatchesNone,
    /// Always FAIL
    Fail,
    /// Compare a request string
    Context {
        /// Which string
        field: ContextField,
        /// How to compare it
        compare: ValueCompare,
    },
    /// Requester's SSO role supports a NameID format
    NameIdFormat {
        /// Format URI
        format: String,
    },
    /// Entity belongs to a named group
    InEntityGroup {
        /// Group name
        group: String,
        /// Requester or issuer
        target: MetadataTarget,
    },
    /// Requester was registered by one of the listed authorities
    RegistrationAuthority {
        /// Accepted authority URIs
        issuers: Vec<String>,
        /// Result when no registration info exists
        match_if_metadata_silent: bool,
    },
    /// Entity carries an entity attribute with a matching value
    EntityAttribute {
        /// Attribute name
        name: String,
        /// Attribute name format, if it must match
        name_format: Option<String>,
        /// Requester or issuer
        target: MetadataTarget,
        /// Value comparison
        compare: ValueCompare,
    },
    /// Attribute value count lies within bounds
    NumOfAttributeValues {
        /// Attribute id
        attribute_id: String,
        /// Inclusive minimum
        minimum: usize,
        /// Inclusive maximum
        maximum: usize,
    },
    /// TRUE when a matcher selects any value
    FromMatcher {
        /// Matcher to run
        matcher: Box<Matcher>,
        /// Attribute to run it on; every attribute when absent
        attribute_id: Option<String>,
    },
    /// Boolean script
    Scripted(ScriptHook),
    /// All children TRUE
    And(Vec<PolicyRequirementRule>),
    /// Any child TRUE
    Or(Vec<PolicyRequirementRule>),
    /// Negation
    Not(Box<PolicyRequirementRule>),
}

/// A policy requirement rule with its lifecycle
#[derive(Debug, Clone)]
pub struct PolicyRequirementRule {
    lifecycle: Lifecycle,
    kind: RuleKind,
}

impl PolicyRequirementRule {
    /// Always TRUE
    pub const MATCHES_ALL: Self = Self {
        lifecycle: Lifecycle::initialized("Matches All"),
        kind: RuleKind::MatchesAll,
    };

    /// Always FALSE
    pub const MATCHES_NONE: Self = Self {
        lifecycle: Lifecycle::initialized("Matches None"),
        kind: RuleKind::MatchesNone,
    };

    /// Always FAIL
    pub const FAIL: Self = Self {
        lifecycle: Lifecycle::initialized("Fail Rule"),
        kind: RuleKind::Fail,
    };

    /// Wrap a rule kind in an uninitialized lifecycle
    #[must_use]
    pub fn new(kind: RuleKind) -> Self {
        Self {
            lifecycle: Lifecycle::new(LABEL),
            kind,
        }
    }

    /// Compare a request string
    #[must_use]
    pub fn context(field: ContextField, compare: impl Into<ValueCompare>) -> Self {
        Self::new(RuleKind::Context {
            field,
            compare: compare.into(),
        })
    }

    /// Requester supports a NameID format
    #[must_use]
    pub fn name_id_format(format: impl Into<String>) -> Self {
        Self::new(RuleKind::NameIdFormat { format: format.into() })
    }

    /// Entity belongs to `group`
    #[must_use]
    pub fn in_entity_group(group: impl Into<String>, target: MetadataTarget) -> Self {
        Self::new(RuleKind::InEntityGroup {
            group: group.into(),
            target,
        })
    }

    /// Requester registered by one of `issuers`
    #[must_use]
    pub fn registration_authority(
        issuers: impl IntoIterator<Item = impl Into<String>>,
        match_if_metadata_silent: bool,
    ) -> Self {
        Self::new(RuleKind::RegistrationAuthority {
            issuers: issuers.into_iter().map(Into::into).collect(),
            match_if_metadata_silent,
        })
    }

    /// Entity attribute `name` has a value satisfying `compare`
    #[must_use]
    pub fn entity_attribute(
        name: impl Into<String>,
        name_format: Option<String>,
        target: MetadataTarget,
        compare: impl Into<ValueCompare>,
    ) -> Self {
        Self::new(RuleKind::EntityAttribute {
            name: name.into(),
            name_format,
            target,
            compare: compare.into(),
        })
    }

    /// Attribute has between `minimum` and `maximum` values
    #[must_use]
    pub fn num_of_attribute_values(attribute_id: impl Into<String>, minimum: usize, maximum: usize) -> Self {
        Self::new(RuleKind::NumOfAttributeValues {
            attribute_id: attribute_id.into(),
            minimum,
            maximum,
        })
    }

    /// TRUE when `matcher` selects a value of `attribute_id`, or of any
    /// attribute
    #[must_use]
    pub fn from_matcher(matcher: Matcher, attribute_id: Option<String>) -> Self {
        Self::new(RuleKind::FromMatcher {
            matcher: Box::new(matcher),
            attribute_id,
        })
    }

    /// Boolean script
    #[must_use]
    pub fn scripted(hook: ScriptHook) -> Self {
        Self::new(RuleKind::Scripted(hook))
    }

    /// Conjunction of the present children
    #[must_use]
    pub fn and(children: impl IntoIterator<Item = Option<PolicyRequirementRule>>) -> Self {
        Self::new(RuleKind::And(children.into_iter().flatten().collect()))
    }

    /// Disjunction of the present children
    #[must_use]
    pub fn or(children: impl IntoIterator<Item = Option<PolicyRequirementRule>>) -> Self {
        Self::new(RuleKind::Or(children.into_iter().flatten().collect()))
    }

    /// Negation of `child`
    #[must_use]
    pub fn not(child: PolicyRequirementRule) -> Self {
        Self::new(RuleKind::Not(Box::new(child)))
    }

    /// Set the identifier
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank or the rule is already initialized
    pub fn with_id(mut self, id: impl AsRef<str>) -> CoreResult<Self> {
        self.set_id(id)?;
        Ok(self)
    }

    /// Set the identifier
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank or the rule is already initialized
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
    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Whether this is the always-TRUE sentinel
    #[must_use]
    pub fn is_matches_all(&self) -> bool {
        matches!(self.kind, RuleKind::MatchesAll)
    }

    /// Whether this is the always-FALSE sentinel
    #[must_use]
    pub fn is_matches_none(&self) -> bool {
        matches!(self.kind, RuleKind::MatchesNone)
    }

    /// Whether this is the always-FAIL sentinel
    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self.kind, RuleKind::Fail)
    }

    /// Composite children, in order
    #[must_use]
    pub fn children(&self) -> &[PolicyRequirementRule] {
        match &self.kind {
            RuleKind::And(c) | RuleKind::Or(c) => c,
            RuleKind::Not(c) => std::slice::from_ref(c),
            _ => &[],
        }
    }

    /// Initialize this rule and everything beneath it. Repeat calls are
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns error if the rule is destroyed, an AND/OR has no children,
    /// or the value-count bounds are inverted
    pub fn initialize(&mut self) -> CoreResult<()> {
        if !self.lifecycle.needs_initialize()? {
            return Ok(());
        }
        let describe = self.lifecycle.describe();
        match &mut self.kind {
            RuleKind::And(children) | RuleKind::Or(children) => {
                if children.is_empty() {
                    return Err(CoreError::initialization(describe, "composite rule has no children"));
                }
                for child in children {
                    child.initialize()?;
                }
            }
            RuleKind::Not(child) => child.initialize()?,
            RuleKind::FromMatcher { matcher, .. } => matcher.initialize()?,
            RuleKind::NumOfAttributeValues { minimum, maximum, .. } if *minimum > *maximum => {
                return Err(CoreError::initialization(
                    describe,
                    format!("minimum {} is greater than maximum {}", minimum, maximum),
                ));
            }
            _ => {}
        }
        self.lifecycle.mark_initialized();
        Ok(())
    }

    /// Destroy this rule and everything beneath it
    pub fn destroy(&mut self) {
        match &mut self.kind {
            RuleKind::And(children) | RuleKind::Or(children) => {
                children.iter_mut().for_each(PolicyRequirementRule::destroy);
            }
            RuleKind::Not(child) => child.destroy(),
            RuleKind::FromMatcher { matcher, .. } => matcher.destroy(),
            _ => {}
        }
        self.lifecycle.destroy();
    }

    /// Evaluate the rule against the request
    ///
    /// # Errors
    ///
    /// Returns error if the rule, or a component beneath it, is not
    /// initialized or is destroyed
    pub fn matches(&self, ctx: &FilterContext) -> CoreResult<Tristate> {
        self.lifecycle.ensure_usable()?;
        let prefix = self.lifecycle.log_prefix();

        let result = match &self.kind {
            RuleKind::MatchesAll => Tristate::True,
            RuleKind::MatchesNone => Tristate::False,
            RuleKind::Fail => Tristate::Fail,
            RuleKind::Context { field, compare } => match field.read(ctx) {
                Some(input) => {
                    let matched = compare.matches(input);
                    tracing::debug!("{} {} '{}' compared to {}: {}", prefix, field.name(), input, compare, matched);
                    matched.into()
                }
                None => {
                    tracing::warn!("{} no {} available for this request", prefix, field.name());
                    Tristate::Fail
                }
            },
            RuleKind::NameIdFormat { format } => {
                let formats = ctx
                    .requester_metadata()
                    .and_then(|m| m.role.as_ref())
                    .filter(|r| r.kind.is_sso())
                    .map(|r| r.name_id_formats.as_slice());
                match formats {
                    Some(formats) => formats.iter().any(|f| f == format).into(),
                    None => {
                        tracing::debug!("{} no SSO role descriptor for the requester", prefix);
                        Tristate::False
                    }
                }
            }
            RuleKind::InEntityGroup { group, target } => {
                match target.read(ctx).and_then(|m| m.entity.as_ref()) {
                    Some(entity) => entity.in_group(group).into(),
                    None => {
                        tracing::debug!("{} no metadata available for the entity", prefix);
                        Tristate::False
                    }
                }
            }
            RuleKind::RegistrationAuthority {
                issuers,
                match_if_metadata_silent,
            } => {
                let info = ctx
                    .requester_metadata()
                    .and_then(|m| m.entity.as_ref())
                    .and_then(|e| e.effective_registration_info());
                match info {
                    Some(info) => {
                        tracing::debug!(
                            "{} peer registration authority is {}",
                            prefix,
                            info.registration_authority
                        );
                        issuers.contains(&info.registration_authority).into()
                    }
                    None => {
                        tracing::debug!("{} peer metadata has no registration info", prefix);
                        (*match_if_metadata_silent).into()
                    }
                }
            }
            RuleKind::EntityAttribute {
                name,
                name_format,
                target,
                compare,
            } => match target.read(ctx).and_then(|m| m.entity.as_ref()) {
                Some(entity) => entity
                    .entity_attributes
                    .iter()
                    .filter(|a| &a.name == name)
                    .filter(|a| name_format.is_none() || a.name_format == *name_format)
                    .flat_map(|a| a.values.iter())
                    .any(|v| compare.matches(v))
                    .into(),
                None => {
                    tracing::info!("{} no metadata available for the entity", prefix);
                    Tristate::False
                }
            },
            RuleKind::NumOfAttributeValues {
                attribute_id,
                minimum,
                maximum,
            } => {
                let count = ctx
                    .prefiltered_attributes()
                    .get(attribute_id)
                    .map_or(0, |a| a.values().len());
                (*minimum <= count && count <= *maximum).into()
            }
            RuleKind::FromMatcher { matcher, attribute_id } => from_matcher(matcher, attribute_id.as_deref(), ctx)?,
            RuleKind::Scripted(hook) => match hook.evaluate_bool(ctx, None, None) {
                Ok(b) => b.into(),
                Err(e) => {
                    tracing::error!("{} {} failed: {}", prefix, hook.describe(), e);
                    Tristate::Fail
                }
            },
            RuleKind::And(children) => {
                let mut failed = false;
                for child in children {
                    match child.matches(ctx)? {
                        Tristate::False => return Ok(Tristate::False),
                        Tristate::Fail => failed = true,
                        Tristate::True => {}
                    }
                }
                if failed { Tristate::Fail } else { Tristate::True }
            }
            RuleKind::Or(children) => {
                let mut failed = false;
                for child in children {
                    match child.matches(ctx)? {
                        Tristate::True => return Ok(Tristate::True),
                        Tristate::Fail => failed = true,
                        Tristate::False => {}
                    }
                }
                if failed { Tristate::Fail } else { Tristate::False }
            }
            RuleKind::Not(child) => child.matches(ctx)?.negate(),
        };
        Ok(result)
    }
}

fn from_matcher(matcher: &Matcher, attribute_id: Option<&str>, ctx: &FilterContext) -> CoreResult<Tristate> {
    let attributes = ctx.prefiltered_attributes();
    let targets: Vec<_> = match attribute_id {
        Some(id) => attributes.get(id).into_iter().collect(),
        None => attributes.values().collect(),
    };
    for attribute in targets {
        match matcher.get_matching_values(attribute, ctx)? {
            None => return Ok(Tristate::Fail),
            Some(values) if !values.is_empty() => return Ok(Tristate::True),
            Some(_) => {}
        }
    }
    Ok(Tristate::False)
}
