//! JSON configuration for an attribute filter engine.
//!
//! ```json
//! {
//!   "id": "shibboleth.AttributeFilterEngine",
//!   "policies": [{
//!     "id": "releaseAffiliation",
//!     "requirement": { "type": "matches_all" },
//!     "rules": [{
//!       "attribute_id": "affiliation",
//!       "permit": { "type": "value_regex", "pattern": "employee|staff" }
//!     }]
//!   }]
//! }
//! ```
//!
//! [`EngineConfig::build`] assembles and initializes the engine, so every
//! structural problem is reported before the first request.

use crate::attribute_rule::AttributeRule;
use crate::compare::{RegexCompare, StringCompare, ValueCompare};
use crate::engine::AttributeFilterEngine;
use crate::error::{FilterError, FilterResult};
use crate::matcher::{MappedMetadataMatch, Matcher, MatcherKind, MetadataMatch};
use crate::policy::AttributeFilterPolicy;
use crate::rule::{ContextField, MetadataTarget, PolicyRequirementRule, RuleKind};
use crate::script::{ScriptError, ScriptEvaluator, ScriptHook};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Compiles script source into an evaluator
pub type ScriptCompiler<'a> = dyn Fn(&str) -> Result<Arc<dyn ScriptEvaluator>, ScriptError> + 'a;

fn default_engine_id() -> String {
    "AttributeFilterEngine".to_string()
}

fn default_true() -> bool {
    true
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine id
    #[serde(default = "default_engine_id")]
    pub id: String,
    /// Policies in evaluation order
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// One attribute filter policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy id
    pub id: String,
    /// Requirement rule
    pub requirement: RuleConfig,
    /// Attribute rules
    #[serde(default)]
    pub rules: Vec<AttributeRuleConfig>,
}

/// One attribute rule; exactly one of `permit` and `deny` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRuleConfig {
    /// Rule id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Target attribute id
    pub attribute_id: String,
    /// Matcher selecting values to permit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit: Option<MatcherConfig>,
    /// Matcher selecting values to deny
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<MatcherConfig>,
}

/// A matcher and its optional id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Matcher id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Matcher variant
    #[serde(flatten)]
    pub kind: MatcherKindConfig,
}

/// Matcher variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatcherKindConfig {
    /// Every value
    MatchesAll,
    /// No value
    MatchesNone,
    /// Always fails
    Fail,
    /// Value equals a literal
    ValueString {
        /// Literal
        value: String,
        /// Case-insensitive comparison
        #[serde(default)]
        ignore_case: bool,
    },
    /// Value matches a pattern
    ValueRegex {
        /// Pattern
        pattern: String,
    },
    /// Scope equals a literal
    ScopeString {
        /// Literal
        value: String,
        /// Case-insensitive comparison
        #[serde(default)]
        ignore_case: bool,
    },
    /// Scope matches a pattern
    ScopeRegex {
        /// Pattern
        pattern: String,
    },
    /// Value requested in requester metadata
    InMetadata {
        /// Only required attributes count
        #[serde(default = "default_true")]
        only_if_required: bool,
        /// Match everything when metadata requests nothing
        #[serde(default)]
        match_if_metadata_silent: bool,
        /// SAML attribute name
        #[serde(default)]
        attribute_name: Option<String>,
        /// SAML attribute name format
        #[serde(default)]
        attribute_name_format: Option<String>,
    },
    /// Value requested in mapped requester metadata
    MappedInMetadata {
        /// Only required attributes count
        #[serde(default = "default_true")]
        only_if_required: bool,
        /// Match everything when metadata requests nothing
        #[serde(default)]
        match_if_metadata_silent: bool,
    },
    /// All values when a policy rule is TRUE
    FromRule {
        /// Rule
        rule: Box<RuleConfig>,
    },
    /// Per-value script
    Script {
        /// Script source
        script: String,
        /// `custom` binding
        #[serde(default)]
        custom: Option<Value>,
    },
    /// Intersection
    And {
        /// Children
        matchers: Vec<MatcherConfig>,
    },
    /// Union
    Or {
        /// Children
        matchers: Vec<MatcherConfig>,
    },
    /// Complement
    Not {
        /// Child
        matcher: Box<MatcherConfig>,
    },
}

/// A policy requirement rule and its optional id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Rule variant
    #[serde(flatten)]
    pub kind: RuleKindConfig,
}

/// Policy requirement rule variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKindConfig {
    /// Always TRUE
    MatchesAll,
    /// Always FALSE
    MatchesNone,
    /// Always FAIL
    Fail,
    /// Request string equals a literal
    ContextString {
        /// Which request string
        field: ContextField,
        /// Literal
        value: String,
        /// Case-insensitive comparison
        #[serde(default)]
        ignore_case: bool,
    },
    /// Request string matches a pattern
    ContextRegex {
        /// Which request string
        field: ContextField,
        /// Pattern
        pattern: String,
    },
    /// Requester supports a NameID format
    NameIdFormat {
        /// Format URI
        format: String,
    },
    /// Entity belongs to a group
    InEntityGroup {
        /// Group name
        group: String,
        /// Requester or issuer
        #[serde(default)]
        target: MetadataTarget,
    },
    /// Requester registered by an accepted authority
    RegistrationAuthority {
        /// Accepted authorities
        issuers: Vec<String>,
        /// Result when no registration info exists
        #[serde(default)]
        match_if_metadata_silent: bool,
    },
    /// Entity attribute value equals a literal
    EntityAttributeString {
        /// Attribute name
        name: String,
        /// Attribute name format
        #[serde(default)]
        name_format: Option<String>,
        /// Literal
        value: String,
        /// Case-insensitive comparison
        #[serde(default)]
        ignore_case: bool,
        /// Requester or issuer
        #[serde(default)]
        target: MetadataTarget,
    },
    /// Entity attribute value matches a pattern
    EntityAttributeRegex {
        /// Attribute name
        name: String,
        /// Attribute name format
        #[serde(default)]
        name_format: Option<String>,
        /// Pattern
        pattern: String,
        /// Requester or issuer
        #[serde(default)]
        target: MetadataTarget,
    },
    /// Attribute value count within bounds
    NumOfAttributeValues {
        /// Attribute id
        attribute_id: String,
        /// Inclusive minimum
        #[serde(default)]
        minimum: usize,
        /// Inclusive maximum
        maximum: usize,
    },
    /// TRUE when a matcher selects anything
    FromMatcher {
        /// Matcher
        matcher: Box<MatcherConfig>,
        /// Target attribute; every attribute when absent
        #[serde(default)]
        attribute_id: Option<String>,
    },
    /// Boolean script
    Script {
        /// Script source
        script: String,
        /// `custom` binding
        #[serde(default)]
        custom: Option<Value>,
    },
    /// Conjunction
    And {
        /// Children
        rules: Vec<RuleConfig>,
    },
    /// Disjunction
    Or {
        /// Children
        rules: Vec<RuleConfig>,
    },
    /// Negation
    Not {
        /// Child
        rule: Box<RuleConfig>,
    },
}

fn invalid(what: impl std::fmt::Display, err: impl std::fmt::Display) -> FilterError {
    FilterError::Config(format!("{}: {}", what, err))
}

/// Script compiler used by [`EngineConfig::build`]
///
/// # Errors
///
/// Returns error if the script does not compile, or always when no script
/// engine is compiled in
pub fn default_script_compiler(source: &str) -> Result<Arc<dyn ScriptEvaluator>, ScriptError> {
    #[cfg(feature = "cel")]
    {
        Ok(Arc::new(crate::script::CelScript::compile(source)?))
    }
    #[cfg(not(feature = "cel"))]
    {
        let _ = source;
        Err(ScriptError::Compile("no script engine available".to_string()))
    }
}

impl EngineConfig {
    /// Parse a configuration document
    ///
    /// # Errors
    ///
    /// Returns `Config` if the document is not valid
    pub fn from_json_str(json: &str) -> FilterResult<Self> {
        serde_json::from_str(json).map_err(|e| invalid("policy document", e))
    }

    /// Read and parse a configuration file
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or is not valid
    pub fn from_path(path: impl AsRef<Path>) -> FilterResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| invalid(path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| invalid(path.display(), e))
    }

    /// Build and initialize the engine, compiling scripts with the default
    /// script engine
    ///
    /// # Errors
    ///
    /// Returns `Config` on any structural problem
    pub fn build(&self) -> FilterResult<AttributeFilterEngine> {
        self.build_with(&default_script_compiler)
    }

    /// Build and initialize the engine with a custom script compiler
    ///
    /// # Errors
    ///
    /// Returns `Config` on any structural problem
    pub fn build_with(&self, scripts: &ScriptCompiler<'_>) -> FilterResult<AttributeFilterEngine> {
        let builder = Builder { scripts };
        let policies = self
            .policies
            .iter()
            .map(|p| builder.policy(p))
            .collect::<FilterResult<Vec<_>>>()?;

        let mut engine = AttributeFilterEngine::new(&self.id, policies).map_err(|e| invalid("engine", e))?;
        engine.initialize().map_err(|e| invalid(format!("engine '{}'", self.id), e))?;
        tracing::debug!("built {} with {} policies", engine.lifecycle().describe(), engine.policies().len());
        Ok(engine)
    }
}

struct Builder<'s, 'a> {
    scripts: &'s ScriptCompiler<'a>,
}

impl Builder<'_, '_> {
    fn policy(&self, config: &PolicyConfig) -> FilterResult<AttributeFilterPolicy> {
        let what = format!("policy '{}'", config.id);
        let requirement = self.rule(&config.requirement).map_err(|e| nest(&what, e))?;
        let rules = config
            .rules
            .iter()
            .map(|r| self.attribute_rule(r).map(Some).map_err(|e| nest(&what, e)))
            .collect::<FilterResult<Vec<_>>>()?;
        AttributeFilterPolicy::new(&config.id, requirement, rules).map_err(|e| invalid(&what, e))
    }

    fn attribute_rule(&self, config: &AttributeRuleConfig) -> FilterResult<AttributeRule> {
        let what = format!("attribute rule for '{}'", config.attribute_id);
        let rule = match (&config.permit, &config.deny) {
            (Some(m), None) => AttributeRule::permit(&config.attribute_id, self.matcher(m)?),
            (None, Some(m)) => AttributeRule::deny(&config.attribute_id, self.matcher(m)?),
            _ => return Err(invalid(what, "exactly one of permit and deny is required")),
        }
        .map_err(|e| invalid(&what, e))?;
        match &config.id {
            Some(id) => rule.with_id(id).map_err(|e| invalid(&what, e)),
            None => Ok(rule),
        }
    }

    fn script(&self, source: &str, custom: &Option<Value>) -> FilterResult<ScriptHook> {
        let evaluator = (self.scripts)(source).map_err(|e| invalid("script", e))?;
        let hook = ScriptHook::new(evaluator);
        Ok(match custom {
            Some(custom) => hook.with_custom(custom.clone()),
            None => hook,
        })
    }

    fn matcher(&self, config: &MatcherConfig) -> FilterResult<Matcher> {
        let matcher = match &config.kind {
            MatcherKindConfig::MatchesAll => Matcher::new(MatcherKind::MatchesAll),
            MatcherKindConfig::MatchesNone => Matcher::new(MatcherKind::MatchesNone),
            MatcherKindConfig::Fail => Matcher::new(MatcherKind::Fail),
            MatcherKindConfig::ValueString { value, ignore_case } => Matcher::value_string(value, *ignore_case),
            MatcherKindConfig::ValueRegex { pattern } => {
                Matcher::value_regex(pattern).map_err(|e| invalid("value_regex", e))?
            }
            MatcherKindConfig::ScopeString { value, ignore_case } => Matcher::scope_string(value, *ignore_case),
            MatcherKindConfig::ScopeRegex { pattern } => {
                Matcher::scope_regex(pattern).map_err(|e| invalid("scope_regex", e))?
            }
            MatcherKindConfig::InMetadata {
                only_if_required,
                match_if_metadata_silent,
                attribute_name,
                attribute_name_format,
            } => {
                let mut spec = MetadataMatch::new()
                    .only_if_required(*only_if_required)
                    .match_if_metadata_silent(*match_if_metadata_silent);
                if let Some(name) = attribute_name {
                    spec = spec.with_attribute_name(name);
                }
                if let Some(format) = attribute_name_format {
                    spec = spec.with_attribute_name_format(format);
                }
                Matcher::in_metadata(spec)
            }
            MatcherKindConfig::MappedInMetadata {
                only_if_required,
                match_if_metadata_silent,
            } => Matcher::mapped_in_metadata(
                MappedMetadataMatch::new()
                    .only_if_required(*only_if_required)
                    .match_if_metadata_silent(*match_if_metadata_silent),
            ),
            MatcherKindConfig::FromRule { rule } => Matcher::from_policy_rule(self.rule(rule)?),
            MatcherKindConfig::Script { script, custom } => Matcher::scripted(self.script(script, custom)?),
            MatcherKindConfig::And { matchers } => Matcher::and(self.matchers(matchers)?),
            MatcherKindConfig::Or { matchers } => Matcher::or(self.matchers(matchers)?),
            MatcherKindConfig::Not { matcher } => Matcher::not(self.matcher(matcher)?),
        };
        match &config.id {
            Some(id) => matcher.with_id(id).map_err(|e| invalid("matcher", e)),
            None => Ok(matcher),
        }
    }

    fn matchers(&self, configs: &[MatcherConfig]) -> FilterResult<Vec<Option<Matcher>>> {
        configs.iter().map(|m| self.matcher(m).map(Some)).collect()
    }

    fn rule(&self, config: &RuleConfig) -> FilterResult<PolicyRequirementRule> {
        let rule = match &config.kind {
            RuleKindConfig::MatchesAll => PolicyRequirementRule::new(RuleKind::MatchesAll),
            RuleKindConfig::MatchesNone => PolicyRequirementRule::new(RuleKind::MatchesNone),
            RuleKindConfig::Fail => PolicyRequirementRule::new(RuleKind::Fail),
            RuleKindConfig::ContextString {
                field,
                value,
                ignore_case,
            } => PolicyRequirementRule::context(*field, StringCompare::new(value).ignore_case(*ignore_case)),
            RuleKindConfig::ContextRegex { field, pattern } => {
                PolicyRequirementRule::context(*field, regex(pattern)?)
            }
            RuleKindConfig::NameIdFormat { format } => PolicyRequirementRule::name_id_format(format),
            RuleKindConfig::InEntityGroup { group, target } => PolicyRequirementRule::in_entity_group(group, *target),
            RuleKindConfig::RegistrationAuthority {
                issuers,
                match_if_metadata_silent,
            } => PolicyRequirementRule::registration_authority(issuers.iter().cloned(), *match_if_metadata_silent),
            RuleKindConfig::EntityAttributeString {
                name,
                name_format,
                value,
                ignore_case,
                target,
            } => PolicyRequirementRule::entity_attribute(
                name,
                name_format.clone(),
                *target,
                StringCompare::new(value).ignore_case(*ignore_case),
            ),
            RuleKindConfig::EntityAttributeRegex {
                name,
                name_format,
                pattern,
                target,
            } => PolicyRequirementRule::entity_attribute(name, name_format.clone(), *target, regex(pattern)?),
            RuleKindConfig::NumOfAttributeValues {
                attribute_id,
                minimum,
                maximum,
            } => PolicyRequirementRule::num_of_attribute_values(attribute_id, *minimum, *maximum),
            RuleKindConfig::FromMatcher { matcher, attribute_id } => {
                PolicyRequirementRule::from_matcher(self.matcher(matcher)?, attribute_id.clone())
            }
            RuleKindConfig::Script { script, custom } => PolicyRequirementRule::scripted(self.script(script, custom)?),
            RuleKindConfig::And { rules } => PolicyRequirementRule::and(self.rules(rules)?),
            RuleKindConfig::Or { rules } => PolicyRequirementRule::or(self.rules(rules)?),
            RuleKindConfig::Not { rule } => PolicyRequirementRule::not(self.rule(rule)?),
        };
        match &config.id {
            Some(id) => rule.with_id(id).map_err(|e| invalid("rule", e)),
            None => Ok(rule),
        }
    }

    fn rules(&self, configs: &[RuleConfig]) -> FilterResult<Vec<Option<PolicyRequirementRule>>> {
        configs.iter().map(|r| self.rule(r).map(Some)).collect()
    }
}

fn regex(pattern: &str) -> FilterResult<ValueCompare> {
    RegexCompare::new(pattern)
        .map(ValueCompare::from)
        .map_err(|e| invalid("regex", e))
}

fn nest(what: &str, err: FilterError) -> FilterError {
    match err {
        FilterError::Config(msg) => FilterError::Config(format!("{}: {}", what, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FilterContext;
    use crate::script::NativeScript;
    use idpfilter_core::{ComponentId, IdpAttribute};

    const DOC: &str = r#"{
        "id": "engine",
        "policies": [{
            "id": "releaseAffiliation",
            "requirement": { "type": "context_string", "field": "requester", "value": "https://sp.example.org" },
            "rules": [
                { "attribute_id": "affiliation", "permit": { "type": "value_regex", "pattern": "employee|staff" } },
                { "attribute_id": "uid", "permit": { "type": "matches_all", "id": "everything" } }
            ]
        }]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let config = EngineConfig::from_json_str(DOC).unwrap();
        assert_eq!(config.policies[0].rules.len(), 2);
        assert_eq!(config.policies[0].rules[1].permit.as_ref().unwrap().id.as_deref(), Some("everything"));

        let engine = config.build().unwrap();
        assert!(engine.lifecycle().is_initialized());

        let mut ctx = FilterContext::new()
            .with_recipient("https://sp.example.org")
            .with_attributes([IdpAttribute::new("affiliation")
                .unwrap()
                .with_strings(["employee", "student"])]);
        engine.filter_attributes(&mut ctx).unwrap();
        assert_eq!(ctx.filtered_attributes()["affiliation"].values().len(), 1);
    }

    #[test]
    fn test_sentinels_accept_ids() {
        let doc = r#"{"policies":[{"id":"p","requirement":{"type":"matches_all","id":"anyone"},
            "rules":[{"attribute_id":"uid","deny":{"type":"fail","id":"broken"}}]}]}"#;
        let engine = EngineConfig::from_json_str(doc).unwrap().build().unwrap();
        let policy = &engine.policies()[0];
        assert!(policy.requirement().is_matches_all());
        assert_eq!(policy.requirement().id().map(ComponentId::as_str), Some("anyone"));
        assert!(policy.requirement().lifecycle().is_initialized());
        let matcher = policy.attribute_rules()[0].matcher();
        assert!(matcher.is_fail());
        assert_eq!(matcher.id().map(ComponentId::as_str), Some("broken"));

        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("uid").unwrap().with_strings(["a"])]);
        let outcome = engine.filter_attributes(&mut ctx).unwrap();
        assert_eq!(outcome.failed, vec!["uid".to_string()]);
        assert!(ctx.filtered_attributes().is_empty());
    }

    #[test]
    fn test_permit_and_deny_both_set() {
        let doc = r#"{"policies":[{"id":"p","requirement":{"type":"matches_all"},
            "rules":[{"attribute_id":"a","permit":{"type":"matches_all"},"deny":{"type":"matches_all"}}]}]}"#;
        let err = EngineConfig::from_json_str(doc).unwrap().build().unwrap_err();
        assert!(err.to_string().contains("exactly one of permit and deny"));
        assert!(err.is_config());
    }

    #[test]
    fn test_empty_composite_rule_rejected() {
        let doc = r#"{"policies":[{"id":"p","requirement":{"type":"or","rules":[]}}]}"#;
        let err = EngineConfig::from_json_str(doc).unwrap().build().unwrap_err();
        assert!(matches!(err, FilterError::Config(_)));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let doc = r#"{"policies":[{"id":"p","requirement":{"type":"context_regex","field":"issuer","pattern":"("}}]}"#;
        let err = EngineConfig::from_json_str(doc).unwrap().build().unwrap_err();
        assert!(err.to_string().contains("policy 'p'"));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let doc = r#"{"policies":[{"id":"p","requirement":
            {"type":"num_of_attribute_values","attribute_id":"mail","minimum":3,"maximum":1}}]}"#;
        assert!(EngineConfig::from_json_str(doc).unwrap().build().is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let doc = r#"{"policies":[{"id":"p","requirement":{"type":"sometimes"}}]}"#;
        assert!(EngineConfig::from_json_str(doc).is_err());
    }

    #[test]
    fn test_custom_script_compiler() {
        let doc = r#"{"policies":[{"id":"p",
            "requirement":{"type":"script","script":"always","custom":{"x":1}},
            "rules":[{"attribute_id":"uid","permit":{"type":"script","script":"always"}}]}]}"#;
        let compiler = |source: &str| -> Result<Arc<dyn ScriptEvaluator>, ScriptError> {
            match source {
                "always" => Ok(Arc::new(NativeScript::new("always", |_| Ok(Value::Bool(true))))),
                other => Err(ScriptError::Compile(format!("unknown script {}", other))),
            }
        };
        let engine = EngineConfig::from_json_str(doc).unwrap().build_with(&compiler).unwrap();
        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("uid").unwrap().with_strings(["a"])]);
        engine.filter_attributes(&mut ctx).unwrap();
        assert!(ctx.filtered_attributes().contains_key("uid"));

        let bad = r#"{"policies":[{"id":"p","requirement":{"type":"script","script":"missing"}}]}"#;
        assert!(EngineConfig::from_json_str(bad).unwrap().build_with(&compiler).is_err());
    }

    #[test]
    fn test_round_trip_keeps_shape() {
        let config = EngineConfig::from_json_str(DOC).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = EngineConfig::from_path("/nonexistent/policy.json").unwrap_err();
        assert!(err.is_config());
    }
}
