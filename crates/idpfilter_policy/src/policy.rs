//! Attribute filter policies: a requirement rule gating a list of
//! attribute rules.

use crate::attribute_rule::AttributeRule;
use crate::context::{FilterContext, WorkContext};
use crate::error::{FilterError, FilterResult};
use crate::rule::PolicyRequirementRule;
use idpfilter_core::{ComponentId, CoreResult, Lifecycle, Tristate};

const LABEL: &str = "Attribute Filter Policy";

/// A requirement rule and the attribute rules it gates
#[derive(Debug, Clone)]
pub struct AttributeFilterPolicy {
    lifecycle: Lifecycle,
    requirement: PolicyRequirementRule,
    attribute_rules: Vec<AttributeRule>,
}

impl AttributeFilterPolicy {
    /// Create a policy. Absent attribute rules are dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank
    pub fn new(
        id: impl AsRef<str>,
        requirement: PolicyRequirementRule,
        attribute_rules: impl IntoIterator<Item = Option<AttributeRule>>,
    ) -> CoreResult<Self> {
        let mut lifecycle = Lifecycle::new(LABEL);
        lifecycle.set_id(ComponentId::new(id)?)?;
        Ok(Self {
            lifecycle,
            requirement,
            attribute_rules: attribute_rules.into_iter().flatten().collect(),
        })
    }

    /// Identifier
    #[must_use]
    pub fn id(&self) -> Option<&ComponentId> {
        self.lifecycle.id()
    }

    /// Requirement rule
    #[must_use]
    pub fn requirement(&self) -> &PolicyRequirementRule {
        &self.requirement
    }

    /// Attribute rules in declared order
    #[must_use]
    pub fn attribute_rules(&self) -> &[AttributeRule] {
        &self.attribute_rules
    }

    /// Lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Initialize the requirement rule and every attribute rule
    ///
    /// # Errors
    ///
    /// Returns error if any component fails to initialize
    pub fn initialize(&mut self) -> CoreResult<()> {
        if !self.lifecycle.needs_initialize()? {
            return Ok(());
        }
        self.requirement.initialize()?;
        for rule in &mut self.attribute_rules {
            rule.initialize()?;
        }
        self.lifecycle.mark_initialized();
        Ok(())
    }

    /// Destroy the policy and its components
    pub fn destroy(&mut self) {
        self.requirement.destroy();
        self.attribute_rules.iter_mut().for_each(AttributeRule::destroy);
        self.lifecycle.destroy();
    }

    /// Apply the policy to one request. Returns whether the policy applied.
    ///
    /// # Errors
    ///
    /// Returns `PolicyRuleFailed` when the requirement rule yields FAIL, or
    /// a component error on lifecycle or contract violations
    pub fn apply(&self, ctx: &FilterContext, work: &mut WorkContext) -> FilterResult<bool> {
        self.lifecycle.ensure_usable()?;
        let prefix = self.lifecycle.log_prefix();

        match self.requirement.matches(ctx)? {
            Tristate::False => {
                tracing::debug!("{} requirement not met, skipping policy", prefix);
                Ok(false)
            }
            Tristate::Fail => {
                tracing::warn!("{} requirement rule failed", prefix);
                Err(FilterError::PolicyRuleFailed {
                    policy: self.lifecycle.describe(),
                })
            }
            Tristate::True => {
                tracing::debug!("{} requirement met, applying {} rule(s)", prefix, self.attribute_rules.len());
                for rule in &self.attribute_rules {
                    let has_values = ctx
                        .prefiltered_attributes()
                        .get(rule.attribute_id())
                        .is_some_and(|a| !a.values().is_empty());
                    if !has_values {
                        tracing::debug!("{} no values for attribute {}, skipping", prefix, rule.attribute_id());
                        continue;
                    }
                    rule.apply(ctx, work)?;
                }
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use idpfilter_core::{CoreError, IdpAttribute};

    fn ctx() -> FilterContext {
        FilterContext::new().with_attributes([
            IdpAttribute::new("uid").unwrap().with_strings(["jsmith"]),
            IdpAttribute::new("empty").unwrap(),
        ])
    }

    fn policy(requirement: PolicyRequirementRule) -> AttributeFilterPolicy {
        let mut p = AttributeFilterPolicy::new(
            "p1",
            requirement,
            [
                Some(AttributeRule::permit("uid", Matcher::MATCHES_ALL).unwrap()),
                None,
                Some(AttributeRule::permit("empty", Matcher::MATCHES_ALL).unwrap()),
            ],
        )
        .unwrap();
        p.initialize().unwrap();
        p
    }

    #[test]
    fn test_null_rules_dropped() {
        assert_eq!(policy(PolicyRequirementRule::MATCHES_ALL).attribute_rules().len(), 2);
    }

    #[test]
    fn test_true_applies_rules() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        assert!(policy(PolicyRequirementRule::MATCHES_ALL).apply(&ctx, &mut work).unwrap());
        assert!(work.permitted().contains_key("uid"));
        assert!(!work.permitted().contains_key("empty"));
    }

    #[test]
    fn test_false_skips_rules() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        assert!(!policy(PolicyRequirementRule::MATCHES_NONE).apply(&ctx, &mut work).unwrap());
        assert!(work.permitted().is_empty());
    }

    #[test]
    fn test_fail_aborts() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let err = policy(PolicyRequirementRule::FAIL).apply(&ctx, &mut work).unwrap_err();
        assert_eq!(
            err,
            FilterError::PolicyRuleFailed {
                policy: "Attribute Filter Policy 'p1'".to_string()
            }
        );
    }

    #[test]
    fn test_blank_id() {
        assert!(AttributeFilterPolicy::new(" ", PolicyRequirementRule::MATCHES_ALL, []).is_err());
    }

    #[test]
    fn test_initialize_propagates_rule_errors() {
        let mut p = AttributeFilterPolicy::new("p2", PolicyRequirementRule::and([None]), []).unwrap();
        assert!(matches!(p.initialize(), Err(CoreError::Initialization { .. })));
    }
}
