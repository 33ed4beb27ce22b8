//! The attribute filter engine.
//!
//! The engine owns an initialized policy graph and is shared read-only
//! across requests. Each call to [`AttributeFilterEngine::filter_attributes`]
//! runs one pass over a request's own [`FilterContext`]:
//!
//! 1. every policy is applied in order, accumulating permitted and denied
//!    values in a fresh [`WorkContext`];
//! 2. each pre-filtered attribute keeps its permitted values minus its
//!    denied values, in original order;
//! 3. attributes left with no values, or never permitted anything, are
//!    dropped.

use crate::context::{FilterContext, WorkContext};
use crate::error::FilterResult;
use crate::policy::AttributeFilterPolicy;
use idpfilter_core::{ComponentId, CoreResult, Lifecycle};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

const LABEL: &str = "Attribute Filter Engine";

/// Summary of one filtering pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Attributes released with at least one value
    pub released: Vec<String>,
    /// Attributes removed entirely
    pub dropped: Vec<String>,
    /// Attributes whose matching failed
    pub failed: Vec<String>,
}

/// Applies filter policies to requests
#[derive(Debug, Clone)]
pub struct AttributeFilterEngine {
    lifecycle: Lifecycle,
    policies: Vec<AttributeFilterPolicy>,
}

impl AttributeFilterEngine {
    /// Create an engine
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank
    pub fn new(id: impl AsRef<str>, policies: impl IntoIterator<Item = AttributeFilterPolicy>) -> CoreResult<Self> {
        let mut lifecycle = Lifecycle::new(LABEL);
        lifecycle.set_id(ComponentId::new(id)?)?;
        Ok(Self {
            lifecycle,
            policies: policies.into_iter().collect(),
        })
    }

    /// Identifier
    #[must_use]
    pub fn id(&self) -> Option<&ComponentId> {
        self.lifecycle.id()
    }

    /// Policies in evaluation order
    #[must_use]
    pub fn policies(&self) -> &[AttributeFilterPolicy] {
        &self.policies
    }

    /// Lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Initialize every policy
    ///
    /// # Errors
    ///
    /// Returns error if any policy fails to initialize
    pub fn initialize(&mut self) -> CoreResult<()> {
        if !self.lifecycle.needs_initialize()? {
            return Ok(());
        }
        for policy in &mut self.policies {
            policy.initialize()?;
        }
        self.lifecycle.mark_initialized();
        tracing::debug!("{} initialized with {} policies", self.lifecycle.log_prefix(), self.policies.len());
        Ok(())
    }

    /// Destroy the engine and its policies
    pub fn destroy(&mut self) {
        self.policies.iter_mut().for_each(AttributeFilterPolicy::destroy);
        self.lifecycle.destroy();
    }

    /// Filter the context's pre-filtered attributes into its filtered
    /// attributes.
    ///
    /// The filtered slot is cleared first; on error it stays empty.
    ///
    /// # Errors
    ///
    /// Returns `PolicyRuleFailed` when any policy requirement rule yields
    /// FAIL, or a component error on lifecycle or contract violations
    pub fn filter_attributes(&self, ctx: &mut FilterContext) -> FilterResult<FilterOutcome> {
        self.lifecycle.ensure_usable()?;
        let prefix = self.lifecycle.log_prefix();
        ctx.finish(IndexMap::new(), IndexSet::new());

        let mut work = WorkContext::new();
        for policy in &self.policies {
            policy.apply(ctx, &mut work)?;
        }

        let mut filtered = IndexMap::new();
        let mut outcome = FilterOutcome::default();
        for (id, attribute) in ctx.prefiltered_attributes() {
            let Some(permitted) = work.permitted().get(id) else {
                tracing::debug!("{} no values permitted for attribute {}, dropping it", prefix, id);
                outcome.dropped.push(id.clone());
                continue;
            };
            let denied = work.denied().get(id);
            let kept = attribute.retain_values(|v| permitted.contains(v) && !denied.is_some_and(|d| d.contains(v)));

            if kept.values().is_empty() {
                tracing::debug!("{} all values of attribute {} removed, dropping it", prefix, id);
                outcome.dropped.push(id.clone());
            } else {
                tracing::debug!(
                    "{} releasing {} of {} value(s) of attribute {}",
                    prefix,
                    kept.values().len(),
                    attribute.values().len(),
                    id
                );
                outcome.released.push(id.clone());
                filtered.insert(id.clone(), kept);
            }
        }

        let failed = work.into_failed();
        outcome.failed = failed.iter().cloned().collect();
        ctx.finish(filtered, failed);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_rule::AttributeRule;
    use crate::error::FilterError;
    use crate::matcher::Matcher;
    use crate::rule::PolicyRequirementRule;
    use idpfilter_core::{AttributeValue, CoreError, IdpAttribute};
    use proptest::prelude::*;

    fn engine(policies: Vec<AttributeFilterPolicy>) -> AttributeFilterEngine {
        let mut e = AttributeFilterEngine::new("engine", policies).unwrap();
        e.initialize().unwrap();
        e
    }

    fn policy(id: &str, requirement: PolicyRequirementRule, rules: Vec<AttributeRule>) -> AttributeFilterPolicy {
        AttributeFilterPolicy::new(id, requirement, rules.into_iter().map(Some)).unwrap()
    }

    fn strings(attr: &IdpAttribute) -> Vec<String> {
        attr.values().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AttributeFilterEngine>();
    }

    #[test]
    fn test_permit_minus_deny() {
        let e = engine(vec![policy(
            "p",
            PolicyRequirementRule::MATCHES_ALL,
            vec![
                AttributeRule::permit("affiliation", Matcher::MATCHES_ALL).unwrap(),
                AttributeRule::deny("affiliation", Matcher::value_string("illegalValue", false)).unwrap(),
            ],
        )]);
        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("affiliation")
            .unwrap()
            .with_strings(["employee", "illegalValue", "staff"])]);
        let outcome = e.filter_attributes(&mut ctx).unwrap();
        assert_eq!(strings(&ctx.filtered_attributes()["affiliation"]), vec!["employee", "staff"]);
        assert_eq!(outcome.released, vec!["affiliation"]);
    }

    #[test]
    fn test_default_deny() {
        let e = engine(vec![]);
        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("uid").unwrap().with_strings(["a"])]);
        let outcome = e.filter_attributes(&mut ctx).unwrap();
        assert!(ctx.filtered_attributes().is_empty());
        assert_eq!(outcome.dropped, vec!["uid"]);
    }

    #[test]
    fn test_all_denied_attribute_absent() {
        let e = engine(vec![policy(
            "p",
            PolicyRequirementRule::MATCHES_ALL,
            vec![
                AttributeRule::permit("uid", Matcher::MATCHES_ALL).unwrap(),
                AttributeRule::deny("uid", Matcher::MATCHES_ALL).unwrap(),
            ],
        )]);
        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("uid").unwrap().with_strings(["a"])]);
        e.filter_attributes(&mut ctx).unwrap();
        assert!(!ctx.filtered_attributes().contains_key("uid"));
    }

    #[test]
    fn test_policy_failure_aborts_and_leaves_output_empty() {
        let e = engine(vec![
            policy(
                "ok",
                PolicyRequirementRule::MATCHES_ALL,
                vec![AttributeRule::permit("uid", Matcher::MATCHES_ALL).unwrap()],
            ),
            policy("broken", PolicyRequirementRule::FAIL, vec![]),
        ]);
        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("uid").unwrap().with_strings(["a"])]);
        let err = e.filter_attributes(&mut ctx).unwrap_err();
        assert!(matches!(err, FilterError::PolicyRuleFailed { .. }));
        assert!(ctx.filtered_attributes().is_empty());
    }

    #[test]
    fn test_matcher_failure_reported() {
        let e = engine(vec![policy(
            "p",
            PolicyRequirementRule::MATCHES_ALL,
            vec![
                AttributeRule::permit("uid", Matcher::MATCHES_ALL).unwrap(),
                AttributeRule::permit("mail", Matcher::FAIL).unwrap(),
                AttributeRule::permit("mail", Matcher::MATCHES_ALL).unwrap(),
            ],
        )]);
        let mut ctx = FilterContext::new().with_attributes([
            IdpAttribute::new("uid").unwrap().with_strings(["a"]),
            IdpAttribute::new("mail").unwrap().with_strings(["a@example.org"]),
        ]);
        let outcome = e.filter_attributes(&mut ctx).unwrap();
        assert_eq!(outcome.failed, vec!["mail"]);
        assert!(!ctx.filtered_attributes().contains_key("mail"));
        assert!(ctx.filtered_attributes().contains_key("uid"));
        assert!(ctx.failed_attributes().contains("mail"));
    }

    #[test]
    fn test_uninitialized_engine() {
        let e = AttributeFilterEngine::new("engine", vec![]).unwrap();
        let mut ctx = FilterContext::new();
        assert!(matches!(
            e.filter_attributes(&mut ctx),
            Err(FilterError::Component(CoreError::Uninitialized { .. }))
        ));
    }

    #[test]
    fn test_destroyed_engine() {
        let mut e = engine(vec![]);
        e.destroy();
        let mut ctx = FilterContext::new();
        assert!(matches!(
            e.filter_attributes(&mut ctx),
            Err(FilterError::Component(CoreError::Destroyed { .. }))
        ));
        assert!(e.initialize().is_err());
    }

    #[test]
    fn test_rerun_starts_fresh() {
        let e = engine(vec![policy(
            "p",
            PolicyRequirementRule::MATCHES_ALL,
            vec![AttributeRule::permit("uid", Matcher::MATCHES_ALL).unwrap()],
        )]);
        let mut ctx = FilterContext::new().with_attributes([IdpAttribute::new("uid").unwrap().with_strings(["a"])]);
        e.filter_attributes(&mut ctx).unwrap();
        ctx.set_prefiltered_attributes([IdpAttribute::new("mail").unwrap().with_strings(["m"])]);
        e.filter_attributes(&mut ctx).unwrap();
        assert!(ctx.filtered_attributes().is_empty());
    }

    #[derive(Debug, Clone)]
    struct Scenario {
        values: Vec<String>,
        permit: Vec<String>,
        deny: Vec<String>,
    }

    fn scenario() -> impl Strategy<Value = Scenario> {
        let value = "[a-e]";
        (
            proptest::collection::vec(value, 0..6),
            proptest::collection::vec(value, 0..4),
            proptest::collection::vec(value, 0..4),
        )
            .prop_map(|(values, permit, deny)| Scenario { values, permit, deny })
    }

    fn one_of(values: &[String]) -> Matcher {
        Matcher::or(values.iter().map(|v| Some(Matcher::value_string(v.clone(), false))))
    }

    fn rules(s: &Scenario) -> Vec<AttributeRule> {
        vec![
            AttributeRule::permit("attr", one_of(&s.permit)).unwrap(),
            AttributeRule::deny("attr", one_of(&s.deny)).unwrap(),
        ]
    }

    fn run(e: &AttributeFilterEngine, s: &Scenario) -> IndexMap<String, IdpAttribute> {
        let mut ctx = FilterContext::new().with_attributes([
            IdpAttribute::new("attr").unwrap().with_strings(s.values.clone()),
            IdpAttribute::new("untouched").unwrap().with_strings(s.values.clone()),
        ]);
        e.filter_attributes(&mut ctx).unwrap();
        ctx.filtered_attributes().clone()
    }

    proptest! {
        #[test]
        fn prop_deterministic(s in scenario()) {
            let e = engine(vec![policy("p", PolicyRequirementRule::MATCHES_ALL, rules(&s))]);
            prop_assert_eq!(run(&e, &s), run(&e, &s));
        }

        #[test]
        fn prop_deny_overrides_permit_and_default_deny(s in scenario()) {
            let e = engine(vec![policy("p", PolicyRequirementRule::MATCHES_ALL, rules(&s))]);
            let out = run(&e, &s);
            prop_assert!(!out.contains_key("untouched"));
            for attr in out.values() {
                prop_assert!(!attr.values().is_empty());
                for v in attr.values() {
                    let text = v.to_string();
                    prop_assert!(s.permit.contains(&text));
                    prop_assert!(!s.deny.contains(&text));
                }
            }
        }

        #[test]
        fn prop_rule_order_independent(s in scenario()) {
            let forward = engine(vec![policy("p", PolicyRequirementRule::MATCHES_ALL, rules(&s))]);
            let mut deny_first = rules(&s);
            deny_first.reverse();
            let permit_rules = deny_first.split_off(1);
            let reversed = engine(vec![
                policy("deny", PolicyRequirementRule::MATCHES_ALL, deny_first),
                policy("permit", PolicyRequirementRule::MATCHES_ALL, permit_rules),
            ]);
            prop_assert_eq!(run(&forward, &s), run(&reversed, &s));
        }

        #[test]
        fn prop_output_subset_in_order(s in scenario()) {
            let e = engine(vec![policy("p", PolicyRequirementRule::MATCHES_ALL, rules(&s))]);
            if let Some(attr) = run(&e, &s).get("attr") {
                let expected: Vec<AttributeValue> = s
                    .values
                    .iter()
                    .filter(|v| s.permit.contains(v) && !s.deny.contains(v))
                    .map(|v| AttributeValue::string(v.clone()))
                    .collect();
                prop_assert_eq!(attr.values(), expected.as_slice());
            }
        }
    }
}
