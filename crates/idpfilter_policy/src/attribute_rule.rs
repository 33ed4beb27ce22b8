//! Attribute rules: a matcher bound to one attribute id, permitting or
//! denying the values it selects.

use crate::context::{FilterContext, WorkContext};
use crate::matcher::Matcher;
use idpfilter_core::{ComponentId, CoreError, CoreResult, Lifecycle};

const LABEL: &str = "Attribute Rule";

/// Permit or deny values of one attribute
#[derive(Debug, Clone)]
pub struct AttributeRule {
    lifecycle: Lifecycle,
    attribute_id: String,
    matcher: Matcher,
    is_deny_rule: bool,
}

impl AttributeRule {
    /// Permit the values `matcher` selects
    ///
    /// # Errors
    ///
    /// Returns error if the attribute id is blank
    pub fn permit(attribute_id: impl AsRef<str>, matcher: Matcher) -> CoreResult<Self> {
        Self::new(attribute_id, matcher, false)
    }

    /// Deny the values `matcher` selects
    ///
    /// # Errors
    ///
    /// Returns error if the attribute id is blank
    pub fn deny(attribute_id: impl AsRef<str>, matcher: Matcher) -> CoreResult<Self> {
        Self::new(attribute_id, matcher, true)
    }

    fn new(attribute_id: impl AsRef<str>, matcher: Matcher, is_deny_rule: bool) -> CoreResult<Self> {
        let attribute_id = attribute_id.as_ref().trim();
        if attribute_id.is_empty() {
            return Err(CoreError::Validation {
                field: "attribute_id".to_string(),
                reason: "attribute id cannot be empty".to_string(),
            });
        }
        Ok(Self {
            lifecycle: Lifecycle::new(LABEL),
            attribute_id: attribute_id.to_string(),
            matcher,
            is_deny_rule,
        })
    }

    /// Set the identifier
    ///
    /// # Errors
    ///
    /// Returns error if the id is blank or the rule is already initialized
    pub fn with_id(mut self, id: impl AsRef<str>) -> CoreResult<Self> {
        self.lifecycle.set_id(ComponentId::new(id)?)?;
        Ok(self)
    }

    /// Identifier, if set
    #[must_use]
    pub fn id(&self) -> Option<&ComponentId> {
        self.lifecycle.id()
    }

    /// Target attribute id
    #[must_use]
    pub fn attribute_id(&self) -> &str {
        &self.attribute_id
    }

    /// The matcher
    #[must_use]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Whether matched values are denied rather than permitted
    #[must_use]
    pub fn is_deny_rule(&self) -> bool {
        self.is_deny_rule
    }

    /// Lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Initialize the rule and its matcher
    ///
    /// # Errors
    ///
    /// Returns error if the rule or its matcher is destroyed
    pub fn initialize(&mut self) -> CoreResult<()> {
        if !self.lifecycle.needs_initialize()? {
            return Ok(());
        }
        self.matcher.initialize()?;
        self.lifecycle.mark_initialized();
        Ok(())
    }

    /// Destroy the rule and its matcher
    pub fn destroy(&mut self) {
        self.matcher.destroy();
        self.lifecycle.destroy();
    }

    /// Record the matched values of the target attribute in `work`.
    ///
    /// Does nothing when the attribute is not present. When the matcher
    /// cannot decide, the attribute is marked failed and all of its values
    /// are denied.
    ///
    /// # Errors
    ///
    /// Returns error on lifecycle or work-context contract violations
    pub fn apply(&self, ctx: &FilterContext, work: &mut WorkContext) -> CoreResult<()> {
        self.lifecycle.ensure_usable()?;
        let prefix = self.lifecycle.log_prefix();

        let Some(attribute) = ctx.prefiltered_attributes().get(&self.attribute_id) else {
            tracing::debug!("{} attribute {} not present, nothing to do", prefix, self.attribute_id);
            return Ok(());
        };

        match self.matcher.get_matching_values(attribute, ctx)? {
            None => {
                tracing::warn!(
                    "{} matcher failed for attribute {}, denying all of its values",
                    prefix,
                    self.attribute_id
                );
                work.mark_failed(&self.attribute_id);
                work.add_denied(ctx, &self.attribute_id, attribute.values())
            }
            Some(values) if self.is_deny_rule => {
                tracing::debug!("{} denying {} value(s) of {}", prefix, values.len(), self.attribute_id);
                work.add_denied(ctx, &self.attribute_id, &values)
            }
            Some(values) => {
                tracing::debug!("{} permitting {} value(s) of {}", prefix, values.len(), self.attribute_id);
                work.add_permitted(ctx, &self.attribute_id, &values)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idpfilter_core::{AttributeValue, IdpAttribute};

    fn ctx() -> FilterContext {
        FilterContext::new().with_attributes([IdpAttribute::new("affiliation")
            .unwrap()
            .with_strings(["employee", "staff", "illegalValue"])])
    }

    fn init(mut rule: AttributeRule) -> AttributeRule {
        rule.initialize().unwrap();
        rule
    }

    #[test]
    fn test_blank_attribute_id() {
        assert!(AttributeRule::permit("  ", Matcher::MATCHES_ALL).is_err());
    }

    #[test]
    fn test_permit() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let rule = init(AttributeRule::permit("affiliation", Matcher::value_regex("employee|staff").unwrap()).unwrap());
        rule.apply(&ctx, &mut work).unwrap();
        assert_eq!(work.permitted()["affiliation"].len(), 2);
        assert!(work.denied().is_empty());
    }

    #[test]
    fn test_deny() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let rule = init(AttributeRule::deny("affiliation", Matcher::value_string("illegalValue", false)).unwrap());
        rule.apply(&ctx, &mut work).unwrap();
        assert!(work.denied()["affiliation"].contains(&AttributeValue::string("illegalValue")));
        assert!(work.permitted().is_empty());
    }

    #[test]
    fn test_absent_attribute_is_noop() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let rule = init(AttributeRule::permit("mail", Matcher::MATCHES_ALL).unwrap());
        rule.apply(&ctx, &mut work).unwrap();
        assert_eq!(work, WorkContext::new());
    }

    #[test]
    fn test_matcher_failure_denies_everything() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let rule = init(AttributeRule::permit("affiliation", Matcher::FAIL).unwrap());
        rule.apply(&ctx, &mut work).unwrap();
        assert_eq!(work.denied()["affiliation"].len(), 3);
        assert!(work.failed().contains("affiliation"));
    }

    #[test]
    fn test_uninitialized_rule() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let rule = AttributeRule::permit("affiliation", Matcher::MATCHES_ALL).unwrap();
        assert!(matches!(rule.apply(&ctx, &mut work), Err(CoreError::Uninitialized { .. })));
    }

    #[test]
    fn test_destroyed_rule() {
        let ctx = ctx();
        let mut work = WorkContext::new();
        let mut rule = AttributeRule::permit("affiliation", Matcher::value_string("staff", false)).unwrap();
        rule.initialize().unwrap();
        rule.destroy();
        assert!(matches!(rule.apply(&ctx, &mut work), Err(CoreError::Destroyed { .. })));
    }
}
