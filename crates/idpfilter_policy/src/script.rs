//! Script hook for scripted rules and matchers.
//!
//! The scripting language is pluggable through [`ScriptEvaluator`]. Every
//! evaluation runs behind [`ScriptHook::evaluate_bool`], which converts
//! errors, non-boolean results and panics into [`ScriptError`] so that
//! callers can map them to FAIL.

use crate::context::{FilterContext, ProfileContextLookup};
use idpfilter_core::{AttributeValue, IdpAttribute};
use serde_json::{Value, json};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Script boundary error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// Script source did not compile
    #[error("script compilation failed: {0}")]
    Compile(String),

    /// Bindings could not be converted for the script engine
    #[error("script bindings could not be prepared: {0}")]
    Bindings(String),

    /// Script raised an error
    #[error("script execution failed: {0}")]
    Execution(String),

    /// Script returned something other than a boolean
    #[error("script returned a non-boolean value: {0}")]
    NotBoolean(String),

    /// Script engine panicked
    #[error("script engine panicked")]
    Panicked,
}

/// Names and values visible to a script
#[derive(Debug, Clone, Copy)]
pub struct ScriptBindings<'a> {
    /// The request's filter context
    pub filter_context: &'a FilterContext,
    /// Injected configuration object
    pub custom: Option<&'a Value>,
    /// Profile request context, if one was located
    pub profile_context: Option<&'a Value>,
    /// Attribute under evaluation (matchers only)
    pub attribute: Option<&'a IdpAttribute>,
    /// Value under evaluation (matchers only)
    pub value: Option<&'a AttributeValue>,
}

impl ScriptBindings<'_> {
    /// Bindings as one JSON object keyed by binding name
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "filterContext": self.filter_context.script_view(),
            "custom": self.custom.cloned().unwrap_or(Value::Null),
            "profileContext": self.profile_context.cloned().unwrap_or(Value::Null),
            "attribute": self.attribute.map_or(Value::Null, attribute_view),
            "value": self.value.map_or(Value::Null, |v| Value::String(v.to_string())),
        })
    }
}

fn attribute_view(attribute: &IdpAttribute) -> Value {
    json!({
        "id": attribute.id(),
        "values": attribute.values().iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

/// A compiled script
pub trait ScriptEvaluator: Send + Sync {
    /// Run the script against the bindings
    ///
    /// # Errors
    ///
    /// Returns error if the script fails
    fn evaluate(&self, bindings: &ScriptBindings<'_>) -> Result<Value, ScriptError>;

    /// Short description for logs
    fn describe(&self) -> String {
        "script".to_string()
    }
}

type NativeFn = dyn Fn(&ScriptBindings<'_>) -> Result<Value, ScriptError> + Send + Sync;

/// A script implemented as a Rust closure
#[derive(Clone)]
pub struct NativeScript {
    name: String,
    f: Arc<NativeFn>,
}

impl NativeScript {
    /// Wrap a closure
    #[must_use]
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ScriptBindings<'_>) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl ScriptEvaluator for NativeScript {
    fn evaluate(&self, bindings: &ScriptBindings<'_>) -> Result<Value, ScriptError> {
        (self.f)(bindings)
    }

    fn describe(&self) -> String {
        format!("native script '{}'", self.name)
    }
}

impl std::fmt::Debug for NativeScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeScript").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A script plus the extra inputs it is bound with
#[derive(Clone)]
pub struct ScriptHook {
    script: Arc<dyn ScriptEvaluator>,
    custom: Option<Value>,
    profile_lookup: Option<ProfileContextLookup>,
}

impl ScriptHook {
    /// Create a hook with no custom object
    #[must_use]
    pub fn new(script: Arc<dyn ScriptEvaluator>) -> Self {
        Self {
            script,
            custom: None,
            profile_lookup: None,
        }
    }

    /// Set the `custom` binding
    #[must_use]
    pub fn with_custom(mut self, custom: Value) -> Self {
        self.custom = Some(custom);
        self
    }

    /// Set the strategy locating the `profileContext` binding. Without one,
    /// the filter context's own profile context is used.
    #[must_use]
    pub fn with_profile_lookup(mut self, lookup: ProfileContextLookup) -> Self {
        self.profile_lookup = Some(lookup);
        self
    }

    /// Description of the wrapped script
    #[must_use]
    pub fn describe(&self) -> String {
        self.script.describe()
    }

    /// Run the script and require a boolean result
    ///
    /// # Errors
    ///
    /// Returns error if the script fails, panics, or returns a non-boolean
    pub fn evaluate_bool(
        &self,
        ctx: &FilterContext,
        attribute: Option<&IdpAttribute>,
        value: Option<&AttributeValue>,
    ) -> Result<bool, ScriptError> {
        let looked_up = self.profile_lookup.as_ref().and_then(|f| f(ctx));
        let bindings = ScriptBindings {
            filter_context: ctx,
            custom: self.custom.as_ref(),
            profile_context: looked_up.as_ref().or_else(|| ctx.profile_context()),
            attribute,
            value,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.script.evaluate(&bindings)))
            .map_err(|_| ScriptError::Panicked)??;

        match result {
            Value::Bool(b) => Ok(b),
            other => Err(ScriptError::NotBoolean(other.to_string())),
        }
    }
}

impl std::fmt::Debug for ScriptHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHook")
            .field("script", &self.script.describe())
            .field("custom", &self.custom)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "cel")]
pub use cel::CelScript;

#[cfg(feature = "cel")]
mod cel {
    use super::{ScriptBindings, ScriptError, ScriptEvaluator};
    use cel_interpreter::{Context, Program, Value as CelValue};
    use serde_json::Value;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    /// A CEL expression evaluated with the script bindings as variables
    #[derive(Clone)]
    pub struct CelScript {
        source: String,
        program: Arc<Program>,
    }

    impl CelScript {
        /// Compile an expression
        ///
        /// # Errors
        ///
        /// Returns `Compile` if the expression is malformed
        pub fn compile(source: impl Into<String>) -> Result<Self, ScriptError> {
            let source = source.into();
            // The parser can panic on some malformed input.
            let program = panic::catch_unwind(AssertUnwindSafe(|| Program::compile(&source)))
                .map_err(|_| ScriptError::Compile("malformed expression".to_string()))?
                .map_err(|e| ScriptError::Compile(e.to_string()))?;
            Ok(Self {
                source,
                program: Arc::new(program),
            })
        }

        /// Expression source
        #[must_use]
        pub fn source(&self) -> &str {
            &self.source
        }
    }

    impl ScriptEvaluator for CelScript {
        fn evaluate(&self, bindings: &ScriptBindings<'_>) -> Result<Value, ScriptError> {
            let vars = bindings.to_json();
            let mut ctx = Context::default();
            if let Value::Object(map) = &vars {
                for (name, value) in map {
                    ctx.add_variable(name.as_str(), value)
                        .map_err(|e| ScriptError::Bindings(e.to_string()))?;
                }
            }

            let result = self
                .program
                .execute(&ctx)
                .map_err(|e| ScriptError::Execution(e.to_string()))?;

            Ok(match result {
                CelValue::Bool(b) => Value::Bool(b),
                CelValue::Null => Value::Null,
                other => Value::String(format!("{:?}", other)),
            })
        }

        fn describe(&self) -> String {
            format!("CEL '{}'", self.source)
        }
    }

    impl std::fmt::Debug for CelScript {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CelScript").field("source", &self.source).finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(f: impl Fn(&ScriptBindings<'_>) -> Result<Value, ScriptError> + Send + Sync + 'static) -> ScriptHook {
        ScriptHook::new(Arc::new(NativeScript::new("test", f)))
    }

    #[test]
    fn test_boolean_result() {
        let ctx = FilterContext::new().with_principal("jsmith");
        let h = hook(|b| Ok(Value::Bool(b.filter_context.principal() == Some("jsmith"))));
        assert_eq!(h.evaluate_bool(&ctx, None, None), Ok(true));
    }

    #[test]
    fn test_non_boolean_is_error() {
        let ctx = FilterContext::new();
        let h = hook(|_| Ok(json!("yes")));
        assert!(matches!(h.evaluate_bool(&ctx, None, None), Err(ScriptError::NotBoolean(_))));

        let h = hook(|_| Ok(Value::Null));
        assert!(h.evaluate_bool(&ctx, None, None).is_err());
    }

    #[test]
    fn test_panic_is_caught() {
        let ctx = FilterContext::new();
        let h = hook(|_| panic!("boom"));
        assert_eq!(h.evaluate_bool(&ctx, None, None), Err(ScriptError::Panicked));
    }

    #[test]
    fn test_custom_and_profile_bindings() {
        let ctx = FilterContext::new().with_profile_context(json!({"relyingPartyId": "sp"}));
        let h = hook(|b| {
            let custom_ok = b.custom == Some(&json!(7));
            let profile_ok = b.profile_context.map(|p| p["relyingPartyId"] == "sp").unwrap_or(false);
            Ok(Value::Bool(custom_ok && profile_ok))
        })
        .with_custom(json!(7));
        assert_eq!(h.evaluate_bool(&ctx, None, None), Ok(true));
    }

    #[test]
    fn test_profile_lookup_overrides_context() {
        let ctx = FilterContext::new().with_profile_context(json!("inline"));
        let h = hook(|b| Ok(Value::Bool(b.profile_context == Some(&json!("looked-up")))))
            .with_profile_lookup(Arc::new(|_: &FilterContext| Some(json!("looked-up"))));
        assert_eq!(h.evaluate_bool(&ctx, None, None), Ok(true));
    }

    #[test]
    fn test_bindings_json() {
        let ctx = FilterContext::new();
        let attr = IdpAttribute::new("uid").unwrap().with_strings(["jsmith"]);
        let value = AttributeValue::string("jsmith");
        let bindings = ScriptBindings {
            filter_context: &ctx,
            custom: None,
            profile_context: None,
            attribute: Some(&attr),
            value: Some(&value),
        };
        let j = bindings.to_json();
        assert_eq!(j["attribute"]["id"], "uid");
        assert_eq!(j["value"], "jsmith");
        assert!(j["custom"].is_null());
    }

    #[cfg(feature = "cel")]
    #[test]
    fn test_cel_script() {
        let ctx = FilterContext::new().with_principal("jsmith");
        let script = CelScript::compile("filterContext.principal == 'jsmith'").unwrap();
        let h = ScriptHook::new(Arc::new(script));
        assert_eq!(h.evaluate_bool(&ctx, None, None), Ok(true));
    }

    #[cfg(feature = "cel")]
    #[test]
    fn test_cel_non_boolean() {
        let ctx = FilterContext::new();
        let script = CelScript::compile("1 + 2").unwrap();
        let h = ScriptHook::new(Arc::new(script));
        assert!(matches!(h.evaluate_bool(&ctx, None, None), Err(ScriptError::NotBoolean(_))));
    }

    #[cfg(feature = "cel")]
    #[test]
    fn test_cel_compile_error() {
        assert!(CelScript::compile("(((").is_err());
    }
}
