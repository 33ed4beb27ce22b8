//! Attribute Filter Engine
//!
//! Decides, per request, which identity attributes and which of their
//! values may be released to a relying party. Policies gate on request
//! context through [`PolicyRequirementRule`]s and select values through
//! [`Matcher`]s; the [`AttributeFilterEngine`] reconciles permitted and
//! denied values with deny taking precedence.
//!
//! The configured rule graph is immutable once initialized and may be
//! shared across threads. All per-request state lives in the
//! [`FilterContext`] and [`WorkContext`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute_rule;
pub mod compare;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod metadata;
pub mod policy;
pub mod rule;
pub mod script;

pub use attribute_rule::AttributeRule;
pub use compare::{RegexCompare, StringCompare, ValueCompare};
pub use config::{AttributeRuleConfig, EngineConfig, MatcherConfig, PolicyConfig, RuleConfig};
pub use context::{FilterContext, MetadataLookup, ProfileContextLookup, ValueSet, WorkContext};
pub use engine::{AttributeFilterEngine, FilterOutcome};
pub use error::{FilterError, FilterResult};
pub use matcher::{MappedMetadataMatch, Matcher, MatcherKind, MetadataMatch};
pub use metadata::MetadataContext;
pub use policy::AttributeFilterPolicy;
pub use rule::{ContextField, MetadataTarget, PolicyRequirementRule, RuleKind};
#[cfg(feature = "cel")]
pub use script::CelScript;
pub use script::{NativeScript, ScriptBindings, ScriptError, ScriptEvaluator, ScriptHook};
